use super::AlpacaDevice;
use crate::api::{self, Motion};
use crate::client::alpaca_params;
use crate::config::{DeviceConfig, seconds};
use crate::events::{EventBus, Interface};
use crate::motion::{MotionGuard, MotionKind, MotionState, MotionStatus, Outcome, SingleFlight};
use crate::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Tunables of the [`Focuser`] driver.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FocuserOptions {
    /// Interval between `Position` polls during a move.
    #[serde(with = "seconds")]
    pub poll_interval: Duration,
    /// Distance in steps at which a move counts as finished.
    pub tolerance: u32,
}

impl Default for FocuserOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            tolerance: 10,
        }
    }
}

/// Driver for an Alpaca focuser with absolute positioning.
///
/// Focus values are in the focuser's physical units, converted to steps
/// through the device's `StepSize`.
#[derive(Debug)]
pub struct Focuser {
    device: AlpacaDevice,
    options: FocuserOptions,
    state: MotionState,
    focus: SingleFlight,
    offset: Mutex<f64>,
}

impl Focuser {
    /// Create the driver without contacting the device yet.
    pub fn new(config: &DeviceConfig, options: FocuserOptions, events: EventBus) -> Result<Self> {
        Ok(Self {
            device: AlpacaDevice::new(config)?,
            options,
            state: MotionState::new(Interface::Focuser, events),
            focus: SingleFlight::new(MotionKind::Focus),
            offset: Mutex::new(0.0),
        })
    }

    /// The underlying Alpaca device.
    pub const fn device(&self) -> &AlpacaDevice {
        &self.device
    }

    /// Connect and report the focuser as idle.
    pub async fn open(&self) {
        let _ = self.device.open().await;
        self.state.set(MotionStatus::Idle);
    }

    /// Stop the background tasks.
    pub async fn close(&self) {
        self.device.close().await;
    }

    fn offset(&self) -> f64 {
        *self.offset.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_offset(&self, offset: f64) {
        *self.offset.lock().unwrap_or_else(PoisonError::into_inner) = offset;
    }

    async fn step_size(&self) -> Result<f64> {
        let step_size = self.device.get::<f64>("StepSize").await?;
        if step_size.is_finite() && step_size > 0.0 {
            Ok(step_size)
        } else {
            Err(Error::InvalidValue {
                name: "StepSize".to_owned(),
                value: step_size.into(),
            })
        }
    }

    async fn move_to(&self, focus: f64) -> Result<Outcome> {
        let motion = self.focus.begin(&self.state).await;
        let result = self.travel(&motion, focus).await;
        let outcome = motion.finish("setting focus", result, MotionStatus::Positioned)?;
        if outcome == Outcome::Completed {
            tracing::info!("Reached new focus of {focus:.2}");
        }
        Ok(outcome)
    }

    async fn travel(&self, motion: &MotionGuard<'_>, focus: f64) -> Result<Outcome> {
        let step_size = self.step_size().await?;
        let target = focus_to_steps(focus, step_size)?;

        tracing::info!("Moving focus to {focus:.2}...");
        motion.set_status(MotionStatus::Slewing);
        self.device
            .put("Move", alpaca_params! { Position: target })
            .await?;

        let device = &self.device;
        let tolerance = self.options.tolerance;
        motion
            .poll_until(self.options.poll_interval, move || async move {
                device
                    .get::<i32>("Position")
                    .await
                    .map(|position| position.abs_diff(target) <= tolerance)
            })
            .await
    }
}

fn focus_to_steps(focus: f64, step_size: f64) -> Result<i32> {
    let steps = (focus * step_size).round();
    if steps.is_finite() && steps >= f64::from(i32::MIN) && steps <= f64::from(i32::MAX) {
        #[expect(clippy::as_conversions, clippy::cast_possible_truncation)]
        let steps = steps as i32;
        Ok(steps)
    } else {
        Err(Error::InvalidValue {
            name: "Position".to_owned(),
            value: steps.into(),
        })
    }
}

#[async_trait]
impl Motion for Focuser {
    /// Focusers need no initialization.
    async fn init(&self) -> Result<Outcome> {
        Ok(Outcome::Skipped)
    }

    /// Focusers have no park position.
    async fn park(&self) -> Result<Outcome> {
        Ok(Outcome::Skipped)
    }

    async fn stop_motion(&self) -> Result {
        self.focus.abort();
        self.device.put("Halt", alpaca_params! {}).await
    }

    fn motion_status(&self) -> MotionStatus {
        self.state.get()
    }

    fn is_ready(&self) -> bool {
        self.state.is_ready(self.device.is_connected())
    }
}

#[async_trait]
impl api::Focuser for Focuser {
    async fn set_focus(&self, focus: f64) -> Result<Outcome> {
        self.set_offset(0.0);
        self.move_to(focus).await
    }

    async fn set_focus_offset(&self, offset: f64) -> Result<Outcome> {
        let focus = self.get_focus().await?;
        self.set_offset(offset);
        self.move_to(focus + offset).await
    }

    async fn get_focus(&self) -> Result<f64> {
        let (position, step_size) =
            futures::try_join!(self.device.get::<i32>("Position"), self.step_size())?;
        Ok(f64::from(position) / step_size - self.offset())
    }

    fn get_focus_offset(&self) -> f64 {
        self.offset()
    }
}
