use super::{AlpacaDevice, tick};
use crate::api::{AltAz, Motion, PointingAltAz, Roof};
use crate::azimuth::{adjust_azimuth, azimuth_distance, has_arrived};
use crate::client::alpaca_params;
use crate::config::{DeviceConfig, seconds};
use crate::events::{DriverEvent, EventBus, Interface};
use crate::motion::{MotionGuard, MotionKind, MotionState, MotionStatus, Outcome, SingleFlight};
use crate::{Error, Result};
use async_trait::async_trait;
use num_enum::TryFromPrimitive;
use serde::Deserialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Shutter state as reported by `ShutterStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, derive_more::Display)]
#[repr(i32)]
pub enum ShutterState {
    /// Fully open.
    Open = 0,
    /// Fully closed.
    Closed = 1,
    /// Opening.
    Opening = 2,
    /// Closing.
    Closing = 3,
    /// Failed to move.
    Error = 4,
}

/// Tunables of the [`Dome`] driver.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DomeOptions {
    /// Azimuth tolerance in degrees.
    pub tolerance: f64,
    /// Azimuth the dome turns to while closing.
    pub park_azimuth: f64,
    /// Interval between shutter and azimuth polls during a motion.
    #[serde(with = "seconds")]
    pub poll_interval: Duration,
    /// Interval of the background azimuth update.
    #[serde(with = "seconds")]
    pub azimuth_interval: Duration,
    /// Interval between position checks while following another device.
    #[serde(with = "seconds")]
    pub follow_interval: Duration,
}

impl Default for DomeOptions {
    fn default() -> Self {
        Self {
            tolerance: 3.0,
            park_azimuth: 180.0,
            poll_interval: Duration::from_secs(1),
            azimuth_interval: Duration::from_secs(2),
            follow_interval: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Default)]
struct Position {
    altitude: f64,
    azimuth: f64,
    target_azimuth: Option<f64>,
}

/// Driver for an Alpaca dome with a shutter and a rotating azimuth.
///
/// The shutter and the azimuth are independent motions: opening the roof
/// doesn't wait for a running azimuth move and vice versa.
#[derive(Debug)]
pub struct Dome {
    device: AlpacaDevice,
    options: DomeOptions,
    state: MotionState,
    shutter: SingleFlight,
    pointing: SingleFlight,
    position: Mutex<Position>,
    follow: Mutex<Option<CancellationToken>>,
    events: EventBus,
}

impl Dome {
    /// Create the driver without contacting the device yet.
    pub fn new(config: &DeviceConfig, options: DomeOptions, events: EventBus) -> Result<Self> {
        Ok(Self {
            device: AlpacaDevice::new(config)?,
            options,
            state: MotionState::new(Interface::Dome, events.clone()),
            shutter: SingleFlight::new(MotionKind::Shutter),
            pointing: SingleFlight::new(MotionKind::Pointing),
            position: Mutex::default(),
            follow: Mutex::default(),
            events,
        })
    }

    /// The underlying Alpaca device.
    pub const fn device(&self) -> &AlpacaDevice {
        &self.device
    }

    /// Connect, start tracking the azimuth and report the dome as idle.
    pub async fn open(self: &Arc<Self>) {
        let _ = self.device.open().await;

        let dome = Arc::downgrade(self);
        let interval = self.options.azimuth_interval;
        self.device.spawn("azimuth update", |shutdown| async move {
            loop {
                let Some(dome) = Weak::upgrade(&dome) else {
                    break;
                };
                if let Err(err) = dome.update_azimuth().await {
                    tracing::trace!(%err, "Could not update dome azimuth");
                }
                drop(dome);
                if !tick(&shutdown, interval).await {
                    break;
                }
            }
        });

        self.state.set(MotionStatus::Idle);
    }

    /// Stop following, any azimuth move and all background tasks.
    pub async fn close(&self) {
        self.unfollow();
        self.pointing.abort();
        self.device.close().await;
    }

    /// Keep the dome aligned with another device's azimuth, replacing any previous source.
    ///
    /// Every follow interval the source position is read and, when the dome
    /// is ready and off by more than the tolerance, the dome moves there.
    pub fn follow(self: &Arc<Self>, source: Arc<dyn PointingAltAz>) {
        let token = self.device.shutdown_token().child_token();
        if let Some(previous) = self.follow_token().replace(token.clone()) {
            previous.cancel();
        }
        tracing::info!(?source, "Following device");

        let dome = Arc::downgrade(self);
        let interval = self.options.follow_interval;
        self.device.spawn("follow", |_| async move {
            while tick(&token, interval).await {
                let Some(dome) = Weak::upgrade(&dome) else {
                    break;
                };
                tokio::select! {
                    () = token.cancelled() => break,
                    () = dome.follow_step(&*source) => {}
                }
            }
        });
    }

    /// Stop following.
    pub fn unfollow(&self) {
        if let Some(token) = self.follow_token().take() {
            token.cancel();
            tracing::info!("Stopped following");
        }
    }

    /// Whether the dome follows another device.
    pub fn is_following(&self) -> bool {
        self.follow_token()
            .as_ref()
            .is_some_and(|token| !token.is_cancelled())
    }

    fn follow_token(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.follow.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn position(&self) -> MutexGuard<'_, Position> {
        self.position.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn azimuth(&self) -> f64 {
        self.position().azimuth
    }

    async fn update_azimuth(&self) -> Result<f64> {
        let azimuth = adjust_azimuth(self.device.get::<f64>("Azimuth").await?);
        self.position().azimuth = azimuth;
        Ok(azimuth)
    }

    async fn follow_step(&self, source: &dyn PointingAltAz) {
        if !self.is_ready() {
            return;
        }
        let target = match source.get_altaz().await {
            Ok(target) => target,
            Err(err) => {
                tracing::warn!(%err, "Could not read position of followed device");
                return;
            }
        };
        if has_arrived(self.azimuth(), target.az, self.options.tolerance) {
            return;
        }
        if let Err(err) = self.move_altaz(target).await {
            tracing::warn!(%err, "Could not follow device");
        }
    }

    async fn shutter_is(&self, expected: ShutterState) -> Result<bool> {
        let raw = self.device.get::<i32>("ShutterStatus").await?;
        match ShutterState::try_from(raw) {
            Ok(ShutterState::Error) => Err(Error::ShutterError),
            Ok(state) => Ok(state == expected),
            Err(_) => Err(Error::InvalidValue {
                name: "ShutterStatus".to_owned(),
                value: raw.into(),
            }),
        }
    }

    async fn wait_for_shutter(&self, motion: &MotionGuard<'_>, expected: ShutterState) -> Result<Outcome> {
        motion
            .poll_until(self.options.poll_interval, || self.shutter_is(expected))
            .await
    }

    async fn slew_azimuth(&self, motion: &MotionGuard<'_>, azimuth: f64) -> Result<Outcome> {
        self.device
            .put(
                "SlewToAzimuth",
                alpaca_params! { Azimuth: adjust_azimuth(azimuth) },
            )
            .await?;

        let mut polls = 0_u32;
        let outcome = motion
            .poll_until(self.options.poll_interval, || {
                let log_progress = polls % 10 == 0;
                polls += 1;
                async move {
                    let current = self.update_azimuth().await?;
                    let arrived = has_arrived(current, azimuth, self.options.tolerance);
                    if log_progress && !arrived {
                        tracing::info!(
                            "Moving dome from current az={current:.2}° to {azimuth:.2}° ({:.2}° left)...",
                            azimuth_distance(current, azimuth)
                        );
                    }
                    Ok::<_, Error>(arrived)
                }
            })
            .await?;

        if outcome == Outcome::Completed {
            tracing::info!("Moved to az={azimuth:.2}");
        }
        Ok(outcome)
    }
}

#[expect(clippy::float_cmp, reason = "repeated requests carry the exact same value")]
fn is_same_target(previous: Option<f64>, azimuth: f64) -> bool {
    matches!(previous, Some(previous) if previous == azimuth)
}

#[async_trait]
impl Motion for Dome {
    /// Open the shutter.
    async fn init(&self) -> Result<Outcome> {
        if self.state.get() == MotionStatus::Initializing {
            tracing::info!("Dome is already opening");
            return Ok(Outcome::Skipped);
        }

        let motion = self.shutter.begin(&self.state).await;
        self.device.ensure_connected()?;

        tracing::info!("Opening dome...");
        motion.set_status(MotionStatus::Initializing);

        let result = async {
            self.device.put("OpenShutter", alpaca_params! {}).await?;
            self.wait_for_shutter(&motion, ShutterState::Open).await
        }
        .await;

        let outcome = motion.finish("opening dome", result, MotionStatus::Positioned)?;
        if outcome == Outcome::Completed {
            tracing::info!("Dome opened");
            self.events.send(DriverEvent::RoofOpened);
        }
        Ok(outcome)
    }

    /// Close the shutter and turn to the park azimuth.
    async fn park(&self) -> Result<Outcome> {
        if self.state.get() == MotionStatus::Parking {
            tracing::info!("Dome is already closing");
            return Ok(Outcome::Skipped);
        }

        let motion = self.shutter.begin(&self.state).await;
        self.device.ensure_connected()?;

        tracing::info!("Closing dome...");
        motion.set_status(MotionStatus::Parking);
        self.events.send(DriverEvent::RoofClosing);
        // The dome turns to the park azimuth below.
        self.pointing.abort();

        let result = async {
            self.device.put("CloseShutter", alpaca_params! {}).await?;
            self.device
                .put(
                    "SlewToAzimuth",
                    alpaca_params! { Azimuth: adjust_azimuth(self.options.park_azimuth) },
                )
                .await?;
            self.wait_for_shutter(&motion, ShutterState::Closed).await
        }
        .await;

        let outcome = motion.finish("closing dome", result, MotionStatus::Parked)?;
        if outcome == Outcome::Completed {
            tracing::info!("Dome closed");
            self.position().target_azimuth = None;
        }
        Ok(outcome)
    }

    /// Abort shutter and azimuth motions at their next poll; nothing is sent to the device.
    async fn stop_motion(&self) -> Result {
        self.shutter.abort();
        self.pointing.abort();
        Ok(())
    }

    fn motion_status(&self) -> MotionStatus {
        self.state.get()
    }

    fn is_ready(&self) -> bool {
        self.state.is_ready(self.device.is_connected())
    }
}

#[async_trait]
impl PointingAltAz for Dome {
    async fn move_altaz(&self, target: AltAz) -> Result<Outcome> {
        if !self.is_ready() {
            tracing::debug!(status = %self.state.get(), "Dome not ready, ignoring move");
            return Ok(Outcome::Skipped);
        }

        let large_move = {
            let mut position = self.position();
            if is_same_target(position.target_azimuth, target.az) {
                return Ok(Outcome::Skipped);
            }
            position.target_azimuth = Some(target.az);
            azimuth_distance(position.azimuth, target.az) > 2.0 * self.options.tolerance
        };
        let tracking = self.is_following() && !large_move;

        let motion = self.pointing.begin(&self.state).await;
        self.position().altitude = target.alt;
        motion.set_status(if tracking {
            MotionStatus::Tracking
        } else {
            MotionStatus::Slewing
        });

        let result = self.slew_azimuth(&motion, target.az).await;
        if !matches!(result, Ok(Outcome::Completed)) {
            // Let the same target be requested again.
            self.position().target_azimuth = None;
        }

        let done = if self.is_following() {
            MotionStatus::Tracking
        } else {
            MotionStatus::Positioned
        };
        motion.finish("moving dome", result, done)
    }

    /// Last commanded altitude and the latest known azimuth.
    async fn get_altaz(&self) -> Result<AltAz> {
        let position = self.position();
        Ok(AltAz::new(position.altitude, position.azimuth))
    }
}

#[async_trait]
impl Roof for Dome {
    async fn is_open(&self) -> Result<bool> {
        self.shutter_is(ShutterState::Open).await
    }
}

#[cfg(test)]
mod tests {
    use super::{Dome, DomeOptions};
    use crate::api::{AltAz, Motion, PointingAltAz, Roof};
    use crate::events::{DriverEvent, EventBus};
    use crate::motion::{MotionStatus, Outcome};
    use crate::test_utils::MockAlpaca;
    use crate::Error;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn options() -> DomeOptions {
        DomeOptions {
            poll_interval: Duration::from_millis(10),
            azimuth_interval: Duration::from_millis(20),
            follow_interval: Duration::from_millis(20),
            ..DomeOptions::default()
        }
    }

    async fn mock_dome() -> MockAlpaca {
        let mock = MockAlpaca::start("dome").await;
        mock.value("Connected", json!(true)).await;
        mock.ok("PUT", "SlewToAzimuth").await;
        mock
    }

    async fn open(mock: &MockAlpaca, events: EventBus) -> eyre::Result<Arc<Dome>> {
        let dome = Arc::new(Dome::new(&mock.config(), options(), events)?);
        dome.open().await;
        Ok(dome)
    }

    fn drain(rx: &mut tokio::sync::broadcast::Receiver<DriverEvent>) -> Vec<DriverEvent> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    #[tokio::test]
    async fn park_closes_and_turns_south() -> eyre::Result<()> {
        let mock = mock_dome().await;
        mock.value("Azimuth", json!(0.0)).await;
        mock.ok("PUT", "CloseShutter").await;
        mock.sequence("ShutterStatus", [json!(3), json!(3), json!(1)])
            .await;

        let events = EventBus::default();
        let mut rx = events.subscribe();
        let dome = open(&mock, events).await?;

        assert_eq!(dome.park().await?, Outcome::Completed);
        assert_eq!(dome.motion_status(), MotionStatus::Parked);
        assert!(!dome.is_ready());

        let slews = mock.requests("PUT", "SlewToAzimuth").await;
        assert_eq!(slews.len(), 1);
        assert!(slews[0].ends_with("Azimuth=0"), "{}", slews[0]);
        assert_eq!(mock.requests("PUT", "CloseShutter").await.len(), 1);

        let events = drain(&mut rx);
        assert!(events.contains(&DriverEvent::RoofClosing));
        assert!(events.contains(&DriverEvent::MotionStatusChanged {
            interface: crate::events::Interface::Dome,
            status: MotionStatus::Parked,
        }));
        dome.close().await;
        Ok(())
    }

    #[tokio::test]
    async fn shutter_error_fails_park() -> eyre::Result<()> {
        let mock = mock_dome().await;
        mock.value("Azimuth", json!(0.0)).await;
        mock.ok("PUT", "CloseShutter").await;
        mock.sequence("ShutterStatus", [json!(3), json!(4)]).await;

        let dome = open(&mock, EventBus::default()).await?;
        let result = dome.park().await;
        assert!(matches!(
            result,
            Err(Error::MotionFailed { ref source, .. }) if matches!(**source, Error::ShutterError)
        ));
        assert_eq!(dome.motion_status(), MotionStatus::Unknown);
        dome.close().await;
        Ok(())
    }

    #[tokio::test]
    async fn init_opens_roof() -> eyre::Result<()> {
        let mock = mock_dome().await;
        mock.value("Azimuth", json!(0.0)).await;
        mock.ok("PUT", "OpenShutter").await;
        mock.sequence("ShutterStatus", [json!(2), json!(0)]).await;

        let events = EventBus::default();
        let mut rx = events.subscribe();
        let dome = open(&mock, events).await?;

        assert_eq!(dome.init().await?, Outcome::Completed);
        assert_eq!(dome.motion_status(), MotionStatus::Positioned);
        assert!(dome.is_open().await?);
        assert!(drain(&mut rx).contains(&DriverEvent::RoofOpened));
        dome.close().await;
        Ok(())
    }

    #[tokio::test]
    async fn move_waits_for_azimuth_across_north() -> eyre::Result<()> {
        let mock = mock_dome().await;
        // Raw azimuths are west of south: 170 -> 350, 178 -> 358, 181 -> 1.
        mock.sequence("Azimuth", [json!(170.0), json!(170.0), json!(178.0), json!(181.0)])
            .await;

        let dome = open(&mock, EventBus::default()).await?;
        let outcome = dome.move_altaz(AltAz::new(40.0, 2.0)).await?;
        assert_eq!(outcome, Outcome::Completed);
        assert_eq!(dome.motion_status(), MotionStatus::Positioned);

        let slews = mock.requests("PUT", "SlewToAzimuth").await;
        assert!(slews[0].ends_with("Azimuth=182"), "{}", slews[0]);

        let position = dome.get_altaz().await?;
        assert!((position.alt - 40.0).abs() < f64::EPSILON);
        assert!(position.az <= 3.0 || position.az >= 357.0);
        dome.close().await;
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_move_is_ignored() -> eyre::Result<()> {
        let mock = mock_dome().await;
        mock.value("Azimuth", json!(270.0)).await;

        let dome = open(&mock, EventBus::default()).await?;
        assert_eq!(dome.move_altaz(AltAz::new(30.0, 90.0)).await?, Outcome::Completed);
        assert_eq!(dome.move_altaz(AltAz::new(30.0, 90.0)).await?, Outcome::Skipped);
        assert_eq!(mock.requests("PUT", "SlewToAzimuth").await.len(), 1);
        dome.close().await;
        Ok(())
    }

    #[tokio::test]
    async fn move_ignored_when_not_ready() -> eyre::Result<()> {
        let mock = MockAlpaca::start("dome").await;
        mock.on("GET", "Connected")
            .respond_with(wiremock::ResponseTemplate::new(500))
            .mount(&mock.server)
            .await;

        let dome = open(&mock, EventBus::default()).await?;
        assert_eq!(dome.move_altaz(AltAz::new(30.0, 90.0)).await?, Outcome::Skipped);
        assert!(mock.requests("PUT", "SlewToAzimuth").await.is_empty());
        dome.close().await;
        Ok(())
    }

    #[tokio::test]
    async fn stop_aborts_azimuth_move() -> eyre::Result<()> {
        let mock = mock_dome().await;
        mock.value("Azimuth", json!(0.0)).await;

        let dome = open(&mock, EventBus::default()).await?;
        let slew = tokio::spawn({
            let dome = Arc::clone(&dome);
            async move { dome.move_altaz(AltAz::new(30.0, 90.0)).await }
        });

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(dome.motion_status(), MotionStatus::Slewing);
        dome.stop_motion().await?;

        assert_eq!(slew.await??, Outcome::Aborted);
        assert_eq!(dome.motion_status(), MotionStatus::Idle);

        // The aborted target may be requested again.
        let retry = tokio::spawn({
            let dome = Arc::clone(&dome);
            async move { dome.move_altaz(AltAz::new(30.0, 90.0)).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        dome.stop_motion().await?;
        assert_eq!(retry.await??, Outcome::Aborted);
        assert_eq!(mock.requests("PUT", "SlewToAzimuth").await.len(), 2);
        dome.close().await;
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_duplicate_move_is_ignored() -> eyre::Result<()> {
        let mock = mock_dome().await;
        mock.value("Azimuth", json!(0.0)).await;

        let dome = open(&mock, EventBus::default()).await?;
        let slew = tokio::spawn({
            let dome = Arc::clone(&dome);
            async move { dome.move_altaz(AltAz::new(30.0, 90.0)).await }
        });

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(dome.motion_status(), MotionStatus::Slewing);

        let duplicate = tokio::time::timeout(
            Duration::from_secs(1),
            dome.move_altaz(AltAz::new(30.0, 90.0)),
        )
        .await??;
        assert_eq!(duplicate, Outcome::Skipped);
        assert_eq!(mock.requests("PUT", "SlewToAzimuth").await.len(), 1);

        dome.stop_motion().await?;
        assert_eq!(slew.await??, Outcome::Aborted);
        dome.close().await;
        Ok(())
    }

    #[tokio::test]
    async fn park_wins_over_running_move() -> eyre::Result<()> {
        let mock = mock_dome().await;
        mock.value("Azimuth", json!(0.0)).await;
        mock.ok("PUT", "CloseShutter").await;
        mock.sequence("ShutterStatus", [json!(3), json!(1)]).await;

        let dome = open(&mock, EventBus::default()).await?;
        let slew = tokio::spawn({
            let dome = Arc::clone(&dome);
            async move { dome.move_altaz(AltAz::new(30.0, 90.0)).await }
        });

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(dome.motion_status(), MotionStatus::Slewing);

        assert_eq!(dome.park().await?, Outcome::Completed);
        assert_eq!(slew.await??, Outcome::Aborted);
        assert_eq!(dome.motion_status(), MotionStatus::Parked);
        assert!(!dome.is_ready());
        dome.close().await;
        Ok(())
    }

    #[derive(Debug)]
    struct FixedPointing(AltAz);

    #[async_trait::async_trait]
    impl Motion for FixedPointing {
        async fn init(&self) -> crate::Result<Outcome> {
            Ok(Outcome::Skipped)
        }

        async fn park(&self) -> crate::Result<Outcome> {
            Ok(Outcome::Skipped)
        }

        async fn stop_motion(&self) -> crate::Result {
            Ok(())
        }

        fn motion_status(&self) -> MotionStatus {
            MotionStatus::Tracking
        }

        fn is_ready(&self) -> bool {
            true
        }
    }

    #[async_trait::async_trait]
    impl PointingAltAz for FixedPointing {
        async fn move_altaz(&self, _target: AltAz) -> crate::Result<Outcome> {
            Ok(Outcome::Skipped)
        }

        async fn get_altaz(&self) -> crate::Result<AltAz> {
            Ok(self.0)
        }
    }

    #[tokio::test]
    async fn follows_another_device() -> eyre::Result<()> {
        let mock = mock_dome().await;
        // Adjusted azimuth 100 once the dome starts turning.
        mock.sequence("Azimuth", [json!(0.0), json!(280.0)]).await;

        let options = DomeOptions {
            azimuth_interval: Duration::from_secs(60),
            ..options()
        };
        let dome = Arc::new(Dome::new(&mock.config(), options, EventBus::default())?);
        dome.open().await;
        dome.follow(Arc::new(FixedPointing(AltAz::new(50.0, 100.0))));
        assert!(dome.is_following());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(dome.motion_status(), MotionStatus::Tracking);
        assert_eq!(mock.requests("PUT", "SlewToAzimuth").await.len(), 1);

        dome.unfollow();
        assert!(!dome.is_following());
        dome.close().await;
        Ok(())
    }

    #[tokio::test]
    async fn close_stops_a_follow_move() -> eyre::Result<()> {
        let mock = mock_dome().await;
        // Stuck at 180, never reaching the followed azimuth.
        mock.value("Azimuth", json!(0.0)).await;

        let options = DomeOptions {
            azimuth_interval: Duration::from_secs(60),
            ..options()
        };
        let dome = Arc::new(Dome::new(&mock.config(), options, EventBus::default())?);
        dome.open().await;
        dome.follow(Arc::new(FixedPointing(AltAz::new(50.0, 80.0))));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(dome.motion_status(), MotionStatus::Slewing);

        tokio::time::timeout(Duration::from_secs(3), dome.close()).await?;
        assert!(!dome.is_following());
        Ok(())
    }
}
