use super::{AlpacaDevice, tick};
use crate::api::{AltAz, Motion, OffsetsRaDec, PointingAltAz, PointingRaDec, RaDec, SyncTarget};
use crate::azimuth::adjust_azimuth;
use crate::client::alpaca_params;
use crate::config::{DeviceConfig, seconds};
use crate::events::{DriverEvent, EventBus, Interface};
use crate::motion::{MotionGuard, MotionKind, MotionState, MotionStatus, Outcome, SingleFlight};
use crate::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

/// Tunables of the [`Telescope`] driver.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TelescopeOptions {
    /// Time to wait after a slew before reporting it as finished.
    #[serde(with = "seconds")]
    pub settle_time: Duration,
    /// Timeout of the `Park` request, which blocks until the mount is parked.
    #[serde(with = "seconds")]
    pub park_timeout: Duration,
    /// Interval between `Slewing` polls.
    #[serde(with = "seconds")]
    pub poll_interval: Duration,
    /// Interval of the status recovery task.
    #[serde(with = "seconds")]
    pub status_interval: Duration,
    /// Position the mount is moved to by `init`.
    pub init_position: AltAz,
}

impl Default for TelescopeOptions {
    fn default() -> Self {
        Self {
            settle_time: Duration::from_secs(3),
            park_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(1),
            status_interval: Duration::from_secs(5),
            init_position: AltAz::new(30.0, 180.0),
        }
    }
}

/// Driver for an Alpaca telescope mount.
#[derive(Debug)]
pub struct Telescope {
    device: AlpacaDevice,
    options: TelescopeOptions,
    state: MotionState,
    pointing: SingleFlight,
    offsets: Mutex<RaDec>,
    events: EventBus,
}

impl Telescope {
    /// Create the driver without contacting the device yet.
    pub fn new(config: &DeviceConfig, options: TelescopeOptions, events: EventBus) -> Result<Self> {
        Ok(Self {
            device: AlpacaDevice::new(config)?,
            options,
            state: MotionState::new(Interface::Telescope, events.clone()),
            pointing: SingleFlight::new(MotionKind::Pointing),
            offsets: Mutex::new(RaDec::new(0.0, 0.0)),
            events,
        })
    }

    /// The underlying Alpaca device.
    pub const fn device(&self) -> &AlpacaDevice {
        &self.device
    }

    /// Connect, derive the initial status and start the background tasks.
    pub async fn open(self: &Arc<Self>) {
        let _ = self.device.open().await;

        let status = self.read_status().await;
        self.state.set(status);

        let telescope = Arc::downgrade(self);
        let interval = self.options.status_interval;
        self.device.spawn("status recovery", |shutdown| async move {
            while tick(&shutdown, interval).await {
                let Some(telescope) = Weak::upgrade(&telescope) else {
                    break;
                };
                telescope.recover_status().await;
            }
        });
    }

    /// Stop the background tasks.
    pub async fn close(&self) {
        self.device.close().await;
    }

    async fn read_status(&self) -> MotionStatus {
        let flags = futures::try_join!(
            self.device.get::<bool>("AtPark"),
            self.device.get::<bool>("Slewing"),
            self.device.get::<bool>("Tracking"),
        );

        match flags {
            Ok((true, _, _)) => MotionStatus::Parked,
            Ok((false, true, _)) => MotionStatus::Slewing,
            Ok((false, false, true)) => MotionStatus::Tracking,
            Ok((false, false, false)) => MotionStatus::Idle,
            Err(err) => {
                tracing::error!(%err, "Could not determine telescope status");
                MotionStatus::Unknown
            }
        }
    }

    async fn recover_status(&self) {
        if self.state.get() != MotionStatus::Unknown || self.pointing.is_busy() {
            return;
        }
        let status = self.read_status().await;
        if status != MotionStatus::Unknown && self.state.replace_if(MotionStatus::Unknown, status) {
            tracing::info!(%status, "Recovered telescope status");
        }
    }

    fn offsets(&self) -> RaDec {
        *self.offsets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_offsets(&self, offsets: RaDec) {
        *self.offsets.lock().unwrap_or_else(PoisonError::into_inner) = offsets;
    }

    fn ensure_ready(&self) -> Result {
        self.device.ensure_connected()?;
        let status = self.state.get();
        if status.allows_motion() {
            Ok(())
        } else {
            Err(Error::NotReady(status))
        }
    }

    async fn wait_for_slew(&self, motion: &MotionGuard<'_>) -> Result<Outcome> {
        let device = &self.device;
        motion
            .poll_until(self.options.poll_interval, move || async move {
                device.get::<bool>("Slewing").await.map(|slewing| !slewing)
            })
            .await
    }

    async fn slew_altaz(&self, motion: &MotionGuard<'_>, target: AltAz) -> Result<Outcome> {
        self.set_offsets(RaDec::new(0.0, 0.0));

        self.device
            .put("Tracking", alpaca_params! { Tracking: false })
            .await?;
        self.device
            .put(
                "SlewToAltAzAsync",
                alpaca_params! {
                    Azimuth: adjust_azimuth(target.az),
                    Altitude: target.alt,
                },
            )
            .await?;

        if self.wait_for_slew(motion).await?.is_aborted() {
            return Ok(Outcome::Aborted);
        }

        self.device
            .put("Tracking", alpaca_params! { Tracking: false })
            .await?;
        Ok(motion.wait(self.options.settle_time).await)
    }

    async fn slew_radec(&self, motion: &MotionGuard<'_>, target: RaDec) -> Result<Outcome> {
        self.device
            .put("Tracking", alpaca_params! { Tracking: true })
            .await?;
        self.device
            .put(
                "SlewToCoordinatesAsync",
                alpaca_params! {
                    RightAscension: target.ra / 15.0,
                    Declination: target.dec,
                },
            )
            .await?;

        if self.wait_for_slew(motion).await?.is_aborted() {
            return Ok(Outcome::Aborted);
        }

        self.device
            .put("Tracking", alpaca_params! { Tracking: true })
            .await?;
        Ok(motion.wait(self.options.settle_time).await)
    }
}

#[async_trait]
impl Motion for Telescope {
    async fn init(&self) -> Result<Outcome> {
        if self.state.get() == MotionStatus::Initializing {
            tracing::info!("Telescope is already initializing");
            return Ok(Outcome::Skipped);
        }

        let motion = self.pointing.begin(&self.state).await;
        self.device.ensure_connected()?;

        tracing::info!("Initializing telescope...");
        motion.set_status(MotionStatus::Initializing);
        let result = self.slew_altaz(&motion, self.options.init_position).await;
        let outcome = motion.finish("initializing telescope", result, MotionStatus::Idle)?;
        if outcome == Outcome::Completed {
            tracing::info!("Telescope initialized");
        }
        Ok(outcome)
    }

    async fn park(&self) -> Result<Outcome> {
        if self.state.get() == MotionStatus::Parking {
            tracing::info!("Telescope is already parking");
            return Ok(Outcome::Skipped);
        }

        let motion = self.pointing.begin(&self.state).await;
        self.device.ensure_connected()?;

        tracing::info!("Parking telescope...");
        motion.set_status(MotionStatus::Parking);
        let result = self
            .device
            .put_with_timeout("Park", self.options.park_timeout, alpaca_params! {})
            .await
            .map(|()| Outcome::Completed);
        let outcome = motion.finish("parking telescope", result, MotionStatus::Parked)?;
        if outcome == Outcome::Completed {
            tracing::info!("Telescope parked");
        }
        Ok(outcome)
    }

    async fn stop_motion(&self) -> Result {
        self.pointing.abort();

        let result = async {
            self.device.put("AbortSlew", alpaca_params! {}).await?;
            self.device
                .put("Tracking", alpaca_params! { Tracking: false })
                .await
        }
        .await;

        match result {
            Ok(()) => {
                self.state.set(MotionStatus::Idle);
                tracing::info!("Telescope stopped");
                Ok(())
            }
            Err(err) => {
                tracing::error!(%err, "Could not stop telescope");
                self.state.set(MotionStatus::Unknown);
                Err(Error::motion_failed("stopping telescope", err))
            }
        }
    }

    fn motion_status(&self) -> MotionStatus {
        self.state.get()
    }

    fn is_ready(&self) -> bool {
        self.state.is_ready(self.device.is_connected())
    }
}

#[async_trait]
impl PointingAltAz for Telescope {
    async fn move_altaz(&self, target: AltAz) -> Result<Outcome> {
        self.ensure_ready()?;

        let motion = self.pointing.begin(&self.state).await;
        tracing::info!(alt = target.alt, az = target.az, "Moving telescope to Alt/Az...");
        motion.set_status(MotionStatus::Slewing);
        let result = self.slew_altaz(&motion, target).await;
        let outcome = motion.finish("moving telescope to Alt/Az", result, MotionStatus::Positioned)?;
        if outcome == Outcome::Completed {
            tracing::info!("Reached destination");
        }
        Ok(outcome)
    }

    async fn get_altaz(&self) -> Result<AltAz> {
        let (alt, az) = futures::try_join!(
            self.device.get::<f64>("Altitude"),
            self.device.get::<f64>("Azimuth"),
        )?;
        Ok(AltAz::new(alt, adjust_azimuth(az)))
    }
}

#[async_trait]
impl PointingRaDec for Telescope {
    async fn move_radec(&self, target: RaDec) -> Result<Outcome> {
        self.ensure_ready()?;

        let motion = self.pointing.begin(&self.state).await;
        tracing::info!(ra = target.ra, dec = target.dec, "Moving telescope to RA/Dec...");
        motion.set_status(MotionStatus::Slewing);
        self.set_offsets(RaDec::new(0.0, 0.0));
        let result = self.slew_radec(&motion, target).await;
        let outcome = motion.finish("moving telescope to RA/Dec", result, MotionStatus::Tracking)?;
        if outcome == Outcome::Completed {
            tracing::info!("Reached destination");
        }
        Ok(outcome)
    }

    async fn get_radec(&self) -> Result<RaDec> {
        let (ra_hours, dec) = futures::try_join!(
            self.device.get::<f64>("RightAscension"),
            self.device.get::<f64>("Declination"),
        )?;
        let offsets = self.offsets();

        Ok(RaDec::new(
            ra_hours * 15.0 - offsets.ra / dec.to_radians().cos(),
            dec - offsets.dec,
        ))
    }
}

#[async_trait]
impl OffsetsRaDec for Telescope {
    async fn set_offsets_radec(&self, offsets: RaDec) -> Result<Outcome> {
        let motion = self.pointing.begin(&self.state).await;
        self.device.ensure_connected()?;

        tracing::info!(dra = offsets.ra, ddec = offsets.dec, "Moving offset...");
        motion.set_status(MotionStatus::Slewing);
        self.events.send(DriverEvent::OffsetsRaDec {
            ra: offsets.ra,
            dec: offsets.dec,
        });

        let result = async {
            let position = self.get_radec().await?;
            self.set_offsets(offsets);
            let target = RaDec::new(
                position.ra + offsets.ra / position.dec.to_radians().cos(),
                position.dec + offsets.dec,
            );
            self.slew_radec(&motion, target).await
        }
        .await;

        let outcome = motion.finish("moving RA/Dec offset", result, MotionStatus::Tracking)?;
        if outcome == Outcome::Completed {
            tracing::info!("Reached new offset position");
        }
        Ok(outcome)
    }

    fn get_offsets_radec(&self) -> RaDec {
        self.offsets()
    }
}

#[async_trait]
impl SyncTarget for Telescope {
    async fn sync_target(&self) -> Result {
        let position = self.get_radec().await?;
        tracing::info!(ra = position.ra, dec = position.dec, "Syncing telescope");
        self.device
            .put(
                "SyncToCoordinates",
                alpaca_params! {
                    RightAscension: position.ra / 15.0,
                    Declination: position.dec,
                },
            )
            .await
    }
}
