/*!
Capability interfaces the drivers expose to the host framework.

Each driver implements the subset that matches its hardware:

* [`Telescope`](crate::Telescope): [`Motion`], [`PointingAltAz`], [`PointingRaDec`], [`OffsetsRaDec`], [`SyncTarget`].
* [`Dome`](crate::Dome): [`Motion`], [`PointingAltAz`], [`Roof`].
* [`Focuser`](crate::Focuser): [`Motion`], [`Focuser`].

Motion commands block until the motion finished, was aborted through
[`Motion::stop_motion`] or failed.
*/

use crate::Result;
use crate::motion::{MotionStatus, Outcome};
use async_trait::async_trait;
use serde::Deserialize;
use std::fmt::Debug;

/// Horizontal coordinates in degrees, azimuth measured from north through east.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct AltAz {
    /// Altitude.
    pub alt: f64,
    /// Azimuth.
    pub az: f64,
}

impl AltAz {
    /// Create a new position.
    pub const fn new(alt: f64, az: f64) -> Self {
        Self { alt, az }
    }
}

/// Equatorial coordinates in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct RaDec {
    /// Right ascension.
    pub ra: f64,
    /// Declination.
    pub dec: f64,
}

impl RaDec {
    /// Create a new position.
    pub const fn new(ra: f64, dec: f64) -> Self {
        Self { ra, dec }
    }
}

/// Common lifecycle and motion status of every moving device.
#[async_trait]
pub trait Motion: Debug + Send + Sync {
    /// Initialize the device, e.g. open the roof.
    async fn init(&self) -> Result<Outcome>;

    /// Park the device, e.g. close the roof.
    async fn park(&self) -> Result<Outcome>;

    /// Stop any running motion.
    async fn stop_motion(&self) -> Result;

    /// Current motion status.
    fn motion_status(&self) -> MotionStatus;

    /// Whether the device is connected and accepts motion commands.
    fn is_ready(&self) -> bool;
}

/// Pointing in horizontal coordinates.
#[async_trait]
pub trait PointingAltAz: Motion {
    /// Move to the given position.
    async fn move_altaz(&self, target: AltAz) -> Result<Outcome>;

    /// Current position.
    async fn get_altaz(&self) -> Result<AltAz>;
}

/// Pointing in equatorial coordinates.
#[async_trait]
pub trait PointingRaDec: Motion {
    /// Move to the given position and start tracking.
    async fn move_radec(&self, target: RaDec) -> Result<Outcome>;

    /// Current position, without offsets.
    async fn get_radec(&self) -> Result<RaDec>;
}

/// Small offsets on top of an equatorial position.
#[async_trait]
pub trait OffsetsRaDec: PointingRaDec {
    /// Apply new offsets, in degrees, relative to the offset-free position.
    async fn set_offsets_radec(&self, offsets: RaDec) -> Result<Outcome>;

    /// Offsets currently applied.
    fn get_offsets_radec(&self) -> RaDec;
}

/// Synchronization of the device's coordinate system.
#[async_trait]
pub trait SyncTarget: PointingRaDec {
    /// Tell the device it's pointing at its current offset-free position.
    async fn sync_target(&self) -> Result;
}

/// Focus control.
#[async_trait]
pub trait Focuser: Motion {
    /// Move to an absolute focus, resetting the offset.
    async fn set_focus(&self, focus: f64) -> Result<Outcome>;

    /// Apply a focus offset relative to the current offset-free focus.
    async fn set_focus_offset(&self, offset: f64) -> Result<Outcome>;

    /// Current focus, without offset.
    async fn get_focus(&self) -> Result<f64>;

    /// Offset currently applied.
    fn get_focus_offset(&self) -> f64;
}

/// Roof or shutter of an enclosure.
///
/// Opening and closing go through [`Motion::init`] and [`Motion::park`].
#[async_trait]
pub trait Roof: Motion {
    /// Whether the roof is fully open.
    async fn is_open(&self) -> Result<bool>;
}
