//! Motion status bookkeeping and single-flight execution of motion commands.

mod abort;
pub use abort::AbortSignal;

mod single_flight;
pub use single_flight::{MotionGuard, MotionKind, Outcome, SingleFlight};

use crate::events::{DriverEvent, EventBus, Interface};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::sync::atomic::{AtomicU8, Ordering};

/// Motion status of a device, as reported to the host framework.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    TryFromPrimitive,
    IntoPrimitive,
    derive_more::Display,
)]
#[display(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum MotionStatus {
    /// Stationary and ready.
    Idle,
    /// Running an initialization (e.g. opening the roof).
    Initializing,
    /// Moving to a new position.
    Slewing,
    /// Following a target.
    Tracking,
    /// Moving to the park position.
    Parking,
    /// Parked.
    Parked,
    /// Stationary at a commanded position.
    Positioned,
    /// Not known, typically after a failed command.
    Unknown,
    /// In an error state.
    Error,
}

impl MotionStatus {
    /// Whether a device in this status accepts new motion commands.
    pub const fn allows_motion(self) -> bool {
        !matches!(
            self,
            Self::Parked | Self::Initializing | Self::Parking | Self::Error | Self::Unknown
        )
    }
}

/// Current motion status of one capability interface.
///
/// Writers are expected to hold the lock of the motion kind they're running;
/// readers can look at the status at any time.
#[derive(Debug)]
pub struct MotionState {
    status: AtomicU8,
    interface: Interface,
    events: EventBus,
}

impl MotionState {
    /// Create a state starting as [`MotionStatus::Unknown`] until the driver is opened.
    pub fn new(interface: Interface, events: EventBus) -> Self {
        Self {
            status: AtomicU8::new(MotionStatus::Unknown.into()),
            interface,
            events,
        }
    }

    /// Current status.
    pub fn get(&self) -> MotionStatus {
        MotionStatus::try_from(self.status.load(Ordering::Acquire)).unwrap_or(MotionStatus::Unknown)
    }

    /// Change the status, publishing an event if it differs from the previous one.
    pub fn set(&self, status: MotionStatus) {
        let previous = MotionStatus::try_from(self.status.swap(status.into(), Ordering::AcqRel))
            .unwrap_or(MotionStatus::Unknown);

        if previous != status {
            tracing::debug!(
                interface = %self.interface,
                %previous,
                %status,
                "Motion status changed"
            );
            self.events.send(DriverEvent::MotionStatusChanged {
                interface: self.interface,
                status,
            });
        }
    }

    /// Replace the status only if it currently equals `expected`.
    ///
    /// Returns whether the status was replaced.
    pub fn replace_if(&self, expected: MotionStatus, status: MotionStatus) -> bool {
        let replaced = self
            .status
            .compare_exchange(
                expected.into(),
                status.into(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();

        if replaced && expected != status {
            tracing::debug!(interface = %self.interface, previous = %expected, %status, "Motion status changed");
            self.events.send(DriverEvent::MotionStatusChanged {
                interface: self.interface,
                status,
            });
        }

        replaced
    }

    /// Whether the device is connected and in a status that accepts motion commands.
    pub fn is_ready(&self, connected: bool) -> bool {
        connected && self.get().allows_motion()
    }
}
