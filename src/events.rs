//! Domain events published by the drivers.

use crate::motion::MotionStatus;
use tokio::sync::broadcast;

/// Capability interface a motion status belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum Interface {
    /// Telescope mount.
    #[display("ITelescope")]
    Telescope,
    /// Dome or roll-off roof.
    #[display("IDome")]
    Dome,
    /// Focuser.
    #[display("IFocuser")]
    Focuser,
}

/// Events emitted towards the host framework.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverEvent {
    /// The motion status of a device changed.
    MotionStatusChanged {
        /// Interface whose status changed.
        interface: Interface,
        /// New status.
        status: MotionStatus,
    },
    /// The roof finished opening.
    RoofOpened,
    /// The roof started closing.
    RoofClosing,
    /// New RA/Dec offsets (degrees) are being applied.
    OffsetsRaDec {
        /// RA offset.
        ra: f64,
        /// Dec offset.
        dec: f64,
    },
}

/// Fan-out channel for [`DriverEvent`]s.
///
/// Sending never blocks and never fails: events without subscribers are dropped
/// and slow subscribers lag.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DriverEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event.
    pub fn send(&self, event: DriverEvent) {
        tracing::trace!(?event, "Publishing event");
        let _ = self.sender.send(event);
    }

    /// Receive all events sent from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<DriverEvent> {
        self.sender.subscribe()
    }
}
