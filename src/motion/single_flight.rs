use super::{AbortSignal, MotionState, MotionStatus};
use crate::{Error, Result};
use std::future::Future;
use std::sync::PoisonError;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};

/// Class of exclusive motion; each kind is serialized independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
#[display(rename_all = "lowercase")]
pub enum MotionKind {
    /// Telescope or dome pointing.
    Pointing,
    /// Dome shutter or roof.
    Shutter,
    /// Focuser travel.
    Focus,
}

/// How a motion command ended, when it didn't fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Outcome {
    /// The target condition was reached.
    Completed,
    /// A stop request interrupted the command.
    Aborted,
    /// Nothing was done: an equivalent command is already running or the device isn't ready.
    Skipped,
}

impl Outcome {
    /// Whether the command was interrupted.
    pub const fn is_aborted(self) -> bool {
        matches!(self, Self::Aborted)
    }
}

/// Lock plus abort signal guaranteeing a single in-flight command per motion kind.
#[derive(Debug)]
pub struct SingleFlight {
    kind: MotionKind,
    lock: Mutex<()>,
    abort: AbortSignal,
}

impl SingleFlight {
    /// Create a controller for the given kind.
    pub fn new(kind: MotionKind) -> Self {
        Self {
            kind,
            lock: Mutex::new(()),
            abort: AbortSignal::default(),
        }
    }

    /// Kind of motion this controller serializes.
    pub const fn kind(&self) -> MotionKind {
        self.kind
    }

    /// Ask the running command, if any, to stop at its next poll.
    pub fn abort(&self) {
        tracing::debug!(kind = %self.kind, "Abort requested");
        self.abort.abort();
    }

    /// Whether a command of this kind is currently running.
    pub fn is_busy(&self) -> bool {
        self.lock.try_lock().is_err()
    }

    /// Wait for the lock and clear any stale abort request.
    ///
    /// The caller switches to its busy status once its preconditions hold.
    pub async fn begin<'a>(&'a self, state: &'a MotionState) -> MotionGuard<'a> {
        let lock = self.lock.lock().await;
        self.abort.reset();
        tracing::trace!(kind = %self.kind, "Motion started");

        MotionGuard {
            _lock: lock,
            abort: &self.abort,
            state,
            busy: std::sync::Mutex::new(None),
        }
    }
}

/// Exclusive right to run a command of one motion kind.
///
/// Finish it with [`MotionGuard::finish`] so the motion status reflects the result.
///
/// Motions of different kinds on one device share its status. Once a guard
/// has set a busy status, it only records its result while that status is
/// still current, so it can't overwrite what another motion reported since.
#[derive(Debug)]
#[must_use = "call `finish` to record the result of the motion"]
pub struct MotionGuard<'a> {
    _lock: MutexGuard<'a, ()>,
    abort: &'a AbortSignal,
    state: &'a MotionState,
    busy: std::sync::Mutex<Option<MotionStatus>>,
}

impl MotionGuard<'_> {
    /// Whether a stop was requested for this command.
    pub fn is_aborted(&self) -> bool {
        self.abort.is_aborted()
    }

    /// Change the motion status while the command is running.
    pub fn set_status(&self, status: MotionStatus) {
        *self.busy.lock().unwrap_or_else(PoisonError::into_inner) = Some(status);
        self.state.set(status);
    }

    fn settle(&self, status: MotionStatus) {
        match *self.busy.lock().unwrap_or_else(PoisonError::into_inner) {
            Some(busy) => {
                if !self.state.replace_if(busy, status) {
                    tracing::debug!(
                        %status,
                        current = %self.state.get(),
                        "Motion status taken over by another motion, keeping it"
                    );
                }
            }
            None => self.state.set(status),
        }
    }

    /// Sleep, waking up early on abort.
    pub async fn wait(&self, duration: Duration) -> Outcome {
        if self.abort.wait(duration).await {
            Outcome::Aborted
        } else {
            Outcome::Completed
        }
    }

    /// Evaluate `arrived` every `interval` until it holds, the command is aborted or it fails.
    pub async fn poll_until<F, Fut>(&self, interval: Duration, mut arrived: F) -> Result<Outcome>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        loop {
            if self.is_aborted() {
                return Ok(Outcome::Aborted);
            }
            if arrived().await? {
                return Ok(Outcome::Completed);
            }
            if self.wait(interval).await.is_aborted() {
                return Ok(Outcome::Aborted);
            }
        }
    }

    /// Record the result of the command in the motion status.
    ///
    /// Completion switches to `done` and an abort returns to [`MotionStatus::Idle`].
    /// A failure leaves the device in [`MotionStatus::Unknown`]. Nothing is
    /// recorded if another motion changed the status away from this one's.
    pub fn finish(
        self,
        action: &'static str,
        result: Result<Outcome>,
        done: MotionStatus,
    ) -> Result<Outcome> {
        match result {
            Ok(Outcome::Completed) => {
                self.settle(done);
                Ok(Outcome::Completed)
            }
            Ok(Outcome::Aborted) => {
                tracing::warn!("{action} aborted");
                self.settle(MotionStatus::Idle);
                Ok(Outcome::Aborted)
            }
            Ok(Outcome::Skipped) => Ok(Outcome::Skipped),
            Err(err) => {
                tracing::error!(%err, "{action} failed");
                self.settle(MotionStatus::Unknown);
                Err(Error::motion_failed(action, err))
            }
        }
    }
}
