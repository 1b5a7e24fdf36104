use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

/// Cooperative cancellation flag for one motion kind.
///
/// Setting it wakes any pending [`wait`](Self::wait) right away; polling loops
/// check it before every request.
#[derive(Debug, Default)]
pub struct AbortSignal {
    aborted: AtomicBool,
    notify: Notify,
}

impl AbortSignal {
    /// Request the current motion to stop.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Clear a previous abort request.
    pub fn reset(&self) {
        self.aborted.store(false, Ordering::Release);
    }

    /// Whether an abort was requested since the last reset.
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Sleep for `duration` or until aborted, whichever happens first.
    ///
    /// Returns whether the signal is aborted.
    pub async fn wait(&self, duration: Duration) -> bool {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // Register interest before checking the flag so a concurrent `abort` can't be missed.
        let _ = notified.as_mut().enable();

        if self.is_aborted() {
            return true;
        }

        tokio::select! {
            () = notified => {}
            () = tokio::time::sleep(duration) => {}
        }

        self.is_aborted()
    }
}
