//! Background connectivity tracking for a single Alpaca server.

use crate::AlpacaClient;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Tracks whether the Alpaca server is reachable by periodically reading one property.
///
/// Only transport failures (unreachable host, timeout, non-200 status,
/// malformed envelope) count as a lost connection. A device-level error still
/// proves the server is up, so it leaves the device connected.
#[derive(Debug)]
pub struct LivenessMonitor {
    client: AlpacaClient,
    alive_parameter: String,
    interval: Duration,
    connected: AtomicBool,
}

impl LivenessMonitor {
    /// Create a monitor polling `alive_parameter` every `interval`.
    pub fn new(client: AlpacaClient, alive_parameter: impl Into<String>, interval: Duration) -> Self {
        Self {
            client,
            alive_parameter: alive_parameter.into(),
            interval,
            connected: AtomicBool::new(false),
        }
    }

    /// Result of the latest check; `false` before the first one.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Run a single check, logging a transition if connectivity changed.
    ///
    /// Returns the new connectivity state.
    pub async fn check(&self) -> bool {
        let connected = match self.client.get::<Value>(&self.alive_parameter).await {
            Ok(_) => true,
            Err(err) if err.is_connection_failure() => {
                tracing::debug!(%err, "Liveness check failed");
                false
            }
            Err(err) => {
                tracing::debug!(%err, "Liveness check returned an error, but the server is reachable");
                true
            }
        };

        let previous = self.connected.swap(connected, Ordering::AcqRel);
        if previous != connected {
            if connected {
                tracing::info!(endpoint = %self.client.endpoint(), "Connected to Alpaca server");
            } else {
                tracing::warn!(endpoint = %self.client.endpoint(), "Lost connection to Alpaca server");
            }
        }

        connected
    }

    /// Check periodically until `shutdown` is cancelled.
    ///
    /// Cancellation is only observed between checks, never during a request.
    pub async fn run(&self, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                () = tokio::time::sleep(self.interval) => {}
            }
            let _ = self.check().await;
        }
        tracing::debug!("Liveness monitor stopped");
    }
}
