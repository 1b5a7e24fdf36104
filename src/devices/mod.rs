//! Drivers for ASCOM Alpaca devices.

#[cfg(feature = "dome")]
mod dome;
#[cfg(feature = "dome")]
pub use dome::{Dome, DomeOptions, ShutterState};

#[cfg(feature = "focuser")]
mod focuser;
#[cfg(feature = "focuser")]
pub use focuser::{Focuser, FocuserOptions};

#[cfg(feature = "telescope")]
mod telescope;
#[cfg(feature = "telescope")]
pub use telescope::{Telescope, TelescopeOptions};

use crate::config::DeviceConfig;
use crate::monitor::LivenessMonitor;
use crate::params::ASCOMValue;
use crate::{AlpacaClient, Error, Result};
use serde::Serialize;
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

/// A single remote Alpaca device together with its connectivity monitor.
///
/// Requests are refused with [`Error::NotConnected`] while the monitor
/// considers the server unreachable.
///
/// Background tasks spawned through the device stop at [`close`](Self::close).
/// A closed device can't be opened again.
#[derive(Debug)]
pub struct AlpacaDevice {
    client: AlpacaClient,
    monitor: Arc<LivenessMonitor>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl AlpacaDevice {
    /// Create a device from its configuration without contacting it yet.
    pub fn new(config: &DeviceConfig) -> Result<Self> {
        let client = AlpacaClient::new(config.endpoint()?).with_timeout(config.request_timeout);
        let monitor = LivenessMonitor::new(
            client.clone(),
            config.alive_parameter.as_str(),
            config.alive_interval,
        );

        Ok(Self {
            client,
            monitor: Arc::new(monitor),
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        })
    }

    /// Underlying client, bypassing the connectivity check.
    pub const fn client(&self) -> &AlpacaClient {
        &self.client
    }

    /// Whether the last liveness check succeeded.
    pub fn is_connected(&self) -> bool {
        self.monitor.is_connected()
    }

    /// Fail with [`Error::NotConnected`] unless the server is reachable.
    pub fn ensure_connected(&self) -> Result {
        if self.is_connected() {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    /// Check connectivity once and start monitoring it in the background.
    ///
    /// Returns whether the first check succeeded.
    pub async fn open(&self) -> bool {
        let connected = self.monitor.check().await;
        if !connected {
            tracing::warn!(
                endpoint = %self.client.endpoint(),
                "Could not connect to Alpaca server, will keep trying"
            );
        }

        let monitor = Arc::clone(&self.monitor);
        self.spawn("liveness monitor", |shutdown| async move {
            monitor.run(shutdown).await;
        });

        connected
    }

    /// Stop all background tasks and wait for them to finish.
    pub async fn close(&self) {
        self.shutdown.cancel();
        let _ = self.tasks.close();
        self.tasks.wait().await;
        tracing::debug!(endpoint = %self.client.endpoint(), "Device closed");
    }

    /// Run a task until the device is closed.
    ///
    /// The task receives a token cancelled on close and must return soon after.
    pub(crate) fn spawn<F, Fut>(&self, name: &'static str, task: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let future = task(self.shutdown.child_token());
        let _ = self
            .tasks
            .spawn(future.instrument(tracing::debug_span!("background", task = name)));
    }

    /// Token cancelled when the device closes.
    pub(crate) fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Read a property.
    pub async fn get<T: ASCOMValue>(&self, name: &str) -> Result<T> {
        self.ensure_connected()?;
        self.client.get(name).await
    }

    /// Set a property or call a method.
    pub async fn put(&self, name: &str, params: impl Debug + Serialize + Send) -> Result {
        self.ensure_connected()?;
        self.client.put(name, params).await
    }

    /// Set a property or call a method with a custom timeout.
    pub async fn put_with_timeout(
        &self,
        name: &str,
        timeout: Duration,
        params: impl Debug + Serialize + Send,
    ) -> Result {
        self.ensure_connected()?;
        self.client.put_with_timeout(name, timeout, params).await
    }
}

/// Sleep for `interval`, returning `false` if `shutdown` fired first.
pub(crate) async fn tick(shutdown: &CancellationToken, interval: Duration) -> bool {
    tokio::select! {
        () = shutdown.cancelled() => false,
        () = tokio::time::sleep(interval) => true,
    }
}
