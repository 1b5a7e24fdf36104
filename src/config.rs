use crate::{Error, Result};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

/// The only Alpaca protocol version understood by the drivers.
pub const SUPPORTED_VERSION: &str = "v1";

/// Connection settings of a single Alpaca device.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Name or IP of the Alpaca server.
    pub host: String,
    /// Port of the Alpaca server.
    pub port: u16,
    /// Device type as used in URLs, e.g. `telescope`.
    pub device_type: String,
    /// Device number on the server.
    pub device_number: u32,
    /// Alpaca protocol version; only `v1` is accepted.
    pub version: String,
    /// Property polled by the liveness monitor.
    pub alive_parameter: String,
    /// Timeout of GET requests and default timeout of PUT requests.
    #[serde(with = "seconds")]
    pub request_timeout: Duration,
    /// Interval of the liveness check.
    #[serde(with = "seconds")]
    pub alive_interval: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_owned(),
            port: 11111,
            device_type: String::new(),
            device_number: 0,
            version: SUPPORTED_VERSION.to_owned(),
            alive_parameter: "Connected".to_owned(),
            request_timeout: Duration::from_secs(5),
            alive_interval: Duration::from_secs(5),
        }
    }
}

impl DeviceConfig {
    /// Config for the given server and device with default tunables.
    pub fn new(host: impl Into<String>, port: u16, device_type: &str, device_number: u32) -> Self {
        Self {
            host: host.into(),
            port,
            device_type: device_type.to_owned(),
            device_number,
            ..Self::default()
        }
    }

    /// Validate the configuration and build the request endpoint.
    pub fn endpoint(&self) -> Result<Endpoint> {
        Endpoint::new(
            &self.host,
            self.port,
            &self.version,
            &self.device_type,
            self.device_number,
        )
    }
}

/// Immutable address of an Alpaca device; every request URL is derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    port: u16,
    version: String,
    device_type: String,
    device_number: u32,
}

impl Endpoint {
    /// Create an endpoint, rejecting unsupported protocol versions.
    pub fn new(
        host: &str,
        port: u16,
        version: &str,
        device_type: &str,
        device_number: u32,
    ) -> Result<Self> {
        if version != SUPPORTED_VERSION {
            return Err(Error::InvalidConfig(format!(
                "only Alpaca {SUPPORTED_VERSION} is supported, got {version:?}"
            )));
        }
        if host.is_empty() {
            return Err(Error::InvalidConfig("server host is empty".to_owned()));
        }
        if device_type.is_empty() || device_type.contains('/') {
            return Err(Error::InvalidConfig(format!(
                "invalid device type {device_type:?}"
            )));
        }
        Ok(Self {
            host: host.to_owned(),
            port,
            version: version.to_owned(),
            device_type: device_type.to_ascii_lowercase(),
            device_number,
        })
    }

    /// Full URL of a property or method.
    pub fn url(&self, name: &str) -> String {
        format!("{self}/{}", name.to_ascii_lowercase())
    }

    /// Device type part of the path.
    pub fn device_type(&self) -> &str {
        &self.device_type
    }

    /// Device number part of the path.
    pub const fn device_number(&self) -> u32 {
        self.device_number
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "http://{}:{}/api/{}/{}/{}",
            self.host, self.port, self.version, self.device_type, self.device_number
        )
    }
}

/// Durations written as (fractional) seconds in configuration files.
pub(crate) mod seconds {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
