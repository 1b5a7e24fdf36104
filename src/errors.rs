use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use thiserror::Error;

/// Alpaca representation of an ASCOM error code.
///
/// Stored as a signed integer since some Alpaca servers forward raw COM
/// `HRESULT`s that don't fit into the documented `0x400..=0xFFF` range.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ASCOMErrorCode(i32);

/// The starting value for driver-specific error numbers.
const DRIVER_BASE: i32 = 0x500;
/// The maximum value for error numbers.
const MAX: i32 = 0xFFF;

impl ASCOMErrorCode {
    /// Wrap a raw error number as received over the wire.
    pub const fn new(raw: i32) -> Self {
        Self(raw)
    }

    /// Get the driver-specific error code.
    ///
    /// Returns `Ok` with `0`-based driver error code if this is a driver error.
    /// Returns `Err` with raw error code if not a driver error.
    pub const fn as_driver_error(self) -> Result<i32, i32> {
        if self.0 >= DRIVER_BASE && self.0 <= MAX {
            Ok(self.0 - DRIVER_BASE)
        } else {
            Err(self.0)
        }
    }

    /// Get the raw error code.
    pub const fn raw(self) -> i32 {
        self.0
    }
}

/// Error reported by the remote device in a well-formed Alpaca response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("ASCOM error {code}: {message}")]
pub struct ASCOMError {
    /// Error number.
    #[serde(rename = "ErrorNumber")]
    pub code: ASCOMErrorCode,
    /// Error message.
    #[serde(rename = "ErrorMessage", default)]
    pub message: Cow<'static, str>,
}

impl ASCOMError {
    /// Create a new `ASCOMError` from given error code and a message.
    pub fn new(code: ASCOMErrorCode, message: impl std::fmt::Display) -> Self {
        Self {
            code,
            message: message.to_string().into(),
        }
    }
}

macro_rules! ascom_error_codes {
    ($(#[doc = $doc:literal] $name:ident = $value:literal,)*) => {
        impl ASCOMErrorCode {
            $(
                #[doc = $doc]
                pub const $name: Self = Self($value);
            )*
        }

        impl std::fmt::Debug for ASCOMErrorCode {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match *self {
                    $(
                        Self::$name => f.write_str(stringify!($name)),
                    )*
                    _ => match self.as_driver_error() {
                        Ok(driver_code) => write!(f, "DRIVER_ERROR[{driver_code}]"),
                        Err(raw_code) => write!(f, "{raw_code:#X}"),
                    },
                }
            }
        }

        impl std::fmt::Display for ASCOMErrorCode {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                std::fmt::Debug::fmt(self, f)
            }
        }
    };
}

ascom_error_codes! {
    #[doc = "Success"]
    OK = 0,
    #[doc = "The requested action is not implemented in this driver"]
    ACTION_NOT_IMPLEMENTED = 0x40C,
    #[doc = "The requested operation can not be undertaken at this time"]
    INVALID_OPERATION = 0x40B,
    #[doc = "Invalid value"]
    INVALID_VALUE = 0x401,
    #[doc = "The attempted operation is invalid because the mount is currently in a Parked state"]
    INVALID_WHILE_PARKED = 0x408,
    #[doc = "The attempted operation is invalid because the mount is currently in a Slaved state"]
    INVALID_WHILE_SLAVED = 0x409,
    #[doc = "The communications channel is not connected"]
    NOT_CONNECTED = 0x407,
    #[doc = "Property or method not implemented"]
    NOT_IMPLEMENTED = 0x400,
    #[doc = "A value has not been set"]
    VALUE_NOT_SET = 0x402,
}

/// Transport-level reasons for an Alpaca request to fail.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The HTTP request failed or timed out.
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    /// The server answered with a status other than 200 OK.
    #[error("unexpected HTTP status {0}")]
    Status(reqwest::StatusCode),
    /// The server returned something other than a JSON envelope.
    #[error("unexpected content type {0}")]
    ContentType(String),
    /// The JSON envelope couldn't be decoded.
    #[error("malformed Alpaca response: {0}")]
    Decode(#[from] serde_json::Error),
    /// A GET response had no `Value` field.
    #[error("response is missing the Value field")]
    MissingValue,
}

/// Errors returned by the Alpaca client and the device drivers.
#[derive(Debug, Error)]
pub enum Error {
    /// The server couldn't be reached or didn't speak Alpaca.
    #[error("could not connect to Alpaca server at {path}: {source}")]
    Connection {
        /// Property or method the request was made for.
        path: String,
        /// Underlying transport failure.
        #[source]
        source: TransportError,
    },
    /// The server answered with a non-zero `ErrorNumber`.
    #[error(transparent)]
    Device(#[from] ASCOMError),
    /// The operation requires a live connection to the Alpaca server.
    #[error("not connected to Alpaca server")]
    NotConnected,
    /// The device can't accept motion commands in its current status.
    #[error("device is not ready (status {0})")]
    NotReady(crate::motion::MotionStatus),
    /// A returned value couldn't be coerced to the expected type.
    #[error("invalid value for {name}: {value}")]
    InvalidValue {
        /// Property name.
        name: String,
        /// Raw JSON value as received.
        value: serde_json::Value,
    },
    /// The dome reported its shutter in the error state.
    #[error("shutter reported an error state")]
    ShutterError,
    /// The driver configuration is not usable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// A motion command failed and the motion status was reset to unknown.
    #[error("{action} failed: {source}")]
    MotionFailed {
        /// Human-readable description of the motion.
        action: &'static str,
        /// What went wrong.
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Whether this error means the server couldn't be reached at all.
    pub const fn is_connection_failure(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }

    pub(crate) fn motion_failed(action: &'static str, source: Self) -> Self {
        Self::MotionFailed {
            action,
            source: Box::new(source),
        }
    }
}

/// Result type for Alpaca driver operations.
pub type Result<T = (), E = Error> = std::result::Result<T, E>;
