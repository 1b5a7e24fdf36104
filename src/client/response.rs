use super::ResponseTransaction;
use crate::errors::TransportError;
use crate::{ASCOMError, ASCOMErrorCode};
use mime::Mime;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::borrow::Cow;

/// Decoded Alpaca response envelope.
///
/// `value` is `None` when the server sent no `Value` field at all (as for PUT),
/// and `Some(Value::Null)` when it explicitly sent `null`.
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope {
    #[serde(flatten)]
    pub(crate) transaction: ResponseTransaction,
    #[serde(rename = "ErrorNumber", default = "no_error")]
    pub(crate) error_number: ASCOMErrorCode,
    #[serde(rename = "ErrorMessage", default)]
    pub(crate) error_message: Cow<'static, str>,
    #[serde(rename = "Value", default, deserialize_with = "present")]
    pub(crate) value: Option<Value>,
}

const fn no_error() -> ASCOMErrorCode {
    ASCOMErrorCode::OK
}

fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

impl Envelope {
    pub(crate) fn parse(
        mime_type: Option<Mime>,
        bytes: &[u8],
    ) -> Result<Self, TransportError> {
        if let Some(mime_type) = mime_type {
            if mime_type.essence_str() != mime::APPLICATION_JSON.as_ref() {
                return Err(TransportError::ContentType(mime_type.to_string()));
            }
        }
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Split the envelope into the device-level result.
    pub(crate) fn into_result(self) -> Result<Option<Value>, ASCOMError> {
        if self.error_number == ASCOMErrorCode::OK {
            Ok(self.value)
        } else {
            Err(ASCOMError {
                code: self.error_number,
                message: self.error_message,
            })
        }
    }
}
