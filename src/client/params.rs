use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub(crate) enum ActionParams<T> {
    Get(T),
    Put(T),
}

/// Build a form-encodable set of Alpaca method parameters.
///
/// ```ignore
/// device.put("SlewToAzimuth", alpaca_params! { Azimuth: 180.0 }).await?;
/// ```
macro_rules! alpaca_params {
    ($($key:ident: $value:expr),* $(,)?) => {{
        #[derive(Debug, serde::Serialize)]
        #[allow(non_snake_case)]
        struct Params {
            $($key: String,)*
        }

        Params {
            $($key: $crate::params::ASCOMParam::to_string($value),)*
        }
    }};
}
pub(crate) use alpaca_params;
