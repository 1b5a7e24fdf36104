use serde_json::Value;

/// A value that can be sent as an Alpaca form parameter.
pub(crate) trait ASCOMParam: Sized {
    fn to_string(self) -> String;
}

impl ASCOMParam for String {
    fn to_string(self) -> String {
        self
    }
}

impl ASCOMParam for &str {
    fn to_string(self) -> String {
        self.to_owned()
    }
}

impl ASCOMParam for bool {
    fn to_string(self) -> String {
        (if self { "True" } else { "False" }).to_owned()
    }
}

macro_rules! simple_ascom_param {
    ($($ty:ty),*) => {
        $(
            impl ASCOMParam for $ty {
                fn to_string(self) -> String {
                    ToString::to_string(&self)
                }
            }
        )*
    };
}

simple_ascom_param!(i32, u32, i64, f64);

/// A value that can be read from the `Value` field of an Alpaca response.
///
/// Alpaca servers aren't consistent about representation (`true` vs `"True"`,
/// `42` vs `"42"`), so conversions are lenient.
pub trait ASCOMValue: Sized {
    /// Convert the raw JSON value, returning `None` if it has an incompatible shape.
    fn from_value(value: &Value) -> Option<Self>;
}

impl ASCOMValue for Value {
    fn from_value(value: &Value) -> Option<Self> {
        Some(value.clone())
    }
}

impl ASCOMValue for bool {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => n.as_f64().map(|n| n != 0.0),
            Value::String(s) => match s.trim() {
                s if s.eq_ignore_ascii_case("true") => Some(true),
                s if s.eq_ignore_ascii_case("false") => Some(false),
                s => s.parse::<f64>().ok().map(|n| n != 0.0),
            },
            _ => None,
        }
    }
}

impl ASCOMValue for f64 {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

impl ASCOMValue for i64 {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().or_else(|| {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0)
                    .and_then(|f| f.to_string().parse().ok())
            }),
            Value::String(s) => {
                let s = s.trim();
                s.parse().ok().or_else(|| {
                    s.parse::<f64>()
                        .ok()
                        .filter(|f| f.fract() == 0.0)
                        .and_then(|f| f.to_string().parse().ok())
                })
            }
            _ => None,
        }
    }
}

impl ASCOMValue for i32 {
    fn from_value(value: &Value) -> Option<Self> {
        i64::from_value(value).and_then(|n| n.try_into().ok())
    }
}

impl ASCOMValue for String {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ASCOMParam, ASCOMValue};
    use serde_json::json;

    #[test]
    fn lenient_bools() {
        assert_eq!(bool::from_value(&json!(true)), Some(true));
        assert_eq!(bool::from_value(&json!("True")), Some(true));
        assert_eq!(bool::from_value(&json!("false")), Some(false));
        assert_eq!(bool::from_value(&json!(0)), Some(false));
        assert_eq!(bool::from_value(&json!("maybe")), None);
        assert_eq!(bool::from_value(&json!(null)), None);
    }

    #[test]
    fn lenient_numbers() {
        assert_eq!(f64::from_value(&json!(42)), Some(42.0));
        assert_eq!(f64::from_value(&json!(" 12.5 ")), Some(12.5));
        assert_eq!(i32::from_value(&json!(20000)), Some(20000));
        assert_eq!(i32::from_value(&json!(20000.0)), Some(20000));
        assert_eq!(i32::from_value(&json!("-15")), Some(-15));
        assert_eq!(i32::from_value(&json!(1.5)), None);
        assert_eq!(i32::from_value(&json!(1e12)), None);
    }

    #[test]
    fn form_params() {
        assert_eq!(ASCOMParam::to_string(true), "True");
        assert_eq!(ASCOMParam::to_string(false), "False");
        assert_eq!(ASCOMParam::to_string(20000_i32), "20000");
        assert_eq!(ASCOMParam::to_string(12.5_f64), "12.5");
    }
}
