use std::fmt;

use serde::Deserialize;
use serde_json::Value as JsonValue;

/// A single cell value, either declared in a test file or read back from the database.
///
/// `Int` and `Float` are two representations of the same numeric tag: they compare
/// numerically against each other, see [`Value::matches`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "JsonValue")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    /// Type-aware equality used by the assertion engine.
    ///
    /// Numbers are equal when they denote the same number, whatever their width or
    /// representation. Text is compared exactly. Null only equals null, so an empty
    /// string never matches a declared null. There is no coercion across tags.
    pub fn matches(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(i), Value::Float(f)) | (Value::Float(f), Value::Int(i)) => {
                int_eq_float(*i, *f)
            }
            _ => false,
        }
    }

    /// Parse a decimal literal as produced by numeric column types.
    ///
    /// Integral values that fit into an `i64` keep an exact representation. NaN and
    /// infinities are not numbers here and yield `None`.
    pub fn from_decimal_str(s: &str) -> Option<Value> {
        let trimmed = s.trim();
        if let Ok(i) = trimmed.parse::<i64>() {
            return Some(Value::Int(i));
        }
        let f = trimmed.parse::<f64>().ok().filter(|f| f.is_finite())?;
        if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
            return Some(Value::Int(f as i64));
        }
        Some(Value::Float(f))
    }
}

// i64::MAX as f64 rounds up to 2^63, which is out of range, hence the strict bound.
fn int_eq_float(i: i64, f: f64) -> bool {
    f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 && f as i64 == i
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => write!(f, "{:?}", s),
        }
    }
}

impl TryFrom<JsonValue> for Value {
    type Error = String;

    fn try_from(value: JsonValue) -> Result<Self, Self::Error> {
        match value {
            JsonValue::Null => Ok(Value::Null),
            JsonValue::Bool(b) => Ok(Value::Bool(b)),
            JsonValue::String(s) => Ok(Value::Text(s)),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::Int(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(Value::Float(f))
                } else {
                    Err(format!("unsupported number: {}", n))
                }
            }
            JsonValue::Array(_) | JsonValue::Object(_) => Err(format!(
                "expected a scalar value (null, boolean, number or string), got: {}",
                value
            )),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn numbers_compare_across_representations() {
        assert!(Value::Int(1).matches(&Value::Float(1.0)));
        assert!(Value::Float(2.0).matches(&Value::Int(2)));
        assert!(!Value::Int(1).matches(&Value::Float(1.5)));
        assert!(!Value::Float(f64::NAN).matches(&Value::Float(f64::NAN)));
    }

    #[test]
    fn null_is_not_empty_text() {
        assert!(!Value::Null.matches(&Value::Text(String::new())));
        assert!(!Value::Text(String::new()).matches(&Value::Null));
        assert!(Value::Null.matches(&Value::Null));
    }

    #[test]
    fn no_coercion_between_tags() {
        assert!(!Value::Text("1".to_string()).matches(&Value::Int(1)));
        assert!(!Value::Bool(true).matches(&Value::Int(1)));
        assert!(!Value::Text("true".to_string()).matches(&Value::Bool(true)));
    }

    #[test]
    fn huge_floats_do_not_overflow_int_comparison() {
        assert!(!Value::Int(i64::MAX).matches(&Value::Float(9.3e18)));
        assert!(!Value::Int(0).matches(&Value::Float(f64::INFINITY)));
    }

    #[test]
    fn from_json_scalars() {
        assert_eq!(Value::try_from(json!(null)).unwrap(), Value::Null);
        assert_eq!(Value::try_from(json!(true)).unwrap(), Value::Bool(true));
        assert_eq!(Value::try_from(json!(42)).unwrap(), Value::Int(42));
        assert_eq!(Value::try_from(json!(1.25)).unwrap(), Value::Float(1.25));
        assert_eq!(
            Value::try_from(json!("abc")).unwrap(),
            Value::Text("abc".to_string())
        );
    }

    #[test]
    fn from_json_rejects_composites() {
        assert!(Value::try_from(json!([1, 2])).is_err());
        assert!(Value::try_from(json!({"a": 1})).is_err());
    }

    #[test]
    fn from_decimal_str_keeps_integers_exact() {
        assert_eq!(Value::from_decimal_str("42"), Some(Value::Int(42)));
        assert_eq!(Value::from_decimal_str("42.000"), Some(Value::Int(42)));
        assert_eq!(Value::from_decimal_str("-0.5"), Some(Value::Float(-0.5)));
        assert_eq!(Value::from_decimal_str("abc"), None);
    }

    #[test]
    fn display_quotes_text_only() {
        assert_eq!(Value::Text("a".to_string()).to_string(), "\"a\"");
        assert_eq!(Value::Int(3).to_string(), "3");
        assert_eq!(Value::Null.to_string(), "null");
    }

    proptest! {
        #[test]
        fn int_float_equality_is_symmetric(i in -1_000_000_000i64..1_000_000_000i64) {
            let f = Value::Float(i as f64);
            let n = Value::Int(i);
            prop_assert!(n.matches(&f));
            prop_assert!(f.matches(&n));
        }

        #[test]
        fn text_equality_is_exact(a in ".*", b in ".*") {
            let left = Value::Text(a.clone());
            let right = Value::Text(b.clone());
            prop_assert_eq!(left.matches(&right), a == b);
        }
    }
}
