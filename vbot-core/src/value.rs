//! The value model carried in stream bodies.
//!
//! [`Value`] is a closed union of everything the wire format can express.
//! Integers are kept as native `i64`/`u64`, so values outside the
//! double-precision safe range pass through the codec bit-for-bit.

use std::collections::BTreeMap;

/// Largest integer a double can hold exactly (2^53 − 1).
pub const MAX_SAFE_INTEGER: i64 = (1 << 53) - 1;

/// Smallest integer a double can hold exactly (−(2^53 − 1)).
pub const MIN_SAFE_INTEGER: i64 = -MAX_SAFE_INTEGER;

/// Map type used for `Value::Map`; keys are always strings.
pub type ValueMap = BTreeMap<String, Value>;

/// A value that can be written to and read from a [`Stream`].
///
/// [`Stream`]: crate::stream::Stream
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int64(i64),
    Uint64(u64),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    Map(ValueMap),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Uint64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&ValueMap> {
        match self {
            Value::Map(v) => Some(v),
            _ => None,
        }
    }

    /// Returns `true` for integers a double can represent exactly.
    ///
    /// Non-integer variants return `false`.
    pub fn is_safe_integer(&self) -> bool {
        match self {
            Value::Int64(v) => (MIN_SAFE_INTEGER..=MAX_SAFE_INTEGER).contains(v),
            Value::Uint64(v) => *v <= MAX_SAFE_INTEGER as u64,
            _ => false,
        }
    }

    /// Convert to JSON. Bytes become an array of numbers; non-finite floats
    /// become `null`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(v) => serde_json::Value::Bool(*v),
            Value::Int64(v) => serde_json::Value::from(*v),
            Value::Uint64(v) => serde_json::Value::from(*v),
            Value::Float64(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(v) => serde_json::Value::String(v.clone()),
            Value::Bytes(v) => {
                serde_json::Value::Array(v.iter().map(|b| serde_json::Value::from(*b)).collect())
            }
            Value::Array(v) => serde_json::Value::Array(v.iter().map(Value::to_json).collect()),
            Value::Map(v) => serde_json::Value::Object(
                v.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

// ── Conversions ──────────────────────────────────────────────────

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int64(v as i64)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Uint64(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Uint64(v as u64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

impl From<ValueMap> for Value {
    fn from(v: ValueMap) -> Self {
        Value::Map(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(u) = n.as_u64() {
                    Value::Uint64(u)
                } else if let Some(i) = n.as_i64() {
                    Value::Int64(i)
                } else {
                    Value::Float64(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(a) => Value::Array(a.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(o) => {
                Value::Map(o.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_integer_bounds() {
        assert!(Value::Int64(MAX_SAFE_INTEGER).is_safe_integer());
        assert!(Value::Int64(MIN_SAFE_INTEGER).is_safe_integer());
        assert!(!Value::Int64(MAX_SAFE_INTEGER + 1).is_safe_integer());
        assert!(!Value::Int64(i64::MIN).is_safe_integer());
        assert!(Value::Uint64(MAX_SAFE_INTEGER as u64).is_safe_integer());
        assert!(!Value::Uint64(u64::MAX).is_safe_integer());
        assert!(!Value::Float64(1.0).is_safe_integer());
    }

    #[test]
    fn unsafe_integers_compare_by_bits() {
        assert_eq!(Value::Int64(i64::MIN), Value::Int64(i64::MIN));
        assert_ne!(Value::Int64(i64::MAX), Value::Int64(i64::MAX - 1));
        assert_ne!(Value::Int64(5), Value::Uint64(5));
    }

    #[test]
    fn from_json() {
        let json: serde_json::Value =
            serde_json::from_str(r#"{"a": [1, -2, 1.5, "x", null, true]}"#).unwrap();
        let v = Value::from(json);
        let inner = v.as_map().unwrap().get("a").unwrap().as_array().unwrap();
        assert_eq!(inner[0], Value::Uint64(1));
        assert_eq!(inner[1], Value::Int64(-2));
        assert_eq!(inner[2], Value::Float64(1.5));
        assert_eq!(inner[3], Value::from("x"));
        assert!(inner[4].is_null());
        assert_eq!(inner[5].as_bool(), Some(true));
    }

    #[test]
    fn to_json() {
        let v = Value::Array(vec![Value::Bytes(vec![1, 2]), Value::Float64(f64::INFINITY)]);
        assert_eq!(v.to_json().to_string(), "[[1,2],null]");
    }
}
