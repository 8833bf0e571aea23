//! Dynamic SQL values.

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::error::{Error, TypeError};

/// A dynamically-typed SQL value.
///
/// This is the currency between mapping strategies, the statement generator
/// and the statement executor. The core never interprets it beyond equality
/// and the conversions below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// NULL value
    Null,

    /// Boolean value
    Bool(bool),

    /// 16-bit signed integer
    SmallInt(i16),

    /// 32-bit signed integer
    Int(i32),

    /// 64-bit signed integer
    BigInt(i64),

    /// 64-bit floating point
    Double(f64),

    /// Arbitrary precision decimal (stored as string)
    Decimal(String),

    /// Text string
    Text(String),

    /// Binary data
    Bytes(Vec<u8>),

    /// Date (days since epoch)
    Date(i32),

    /// Timestamp (microseconds since epoch, no zone)
    Timestamp(i64),

    /// Timestamp with timezone (microseconds since epoch, UTC)
    TimestampTz(i64),

    /// UUID (as 16 bytes)
    Uuid([u8; 16]),

    /// JSON value
    Json(serde_json::Value),
}

impl Value {
    /// Check if this value is NULL.
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get the type name of this value.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "BOOLEAN",
            Value::SmallInt(_) => "SMALLINT",
            Value::Int(_) => "INTEGER",
            Value::BigInt(_) => "BIGINT",
            Value::Double(_) => "DOUBLE",
            Value::Decimal(_) => "DECIMAL",
            Value::Text(_) => "TEXT",
            Value::Bytes(_) => "BLOB",
            Value::Date(_) => "DATE",
            Value::Timestamp(_) => "TIMESTAMP",
            Value::TimestampTz(_) => "TIMESTAMPTZ",
            Value::Uuid(_) => "UUID",
            Value::Json(_) => "JSON",
        }
    }

    /// Try to convert this value to a bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            Value::SmallInt(v) => Some(*v != 0),
            Value::Int(v) => Some(*v != 0),
            Value::BigInt(v) => Some(*v != 0),
            _ => None,
        }
    }

    /// Try to convert this value to an i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::SmallInt(v) => Some(i64::from(*v)),
            Value::Int(v) => Some(i64::from(*v)),
            Value::BigInt(v) => Some(*v),
            _ => None,
        }
    }

    /// Try to convert this value to an f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            Value::Decimal(s) => s.parse().ok(),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    /// Try to get this value as a string reference.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) | Value::Decimal(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric zero, used by the primitive-zero "is new" policy.
    pub fn is_zero(&self) -> bool {
        match self {
            Value::Double(v) => *v == 0.0,
            other => other.as_i64() == Some(0),
        }
    }

    /// Null-safe equality: two NULLs are equal, NULL never equals a value,
    /// integers compare across widths.
    pub fn null_safe_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Null, _) | (_, Value::Null) => false,
            (a, b) => match (a.as_i64(), b.as_i64()) {
                (Some(x), Some(y)) => x == y,
                _ => a == b,
            },
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::SmallInt(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::BigInt(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::BigInt(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<[u8; 16]> for Value {
    fn from(v: [u8; 16]) -> Self {
        Value::Uuid(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

fn type_error(expected: &'static str, value: &Value) -> Error {
    Error::Type(TypeError {
        expected,
        actual: value.type_name().to_string(),
        column: None,
    })
}

/// Trait for converting from a `Value` to a typed value.
pub trait FromValue: Sized {
    /// Convert from a Value, returning an error if the conversion fails.
    #[allow(clippy::result_large_err)]
    fn from_value(value: &Value) -> Result<Self>;
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self> {
        value.as_bool().ok_or_else(|| type_error("bool", value))
    }
}

impl FromValue for i16 {
    fn from_value(value: &Value) -> Result<Self> {
        value
            .as_i64()
            .and_then(|v| i16::try_from(v).ok())
            .ok_or_else(|| type_error("i16", value))
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> Result<Self> {
        value
            .as_i64()
            .and_then(|v| i32::try_from(v).ok())
            .ok_or_else(|| type_error("i32", value))
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self> {
        value.as_i64().ok_or_else(|| type_error("i64", value))
    }
}

impl FromValue for u32 {
    fn from_value(value: &Value) -> Result<Self> {
        value
            .as_i64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| type_error("u32", value))
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self> {
        value.as_f64().ok_or_else(|| type_error("f64", value))
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self> {
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| type_error("string", value))
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Bytes(v) => Ok(v.clone()),
            _ => Err(type_error("bytes", value)),
        }
    }
}

impl FromValue for [u8; 16] {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Uuid(v) => Ok(*v),
            Value::Bytes(v) if v.len() == 16 => {
                let mut arr = [0u8; 16];
                arr.copy_from_slice(v);
                Ok(arr)
            }
            _ => Err(type_error("UUID (16 bytes)", value)),
        }
    }
}

impl FromValue for serde_json::Value {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Json(v) => Ok(v.clone()),
            Value::Text(s) => serde_json::from_str(s).map_err(|e| {
                Error::Type(TypeError {
                    expected: "valid JSON",
                    actual: format!("invalid JSON: {}", e),
                    column: None,
                })
            }),
            _ => Err(type_error("JSON", value)),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_value(value).map(Some)
        }
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self> {
        Ok(value.clone())
    }
}

/// A `Value` usable as a hash map key.
///
/// Integers of different widths hash and compare equal, floats compare by
/// bit pattern.
#[derive(Debug, Clone)]
pub struct ValueKey(Value);

impl ValueKey {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn value(&self) -> &Value {
        &self.0
    }
}

impl From<Value> for ValueKey {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

impl PartialEq for ValueKey {
    fn eq(&self, other: &Self) -> bool {
        match (&self.0, &other.0) {
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            (a, b) => a.null_safe_eq(b),
        }
    }
}

impl Eq for ValueKey {}

impl Hash for ValueKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        if let Some(v) = self.0.as_i64() {
            0u8.hash(state);
            v.hash(state);
            return;
        }
        match &self.0 {
            Value::Null => 1u8.hash(state),
            Value::Bool(v) => {
                2u8.hash(state);
                v.hash(state);
            }
            Value::Double(v) => {
                3u8.hash(state);
                v.to_bits().hash(state);
            }
            Value::Decimal(s) | Value::Text(s) => {
                4u8.hash(state);
                s.hash(state);
            }
            Value::Bytes(b) => {
                5u8.hash(state);
                b.hash(state);
            }
            Value::Date(v) => {
                6u8.hash(state);
                v.hash(state);
            }
            Value::Timestamp(v) | Value::TimestampTz(v) => {
                7u8.hash(state);
                v.hash(state);
            }
            Value::Uuid(u) => {
                8u8.hash(state);
                u.hash(state);
            }
            Value::Json(j) => {
                9u8.hash(state);
                j.to_string().hash(state);
            }
            Value::SmallInt(_) | Value::Int(_) | Value::BigInt(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn null_safe_equality() {
        assert!(Value::Null.null_safe_eq(&Value::Null));
        assert!(!Value::Null.null_safe_eq(&Value::Int(0)));
        assert!(!Value::Text("a".into()).null_safe_eq(&Value::Null));
        assert!(Value::Int(17).null_safe_eq(&Value::BigInt(17)));
        assert!(!Value::Int(17).null_safe_eq(&Value::Int(42)));
        assert!(Value::Text("x".into()).null_safe_eq(&Value::from("x")));
    }

    #[test]
    fn zero_detection() {
        assert!(Value::BigInt(0).is_zero());
        assert!(Value::Double(0.0).is_zero());
        assert!(!Value::Int(3).is_zero());
        assert!(!Value::Null.is_zero());
    }

    #[test]
    fn from_value_conversions() {
        assert_eq!(i64::from_value(&Value::Int(5)).unwrap(), 5);
        assert_eq!(i32::from_value(&Value::BigInt(7)).unwrap(), 7);
        assert!(i16::from_value(&Value::BigInt(i64::MAX)).is_err());
        assert_eq!(
            Option::<String>::from_value(&Value::Null).unwrap(),
            None::<String>
        );
        assert_eq!(
            String::from_value(&Value::Text("hi".into())).unwrap(),
            "hi".to_string()
        );
        let err = i64::from_value(&Value::Text("x".into())).unwrap_err();
        assert!(matches!(err, Error::Type(_)));
    }

    #[test]
    fn option_into_value() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some(3_i64)), Value::BigInt(3));
    }

    #[test]
    fn value_key_unifies_integer_widths() {
        let mut set = HashSet::new();
        set.insert(ValueKey::new(Value::Int(1)));
        assert!(set.contains(&ValueKey::new(Value::BigInt(1))));
        assert!(!set.contains(&ValueKey::new(Value::BigInt(2))));
        set.insert(ValueKey::new(Value::Text("1".into())));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn json_round_trip() {
        let value = Value::Json(serde_json::json!({"zone": "UTC"}));
        let encoded = serde_json::to_string(&value).unwrap();
        let decoded: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value, decoded);
    }
}
