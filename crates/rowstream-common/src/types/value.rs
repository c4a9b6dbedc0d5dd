//! Scalar values exchanged with the database.

use std::fmt;

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::sql_type::SqlType;
use crate::error::{RowStreamError, RowStreamResult};

/// A tagged scalar value.
///
/// The tag doubles as the value's type information: the predicate compiler
/// infers the bound SQL type from it instead of inspecting Rust types at
/// runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// SQL NULL.
    Null,
    /// Boolean value.
    Bool(bool),
    /// 8-bit unsigned integer.
    TinyInt(u8),
    /// 16-bit integer.
    SmallInt(i16),
    /// 32-bit integer.
    Int(i32),
    /// 64-bit integer.
    BigInt(i64),
    /// 32-bit float.
    Real(f32),
    /// 64-bit float.
    Float(f64),
    /// Exact decimal.
    Decimal(Decimal),
    /// Text.
    Text(String),
    /// Timestamp without offset.
    Timestamp(NaiveDateTime),
    /// GUID.
    Guid(Uuid),
    /// Binary data.
    Bytes(Vec<u8>),
}

impl Value {
    /// Returns true if the value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns a short name for the value's tag.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::TinyInt(_) => "u8",
            Value::SmallInt(_) => "i16",
            Value::Int(_) => "i32",
            Value::BigInt(_) => "i64",
            Value::Real(_) => "f32",
            Value::Float(_) => "f64",
            Value::Decimal(_) => "decimal",
            Value::Text(_) => "string",
            Value::Timestamp(_) => "timestamp",
            Value::Guid(_) => "guid",
            Value::Bytes(_) => "bytes",
        }
    }

    /// Returns the value widened to `i64` if it is an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::TinyInt(v) => Some(i64::from(*v)),
            Value::SmallInt(v) => Some(i64::from(*v)),
            Value::Int(v) => Some(i64::from(*v)),
            Value::BigInt(v) => Some(*v),
            _ => None,
        }
    }

    /// Tries to get as boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Tries to get as string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Tries to get as bytes.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Tries to get as GUID.
    pub fn as_guid(&self) -> Option<Uuid> {
        match self {
            Value::Guid(g) => Some(*g),
            _ => None,
        }
    }

    /// Converts into a Rust value.
    pub fn decode<T: FromValue>(self) -> RowStreamResult<T> {
        T::from_value(self)
    }

    /// Converts an integer value into an enumeration.
    pub fn decode_enum<E: SqlEnum>(self) -> RowStreamResult<E> {
        let raw = self.as_i64().ok_or_else(|| mismatch::<E>(&self))?;
        E::from_storage(raw).ok_or_else(|| RowStreamError::TypeMismatch {
            column: String::new(),
            expected: std::any::type_name::<E>().to_string(),
            actual: format!("discriminant {raw}"),
        })
    }

    /// Converts an enumeration into its integer storage value.
    pub fn from_enum<E: SqlEnum>(value: E) -> Value {
        let raw = value.to_storage();
        let narrowed = match E::STORAGE {
            SqlType::TinyInt => u8::try_from(raw).ok().map(Value::TinyInt),
            SqlType::SmallInt => i16::try_from(raw).ok().map(Value::SmallInt),
            SqlType::Int => i32::try_from(raw).ok().map(Value::Int),
            _ => None,
        };
        narrowed.unwrap_or(Value::BigInt(raw))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::TinyInt(i) => write!(f, "{}", i),
            Value::SmallInt(i) => write!(f, "{}", i),
            Value::Int(i) => write!(f, "{}", i),
            Value::BigInt(i) => write!(f, "{}", i),
            Value::Real(fl) => write!(f, "{}", fl),
            Value::Float(fl) => write!(f, "{}", fl),
            Value::Decimal(d) => write!(f, "{}", d),
            Value::Text(s) => write!(f, "{}", s),
            Value::Timestamp(t) => write!(f, "{}", t),
            Value::Guid(g) => write!(f, "{}", g),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

/// An enumeration persisted as an integer column.
///
/// ```rust
/// use rowstream_common::types::{SqlEnum, SqlType, Value};
///
/// #[derive(Debug, Clone, Copy, PartialEq)]
/// enum Status { Draft = 0, Final = 1 }
///
/// impl SqlEnum for Status {
///     const STORAGE: SqlType = SqlType::TinyInt;
///     fn to_storage(self) -> i64 { self as i64 }
///     fn from_storage(raw: i64) -> Option<Self> {
///         match raw { 0 => Some(Status::Draft), 1 => Some(Status::Final), _ => None }
///     }
/// }
///
/// let v = Value::from_enum(Status::Final);
/// assert_eq!(v, Value::TinyInt(1));
/// assert_eq!(v.decode_enum::<Status>().unwrap(), Status::Final);
/// ```
pub trait SqlEnum: Sized + Copy {
    /// Integer type the enumeration is stored as.
    const STORAGE: SqlType;

    /// Returns the stored discriminant.
    fn to_storage(self) -> i64;

    /// Rebuilds the enumeration from a stored discriminant.
    fn from_storage(raw: i64) -> Option<Self>;
}

/// Trait for converting from Value.
pub trait FromValue: Sized {
    /// Converts from a Value.
    fn from_value(value: Value) -> RowStreamResult<Self>;
}

fn mismatch<T>(value: &Value) -> RowStreamError {
    RowStreamError::TypeMismatch {
        column: String::new(),
        expected: std::any::type_name::<T>().to_string(),
        actual: value.type_name().to_string(),
    }
}

macro_rules! integer_from_value {
    ($($ty:ty),*) => {
        $(
            impl FromValue for $ty {
                fn from_value(value: Value) -> RowStreamResult<Self> {
                    value
                        .as_i64()
                        .and_then(|v| <$ty>::try_from(v).ok())
                        .ok_or_else(|| mismatch::<$ty>(&value))
                }
            }
        )*
    };
}

integer_from_value!(u8, i16, i32, i64);

impl FromValue for bool {
    fn from_value(value: Value) -> RowStreamResult<Self> {
        value.as_bool().ok_or_else(|| mismatch::<bool>(&value))
    }
}

impl FromValue for f32 {
    fn from_value(value: Value) -> RowStreamResult<Self> {
        match value {
            Value::Real(f) => Ok(f),
            other => Err(mismatch::<f32>(&other)),
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: Value) -> RowStreamResult<Self> {
        match value {
            Value::Float(f) => Ok(f),
            Value::Real(f) => Ok(f64::from(f)),
            other => Err(mismatch::<f64>(&other)),
        }
    }
}

impl FromValue for Decimal {
    fn from_value(value: Value) -> RowStreamResult<Self> {
        match value {
            Value::Decimal(d) => Ok(d),
            other => Err(mismatch::<Decimal>(&other)),
        }
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> RowStreamResult<Self> {
        match value {
            Value::Text(s) => Ok(s),
            other => Err(mismatch::<String>(&other)),
        }
    }
}

impl FromValue for NaiveDateTime {
    fn from_value(value: Value) -> RowStreamResult<Self> {
        match value {
            Value::Timestamp(t) => Ok(t),
            other => Err(mismatch::<NaiveDateTime>(&other)),
        }
    }
}

impl FromValue for Uuid {
    fn from_value(value: Value) -> RowStreamResult<Self> {
        value.as_guid().ok_or_else(|| mismatch::<Uuid>(&value))
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: Value) -> RowStreamResult<Self> {
        match value {
            Value::Bytes(b) => Ok(b),
            other => Err(mismatch::<Vec<u8>>(&other)),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> RowStreamResult<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl FromValue for Value {
    fn from_value(value: Value) -> RowStreamResult<Self> {
        Ok(value)
    }
}

// Implement Into<Value> for common types
impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Value::TinyInt(v)
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

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Real(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<Decimal> for Value {
    fn from(v: Decimal) -> Self {
        Value::Decimal(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Value::Text(v.clone())
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::Timestamp(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Guid(v)
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

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Kind {
        Document,
        Image,
    }

    impl SqlEnum for Kind {
        const STORAGE: SqlType = SqlType::SmallInt;

        fn to_storage(self) -> i64 {
            match self {
                Kind::Document => 1,
                Kind::Image => 2,
            }
        }

        fn from_storage(raw: i64) -> Option<Self> {
            match raw {
                1 => Some(Kind::Document),
                2 => Some(Kind::Image),
                _ => None,
            }
        }
    }

    #[test]
    fn test_value_conversions() {
        let int_val = Value::Int(42);
        assert_eq!(int_val.as_i64(), Some(42));
        assert!(int_val.as_str().is_none());

        let str_val = Value::from("hello");
        assert_eq!(str_val.as_str(), Some("hello"));
        assert!(str_val.as_i64().is_none());

        assert!(Value::Null.is_null());
        assert_eq!(Value::from(None::<i32>), Value::Null);
    }

    #[test]
    fn test_decode() {
        let n: i64 = Value::Int(7).decode().unwrap();
        assert_eq!(n, 7);

        let s: Option<String> = Value::Null.decode().unwrap();
        assert_eq!(s, None);

        let g = Uuid::new_v4();
        let back: Uuid = Value::Guid(g).decode().unwrap();
        assert_eq!(back, g);

        let err = Value::Text("x".into()).decode::<i32>().unwrap_err();
        assert!(err.is_mapping());
    }

    #[test]
    fn test_decode_narrowing_out_of_range() {
        assert!(Value::BigInt(i64::MAX).decode::<i32>().is_err());
        assert!(Value::Int(-1).decode::<u8>().is_err());
    }

    #[test]
    fn test_enum_round_trip() {
        let v = Value::from_enum(Kind::Image);
        assert_eq!(v, Value::SmallInt(2));
        assert_eq!(v.decode_enum::<Kind>().unwrap(), Kind::Image);

        assert!(Value::SmallInt(9).decode_enum::<Kind>().is_err());
        assert!(Value::Text("Image".into()).decode_enum::<Kind>().is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Null.to_string(), "NULL");
        assert_eq!(Value::Bytes(vec![0; 3]).to_string(), "<3 bytes>");
        assert_eq!(Value::from(1.5f64).to_string(), "1.5");
    }

    #[test]
    fn test_serde() {
        let v = Value::Text("a.pdf".into());
        let json = serde_json::to_string(&v).unwrap();
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
    }
}
