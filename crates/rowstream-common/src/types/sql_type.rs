//! SQL type tags.
//!
//! A [`SqlType`] names the server-side type a [`Value`] is bound as, and a
//! [`FieldType`] describes how a record field is stored: its SQL type, whether
//! the column may hold NULL, and whether the field is an enumeration persisted
//! as its integer storage type.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::value::Value;
use crate::error::{RowStreamError, RowStreamResult};

/// SQL Server types the engine knows how to bind and read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SqlType {
    /// 8-bit unsigned integer.
    TinyInt,
    /// 16-bit integer.
    SmallInt,
    /// 32-bit integer.
    Int,
    /// 64-bit integer.
    BigInt,
    /// Boolean.
    Bit,
    /// Unicode text.
    NVarChar,
    /// Exact numeric.
    Decimal,
    /// 32-bit floating point.
    Real,
    /// 64-bit floating point.
    Float,
    /// Date and time without offset.
    DateTime2,
    /// GUID.
    UniqueIdentifier,
    /// Binary data, including FILESTREAM columns.
    VarBinary,
}

impl SqlType {
    /// Infers the binding type of a value from its tag.
    ///
    /// `Null` and binary values have no binding type in a predicate.
    #[must_use]
    pub fn of(value: &Value) -> Option<SqlType> {
        match value {
            Value::Null | Value::Bytes(_) => None,
            Value::Bool(_) => Some(SqlType::Bit),
            Value::TinyInt(_) => Some(SqlType::TinyInt),
            Value::SmallInt(_) => Some(SqlType::SmallInt),
            Value::Int(_) => Some(SqlType::Int),
            Value::BigInt(_) => Some(SqlType::BigInt),
            Value::Real(_) => Some(SqlType::Real),
            Value::Float(_) => Some(SqlType::Float),
            Value::Decimal(_) => Some(SqlType::Decimal),
            Value::Text(_) => Some(SqlType::NVarChar),
            Value::Timestamp(_) => Some(SqlType::DateTime2),
            Value::Guid(_) => Some(SqlType::UniqueIdentifier),
        }
    }

    /// Like [`SqlType::of`], failing with `UnsupportedType` for untyped values.
    pub fn infer(value: &Value) -> RowStreamResult<SqlType> {
        Self::of(value).ok_or_else(|| RowStreamError::UnsupportedType {
            type_name: value.type_name().to_string(),
        })
    }

    /// Returns the T-SQL type name.
    #[must_use]
    pub const fn as_sql(&self) -> &'static str {
        match self {
            SqlType::TinyInt => "TINYINT",
            SqlType::SmallInt => "SMALLINT",
            SqlType::Int => "INT",
            SqlType::BigInt => "BIGINT",
            SqlType::Bit => "BIT",
            SqlType::NVarChar => "NVARCHAR",
            SqlType::Decimal => "DECIMAL",
            SqlType::Real => "REAL",
            SqlType::Float => "FLOAT",
            SqlType::DateTime2 => "DATETIME2",
            SqlType::UniqueIdentifier => "UNIQUEIDENTIFIER",
            SqlType::VarBinary => "VARBINARY",
        }
    }

    /// Returns true for the integer family.
    #[must_use]
    pub const fn is_integer(&self) -> bool {
        matches!(
            self,
            SqlType::TinyInt | SqlType::SmallInt | SqlType::Int | SqlType::BigInt
        )
    }

    /// Reads a column value as this type.
    ///
    /// Integer values are converted between widths when they fit; every
    /// other tag must match exactly. NULL is rejected, callers handle
    /// nullable columns before reaching this point.
    pub fn read(&self, column: &str, value: Value) -> RowStreamResult<Value> {
        let mismatch = |actual: &Value| RowStreamError::TypeMismatch {
            column: column.to_string(),
            expected: self.as_sql().to_string(),
            actual: actual.type_name().to_string(),
        };

        if self.is_integer() {
            let wide = match &value {
                Value::TinyInt(v) => i64::from(*v),
                Value::SmallInt(v) => i64::from(*v),
                Value::Int(v) => i64::from(*v),
                Value::BigInt(v) => *v,
                other => return Err(mismatch(other)),
            };
            let narrowed = match self {
                SqlType::TinyInt => u8::try_from(wide).ok().map(Value::TinyInt),
                SqlType::SmallInt => i16::try_from(wide).ok().map(Value::SmallInt),
                SqlType::Int => i32::try_from(wide).ok().map(Value::Int),
                _ => Some(Value::BigInt(wide)),
            };
            return narrowed.ok_or_else(|| mismatch(&value));
        }

        let matches = match (self, &value) {
            (SqlType::Bit, Value::Bool(_))
            | (SqlType::NVarChar, Value::Text(_))
            | (SqlType::Decimal, Value::Decimal(_))
            | (SqlType::Real, Value::Real(_))
            | (SqlType::Float, Value::Float(_))
            | (SqlType::DateTime2, Value::Timestamp(_))
            | (SqlType::UniqueIdentifier, Value::Guid(_))
            | (SqlType::VarBinary, Value::Bytes(_)) => true,
            _ => false,
        };
        if matches {
            Ok(value)
        } else {
            Err(mismatch(&value))
        }
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Storage description of a record field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldType {
    /// The column's SQL type. For enumerations this is the storage width.
    pub sql: SqlType,
    /// Whether the column may hold NULL.
    pub nullable: bool,
    /// Whether the field is an enumeration stored as an integer.
    pub enumeration: bool,
}

impl FieldType {
    /// A non-nullable column of the given type.
    #[must_use]
    pub const fn new(sql: SqlType) -> Self {
        Self {
            sql,
            nullable: false,
            enumeration: false,
        }
    }

    /// A nullable column of the given type.
    #[must_use]
    pub const fn nullable(sql: SqlType) -> Self {
        Self {
            sql,
            nullable: true,
            enumeration: false,
        }
    }

    /// An enumeration stored as the given integer type.
    #[must_use]
    pub const fn enumeration(storage: SqlType) -> Self {
        Self {
            sql: storage,
            nullable: false,
            enumeration: true,
        }
    }

    /// Returns a copy of this type that accepts NULL.
    #[must_use]
    pub const fn or_null(self) -> Self {
        Self {
            nullable: true,
            ..self
        }
    }

    /// Type-directed column accessor.
    ///
    /// NULL short-circuits to `Value::Null` for nullable fields and is a
    /// mismatch otherwise; everything else is read as [`FieldType::sql`].
    pub fn read(&self, column: &str, value: Value) -> RowStreamResult<Value> {
        if value.is_null() {
            if self.nullable {
                return Ok(Value::Null);
            }
            return Err(RowStreamError::TypeMismatch {
                column: column.to_string(),
                expected: self.sql.as_sql().to_string(),
                actual: "NULL".to_string(),
            });
        }
        if self.enumeration && !self.sql.is_integer() {
            return Err(RowStreamError::invalid_mapping(format!(
                "enumeration column {} must use an integer storage type, not {}",
                column, self.sql
            )));
        }
        self.sql.read(column, value)
    }
}
