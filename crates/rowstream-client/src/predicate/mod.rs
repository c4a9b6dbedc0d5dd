//! Predicate AST.
//!
//! Filters are written with a small builder and compiled into a
//! parameterized WHERE clause:
//!
//! ```rust
//! use rowstream_client::{captured, col};
//!
//! let name = String::from("a.pdf");
//! let filter = col("Id").eq(7).and(col("FileName").eq(captured(move || name.clone())));
//! assert_eq!(filter.to_string(), "((Id = 7) AND (FileName = <captured>))");
//! ```
//!
//! Only equality, conjunction and disjunction compile. Every other operator
//! can be built but is rejected by the compiler with `UnsupportedExpression`.

use std::fmt;
use std::sync::Arc;

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use uuid::Uuid;

use rowstream_common::error::RowStreamResult;
use rowstream_common::types::{SqlEnum, SqlType, Value};

use crate::mapping::MappingDescriptor;

mod compiler;

pub use compiler::PredicateCompiler;

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    /// Equality.
    Eq,
    /// Inequality.
    NotEq,
    /// Less than.
    Lt,
    /// Less than or equal.
    LtEq,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    GtEq,
    /// Logical conjunction.
    And,
    /// Logical disjunction.
    Or,
}

impl BinaryOp {
    /// Returns the T-SQL spelling.
    pub const fn as_sql(&self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Where a bound value comes from.
#[derive(Clone)]
pub enum ValueSource {
    /// A value fixed when the predicate was built.
    Literal(Value),
    /// A closure evaluated each time the predicate is compiled.
    Captured(Arc<dyn Fn() -> Value + Send + Sync>),
}

impl ValueSource {
    /// Produces the value.
    pub fn evaluate(&self) -> Value {
        match self {
            ValueSource::Literal(value) => value.clone(),
            ValueSource::Captured(f) => f(),
        }
    }
}

impl fmt::Debug for ValueSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueSource::Literal(value) => f.debug_tuple("Literal").field(value).finish(),
            ValueSource::Captured(_) => f.write_str("Captured(..)"),
        }
    }
}

/// A filter expression over a record's properties.
#[derive(Debug, Clone)]
pub enum Predicate {
    /// A property reference.
    Column(String),
    /// A bound value.
    Value(ValueSource),
    /// A binary operation.
    Binary {
        /// The operator.
        op: BinaryOp,
        /// Left operand.
        left: Box<Predicate>,
        /// Right operand.
        right: Box<Predicate>,
    },
    /// Logical negation.
    Not(Box<Predicate>),
}

/// References a property.
pub fn col(property: impl Into<String>) -> Predicate {
    Predicate::Column(property.into())
}

/// Binds a literal value.
pub fn lit(value: impl Into<Value>) -> Predicate {
    Predicate::Value(ValueSource::Literal(value.into()))
}

/// Binds a value computed when the predicate is compiled.
pub fn captured<F, V>(f: F) -> Predicate
where
    F: Fn() -> V + Send + Sync + 'static,
    V: Into<Value>,
{
    Predicate::Value(ValueSource::Captured(Arc::new(move || f().into())))
}

/// Conversion into a predicate operand.
///
/// Implemented for predicates themselves and for every scalar that converts
/// into a [`Value`], so `col("Id").eq(7)` and `col("Id").eq(lit(7))` are
/// equivalent.
pub trait IntoPredicate {
    /// Converts into a predicate node.
    fn into_predicate(self) -> Predicate;
}

impl IntoPredicate for Predicate {
    fn into_predicate(self) -> Predicate {
        self
    }
}

impl IntoPredicate for ValueSource {
    fn into_predicate(self) -> Predicate {
        Predicate::Value(self)
    }
}

impl<T: Into<Value>> IntoPredicate for Option<T> {
    fn into_predicate(self) -> Predicate {
        lit(self)
    }
}

macro_rules! scalar_operand {
    ($($ty:ty),*) => {
        $(
            impl IntoPredicate for $ty {
                fn into_predicate(self) -> Predicate {
                    lit(self)
                }
            }
        )*
    };
}

scalar_operand!(
    Value, bool, u8, i16, i32, i64, f32, f64, Decimal, String, NaiveDateTime, Uuid, Vec<u8>
);

impl IntoPredicate for &str {
    fn into_predicate(self) -> Predicate {
        lit(self)
    }
}

impl IntoPredicate for &String {
    fn into_predicate(self) -> Predicate {
        lit(self)
    }
}

#[allow(clippy::should_implement_trait)]
impl Predicate {
    fn binary(self, op: BinaryOp, rhs: impl IntoPredicate) -> Predicate {
        Predicate::Binary {
            op,
            left: Box::new(self),
            right: Box::new(rhs.into_predicate()),
        }
    }

    /// `self = rhs`
    pub fn eq(self, rhs: impl IntoPredicate) -> Predicate {
        self.binary(BinaryOp::Eq, rhs)
    }

    /// `self <> rhs`
    pub fn ne(self, rhs: impl IntoPredicate) -> Predicate {
        self.binary(BinaryOp::NotEq, rhs)
    }

    /// `self < rhs`
    pub fn lt(self, rhs: impl IntoPredicate) -> Predicate {
        self.binary(BinaryOp::Lt, rhs)
    }

    /// `self <= rhs`
    pub fn le(self, rhs: impl IntoPredicate) -> Predicate {
        self.binary(BinaryOp::LtEq, rhs)
    }

    /// `self > rhs`
    pub fn gt(self, rhs: impl IntoPredicate) -> Predicate {
        self.binary(BinaryOp::Gt, rhs)
    }

    /// `self >= rhs`
    pub fn ge(self, rhs: impl IntoPredicate) -> Predicate {
        self.binary(BinaryOp::GtEq, rhs)
    }

    /// `self AND rhs`
    pub fn and(self, rhs: impl IntoPredicate) -> Predicate {
        self.binary(BinaryOp::And, rhs)
    }

    /// `self OR rhs`
    pub fn or(self, rhs: impl IntoPredicate) -> Predicate {
        self.binary(BinaryOp::Or, rhs)
    }

    /// `NOT self`
    pub fn negate(self) -> Predicate {
        Predicate::Not(Box::new(self))
    }

    /// `property = value`
    pub fn column_eq(property: impl Into<String>, value: impl Into<Value>) -> Predicate {
        col(property).eq(lit(value))
    }

    /// Selects the row whose identifier equals `value`.
    pub fn identity(descriptor: &MappingDescriptor, value: impl Into<Value>) -> RowStreamResult<Predicate> {
        let identifier = descriptor.require_identifier()?;
        Ok(Predicate::column_eq(identifier, value))
    }

    /// Selects the row whose enumeration property equals `value`.
    pub fn enum_eq<E: SqlEnum>(property: impl Into<String>, value: E) -> Predicate {
        col(property).eq(lit(Value::from_enum(value)))
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Column(property) => f.write_str(property),
            Predicate::Value(ValueSource::Literal(value)) => write!(f, "{}", value),
            Predicate::Value(ValueSource::Captured(_)) => f.write_str("<captured>"),
            Predicate::Binary { op, left, right } => write!(f, "({} {} {})", left, op, right),
            Predicate::Not(inner) => write!(f, "(NOT {})", inner),
        }
    }
}

/// A bound parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    /// Position in the command's parameter list.
    pub ordinal: usize,
    /// Placeholder name, `@p<ordinal>`.
    pub name: String,
    /// The column the value is compared with or inserted into, when known.
    pub column: Option<String>,
    /// The bound SQL type. `None` binds an untyped NULL.
    pub sql_type: Option<SqlType>,
    /// The value.
    pub value: Value,
}

impl Parameter {
    /// Creates a parameter, naming it after its ordinal.
    pub fn new(ordinal: usize, sql_type: Option<SqlType>, value: Value) -> Self {
        Self {
            ordinal,
            name: placeholder(ordinal),
            column: None,
            sql_type,
            value,
        }
    }

    /// Records the column this parameter is bound against.
    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }
}

/// Returns the placeholder name for an ordinal.
pub fn placeholder(ordinal: usize) -> String {
    format!("@p{}", ordinal)
}

/// A compiled WHERE clause body.
#[derive(Debug, Clone, PartialEq)]
pub struct WhereClause {
    /// Clause text without the `WHERE` keyword.
    pub sql: String,
    /// Parameters, `parameters[n]` binds `@pn`.
    pub parameters: Vec<Parameter>,
}

impl fmt::Display for WhereClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}
