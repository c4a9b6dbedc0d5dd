//! Parameterized commands.
//!
//! [`CommandBuilder`] assembles statement text from SQL fragments and bound
//! values, numbering every placeholder from one ordinal sequence. Compiled
//! WHERE clauses are either seeded into a builder (their ordinals are kept)
//! or spliced in (their ordinals are shifted past what is already bound).

use std::fmt::{self, Write};

use rowstream_common::types::{SqlType, Value};

use crate::predicate::{placeholder, Parameter, WhereClause};

mod lifecycle;

pub use lifecycle::{NewRow, RowStatements};

/// A complete statement ready for a driver.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    /// Statement text with `@pN` placeholders.
    pub sql: String,
    /// Parameters, `parameters[n]` binds `@pn`.
    pub parameters: Vec<Parameter>,
}

impl Command {
    /// Creates a command without parameters.
    pub fn text(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            parameters: Vec::new(),
        }
    }

    /// Looks up a parameter by placeholder name.
    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

/// A part of the command being built.
#[derive(Debug, Clone)]
enum CommandPart {
    /// Raw SQL text.
    Sql(String),
    /// A parameter placeholder.
    Param(usize),
}

/// A fluent command builder.
#[derive(Debug, Clone, Default)]
pub struct CommandBuilder {
    /// SQL command parts.
    parts: Vec<CommandPart>,
    /// Bound parameters.
    parameters: Vec<Parameter>,
}

impl CommandBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder whose first parameters are a clause's parameters.
    ///
    /// The clause text can then be appended any number of times with
    /// [`CommandBuilder::sql`] and keeps binding the same values.
    pub fn seeded(clause: &WhereClause) -> Self {
        Self {
            parts: Vec::new(),
            parameters: clause.parameters.clone(),
        }
    }

    /// Appends raw SQL.
    pub fn sql(mut self, sql: impl AsRef<str>) -> Self {
        self.parts.push(CommandPart::Sql(sql.as_ref().to_string()));
        self
    }

    /// Appends a parameter placeholder.
    pub fn bind(self, value: impl Into<Value>) -> Self {
        self.bind_parameter(None, value.into())
    }

    /// Appends a parameter placeholder bound against a column.
    pub fn bind_column(self, column: &str, value: impl Into<Value>) -> Self {
        self.bind_parameter(Some(column), value.into())
    }

    fn bind_parameter(mut self, column: Option<&str>, value: Value) -> Self {
        let ordinal = self.parameters.len();
        let sql_type = match &value {
            Value::Null => None,
            Value::Bytes(_) => Some(SqlType::VarBinary),
            other => SqlType::of(other),
        };
        let mut parameter = Parameter::new(ordinal, sql_type, value);
        parameter.column = column.map(str::to_string);
        self.parameters.push(parameter);
        self.parts.push(CommandPart::Param(ordinal));
        self
    }

    /// Appends a compiled clause, shifting its placeholders past the
    /// parameters already bound.
    pub fn splice(mut self, clause: &WhereClause) -> Self {
        let offset = self.parameters.len();
        self.parts
            .push(CommandPart::Sql(shift_placeholders(&clause.sql, offset)));
        for parameter in &clause.parameters {
            let mut shifted = parameter.clone();
            shifted.ordinal += offset;
            shifted.name = placeholder(shifted.ordinal);
            self.parameters.push(shifted);
        }
        self
    }

    /// Returns the number of bound parameters.
    pub fn param_count(&self) -> usize {
        self.parameters.len()
    }

    /// Builds the command.
    pub fn build(self) -> Command {
        let mut sql = String::new();
        for part in &self.parts {
            match part {
                CommandPart::Sql(s) => sql.push_str(s),
                CommandPart::Param(ordinal) => {
                    let _ = write!(sql, "@p{}", ordinal);
                }
            }
        }
        Command {
            sql,
            parameters: self.parameters,
        }
    }
}

/// Rewrites every `@pN` in `sql` as `@p(N + offset)`.
fn shift_placeholders(sql: &str, offset: usize) -> String {
    if offset == 0 {
        return sql.to_string();
    }
    let mut out = String::with_capacity(sql.len());
    let mut rest = sql;
    while let Some(at) = rest.find("@p") {
        out.push_str(&rest[..at + 2]);
        rest = &rest[at + 2..];
        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        match rest[..digits].parse::<usize>() {
            Ok(ordinal) => {
                let _ = write!(out, "{}", ordinal + offset);
            }
            Err(_) => out.push_str(&rest[..digits]),
        }
        rest = &rest[digits..];
    }
    out.push_str(rest);
    out
}
