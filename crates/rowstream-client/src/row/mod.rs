//! Row materialization.
//!
//! Rebuilds a typed record from a result row using the record's schema and
//! the mapping descriptor. Only columns present in the result are read;
//! everything else keeps the value the schema's factory gave it.

use std::collections::HashSet;

use rowstream_common::error::{RowStreamError, RowStreamResult};

use crate::driver::RowRef;
use crate::mapping::{unquote, MappingDescriptor};
use crate::schema::RecordSchema;

/// Populates records of type `T` from result rows.
#[derive(Debug)]
pub struct RowMaterializer<'a, T> {
    schema: &'a RecordSchema<T>,
    descriptor: &'a MappingDescriptor,
    skipped: HashSet<String>,
}

impl<'a, T> RowMaterializer<'a, T> {
    /// Creates a materializer.
    pub fn new(schema: &'a RecordSchema<T>, descriptor: &'a MappingDescriptor) -> Self {
        Self {
            schema,
            descriptor,
            skipped: HashSet::new(),
        }
    }

    /// Excludes a property from materialization.
    pub fn skip(mut self, property: impl Into<String>) -> Self {
        self.skipped.insert(property.into());
        self
    }

    /// Builds a record from a row.
    ///
    /// Fields are visited in declaration order. A field is read when it is
    /// not skipped, is mapped, and its column (brackets stripped, compared
    /// ignoring case) is in the row.
    pub fn materialize(&self, row: RowRef<'_>) -> RowStreamResult<T> {
        let mut record = self.schema.instantiate();

        for field in self.schema.fields() {
            if self.skipped.contains(field.name()) {
                continue;
            }
            let Some(column) = self.descriptor.columns().get(field.name()) else {
                continue;
            };
            let name = unquote(column);
            let Some(raw) = row.value(name) else {
                continue;
            };

            let value = field.field_type().read(name, raw.clone())?;
            field
                .set(&mut record, value)
                .map_err(|e| with_column(e, name))?;
        }

        Ok(record)
    }
}

/// Names the column on conversion errors raised by setters.
fn with_column(error: RowStreamError, name: &str) -> RowStreamError {
    match error {
        RowStreamError::TypeMismatch {
            column,
            expected,
            actual,
        } if column.is_empty() => RowStreamError::TypeMismatch {
            column: name.to_string(),
            expected,
            actual,
        },
        other => other,
    }
}
