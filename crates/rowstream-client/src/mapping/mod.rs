//! Mapping providers and descriptors.
//!
//! A [`MappingProvider`] answers, for one record type, which table it lives
//! in, which column each property maps to, which property is the identifier
//! and which property/column pair holds the FILESTREAM payload. The engine
//! only ever consumes the computed-once [`MappingDescriptor`].

use indexmap::IndexMap;

use rowstream_common::error::{RowStreamError, RowStreamResult};

mod convention;
mod metadata;

pub use convention::ConventionMappingProvider;
pub use metadata::{ColumnMetadata, EntityMetadata, MetadataDocument, MetadataMappingProvider};

/// Source of table/column metadata for a record type.
pub trait MappingProvider {
    /// Returns the schema-qualified table name.
    fn table_name(&self) -> String;

    /// Returns the identifier property, if the type has one.
    fn identifier_property(&self) -> Option<String>;

    /// Returns the property holding the binary payload.
    fn blob_property(&self) -> String;

    /// Returns the full property → column map, identifier included.
    fn property_column_map(&self) -> IndexMap<String, String>;

    /// Returns the column holding the binary payload.
    fn blob_column(&self) -> RowStreamResult<String> {
        let property = self.blob_property();
        self.property_column_map()
            .get(&property)
            .cloned()
            .ok_or_else(|| RowStreamError::unmapped(property, self.table_name()))
    }
}

/// Computed-once mapping metadata for a record type.
///
/// # Invariants
///
/// - `columns[blob_property] == blob_column`
/// - the identifier property, when present, is mapped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingDescriptor {
    table: String,
    columns: IndexMap<String, String>,
    identifier_property: Option<String>,
    blob_property: String,
    blob_column: String,
}

impl MappingDescriptor {
    /// Creates a descriptor, validating its invariants.
    pub fn new(
        table: impl Into<String>,
        columns: IndexMap<String, String>,
        identifier_property: Option<String>,
        blob_property: impl Into<String>,
    ) -> RowStreamResult<Self> {
        let table = table.into();
        let blob_property = blob_property.into();

        if table.trim().is_empty() {
            return Err(RowStreamError::invalid_mapping("table name is empty"));
        }
        let blob_column = columns
            .get(&blob_property)
            .cloned()
            .ok_or_else(|| RowStreamError::unmapped(&blob_property, &table))?;
        if let Some(identifier) = &identifier_property {
            if !columns.contains_key(identifier) {
                return Err(RowStreamError::unmapped(identifier, &table));
            }
            if identifier == &blob_property {
                return Err(RowStreamError::invalid_mapping(format!(
                    "{} cannot be both the identifier and the payload of {}",
                    identifier, table
                )));
            }
        }

        Ok(Self {
            table,
            columns,
            identifier_property,
            blob_property,
            blob_column,
        })
    }

    /// Computes a descriptor from a provider.
    pub fn from_provider(provider: &dyn MappingProvider) -> RowStreamResult<Self> {
        let descriptor = Self::new(
            provider.table_name(),
            provider.property_column_map(),
            provider.identifier_property(),
            provider.blob_property(),
        )?;

        let reported = provider.blob_column()?;
        if reported != descriptor.blob_column {
            return Err(RowStreamError::invalid_mapping(format!(
                "blob column {} does not match the mapping of {} ({})",
                reported, descriptor.blob_property, descriptor.blob_column
            )));
        }
        Ok(descriptor)
    }

    /// Returns the schema-qualified table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Returns the property → column map in declaration order.
    pub fn columns(&self) -> &IndexMap<String, String> {
        &self.columns
    }

    /// Looks up a property's column.
    pub fn column(&self, property: &str) -> RowStreamResult<&str> {
        self.columns
            .get(property)
            .map(String::as_str)
            .ok_or_else(|| RowStreamError::unmapped(property, &self.table))
    }

    /// Returns the identifier property, if any.
    pub fn identifier_property(&self) -> Option<&str> {
        self.identifier_property.as_deref()
    }

    /// Returns the identifier property, failing when none is mapped.
    pub fn require_identifier(&self) -> RowStreamResult<&str> {
        self.identifier_property
            .as_deref()
            .ok_or_else(|| RowStreamError::MissingIdentifier {
                table: self.table.clone(),
            })
    }

    /// Returns the payload property.
    pub fn blob_property(&self) -> &str {
        &self.blob_property
    }

    /// Returns the payload column.
    pub fn blob_column(&self) -> &str {
        &self.blob_column
    }

    /// Iterates over every mapping except the payload, in declaration order.
    pub fn scalar_columns(&self) -> impl Iterator<Item = (&str, &str)> {
        self.columns
            .iter()
            .filter(move |(property, _)| **property != self.blob_property)
            .map(|(property, column)| (property.as_str(), column.as_str()))
    }
}

/// Strips one pair of enclosing brackets from a column name.
pub fn unquote(column: &str) -> &str {
    column
        .strip_prefix('[')
        .and_then(|c| c.strip_suffix(']'))
        .unwrap_or(column)
}

/// Encloses a name in brackets unless it already is.
pub fn quote(name: &str) -> String {
    if name.starts_with('[') && name.ends_with(']') {
        name.to_string()
    } else {
        format!("[{}]", name)
    }
}
