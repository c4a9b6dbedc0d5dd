//! Naming-convention mapping.

use indexmap::IndexMap;

use super::{quote, MappingProvider};
use crate::schema::RecordSchema;

/// Maps every schema field to a column of the same name.
///
/// The table is `dbo.<TypeName>` unless another database schema is chosen
/// with [`ConventionMappingProvider::in_schema`]; columns are `[Property]`.
#[derive(Debug, Clone)]
pub struct ConventionMappingProvider {
    db_schema: String,
    type_name: String,
    properties: Vec<String>,
    identifier: Option<String>,
    blob: String,
}

impl ConventionMappingProvider {
    /// Creates a provider for a record schema.
    pub fn new<T>(schema: &RecordSchema<T>, identifier: &str, blob: &str) -> Self {
        Self {
            db_schema: "dbo".to_string(),
            type_name: schema.type_name().to_string(),
            properties: schema.fields().iter().map(|f| f.name().to_string()).collect(),
            identifier: Some(identifier.to_string()),
            blob: blob.to_string(),
        }
    }

    /// Places the table in another database schema.
    pub fn in_schema(mut self, db_schema: impl Into<String>) -> Self {
        self.db_schema = db_schema.into();
        self
    }

    /// Drops the identifier property.
    pub fn without_identifier(mut self) -> Self {
        self.identifier = None;
        self
    }
}

impl MappingProvider for ConventionMappingProvider {
    fn table_name(&self) -> String {
        format!("{}.{}", self.db_schema, self.type_name)
    }

    fn identifier_property(&self) -> Option<String> {
        self.identifier.clone()
    }

    fn blob_property(&self) -> String {
        self.blob.clone()
    }

    fn property_column_map(&self) -> IndexMap<String, String> {
        self.properties
            .iter()
            .map(|p| (p.clone(), quote(p)))
            .collect()
    }
}
