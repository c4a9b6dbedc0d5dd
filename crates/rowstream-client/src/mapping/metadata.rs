//! Mapping sourced from an external metadata document.
//!
//! The document is JSON and describes one or more entities the way an ORM's
//! class metadata would: the root table, the key property and its column,
//! the payload property and the remaining property columns.
//!
//! ```json
//! {
//!   "entities": [{
//!     "entity": "Files",
//!     "table": "dbo.Files",
//!     "identifier": { "property": "Id", "column": "Id" },
//!     "blob_property": "File",
//!     "columns": [
//!       { "property": "FileName", "column": "FileName" },
//!       { "property": "File", "column": "File" }
//!     ]
//!   }]
//! }
//! ```

use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use rowstream_common::error::{RowStreamError, RowStreamResult};

use super::{quote, MappingProvider};

/// A property and the column it is stored in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    /// Property name.
    pub property: String,
    /// Column name, bare or bracket-quoted.
    pub column: String,
}

/// Metadata for one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMetadata {
    /// Entity (record type) name.
    pub entity: String,
    /// Root table name.
    pub table: String,
    /// Key property and column.
    #[serde(default)]
    pub identifier: Option<ColumnMetadata>,
    /// Property holding the binary payload.
    pub blob_property: String,
    /// Remaining property columns.
    #[serde(default)]
    pub columns: Vec<ColumnMetadata>,
}

/// A metadata document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataDocument {
    /// Entities described by the document.
    pub entities: Vec<EntityMetadata>,
}

impl MetadataDocument {
    /// Parses a document from JSON text.
    pub fn from_json(json: &str) -> RowStreamResult<Self> {
        serde_json::from_str(json).map_err(|e| {
            RowStreamError::invalid_mapping(format!("malformed metadata document: {}", e))
        })
    }

    /// Reads and parses a document from a file.
    pub fn from_path(path: impl AsRef<Path>) -> RowStreamResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Finds an entity by name.
    pub fn entity(&self, name: &str) -> Option<&EntityMetadata> {
        self.entities.iter().find(|e| e.entity == name)
    }
}

/// Mapping provider backed by [`EntityMetadata`].
#[derive(Debug, Clone)]
pub struct MetadataMappingProvider {
    metadata: EntityMetadata,
}

impl MetadataMappingProvider {
    /// Creates a provider from entity metadata.
    pub fn new(metadata: EntityMetadata) -> Self {
        Self { metadata }
    }

    /// Creates a provider for one entity of a document.
    pub fn from_document(document: &MetadataDocument, entity: &str) -> RowStreamResult<Self> {
        document
            .entity(entity)
            .cloned()
            .map(Self::new)
            .ok_or_else(|| {
                RowStreamError::invalid_mapping(format!(
                    "entity {} is not described by the metadata document",
                    entity
                ))
            })
    }

    /// Creates a provider for one entity of a JSON document.
    pub fn from_json(json: &str, entity: &str) -> RowStreamResult<Self> {
        Self::from_document(&MetadataDocument::from_json(json)?, entity)
    }

    /// Creates a provider for one entity of a JSON document on disk.
    pub fn from_path(path: impl AsRef<Path>, entity: &str) -> RowStreamResult<Self> {
        Self::from_document(&MetadataDocument::from_path(path)?, entity)
    }

    /// Returns the underlying metadata.
    pub fn metadata(&self) -> &EntityMetadata {
        &self.metadata
    }
}

impl MappingProvider for MetadataMappingProvider {
    fn table_name(&self) -> String {
        self.metadata.table.clone()
    }

    fn identifier_property(&self) -> Option<String> {
        self.metadata.identifier.as_ref().map(|id| id.property.clone())
    }

    fn blob_property(&self) -> String {
        self.metadata.blob_property.clone()
    }

    fn property_column_map(&self) -> IndexMap<String, String> {
        let mut map = IndexMap::new();
        // Key column comes first and keeps its spelling
        if let Some(id) = &self.metadata.identifier {
            map.insert(id.property.clone(), id.column.clone());
        }
        for c in &self.metadata.columns {
            if !map.contains_key(&c.property) {
                map.insert(c.property.clone(), quote(&c.column));
            }
        }
        map
    }
}
