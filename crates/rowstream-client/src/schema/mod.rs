//! Record schemas.
//!
//! A [`RecordSchema`] is the per-type table of field descriptors the engine
//! uses instead of runtime reflection: each field has a name, a storage type,
//! a getter that produces a [`Value`] and a setter that consumes one.
//! Schemas are built once at start-up and shared through a
//! [`SchemaRegistry`].

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use rowstream_common::error::{RowStreamError, RowStreamResult};
use rowstream_common::types::{FieldType, Value};

/// Reads a field out of a record.
pub type Getter<T> = fn(&T) -> Value;

/// Writes a field into a record.
pub type Setter<T> = fn(&mut T, Value) -> RowStreamResult<()>;

/// One field of a record type.
pub struct FieldDescriptor<T> {
    name: String,
    field_type: FieldType,
    get: Getter<T>,
    set: Setter<T>,
}

impl<T> FieldDescriptor<T> {
    /// Creates a field descriptor.
    pub fn new(name: impl Into<String>, field_type: FieldType, get: Getter<T>, set: Setter<T>) -> Self {
        Self {
            name: name.into(),
            field_type,
            get,
            set,
        }
    }

    /// Returns the property name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the storage type.
    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    /// Reads the field.
    pub fn get(&self, record: &T) -> Value {
        (self.get)(record)
    }

    /// Writes the field.
    pub fn set(&self, record: &mut T, value: Value) -> RowStreamResult<()> {
        (self.set)(record, value)
    }
}

impl<T> Clone for FieldDescriptor<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            field_type: self.field_type,
            get: self.get,
            set: self.set,
        }
    }
}

impl<T> fmt::Debug for FieldDescriptor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("name", &self.name)
            .field("field_type", &self.field_type)
            .finish()
    }
}

/// Field descriptor table for a record type.
///
/// # Example
///
/// ```rust
/// use rowstream_client::RecordSchema;
/// use rowstream_common::{FieldType, SqlType, Value};
///
/// #[derive(Default)]
/// struct Photo {
///     id: i64,
///     caption: Option<String>,
/// }
///
/// let schema = RecordSchema::<Photo>::new("Photo")
///     .field("Id", FieldType::new(SqlType::BigInt), |p| Value::from(p.id), |p, v| {
///         p.id = v.decode()?;
///         Ok(())
///     })
///     .field("Caption", FieldType::nullable(SqlType::NVarChar), |p| Value::from(p.caption.clone()), |p, v| {
///         p.caption = v.decode()?;
///         Ok(())
///     });
///
/// assert_eq!(schema.fields().len(), 2);
/// assert!(schema.field_named("Caption").is_some());
/// ```
pub struct RecordSchema<T> {
    type_name: String,
    factory: fn() -> T,
    fields: Vec<FieldDescriptor<T>>,
}

impl<T: Default> RecordSchema<T> {
    /// Creates an empty schema whose records start from `T::default()`.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self::with_factory(type_name, T::default)
    }
}

impl<T> RecordSchema<T> {
    /// Creates an empty schema with an explicit record factory.
    pub fn with_factory(type_name: impl Into<String>, factory: fn() -> T) -> Self {
        Self {
            type_name: type_name.into(),
            factory,
            fields: Vec::new(),
        }
    }

    /// Appends a field. Declaration order is preserved.
    pub fn field(
        mut self,
        name: impl Into<String>,
        field_type: FieldType,
        get: Getter<T>,
        set: Setter<T>,
    ) -> Self {
        self.fields.push(FieldDescriptor::new(name, field_type, get, set));
        self
    }

    /// Returns the record type name.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Returns the fields in declaration order.
    pub fn fields(&self) -> &[FieldDescriptor<T>] {
        &self.fields
    }

    /// Finds a field by property name.
    pub fn field_named(&self, name: &str) -> Option<&FieldDescriptor<T>> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Builds a fresh record.
    pub fn instantiate(&self) -> T {
        (self.factory)()
    }
}

impl<T> fmt::Debug for RecordSchema<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordSchema")
            .field("type_name", &self.type_name)
            .field("fields", &self.fields)
            .finish()
    }
}

/// Type-keyed registry of record schemas.
///
/// Filled once at start-up, then shared immutably (typically behind an
/// `Arc`).
#[derive(Default)]
pub struct SchemaRegistry {
    schemas: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    names: HashMap<TypeId, String>,
}

impl SchemaRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the schema for `T`, replacing any earlier one.
    pub fn register<T: 'static>(&mut self, schema: RecordSchema<T>) -> Arc<RecordSchema<T>> {
        let schema = Arc::new(schema);
        let id = TypeId::of::<T>();
        self.names.insert(id, schema.type_name.clone());
        self.schemas.insert(id, schema.clone());
        schema
    }

    /// Returns the schema for `T`, if registered.
    pub fn get<T: 'static>(&self) -> Option<Arc<RecordSchema<T>>> {
        self.schemas
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|schema| schema.downcast::<RecordSchema<T>>().ok())
    }

    /// Returns the schema for `T`, failing when it was never registered.
    pub fn require<T: 'static>(&self) -> RowStreamResult<Arc<RecordSchema<T>>> {
        self.get::<T>().ok_or_else(|| {
            RowStreamError::invalid_mapping(format!(
                "no schema registered for {}",
                std::any::type_name::<T>()
            ))
        })
    }

    /// Returns the number of registered schemas.
    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Iterates over the registered record type names.
    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.names.values().map(String::as_str)
    }
}

impl fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaRegistry")
            .field("types", &self.names.values().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowstream_common::types::SqlType;

    #[derive(Debug, Default, PartialEq)]
    struct Doc {
        id: i32,
        title: String,
    }

    fn doc_schema() -> RecordSchema<Doc> {
        RecordSchema::<Doc>::new("Doc")
            .field("Id", FieldType::new(SqlType::Int), |d| Value::from(d.id), |d, v| {
                d.id = v.decode()?;
                Ok(())
            })
            .field("Title", FieldType::new(SqlType::NVarChar), |d| Value::from(&d.title), |d, v| {
                d.title = v.decode()?;
                Ok(())
            })
    }

    #[test]
    fn test_schema_fields() {
        let schema = doc_schema();
        assert_eq!(schema.type_name(), "Doc");
        let names: Vec<_> = schema.fields().iter().map(|f| f.name()).collect();
        assert_eq!(names, vec!["Id", "Title"]);

        let mut doc = schema.instantiate();
        schema.field_named("Title").unwrap().set(&mut doc, Value::from("x")).unwrap();
        assert_eq!(doc.title, "x");
        assert_eq!(schema.fields()[0].get(&doc), Value::Int(0));
        assert!(schema.field_named("Size").is_none());
    }

    #[test]
    fn test_setter_errors_propagate() {
        let schema = doc_schema();
        let mut doc = Doc::default();
        let err = schema.fields()[0].set(&mut doc, Value::from("one")).unwrap_err();
        assert_eq!(err.code(), rowstream_common::ErrorCode::TypeMismatch);
    }

    #[test]
    fn test_custom_factory() {
        let schema = RecordSchema::with_factory("Doc", || Doc {
            id: -1,
            title: "untitled".to_string(),
        });
        assert_eq!(schema.instantiate().id, -1);
    }

    #[test]
    fn test_registry() {
        let mut registry = SchemaRegistry::new();
        assert!(registry.is_empty());
        registry.register(doc_schema());

        let schema = registry.require::<Doc>().unwrap();
        assert_eq!(schema.fields().len(), 2);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.type_names().collect::<Vec<_>>(), vec!["Doc"]);

        assert!(registry.get::<String>().is_none());
        assert!(registry.require::<String>().unwrap_err().is_mapping());
    }
}
