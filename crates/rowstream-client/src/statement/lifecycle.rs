//! Row-lifecycle statements.
//!
//! Before a payload handle can be opened the row has to exist and, for some
//! modes, its payload has to be reset. Each open mode maps to at most one
//! statement, built here from the mapping descriptor, the compiled filter
//! and the new-row values.

use rowstream_common::error::{RowStreamError, RowStreamResult};
use rowstream_common::types::{SqlEnum, Value};

use super::{Command, CommandBuilder};
use crate::mapping::MappingDescriptor;
use crate::predicate::{ValueSource, WhereClause};
use crate::schema::RecordSchema;
use crate::stream::OpenMode;

/// Property values for a row about to be inserted.
///
/// Values are kept in the order they were set; setting a property twice
/// replaces the earlier value in place.
#[derive(Debug, Clone, Default)]
pub struct NewRow {
    values: Vec<(String, ValueSource)>,
}

impl NewRow {
    /// Creates an empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds every field of a record through its getter.
    pub fn from_record<T>(schema: &RecordSchema<T>, record: &T) -> Self {
        schema
            .fields()
            .iter()
            .fold(Self::new(), |row, field| row.set(field.name(), field.get(record)))
    }

    /// Sets a property.
    pub fn set(self, property: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_source(property.into(), ValueSource::Literal(value.into()))
    }

    /// Sets a property to a value computed when the statement is built.
    pub fn set_with<F, V>(self, property: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> V + Send + Sync + 'static,
        V: Into<Value>,
    {
        self.set_source(
            property.into(),
            ValueSource::Captured(std::sync::Arc::new(move || f().into())),
        )
    }

    /// Sets an enumeration property to its storage value.
    pub fn set_enum<E: SqlEnum>(self, property: impl Into<String>, value: E) -> Self {
        self.set(property, Value::from_enum(value))
    }

    fn set_source(mut self, property: String, source: ValueSource) -> Self {
        match self.values.iter_mut().find(|(p, _)| *p == property) {
            Some(slot) => slot.1 = source,
            None => self.values.push((property, source)),
        }
        self
    }

    /// Returns the current value of a property.
    pub fn get(&self, property: &str) -> Option<Value> {
        self.values
            .iter()
            .find(|(p, _)| p == property)
            .map(|(_, source)| source.evaluate())
    }

    /// Iterates over the properties in the order they were set.
    pub fn properties(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|(p, _)| p.as_str())
    }

    /// Returns the number of properties set.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if no property is set.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Builds row-lifecycle and handle-open statements for one mapping.
#[derive(Debug, Clone, Copy)]
pub struct RowStatements<'d> {
    descriptor: &'d MappingDescriptor,
}

impl<'d> RowStatements<'d> {
    /// Creates a statement factory for a descriptor.
    pub fn new(descriptor: &'d MappingDescriptor) -> Self {
        Self { descriptor }
    }

    /// Returns the statement a mode runs before the handle is opened.
    ///
    /// `Open` and `Append` run nothing. The creating modes need `new_row`.
    pub fn lifecycle(
        &self,
        mode: OpenMode,
        filter: &WhereClause,
        new_row: Option<&NewRow>,
    ) -> RowStreamResult<Option<Command>> {
        let require_row = || {
            new_row.ok_or_else(|| {
                RowStreamError::invalid_mode(format!("{} requires new-row values", mode))
            })
        };
        match mode {
            OpenMode::Open | OpenMode::Append => Ok(None),
            OpenMode::Truncate => Ok(Some(self.truncate(filter))),
            OpenMode::CreateNew => self.create_new(require_row()?).map(Some),
            OpenMode::Create => self.create(filter, require_row()?).map(Some),
            OpenMode::OpenOrCreate => self.open_or_create(filter, require_row()?).map(Some),
        }
    }

    /// `INSERT INTO t (cols..., blob) VALUES (@p.., 0x)`
    pub fn create_new(&self, row: &NewRow) -> RowStreamResult<Command> {
        Ok(self.insert(CommandBuilder::new(), row)?.build())
    }

    /// Inserts the row when no row matches, otherwise empties the matching
    /// row's payload.
    pub fn create(&self, filter: &WhereClause, row: &NewRow) -> RowStreamResult<Command> {
        let builder = CommandBuilder::seeded(filter).sql(self.probe("IF NOT EXISTS", filter));
        let builder = self.insert(builder, row)?;
        Ok(builder
            .sql(" ELSE ")
            .sql(self.empty_payload(filter))
            .build())
    }

    /// Inserts the row when no row matches.
    pub fn open_or_create(&self, filter: &WhereClause, row: &NewRow) -> RowStreamResult<Command> {
        let builder = CommandBuilder::seeded(filter).sql(self.probe("IF NOT EXISTS", filter));
        Ok(self.insert(builder, row)?.build())
    }

    /// Empties the matching row's payload, if a row matches.
    pub fn truncate(&self, filter: &WhereClause) -> Command {
        CommandBuilder::seeded(filter)
            .sql(self.probe("IF EXISTS", filter))
            .sql(self.empty_payload(filter))
            .build()
    }

    /// Selects the payload's path locator, the transaction token and,
    /// when `include_columns` is set, every other mapped column.
    pub fn open_handle(&self, filter: &WhereClause, include_columns: bool) -> Command {
        let mut select = format!(
            "SELECT {}.PathName(), GET_FILESTREAM_TRANSACTION_CONTEXT()",
            self.descriptor.blob_column()
        );
        if include_columns {
            for (_, column) in self.descriptor.scalar_columns() {
                select.push_str(", ");
                select.push_str(column);
            }
        }
        CommandBuilder::new()
            .sql(select)
            .sql(format!(" FROM {} WHERE ", self.descriptor.table()))
            .splice(filter)
            .build()
    }

    /// `INSERT INTO t (c1, c2, blob) VALUES (@pN, @pN+1, 0x)`
    pub fn insert(&self, builder: CommandBuilder, row: &NewRow) -> RowStreamResult<CommandBuilder> {
        let blob_property = self.descriptor.blob_property();
        let mut bound = Vec::with_capacity(row.len());
        for (property, source) in &row.values {
            if property == blob_property {
                continue;
            }
            bound.push((self.descriptor.column(property)?, source.evaluate()));
        }

        let mut columns: Vec<&str> = bound.iter().map(|(column, _)| *column).collect();
        columns.push(self.descriptor.blob_column());

        let mut builder = builder.sql(format!(
            "INSERT INTO {} ({}) VALUES (",
            self.descriptor.table(),
            columns.join(", ")
        ));
        for (column, value) in bound {
            builder = builder.bind_column(column, value).sql(", ");
        }
        Ok(builder.sql("0x)"))
    }

    fn probe(&self, keyword: &str, filter: &WhereClause) -> String {
        format!(
            "{} (SELECT 1 FROM {} WHERE {}) ",
            keyword,
            self.descriptor.table(),
            filter.sql
        )
    }

    fn empty_payload(&self, filter: &WhereClause) -> String {
        format!(
            "UPDATE {} SET {} = 0x WHERE {}",
            self.descriptor.table(),
            self.descriptor.blob_column(),
            filter.sql
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::{col, PredicateCompiler};
    use indexmap::IndexMap;
    use rowstream_common::types::SqlType;
    use rowstream_common::ErrorCode;

    fn descriptor() -> MappingDescriptor {
        let columns: IndexMap<String, String> =
            [("Id", "[Id]"), ("FileName", "[FileName]"), ("File", "[File]")]
                .into_iter()
                .map(|(p, c)| (p.to_string(), c.to_string()))
                .collect();
        MappingDescriptor::new("dbo.Files", columns, Some("Id".into()), "File").unwrap()
    }

    fn filter(d: &MappingDescriptor) -> WhereClause {
        PredicateCompiler::new(d).compile(&col("Id").eq(1)).unwrap()
    }

    fn row() -> NewRow {
        NewRow::new()
            .set("FileName", "a.pdf")
            .set("File", vec![9u8])
            .set("Id", 1)
    }

    #[test]
    fn test_new_row_ordering() {
        let row = row().set("FileName", "b.pdf");
        assert_eq!(row.properties().collect::<Vec<_>>(), vec!["FileName", "File", "Id"]);
        assert_eq!(row.get("FileName"), Some(Value::from("b.pdf")));
        assert_eq!(row.len(), 3);
    }

    #[test]
    fn test_create_new() {
        let d = descriptor();
        let command = RowStatements::new(&d).create_new(&row()).unwrap();
        assert_eq!(
            command.sql,
            "INSERT INTO dbo.Files ([FileName], [Id], [File]) VALUES (@p0, @p1, 0x)"
        );
        assert_eq!(command.parameters[0].column.as_deref(), Some("[FileName]"));
        assert_eq!(command.parameters[1].sql_type, Some(SqlType::Int));
    }

    #[test]
    fn test_create_reuses_filter() {
        let d = descriptor();
        let command = RowStatements::new(&d).create(&filter(&d), &row()).unwrap();
        assert_eq!(
            command.sql,
            "IF NOT EXISTS (SELECT 1 FROM dbo.Files WHERE ([Id] = @p0)) \
             INSERT INTO dbo.Files ([FileName], [Id], [File]) VALUES (@p1, @p2, 0x) \
             ELSE UPDATE dbo.Files SET [File] = 0x WHERE ([Id] = @p0)"
        );
        assert_eq!(command.parameters.len(), 3);
    }

    #[test]
    fn test_open_or_create_and_truncate() {
        let d = descriptor();
        let statements = RowStatements::new(&d);
        let command = statements.open_or_create(&filter(&d), &row()).unwrap();
        assert!(command.sql.starts_with("IF NOT EXISTS (SELECT 1 FROM dbo.Files WHERE ([Id] = @p0)) INSERT"));
        assert!(!command.sql.contains("ELSE"));

        let command = statements.truncate(&filter(&d));
        assert_eq!(
            command.sql,
            "IF EXISTS (SELECT 1 FROM dbo.Files WHERE ([Id] = @p0)) \
             UPDATE dbo.Files SET [File] = 0x WHERE ([Id] = @p0)"
        );
    }

    #[test]
    fn test_open_handle() {
        let d = descriptor();
        let statements = RowStatements::new(&d);
        assert_eq!(
            statements.open_handle(&filter(&d), false).sql,
            "SELECT [File].PathName(), GET_FILESTREAM_TRANSACTION_CONTEXT() \
             FROM dbo.Files WHERE ([Id] = @p0)"
        );
        assert_eq!(
            statements.open_handle(&filter(&d), true).sql,
            "SELECT [File].PathName(), GET_FILESTREAM_TRANSACTION_CONTEXT(), [Id], [FileName] \
             FROM dbo.Files WHERE ([Id] = @p0)"
        );

        let clause = PredicateCompiler::new(&d)
            .compile(&col("Id").eq(1).or(col("FileName").eq("a.pdf")))
            .unwrap();
        let command = statements.open_handle(&clause, false);
        assert!(command.sql.ends_with("WHERE (([Id] = @p0) OR ([FileName] = @p1))"));
        assert_eq!(command.parameters, clause.parameters);
    }

    #[test]
    fn test_lifecycle_by_mode() {
        let d = descriptor();
        let statements = RowStatements::new(&d);
        let f = filter(&d);
        assert!(statements.lifecycle(OpenMode::Open, &f, None).unwrap().is_none());
        assert!(statements.lifecycle(OpenMode::Append, &f, None).unwrap().is_none());
        assert!(statements.lifecycle(OpenMode::Truncate, &f, None).unwrap().is_some());

        let err = statements.lifecycle(OpenMode::Create, &f, None).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidMode);
    }

    #[test]
    fn test_unmapped_new_row_property() {
        let d = descriptor();
        let err = RowStatements::new(&d)
            .create_new(&NewRow::new().set("Size", 10))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnmappedProperty);
    }
}
