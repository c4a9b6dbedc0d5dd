//! In-process memory driver.
//!
//! [`MemoryServer`] keeps tables in memory and runs exactly the statement
//! shapes the engine emits: conditional inserts and payload resets, and the
//! handle-open query with `PathName()` and
//! `GET_FILESTREAM_TRANSACTION_CONTEXT()`. Each transaction works on its own
//! copy of the catalog; commit publishes the tables it touched.
//!
//! Payload handles are addressed by `\\memory\<table>\<row>` and only open
//! with the token of the transaction that is active on the connection.
//!
//! ```rust
//! use rowstream_client::driver::memory::{MemoryServer, MemoryTable};
//! use rowstream_client::{Command, Connection, Connector};
//!
//! let server = MemoryServer::new();
//! server.create_table(MemoryTable::new("dbo.Files").key("Id").blob("File"));
//!
//! let mut connection = server.connect("Server=memory;Integrated Security=true").unwrap();
//! connection.begin_transaction().unwrap();
//! connection
//!     .execute(&Command::text("INSERT INTO dbo.Files ([Id], [File]) VALUES (1, 0x0102)"))
//!     .unwrap();
//! connection.commit().unwrap();
//! connection.close().unwrap();
//!
//! assert_eq!(server.blob("dbo.Files", 1), Some(vec![1, 2]));
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

use rowstream_common::config::ConnectionConfig;
use rowstream_common::error::{RowStreamError, RowStreamResult};
use rowstream_common::types::Value;

use super::{Connection, Connector};

mod blob;
mod connection;
mod sql;

pub use blob::MemoryBlob;
pub use connection::MemoryConnection;

/// Path locator prefix.
pub const PATH_PREFIX: &str = "\\\\memory\\";

/// Memory driver errors.
///
/// Surfaced to callers as `RowStreamError::Store` with this error as the
/// source.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// The statement is not one of the supported shapes.
    #[error("syntax error: {message}")]
    Syntax {
        /// What went wrong.
        message: String,
    },

    /// Unknown table.
    #[error("invalid object name '{0}'")]
    UnknownTable(String),

    /// Unknown column.
    #[error("invalid column name '{column}' in {table}")]
    UnknownColumn {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },

    /// A placeholder has no parameter.
    #[error("parameter @p{0} was not supplied")]
    UnboundParameter(usize),

    /// Key uniqueness violation.
    #[error("violation of primary key on {table}: duplicate key {key}")]
    DuplicateKey {
        /// Table name.
        table: String,
        /// The duplicate value.
        key: String,
    },

    /// INSERT column and value counts differ.
    #[error("insert into {0} has mismatched column and value counts")]
    ColumnCount(String),

    /// The connection is closed.
    #[error("connection is closed")]
    ConnectionClosed,

    /// BEGIN while a transaction is active.
    #[error("a transaction is already active")]
    TransactionActive,

    /// COMMIT/ROLLBACK or FILESTREAM access without a transaction.
    #[error("no active transaction")]
    NoTransaction,

    /// The token does not belong to the active transaction.
    #[error("transaction token does not match the active transaction")]
    TokenMismatch,

    /// Malformed or unknown path locator.
    #[error("invalid path locator '{0}'")]
    InvalidPath(String),

    /// Query statement passed to execute, or the reverse.
    #[error("{0}")]
    WrongStatementKind(&'static str),

    /// A fault injected by a test.
    #[error("injected failure: {0}")]
    Injected(&'static str),
}

impl From<MemoryError> for RowStreamError {
    fn from(e: MemoryError) -> Self {
        RowStreamError::store(e.to_string(), e)
    }
}

/// Normalizes a table name: brackets stripped, lower case.
fn table_key(name: &str) -> String {
    name.split('.')
        .map(|part| crate::mapping::unquote(part.trim()).to_ascii_lowercase())
        .collect::<Vec<_>>()
        .join(".")
}

/// A column definition.
#[derive(Debug, Clone)]
struct ColumnDef {
    name: String,
    blob: bool,
}

/// A stored row.
#[derive(Debug, Clone)]
struct StoredRow {
    id: u64,
    values: Vec<Value>,
}

/// An in-memory table.
#[derive(Debug, Clone)]
pub struct MemoryTable {
    name: String,
    key: Option<usize>,
    columns: Vec<ColumnDef>,
    rows: Vec<StoredRow>,
    next_row_id: u64,
}

impl MemoryTable {
    /// Creates an empty table with no columns.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: None,
            columns: Vec::new(),
            rows: Vec::new(),
            next_row_id: 1,
        }
    }

    /// Adds the key column. Values in it must be unique.
    pub fn key(mut self, name: impl Into<String>) -> Self {
        self.key = Some(self.columns.len());
        self.push_column(name, false)
    }

    /// Adds a scalar column.
    pub fn column(self, name: impl Into<String>) -> Self {
        self.push_column(name, false)
    }

    /// Adds a FILESTREAM column.
    pub fn blob(self, name: impl Into<String>) -> Self {
        self.push_column(name, true)
    }

    fn push_column(mut self, name: impl Into<String>, blob: bool) -> Self {
        self.columns.push(ColumnDef {
            name: name.into(),
            blob,
        });
        self
    }

    /// Returns the table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn column_index(&self, column: &str) -> Result<usize, MemoryError> {
        let column = crate::mapping::unquote(column);
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(column))
            .ok_or_else(|| MemoryError::UnknownColumn {
                table: self.name.clone(),
                column: column.to_string(),
            })
    }

    fn find_by_key(&self, key: &Value) -> Option<&StoredRow> {
        let index = self.key?;
        self.rows.iter().find(|r| loose_eq(&r.values[index], key))
    }

    fn insert(&mut self, values: Vec<Value>) -> Result<u64, MemoryError> {
        if let Some(index) = self.key {
            if self.find_by_key(&values[index]).is_some() {
                return Err(MemoryError::DuplicateKey {
                    table: self.name.clone(),
                    key: values[index].to_string(),
                });
            }
        }
        let id = self.next_row_id;
        self.next_row_id += 1;
        self.rows.push(StoredRow { id, values });
        Ok(id)
    }

    fn path(&self, row: &StoredRow) -> String {
        format!("{}{}\\{}", PATH_PREFIX, self.name, row.id)
    }
}

/// SQL equality with integer widths compared by value. NULL equals nothing.
fn loose_eq(a: &Value, b: &Value) -> bool {
    if a.is_null() || b.is_null() {
        return false;
    }
    match (a.as_i64(), b.as_i64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

type Catalog = HashMap<String, MemoryTable>;

/// Server counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    /// Statements executed or queried.
    pub statements: u64,
    /// Queries returning result sets.
    pub queries: u64,
    /// Rows inserted.
    pub inserts: u64,
    /// Rows updated.
    pub updates: u64,
    /// Transactions begun.
    pub begins: u64,
    /// Transactions committed.
    pub commits: u64,
    /// Transactions rolled back.
    pub rollbacks: u64,
    /// Payload handles opened.
    pub blobs_opened: u64,
    /// Connections opened.
    pub connections_opened: u64,
    /// Connections explicitly closed.
    pub connections_closed: u64,
}

impl ServerStats {
    /// Connections opened and not yet closed.
    pub fn open_connections(&self) -> u64 {
        self.connections_opened.saturating_sub(self.connections_closed)
    }
}

#[derive(Debug, Default)]
struct Faults {
    fail_next_begin: bool,
    fail_next_commit: bool,
}

#[derive(Debug, Default)]
struct ServerInner {
    catalog: Mutex<Catalog>,
    stats: Mutex<ServerStats>,
    faults: Mutex<Faults>,
    next_connection: AtomicU64,
}

/// An in-process database server.
///
/// Cloning is cheap and every clone sees the same tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryServer {
    inner: Arc<ServerInner>,
}

impl MemoryServer {
    /// Creates an empty server.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or replaces a table.
    pub fn create_table(&self, table: MemoryTable) {
        debug!("Creating memory table {}", table.name);
        self.inner.catalog.lock().insert(table_key(&table.name), table);
    }

    /// Returns a snapshot of the counters.
    pub fn stats(&self) -> ServerStats {
        self.inner.stats.lock().clone()
    }

    /// Resets the counters.
    pub fn reset_stats(&self) {
        *self.inner.stats.lock() = ServerStats::default();
    }

    /// Makes the next `begin_transaction` on any connection fail.
    pub fn fail_next_begin(&self) {
        self.inner.faults.lock().fail_next_begin = true;
    }

    /// Makes the next `commit` on any connection fail. The transaction is
    /// rolled back.
    pub fn fail_next_commit(&self) {
        self.inner.faults.lock().fail_next_commit = true;
    }

    /// Returns the number of committed rows in a table, 0 if it is unknown.
    pub fn row_count(&self, table: &str) -> usize {
        self.inner
            .catalog
            .lock()
            .get(&table_key(table))
            .map_or(0, MemoryTable::len)
    }

    /// Returns a committed row by key, as column name → value.
    pub fn row(&self, table: &str, key: impl Into<Value>) -> Option<IndexMap<String, Value>> {
        let key = key.into();
        let catalog = self.inner.catalog.lock();
        let table = catalog.get(&table_key(table))?;
        let row = table.find_by_key(&key)?;
        Some(
            table
                .columns
                .iter()
                .zip(&row.values)
                .map(|(c, v)| (c.name.clone(), v.clone()))
                .collect(),
        )
    }

    /// Returns a committed row's payload by key.
    pub fn blob(&self, table: &str, key: impl Into<Value>) -> Option<Vec<u8>> {
        let key = key.into();
        let catalog = self.inner.catalog.lock();
        let table = catalog.get(&table_key(table))?;
        let index = table.columns.iter().position(|c| c.blob)?;
        match &table.find_by_key(&key)?.values[index] {
            Value::Bytes(bytes) => Some(bytes.clone()),
            _ => None,
        }
    }

    fn record(&self, f: impl FnOnce(&mut ServerStats)) {
        f(&mut self.inner.stats.lock());
    }

    fn take_fault(&self, f: impl FnOnce(&mut Faults) -> bool) -> bool {
        f(&mut self.inner.faults.lock())
    }

    fn snapshot(&self) -> Catalog {
        self.inner.catalog.lock().clone()
    }

    fn publish(&self, tables: impl IntoIterator<Item = (String, MemoryTable)>) {
        let mut catalog = self.inner.catalog.lock();
        for (key, table) in tables {
            catalog.insert(key, table);
        }
    }
}

impl Connector for MemoryServer {
    fn connect(&self, connection_string: &str) -> RowStreamResult<Box<dyn Connection>> {
        let config = ConnectionConfig::parse(connection_string)?;
        let id = self.inner.next_connection.fetch_add(1, Ordering::Relaxed) + 1;
        self.record(|s| s.connections_opened += 1);
        debug!(
            "Memory connection {} opened for {}",
            id,
            config.application_name.as_deref().unwrap_or("unnamed application")
        );
        Ok(Box::new(MemoryConnection::new(self.clone(), id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files() -> MemoryTable {
        MemoryTable::new("dbo.Files").key("Id").column("FileName").blob("File")
    }

    #[test]
    fn test_table_names() {
        assert_eq!(table_key("[dbo].[Files]"), "dbo.files");
        assert_eq!(table_key("dbo.Files"), "dbo.files");
    }

    #[test]
    fn test_key_uniqueness() {
        let mut table = files();
        table
            .insert(vec![Value::Int(1), Value::from("a"), Value::Bytes(Vec::new())])
            .unwrap();
        let err = table
            .insert(vec![Value::BigInt(1), Value::from("b"), Value::Bytes(Vec::new())])
            .unwrap_err();
        assert!(matches!(err, MemoryError::DuplicateKey { .. }));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_loose_eq() {
        assert!(loose_eq(&Value::TinyInt(3), &Value::BigInt(3)));
        assert!(!loose_eq(&Value::Null, &Value::Null));
        assert!(!loose_eq(&Value::from("3"), &Value::Int(3)));
    }

    #[test]
    fn test_column_lookup() {
        let table = files();
        assert_eq!(table.column_index("[filename]").unwrap(), 1);
        assert!(table.column_index("Size").is_err());
    }

    #[test]
    fn test_store_error_keeps_source() {
        use std::error::Error;
        let err: RowStreamError = MemoryError::UnknownTable("dbo.Nope".into()).into();
        assert!(err.is_store());
        let source = err.source().unwrap();
        assert!(source.downcast_ref::<MemoryError>().is_some());
    }

    #[test]
    fn test_connect_requires_valid_string() {
        let server = MemoryServer::new();
        assert!(server.connect("Bogus").is_err());
        assert_eq!(server.stats().connections_opened, 0);
        assert!(server.connect("Server=memory;Integrated Security=true").is_ok());
        assert_eq!(server.stats().connections_opened, 1);
    }
}
