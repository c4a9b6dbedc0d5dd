//! Database driver seam.
//!
//! The engine talks to the database only through these traits. A driver
//! provides blocking connections that run parameterized [`Command`]s inside a
//! transaction and can open the FILESTREAM handle addressed by a path locator
//! and a transaction token.
//!
//! [`memory`] is an in-process driver that understands exactly the statements
//! this crate emits.

use std::fmt;
use std::io::{Read, Seek, Write};

use rowstream_common::error::RowStreamResult;
use rowstream_common::types::Value;

use crate::statement::Command;
use crate::stream::Access;

pub mod memory;

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Open, no transaction.
    Open,
    /// Open with an active transaction.
    InTransaction,
    /// Connection closed.
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Open => write!(f, "open"),
            ConnectionState::InTransaction => write!(f, "in_transaction"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

/// Opens connections from a connection string.
pub trait Connector {
    /// Opens a new connection. Blocks until the server accepts it.
    fn connect(&self, connection_string: &str) -> RowStreamResult<Box<dyn Connection>>;
}

/// A blocking database connection.
///
/// Driver failures are reported as `RowStreamError::Store` with the driver's
/// own error as the source.
pub trait Connection: Send {
    /// Returns the connection state.
    fn state(&self) -> ConnectionState;

    /// Begins a transaction.
    fn begin_transaction(&mut self) -> RowStreamResult<()>;

    /// Commits the active transaction.
    fn commit(&mut self) -> RowStreamResult<()>;

    /// Rolls back the active transaction.
    fn rollback(&mut self) -> RowStreamResult<()>;

    /// Closes the connection, rolling back any active transaction.
    fn close(&mut self) -> RowStreamResult<()>;

    /// Executes a statement and returns the number of rows affected.
    fn execute(&mut self, command: &Command) -> RowStreamResult<u64>;

    /// Executes a query.
    fn query(&mut self, command: &Command) -> RowStreamResult<ResultSet>;

    /// Opens the binary-object handle for a path locator.
    ///
    /// `transaction_token` is the value of
    /// `GET_FILESTREAM_TRANSACTION_CONTEXT()` for the active transaction.
    fn open_blob(
        &mut self,
        path: &str,
        transaction_token: &[u8],
        access: Access,
    ) -> RowStreamResult<Box<dyn BlobHandle>>;
}

/// A raw, seekable binary-object handle.
pub trait BlobHandle: Read + Write + Seek + Send {
    /// Returns the current length in bytes.
    fn len(&self) -> u64;

    /// Returns true if the payload is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Truncates or extends the payload.
    fn set_len(&mut self, len: u64) -> std::io::Result<()>;

    /// Whether the handle was opened for reading.
    fn can_read(&self) -> bool;

    /// Whether the handle was opened for writing.
    fn can_write(&self) -> bool;

    /// Whether the handle supports seeking.
    fn can_seek(&self) -> bool {
        true
    }

    /// Flushes and releases the handle.
    fn close(&mut self) -> std::io::Result<()>;
}

/// Query result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    /// Column names. Computed columns have an empty name.
    pub columns: Vec<String>,
    /// Row data.
    pub rows: Vec<Vec<Value>>,
}

impl ResultSet {
    /// Creates a result set.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    /// Returns true if the result has rows.
    pub fn has_rows(&self) -> bool {
        !self.rows.is_empty()
    }

    /// Returns the number of rows.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Returns the first row.
    pub fn first(&self) -> Option<RowRef<'_>> {
        self.rows.first().map(|values| RowRef {
            columns: &self.columns,
            values,
        })
    }

    /// Iterates over rows.
    pub fn iter(&self) -> impl Iterator<Item = RowRef<'_>> {
        self.rows.iter().map(move |values| RowRef {
            columns: &self.columns,
            values,
        })
    }
}

/// A borrowed view of one result row.
#[derive(Debug, Clone, Copy)]
pub struct RowRef<'a> {
    columns: &'a [String],
    values: &'a [Value],
}

impl<'a> RowRef<'a> {
    /// Returns the number of values in the row.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if the row has no values.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns the value at an ordinal.
    pub fn get(&self, ordinal: usize) -> Option<&'a Value> {
        self.values.get(ordinal)
    }

    /// Finds a column's ordinal, exact match first, then ignoring case.
    pub fn ordinal(&self, column: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c == column)
            .or_else(|| {
                self.columns
                    .iter()
                    .position(|c| c.eq_ignore_ascii_case(column))
            })
    }

    /// Returns true if the row has a column with this name.
    pub fn has_column(&self, column: &str) -> bool {
        self.ordinal(column).is_some()
    }

    /// Returns the value of a named column.
    pub fn value(&self, column: &str) -> Option<&'a Value> {
        self.ordinal(column).and_then(|i| self.values.get(i))
    }
}
