//! Transaction contexts.
//!
//! A [`TransactionContext`] pairs a connection and an active transaction
//! with the mapping descriptor the session works against. The connection is
//! either owned (opened from a connection string, committed or rolled back
//! and then closed by the context) or borrowed (the caller's connection and
//! transaction, left untouched).
//!
//! An owned context that is dropped while still active rolls back and
//! closes its connection.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use rowstream_common::config::ConnectionConfig;
use rowstream_common::error::{RowStreamError, RowStreamResult};

use crate::driver::{Connection, Connector, ResultSet};
use crate::mapping::MappingDescriptor;
use crate::statement::{Command, NewRow, RowStatements};

/// Transaction context state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// The transaction is open.
    Active,
    /// The transaction was committed.
    Committed,
    /// The transaction was rolled back.
    RolledBack,
}

impl fmt::Display for ContextState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextState::Active => write!(f, "active"),
            ContextState::Committed => write!(f, "committed"),
            ContextState::RolledBack => write!(f, "rolled back"),
        }
    }
}

/// Owned or borrowed connection.
enum ConnectionHandle<'c> {
    Owned(Box<dyn Connection>),
    Borrowed(&'c mut dyn Connection),
}

impl<'c> ConnectionHandle<'c> {
    fn get(&mut self) -> &mut dyn Connection {
        match self {
            ConnectionHandle::Owned(connection) => connection.as_mut(),
            ConnectionHandle::Borrowed(connection) => &mut **connection,
        }
    }
}

/// A connection, its transaction and the mapping descriptor.
pub struct TransactionContext<'c> {
    descriptor: Arc<MappingDescriptor>,
    connection: ConnectionHandle<'c>,
    state: ContextState,
}

impl<'c> TransactionContext<'c> {
    /// Wraps the caller's connection, which must already be in a
    /// transaction. Finishing the context never touches the connection.
    pub fn borrowed(descriptor: Arc<MappingDescriptor>, connection: &'c mut dyn Connection) -> Self {
        debug!(
            "Borrowing connection ({}) for {}",
            connection.state(),
            descriptor.table()
        );
        Self {
            descriptor,
            connection: ConnectionHandle::Borrowed(connection),
            state: ContextState::Active,
        }
    }

    /// Returns the mapping descriptor.
    pub fn descriptor(&self) -> &Arc<MappingDescriptor> {
        &self.descriptor
    }

    /// Returns the context state.
    pub fn state(&self) -> ContextState {
        self.state
    }

    /// Returns true while the transaction is open.
    pub fn is_active(&self) -> bool {
        self.state == ContextState::Active
    }

    /// Returns true if the context opened its own connection.
    pub fn is_owned(&self) -> bool {
        matches!(self.connection, ConnectionHandle::Owned(_))
    }

    /// Returns the underlying connection.
    pub fn connection(&mut self) -> RowStreamResult<&mut dyn Connection> {
        self.ensure_active()?;
        Ok(self.connection.get())
    }

    /// Executes a statement in the transaction.
    pub fn execute(&mut self, command: &Command) -> RowStreamResult<u64> {
        self.ensure_active()?;
        debug!("Executing: {}", command.sql);
        self.connection.get().execute(command)
    }

    /// Runs a query in the transaction.
    pub fn query(&mut self, command: &Command) -> RowStreamResult<ResultSet> {
        self.ensure_active()?;
        debug!("Querying: {}", command.sql);
        self.connection.get().query(command)
    }

    /// Inserts a row with an empty payload.
    pub fn create_row(&mut self, row: &NewRow) -> RowStreamResult<u64> {
        let descriptor = self.descriptor.clone();
        let command = RowStatements::new(&descriptor).create_new(row)?;
        self.execute(&command)
    }

    /// Commits the transaction.
    ///
    /// An owned connection is committed and then closed. The context is
    /// `Committed` afterwards even when the driver reports an error.
    pub fn commit(&mut self) -> RowStreamResult<()> {
        self.ensure_active()?;
        self.state = ContextState::Committed;
        match &mut self.connection {
            ConnectionHandle::Owned(connection) => {
                let committed = connection.commit();
                let closed = connection.close();
                debug!("Committed owned transaction on {}", self.descriptor.table());
                committed.and(closed)
            }
            ConnectionHandle::Borrowed(_) => Ok(()),
        }
    }

    /// Rolls back the transaction.
    ///
    /// An owned connection is rolled back and then closed. The context is
    /// `RolledBack` afterwards even when the driver reports an error.
    pub fn rollback(&mut self) -> RowStreamResult<()> {
        self.ensure_active()?;
        self.state = ContextState::RolledBack;
        match &mut self.connection {
            ConnectionHandle::Owned(connection) => {
                let rolled_back = connection.rollback();
                let closed = connection.close();
                debug!("Rolled back owned transaction on {}", self.descriptor.table());
                rolled_back.and(closed)
            }
            ConnectionHandle::Borrowed(_) => Ok(()),
        }
    }

    fn ensure_active(&self) -> RowStreamResult<()> {
        if self.state != ContextState::Active {
            return Err(RowStreamError::TransactionFinished {
                state: self.state.to_string(),
            });
        }
        Ok(())
    }
}

impl TransactionContext<'static> {
    /// Opens a connection and begins a transaction on it.
    ///
    /// Blocks until the server has accepted both. If the transaction cannot
    /// be started the new connection is closed before the error is returned.
    pub fn owned(
        descriptor: Arc<MappingDescriptor>,
        connector: &dyn Connector,
        connection_string: &str,
    ) -> RowStreamResult<Self> {
        let mut connection = connector.connect(connection_string)?;
        if let Err(e) = connection.begin_transaction() {
            if let Err(close) = connection.close() {
                warn!("Failed to close connection after begin failed: {}", close);
            }
            return Err(e);
        }
        debug!("Opened owned transaction for {}", descriptor.table());
        Ok(Self {
            descriptor,
            connection: ConnectionHandle::Owned(connection),
            state: ContextState::Active,
        })
    }

    /// Opens an owned context from connection settings.
    pub fn from_config(
        descriptor: Arc<MappingDescriptor>,
        connector: &dyn Connector,
        config: &ConnectionConfig,
    ) -> RowStreamResult<Self> {
        config.validate()?;
        Self::owned(descriptor, connector, &config.connection_string())
    }
}

impl<'c> Drop for TransactionContext<'c> {
    fn drop(&mut self) {
        if self.state != ContextState::Active {
            return;
        }
        if let ConnectionHandle::Owned(connection) = &mut self.connection {
            warn!(
                "Transaction on {} dropped while active, rolling back",
                self.descriptor.table()
            );
            self.state = ContextState::RolledBack;
            if let Err(e) = connection.rollback() {
                warn!("Rollback on drop failed: {}", e);
            }
            if let Err(e) = connection.close() {
                warn!("Closing connection on drop failed: {}", e);
            }
        }
    }
}

impl<'c> fmt::Debug for TransactionContext<'c> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionContext")
            .field("table", &self.descriptor.table())
            .field("owned", &self.is_owned())
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::memory::{MemoryServer, MemoryTable};
    use crate::driver::ConnectionState;
    use indexmap::IndexMap;
    use rowstream_common::ErrorCode;

    const CONN: &str = "Server=memory;Integrated Security=true";

    fn descriptor() -> Arc<MappingDescriptor> {
        let columns: IndexMap<String, String> =
            [("Id", "[Id]"), ("FileName", "[FileName]"), ("File", "[File]")]
                .into_iter()
                .map(|(p, c)| (p.to_string(), c.to_string()))
                .collect();
        Arc::new(MappingDescriptor::new("dbo.Files", columns, Some("Id".into()), "File").unwrap())
    }

    fn server() -> MemoryServer {
        let server = MemoryServer::new();
        server.create_table(MemoryTable::new("dbo.Files").key("Id").column("FileName").blob("File"));
        server
    }

    fn row(id: i32) -> NewRow {
        NewRow::new().set("Id", id).set("FileName", format!("{}.pdf", id))
    }

    #[test]
    fn test_owned_commit() {
        let server = server();
        let mut context = TransactionContext::owned(descriptor(), &server, CONN).unwrap();
        assert!(context.is_owned());
        assert_eq!(server.stats().open_connections(), 1);

        assert_eq!(context.create_row(&row(1)).unwrap(), 1);
        assert_eq!(server.row_count("dbo.Files"), 0);

        context.commit().unwrap();
        assert_eq!(context.state(), ContextState::Committed);
        assert_eq!(server.row_count("dbo.Files"), 1);
        assert_eq!(server.stats().open_connections(), 0);
    }

    #[test]
    fn test_use_after_finish() {
        let server = server();
        let mut context = TransactionContext::owned(descriptor(), &server, CONN).unwrap();
        context.rollback().unwrap();

        let err = context.create_row(&row(1)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::TransactionFinished);
        assert_eq!(err.to_string(), "transaction already rolled back");
        assert!(context.commit().is_err());
        assert!(context.connection().is_err());
    }

    #[test]
    fn test_drop_rolls_back_owned() {
        let server = server();
        {
            let mut context = TransactionContext::owned(descriptor(), &server, CONN).unwrap();
            context.create_row(&row(1)).unwrap();
        }
        assert_eq!(server.row_count("dbo.Files"), 0);
        assert_eq!(server.stats().rollbacks, 1);
        assert_eq!(server.stats().open_connections(), 0);
    }

    #[test]
    fn test_begin_failure_closes_connection() {
        let server = server();
        server.fail_next_begin();
        let err = TransactionContext::owned(descriptor(), &server, CONN).unwrap_err();
        assert!(err.is_store());
        assert_eq!(server.stats().connections_opened, 1);
        assert_eq!(server.stats().open_connections(), 0);
    }

    #[test]
    fn test_borrowed_leaves_connection_alone() {
        let server = server();
        let mut connection = server.connect(CONN).unwrap();
        connection.begin_transaction().unwrap();
        {
            let mut context = TransactionContext::borrowed(descriptor(), connection.as_mut());
            assert!(!context.is_owned());
            context.create_row(&row(2)).unwrap();
            context.commit().unwrap();
            assert_eq!(context.state(), ContextState::Committed);
        }
        // Still the caller's transaction
        assert_eq!(connection.state(), ConnectionState::InTransaction);
        assert_eq!(server.row_count("dbo.Files"), 0);
        connection.commit().unwrap();
        assert_eq!(server.row_count("dbo.Files"), 1);
        connection.close().unwrap();
    }

    #[test]
    fn test_from_config_validates() {
        let server = server();
        let config = ConnectionConfig::new().server(" ");
        let err = TransactionContext::from_config(descriptor(), &server, &config).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidConfig);

        let config = ConnectionConfig::new().server("memory");
        let mut context = TransactionContext::from_config(descriptor(), &server, &config).unwrap();
        context.commit().unwrap();
    }
}
