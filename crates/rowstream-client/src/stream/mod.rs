//! Stream sessions.
//!
//! A [`RowStream`] ties one row to an open payload handle inside a
//! transaction. Opening a session runs, in order:
//!
//! 1. option validation (before any I/O)
//! 2. predicate compilation
//! 3. the mode's row-lifecycle statement, if any
//! 4. the handle-open query (path locator, transaction token and, when
//!    reading, the row's other columns)
//! 5. row materialization, when reading
//! 6. the raw handle open, and for `Append` a seek to the end
//!
//! Byte I/O is then proxied to the raw handle. Closing the session closes
//! the handle, runs the close hook and commits the context; dropping an
//! unclosed session does the same. [`RowStream::abort`] rolls back instead.
//!
//! ```text
//! Init ──lifecycle──▶ RowLifecycleApplied ──handle query──▶ HandleOpen ──close/abort/drop──▶ Closed
//! ```

use std::fmt;
use std::io::{self, Read, Seek, SeekFrom, Write};

use tracing::{debug, error, info, warn};

use rowstream_common::error::{RowStreamError, RowStreamResult};
use rowstream_common::types::Value;

use crate::driver::BlobHandle;
use crate::predicate::{Predicate, PredicateCompiler};
use crate::row::RowMaterializer;
use crate::schema::RecordSchema;
use crate::statement::{NewRow, RowStatements};
use crate::transaction::TransactionContext;

/// How the row is prepared before its payload is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpenMode {
    /// The row must exist; nothing is changed.
    Open,
    /// Insert the row, or empty the payload of the existing one.
    Create,
    /// Insert the row unconditionally.
    CreateNew,
    /// Insert the row only when none matches.
    OpenOrCreate,
    /// Empty the payload of the matching row.
    Truncate,
    /// Open the matching row positioned at the end of its payload.
    Append,
}

impl OpenMode {
    /// Returns true for the modes that may insert a row.
    pub const fn creates_row(&self) -> bool {
        matches!(self, OpenMode::Create | OpenMode::CreateNew | OpenMode::OpenOrCreate)
    }
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OpenMode::Open => "Open",
            OpenMode::Create => "Create",
            OpenMode::CreateNew => "CreateNew",
            OpenMode::OpenOrCreate => "OpenOrCreate",
            OpenMode::Truncate => "Truncate",
            OpenMode::Append => "Append",
        };
        f.write_str(name)
    }
}

/// Requested payload access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    /// Read only.
    Read,
    /// Write only.
    Write,
    /// Read and write.
    ReadWrite,
}

impl Access {
    /// Whether the access includes reading.
    pub const fn can_read(&self) -> bool {
        matches!(self, Access::Read | Access::ReadWrite)
    }

    /// Whether the access includes writing.
    pub const fn can_write(&self) -> bool {
        matches!(self, Access::Write | Access::ReadWrite)
    }
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Access::Read => write!(f, "Read"),
            Access::Write => write!(f, "Write"),
            Access::ReadWrite => write!(f, "ReadWrite"),
        }
    }
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Options accepted, nothing run yet.
    Init,
    /// The row-lifecycle statement has run.
    RowLifecycleApplied,
    /// The payload handle is open.
    HandleOpen,
    /// The handle is closed and the transaction finished.
    Closed,
}

/// Callback run after the handle is closed and before the commit.
pub type CloseHook =
    Box<dyn for<'a, 'c> FnOnce(&'a mut TransactionContext<'c>) -> RowStreamResult<()> + Send>;

/// Session options.
pub struct StreamOptions {
    /// Row preparation mode.
    pub mode: OpenMode,
    /// Payload access.
    pub access: Access,
    /// Selects the row.
    pub filter: Predicate,
    /// Values for a row the mode inserts.
    pub new_row: Option<NewRow>,
    /// Runs before the commit.
    pub on_close: Option<CloseHook>,
}

impl StreamOptions {
    /// Creates options for a mode, an access and a row filter.
    pub fn new(mode: OpenMode, access: Access, filter: Predicate) -> Self {
        Self {
            mode,
            access,
            filter,
            new_row: None,
            on_close: None,
        }
    }

    /// Sets the values for a row the mode inserts.
    pub fn new_row(mut self, row: NewRow) -> Self {
        self.new_row = Some(row);
        self
    }

    /// Sets a callback to run with the context before it is committed.
    ///
    /// If the callback finishes the context itself, no commit follows.
    pub fn on_close<F>(mut self, hook: F) -> Self
    where
        F: for<'a, 'c> FnOnce(&'a mut TransactionContext<'c>) -> RowStreamResult<()> + Send + 'static,
    {
        self.on_close = Some(Box::new(hook));
        self
    }

    /// Rejects combinations that cannot work.
    ///
    /// Inserting modes need new-row values, and `Append` cannot be read-only.
    pub fn validate(&self) -> RowStreamResult<()> {
        if self.mode.creates_row() && self.new_row.is_none() {
            return Err(RowStreamError::invalid_mode(format!(
                "{} requires new-row values",
                self.mode
            )));
        }
        if self.mode == OpenMode::Append && self.access == Access::Read {
            return Err(RowStreamError::invalid_mode(
                "Append cannot be combined with Read access",
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for StreamOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamOptions")
            .field("mode", &self.mode)
            .field("access", &self.access)
            .field("filter", &self.filter.to_string())
            .field("new_row", &self.new_row)
            .field("on_close", &self.on_close.is_some())
            .finish()
    }
}

/// What a successful open produced.
struct Opened<T> {
    handle: Box<dyn BlobHandle>,
    row: Option<T>,
    path: String,
}

/// A row's payload opened as a byte stream.
pub struct RowStream<'c, T> {
    context: Option<TransactionContext<'c>>,
    handle: Option<Box<dyn BlobHandle>>,
    row: Option<T>,
    state: StreamState,
    mode: OpenMode,
    access: Access,
    path: String,
    on_close: Option<CloseHook>,
}

impl<'c, T> RowStream<'c, T> {
    /// Opens a session.
    ///
    /// On any failure the context is rolled back before the error is
    /// returned, so an owned connection is always released.
    pub fn open(
        mut context: TransactionContext<'c>,
        schema: &RecordSchema<T>,
        options: StreamOptions,
    ) -> RowStreamResult<Self> {
        let mut reached = StreamState::Init;
        let opened = options
            .validate()
            .and_then(|()| Self::open_handle(&mut context, schema, &options, &mut reached));

        match opened {
            Ok(opened) => {
                info!(
                    "Opened {} stream ({}) on {}",
                    options.mode, options.access, opened.path
                );
                Ok(Self {
                    context: Some(context),
                    handle: Some(opened.handle),
                    row: opened.row,
                    state: reached,
                    mode: options.mode,
                    access: options.access,
                    path: opened.path,
                    on_close: options.on_close,
                })
            }
            Err(e) => {
                warn!(
                    "Opening {} stream failed in state {:?}: {}",
                    options.mode, reached, e
                );
                if context.is_active() {
                    if let Err(rollback) = context.rollback() {
                        error!("Rollback after failed open failed: {}", rollback);
                    }
                }
                Err(e)
            }
        }
    }

    fn open_handle(
        context: &mut TransactionContext<'c>,
        schema: &RecordSchema<T>,
        options: &StreamOptions,
        state: &mut StreamState,
    ) -> RowStreamResult<Opened<T>> {
        let descriptor = context.descriptor().clone();
        let filter = PredicateCompiler::new(&descriptor).compile(&options.filter)?;
        let statements = RowStatements::new(&descriptor);

        if let Some(command) = statements.lifecycle(options.mode, &filter, options.new_row.as_ref())? {
            context.execute(&command)?;
        }
        advance(state, StreamState::RowLifecycleApplied);

        let command = statements.open_handle(&filter, options.access.can_read());
        let result = context.query(&command)?;
        let row = result.first().ok_or_else(|| RowStreamError::RowNotFound {
            table: descriptor.table().to_string(),
            filter: filter.sql.clone(),
        })?;

        let path = match row.get(0) {
            Some(Value::Text(path)) => path.clone(),
            other => return Err(locator_error("path locator", other)),
        };
        let token = match row.get(1) {
            Some(Value::Bytes(token)) => token.clone(),
            other => return Err(locator_error("transaction token", other)),
        };

        let record = if options.access.can_read() {
            let materializer =
                RowMaterializer::new(schema, &descriptor).skip(descriptor.blob_property());
            Some(materializer.materialize(row)?)
        } else {
            None
        };

        let mut handle = context
            .connection()?
            .open_blob(&path, &token, options.access)?;
        if options.mode == OpenMode::Append {
            handle.seek(SeekFrom::End(0))?;
        }
        advance(state, StreamState::HandleOpen);

        Ok(Opened {
            handle,
            row: record,
            path,
        })
    }

    /// Returns the session state.
    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Returns the open mode.
    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Returns the requested access.
    pub fn access(&self) -> Access {
        self.access
    }

    /// Returns the payload's path locator.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the materialized row, when the session reads.
    pub fn row(&self) -> Option<&T> {
        self.row.as_ref()
    }

    /// Takes the materialized row out of the session.
    pub fn take_row(&mut self) -> Option<T> {
        self.row.take()
    }

    /// Returns the transaction context while the session is open.
    pub fn context(&mut self) -> Option<&mut TransactionContext<'c>> {
        self.context.as_mut()
    }

    /// Returns the payload length, 0 once closed.
    pub fn len(&self) -> u64 {
        self.handle.as_ref().map_or(0, |h| h.len())
    }

    /// Returns true if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Truncates or extends the payload.
    pub fn set_len(&mut self, len: u64) -> io::Result<()> {
        self.handle_mut()?.set_len(len)
    }

    /// Returns the current position.
    pub fn position(&mut self) -> io::Result<u64> {
        self.handle_mut()?.stream_position()
    }

    /// Whether the session can read.
    pub fn can_read(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| h.can_read())
    }

    /// Whether the session can write.
    pub fn can_write(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| h.can_write())
    }

    /// Whether the session can seek.
    pub fn can_seek(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| h.can_seek())
    }

    /// Closes the handle, runs the close hook and commits.
    ///
    /// When several steps fail, the commit error wins over the hook error,
    /// which wins over the handle error.
    pub fn close(mut self) -> RowStreamResult<()> {
        self.finish()
    }

    /// Closes the handle and rolls the transaction back. The close hook is
    /// not run.
    pub fn abort(mut self) -> RowStreamResult<()> {
        self.state = StreamState::Closed;
        self.on_close = None;
        let closed = self.close_handle();

        let rolled_back = match self.context.take() {
            Some(mut context) if context.is_active() => context.rollback(),
            _ => Ok(()),
        };
        info!("Aborted stream on {}", self.path);
        rolled_back?;
        closed.map_err(RowStreamError::from)
    }

    fn finish(&mut self) -> RowStreamResult<()> {
        if self.state == StreamState::Closed {
            return Ok(());
        }
        self.state = StreamState::Closed;
        let closed = self.close_handle();

        let Some(mut context) = self.context.take() else {
            return closed.map_err(RowStreamError::from);
        };
        let hooked = match self.on_close.take() {
            Some(hook) => hook(&mut context),
            None => Ok(()),
        };
        let committed = if context.is_active() {
            context.commit()
        } else {
            debug!("Close hook finished the transaction ({})", context.state());
            Ok(())
        };
        info!("Closed stream on {}", self.path);

        committed?;
        hooked?;
        closed.map_err(RowStreamError::from)
    }

    fn close_handle(&mut self) -> io::Result<()> {
        match self.handle.take() {
            Some(mut handle) => handle.close().map_err(|e| {
                warn!("Closing payload handle {} failed: {}", self.path, e);
                e
            }),
            None => Ok(()),
        }
    }

    fn handle_mut(&mut self) -> io::Result<&mut Box<dyn BlobHandle>> {
        self.handle
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "stream is closed"))
    }
}

fn advance(state: &mut StreamState, to: StreamState) {
    debug!("Stream state {:?} -> {:?}", state, to);
    *state = to;
}

fn locator_error(what: &str, found: Option<&Value>) -> RowStreamError {
    let found = found.map_or_else(|| "nothing".to_string(), |v| v.type_name().to_string());
    RowStreamError::store(
        format!("handle query did not return a {}", what),
        format!("expected the {} column, found {}", what, found),
    )
}

impl<'c, T> Read for RowStream<'c, T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.handle_mut()?.read(buf)
    }
}

impl<'c, T> Write for RowStream<'c, T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.handle_mut()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.handle_mut()?.flush()
    }
}

impl<'c, T> Seek for RowStream<'c, T> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.handle_mut()?.seek(pos)
    }
}

impl<'c, T> Drop for RowStream<'c, T> {
    fn drop(&mut self) {
        if self.state != StreamState::Closed {
            if let Err(e) = self.finish() {
                error!("Closing stream {} on drop failed: {}", self.path, e);
            }
        }
    }
}

impl<'c, T> fmt::Debug for RowStream<'c, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowStream")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("access", &self.access)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::memory::{MemoryServer, MemoryTable};
    use crate::mapping::MappingDescriptor;
    use crate::predicate::col;
    use indexmap::IndexMap;
    use rowstream_common::types::{FieldType, SqlType};
    use rowstream_common::ErrorCode;
    use std::sync::Arc;

    const CONN: &str = "Server=memory;Integrated Security=true";

    #[derive(Debug, Default)]
    struct Files {
        id: i32,
        file_name: String,
    }

    fn schema() -> RecordSchema<Files> {
        RecordSchema::<Files>::new("Files")
            .field("Id", FieldType::new(SqlType::Int), |r| Value::from(r.id), |r, v| {
                r.id = v.decode()?;
                Ok(())
            })
            .field("FileName", FieldType::new(SqlType::NVarChar), |r| Value::from(&r.file_name), |r, v| {
                r.file_name = v.decode()?;
                Ok(())
            })
    }

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

    fn open(
        server: &MemoryServer,
        options: StreamOptions,
    ) -> RowStreamResult<RowStream<'static, Files>> {
        let context = TransactionContext::owned(descriptor(), server, CONN)?;
        RowStream::open(context, &schema(), options)
    }

    fn create(server: &MemoryServer, id: i32, payload: &[u8]) {
        let options = StreamOptions::new(OpenMode::CreateNew, Access::Write, col("Id").eq(id))
            .new_row(NewRow::new().set("Id", id).set("FileName", format!("{}.bin", id)));
        let mut stream = open(server, options).unwrap();
        stream.write_all(payload).unwrap();
        stream.close().unwrap();
    }

    #[test]
    fn test_validate() {
        let options = StreamOptions::new(OpenMode::Create, Access::Write, col("Id").eq(1));
        assert_eq!(options.validate().unwrap_err().code(), ErrorCode::InvalidMode);

        let options = StreamOptions::new(OpenMode::Append, Access::Read, col("Id").eq(1));
        assert_eq!(options.validate().unwrap_err().code(), ErrorCode::InvalidMode);

        for access in [Access::Write, Access::ReadWrite] {
            assert!(StreamOptions::new(OpenMode::Append, access, col("Id").eq(1))
                .validate()
                .is_ok());
        }
        assert!(StreamOptions::new(OpenMode::Open, Access::Read, col("Id").eq(1))
            .validate()
            .is_ok());
    }

    #[test]
    fn test_invalid_mode_runs_nothing() {
        let server = server();
        let options = StreamOptions::new(OpenMode::Append, Access::Read, col("Id").eq(1));
        let err = open(&server, options).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidMode);
        assert_eq!(server.stats().statements, 0);
        assert_eq!(server.stats().open_connections(), 0);
    }

    #[test]
    fn test_write_then_read() {
        let server = server();
        create(&server, 1, b"hello");

        let options = StreamOptions::new(OpenMode::Open, Access::Read, col("Id").eq(1));
        let mut stream = open(&server, options).unwrap();
        assert_eq!(stream.state(), StreamState::HandleOpen);
        assert_eq!(stream.row().map(|r| r.file_name.as_str()), Some("1.bin"));
        assert_eq!(stream.len(), 5);
        assert!(stream.can_read() && !stream.can_write() && stream.can_seek());

        let mut payload = String::new();
        stream.read_to_string(&mut payload).unwrap();
        assert_eq!(payload, "hello");
        stream.close().unwrap();
    }

    #[test]
    fn test_write_only_has_no_row() {
        let server = server();
        create(&server, 1, b"x");
        let options = StreamOptions::new(OpenMode::Open, Access::Write, col("Id").eq(1));
        let stream = open(&server, options).unwrap();
        assert!(stream.row().is_none());
        stream.close().unwrap();
    }

    #[test]
    fn test_append_positions_at_end() {
        let server = server();
        create(&server, 1, b"abc");

        let options = StreamOptions::new(OpenMode::Append, Access::Write, col("Id").eq(1));
        let mut stream = open(&server, options).unwrap();
        assert_eq!(stream.position().unwrap(), 3);
        stream.write_all(b"def").unwrap();
        stream.close().unwrap();

        assert_eq!(server.blob("dbo.Files", 1).unwrap(), b"abcdef");
    }

    #[test]
    fn test_row_not_found() {
        let server = server();
        let options = StreamOptions::new(OpenMode::Open, Access::Read, col("Id").eq(9));
        let err = open(&server, options).unwrap_err();
        assert_eq!(err.code(), ErrorCode::RowNotFound);
        assert_eq!(server.stats().open_connections(), 0);
    }

    #[test]
    fn test_open_records_reached_state() {
        let server = server();
        let schema = schema();
        let reached_by = |options: StreamOptions| {
            let mut context = TransactionContext::owned(descriptor(), &server, CONN).unwrap();
            let mut state = StreamState::Init;
            let opened = RowStream::open_handle(&mut context, &schema, &options, &mut state).is_ok();
            context.rollback().unwrap();
            (opened, state)
        };

        let unmapped = StreamOptions::new(OpenMode::Open, Access::Read, col("Size").eq(1));
        assert_eq!(reached_by(unmapped), (false, StreamState::Init));

        let missing = StreamOptions::new(OpenMode::Truncate, Access::Write, col("Id").eq(9));
        assert_eq!(reached_by(missing), (false, StreamState::RowLifecycleApplied));

        let created = StreamOptions::new(OpenMode::OpenOrCreate, Access::Write, col("Id").eq(2))
            .new_row(NewRow::new().set("Id", 2).set("FileName", "b"));
        assert_eq!(reached_by(created), (true, StreamState::HandleOpen));
    }

    #[test]
    fn test_abort_rolls_back() {
        let server = server();
        let options = StreamOptions::new(OpenMode::CreateNew, Access::Write, col("Id").eq(1))
            .new_row(NewRow::new().set("Id", 1).set("FileName", "a"))
            .on_close(|_| panic!("hook must not run on abort"));
        let mut stream = open(&server, options).unwrap();
        stream.write_all(b"zzz").unwrap();
        stream.abort().unwrap();

        assert_eq!(server.row_count("dbo.Files"), 0);
        assert_eq!(server.stats().open_connections(), 0);
    }

    #[test]
    fn test_drop_commits() {
        let server = server();
        {
            let options = StreamOptions::new(OpenMode::CreateNew, Access::Write, col("Id").eq(4))
                .new_row(NewRow::new().set("Id", 4).set("FileName", "d"));
            let mut stream = open(&server, options).unwrap();
            stream.write_all(b"dropped").unwrap();
        }
        assert_eq!(server.blob("dbo.Files", 4).unwrap(), b"dropped");
    }

    #[test]
    fn test_closed_stream_io_fails() {
        let server = server();
        create(&server, 1, b"x");
        let options = StreamOptions::new(OpenMode::Open, Access::ReadWrite, col("Id").eq(1));
        let mut stream = open(&server, options).unwrap();
        stream.finish().unwrap();
        assert_eq!(stream.state(), StreamState::Closed);
        assert!(stream.write(b"y").is_err());
        assert!(stream.set_len(0).is_err());
        assert_eq!(stream.len(), 0);
        assert!(!stream.can_read());
    }
}
