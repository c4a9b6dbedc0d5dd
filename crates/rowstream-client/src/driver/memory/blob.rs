//! Memory driver payload handles.

use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use rowstream_common::types::Value;

use super::connection::Working;
use crate::driver::BlobHandle;
use crate::stream::Access;

/// A payload handle opened by a [`MemoryConnection`](super::MemoryConnection).
///
/// Reads and writes go to a private buffer. The buffer is written back to
/// the transaction's working copy on `flush` and `close`; writing back after
/// the transaction has finished fails.
pub struct MemoryBlob {
    working: Arc<Mutex<Working>>,
    table: String,
    row_id: u64,
    column: usize,
    buffer: Cursor<Vec<u8>>,
    access: Access,
    dirty: bool,
    closed: bool,
}

impl MemoryBlob {
    pub(super) fn new(
        working: Arc<Mutex<Working>>,
        table: String,
        row_id: u64,
        column: usize,
        content: Vec<u8>,
        access: Access,
    ) -> Self {
        Self {
            working,
            table,
            row_id,
            column,
            buffer: Cursor::new(content),
            access,
            dirty: false,
            closed: false,
        }
    }

    fn ensure_open(&self) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::Other, "handle is closed"));
        }
        Ok(())
    }

    fn write_back(&mut self) -> io::Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let mut working = self.working.lock();
        if working.finished {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "transaction is no longer active",
            ));
        }
        let Working {
            catalog, touched, ..
        } = &mut *working;
        let row = catalog
            .get_mut(&self.table)
            .and_then(|table| table.rows.iter_mut().find(|r| r.id == self.row_id))
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "row no longer exists"))?;
        row.values[self.column] = Value::Bytes(self.buffer.get_ref().clone());
        touched.insert(self.table.clone());
        self.dirty = false;
        Ok(())
    }
}

impl Read for MemoryBlob {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.ensure_open()?;
        if !self.access.can_read() {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "handle was not opened for reading",
            ));
        }
        self.buffer.read(buf)
    }
}

impl Write for MemoryBlob {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.ensure_open()?;
        if !self.access.can_write() {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "handle was not opened for writing",
            ));
        }
        self.dirty = true;
        self.buffer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.ensure_open()?;
        self.write_back()
    }
}

impl Seek for MemoryBlob {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.ensure_open()?;
        self.buffer.seek(pos)
    }
}

impl BlobHandle for MemoryBlob {
    fn len(&self) -> u64 {
        self.buffer.get_ref().len() as u64
    }

    fn set_len(&mut self, len: u64) -> io::Result<()> {
        self.ensure_open()?;
        if !self.access.can_write() {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "handle was not opened for writing",
            ));
        }
        let len = usize::try_from(len)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "length too large"))?;
        self.buffer.get_mut().resize(len, 0);
        self.dirty = true;
        Ok(())
    }

    fn can_read(&self) -> bool {
        !self.closed && self.access.can_read()
    }

    fn can_write(&self) -> bool {
        !self.closed && self.access.can_write()
    }

    fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.write_back()
    }
}

impl Drop for MemoryBlob {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Discarding payload changes for row {}: {}", self.row_id, e);
        }
    }
}
