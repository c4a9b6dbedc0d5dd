//! Shared fixtures.
//!
//! `Documents` is a record with a GUID identifier, a few scalar columns of
//! different types, an enumeration stored as TINYINT and a FILESTREAM
//! payload column `Content`.

use std::io::Write;
use std::sync::Arc;

use rowstream_client::driver::memory::{MemoryServer, MemoryTable};
use rowstream_client::{
    col, Access, ConventionMappingProvider, MappingDescriptor, NewRow, OpenMode, RecordSchema,
    RowStream, StreamOptions, TransactionContext,
};
use rowstream_common::{FieldType, RowStreamResult, SqlEnum, SqlType, Value};
use uuid::Uuid;

/// Connection string accepted by the memory server.
pub const CONNECTION_STRING: &str =
    "Server=memory;Integrated Security=true;Application Name=rowstream-test";

/// Table the fixtures use.
pub const TABLE: &str = "dbo.Documents";

/// Document lifecycle, stored as TINYINT.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DocumentKind {
    /// Not yet published.
    #[default]
    Draft,
    /// Visible to readers.
    Published,
    /// Kept for reference only.
    Archived,
}

impl SqlEnum for DocumentKind {
    const STORAGE: SqlType = SqlType::TinyInt;

    fn to_storage(self) -> i64 {
        match self {
            DocumentKind::Draft => 0,
            DocumentKind::Published => 1,
            DocumentKind::Archived => 2,
        }
    }

    fn from_storage(raw: i64) -> Option<Self> {
        match raw {
            0 => Some(DocumentKind::Draft),
            1 => Some(DocumentKind::Published),
            2 => Some(DocumentKind::Archived),
            _ => None,
        }
    }
}

/// A stored document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    /// Identifier.
    pub id: Uuid,
    /// File name.
    pub file_name: String,
    /// Owning user.
    pub owner_id: i32,
    /// Lifecycle.
    pub kind: DocumentKind,
    /// Free-form note.
    pub note: Option<String>,
}

impl Document {
    /// A new draft document with a fresh identifier.
    pub fn new(file_name: &str, owner_id: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            file_name: file_name.to_string(),
            owner_id,
            ..Self::default()
        }
    }
}

/// The `Documents` schema.
pub fn document_schema() -> RecordSchema<Document> {
    RecordSchema::<Document>::new("Documents")
        .field("Id", FieldType::new(SqlType::UniqueIdentifier), |r| Value::from(r.id), |r, v| {
            r.id = v.decode()?;
            Ok(())
        })
        .field("FileName", FieldType::new(SqlType::NVarChar), |r| Value::from(&r.file_name), |r, v| {
            r.file_name = v.decode()?;
            Ok(())
        })
        .field("OwnerId", FieldType::new(SqlType::Int), |r| Value::from(r.owner_id), |r, v| {
            r.owner_id = v.decode()?;
            Ok(())
        })
        .field(
            "Kind",
            FieldType::enumeration(SqlType::TinyInt),
            |r| Value::from_enum(r.kind),
            |r, v| {
                r.kind = v.decode_enum()?;
                Ok(())
            },
        )
        .field(
            "Note",
            FieldType::nullable(SqlType::NVarChar),
            |r| r.note.clone().map_or(Value::Null, Value::from),
            |r, v| {
                r.note = v.decode()?;
                Ok(())
            },
        )
        .field("Content", FieldType::nullable(SqlType::VarBinary), |_| Value::Null, |_, _| Ok(()))
}

/// The memory table matching [`document_schema`].
pub fn document_table() -> MemoryTable {
    MemoryTable::new(TABLE)
        .key("Id")
        .column("FileName")
        .column("OwnerId")
        .column("Kind")
        .column("Note")
        .blob("Content")
}

/// A server with an empty `dbo.Documents` table.
pub fn server() -> MemoryServer {
    let server = MemoryServer::new();
    server.create_table(document_table());
    server
}

/// The convention-based descriptor for `Documents`.
pub fn descriptor() -> Arc<MappingDescriptor> {
    let provider = ConventionMappingProvider::new(&document_schema(), "Id", "Content");
    match MappingDescriptor::from_provider(&provider) {
        Ok(descriptor) => Arc::new(descriptor),
        Err(e) => panic!("fixture mapping is invalid: {}", e),
    }
}

/// Opens a session in an owned transaction.
pub fn open(server: &MemoryServer, options: StreamOptions) -> RowStreamResult<RowStream<'static, Document>> {
    let context = TransactionContext::owned(descriptor(), server, CONNECTION_STRING)?;
    RowStream::open(context, &document_schema(), options)
}

/// Stores a new document with the given payload and commits.
pub fn store(server: &MemoryServer, document: &Document, payload: &[u8]) -> RowStreamResult<()> {
    let options = StreamOptions::new(OpenMode::CreateNew, Access::Write, col("Id").eq(document.id))
        .new_row(NewRow::from_record(&document_schema(), document));
    let mut stream = open(server, options)?;
    stream.write_all(payload)?;
    stream.close()
}

/// Deterministic payload of `len` bytes.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}
