//! # rowstream-client
//!
//! Transactional row/stream engine for SQL Server FILESTREAM columns.
//!
//! This crate streams large binary payloads into and out of table rows while
//! keeping the row's scalar columns and the payload in one transaction. It
//! includes:
//!
//! - **Mapping**: table/column/identifier/blob metadata for a record type
//! - **Schemas**: per-type field descriptors registered once at start-up
//! - **Predicates**: a typed filter AST compiled to parameterized WHERE clauses
//! - **Row Materialization**: typed records rebuilt from result rows
//! - **Transactions**: owned or borrowed connection + transaction contexts
//! - **Streams**: the open-mode state machine and byte-stream proxy
//!
//! ## Quick Start
//!
//! ```rust
//! use std::io::{Read, Write};
//! use std::sync::Arc;
//!
//! use rowstream_client::driver::memory::{MemoryServer, MemoryTable};
//! use rowstream_client::{
//!     col, lit, ConventionMappingProvider, MappingDescriptor, NewRow, OpenMode, Access,
//!     RecordSchema, RowStream, StreamOptions, TransactionContext,
//! };
//! use rowstream_common::{FieldType, SqlType, Value};
//!
//! #[derive(Debug, Default)]
//! struct Files {
//!     id: i32,
//!     file_name: String,
//! }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let schema = RecordSchema::<Files>::new("Files")
//!     .field("Id", FieldType::new(SqlType::Int), |r| Value::from(r.id), |r, v| {
//!         r.id = v.decode()?;
//!         Ok(())
//!     })
//!     .field("FileName", FieldType::new(SqlType::NVarChar), |r| Value::from(&r.file_name), |r, v| {
//!         r.file_name = v.decode()?;
//!         Ok(())
//!     })
//!     .field("File", FieldType::nullable(SqlType::VarBinary), |_| Value::Null, |_, _| Ok(()));
//!
//! let provider = ConventionMappingProvider::new(&schema, "Id", "File");
//! let descriptor = Arc::new(MappingDescriptor::from_provider(&provider)?);
//!
//! let server = MemoryServer::new();
//! server.create_table(MemoryTable::new("dbo.Files").key("Id").column("FileName").blob("File"));
//!
//! // Write a new row and its payload
//! let context = TransactionContext::owned(descriptor.clone(), &server, "Server=memory;Integrated Security=true")?;
//! let options = StreamOptions::new(OpenMode::CreateNew, Access::Write, col("Id").eq(lit(1)))
//!     .new_row(NewRow::new().set("Id", 1).set("FileName", "a.pdf"));
//! let mut stream = RowStream::open(context, &schema, options)?;
//! stream.write_all(b"%PDF-1.7")?;
//! stream.close()?;
//!
//! // Read it back together with the row's columns
//! let context = TransactionContext::owned(descriptor, &server, "Server=memory;Integrated Security=true")?;
//! let options = StreamOptions::new(OpenMode::Open, Access::Read, col("Id").eq(lit(1)));
//! let mut stream = RowStream::open(context, &schema, options)?;
//! let mut payload = Vec::new();
//! stream.read_to_end(&mut payload)?;
//! assert_eq!(stream.row().map(|r| r.file_name.as_str()), Some("a.pdf"));
//! assert_eq!(payload, b"%PDF-1.7");
//! stream.close()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Driver seam and the in-process memory driver.
pub mod driver;

/// Mapping providers and descriptors.
pub mod mapping;

/// Predicate AST and compiler.
pub mod predicate;

/// Row materialization.
pub mod row;

/// Record schemas and the schema registry.
pub mod schema;

/// Parameterized commands and row-lifecycle statements.
pub mod statement;

/// Stream sessions.
pub mod stream;

/// Transaction contexts.
pub mod transaction;

// Re-exports
pub use driver::{BlobHandle, Connection, ConnectionState, Connector, ResultSet, RowRef};
pub use mapping::{
    ConventionMappingProvider, MappingDescriptor, MappingProvider, MetadataMappingProvider,
};
pub use predicate::{
    captured, col, lit, BinaryOp, Parameter, Predicate, PredicateCompiler, ValueSource,
    WhereClause,
};
pub use row::RowMaterializer;
pub use schema::{FieldDescriptor, RecordSchema, SchemaRegistry};
pub use statement::{Command, CommandBuilder, NewRow, RowStatements};
pub use stream::{Access, OpenMode, RowStream, StreamOptions, StreamState};
pub use transaction::{ContextState, TransactionContext};
