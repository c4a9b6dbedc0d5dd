//! End-to-end session tests against the memory driver.
//!
//! Covers every open mode, release of owned connections on failure, the
//! close hook and borrowed transactions.

use std::io::{Read, Seek, SeekFrom, Write};

use rowstream_client::{
    col, Access, Connection, Connector, NewRow, OpenMode, RowStream, StreamOptions, StreamState,
    TransactionContext,
};
use rowstream_common::{ErrorCode, RowStreamError, Value};
use rowstream_test::fixtures::{self, document_schema, Document, DocumentKind, CONNECTION_STRING, TABLE};

fn new_row(document: &Document) -> NewRow {
    NewRow::from_record(&document_schema(), document)
}

fn read_back(server: &rowstream_client::driver::memory::MemoryServer, document: &Document) -> (Document, Vec<u8>) {
    let options = StreamOptions::new(OpenMode::Open, Access::Read, col("Id").eq(document.id));
    let mut stream = fixtures::open(server, options).unwrap();
    let mut payload = Vec::new();
    stream.read_to_end(&mut payload).unwrap();
    let row = stream.take_row().unwrap();
    stream.close().unwrap();
    (row, payload)
}

#[test]
fn test_round_trip_row_and_payload() {
    let server = fixtures::server();
    let mut document = Document::new("a.pdf", 42);
    document.kind = DocumentKind::Published;
    document.note = Some("quarterly".to_string());
    let payload = fixtures::payload(70_000);

    fixtures::store(&server, &document, &payload).unwrap();
    let (row, stored) = read_back(&server, &document);

    assert_eq!(row, document);
    assert_eq!(row.file_name, "a.pdf");
    assert_eq!(stored.len(), 70_000);
    assert_eq!(stored, payload);
    assert_eq!(server.stats().open_connections(), 0);
}

#[test]
fn test_create_twice_keeps_one_row() {
    let server = fixtures::server();
    let document = Document::new("first.txt", 1);

    let options = StreamOptions::new(OpenMode::Create, Access::Write, col("Id").eq(document.id))
        .new_row(new_row(&document));
    let mut stream = fixtures::open(&server, options).unwrap();
    stream.write_all(b"first payload").unwrap();
    stream.close().unwrap();

    let renamed = Document {
        file_name: "second.txt".to_string(),
        ..document.clone()
    };
    let options = StreamOptions::new(OpenMode::Create, Access::ReadWrite, col("Id").eq(document.id))
        .new_row(new_row(&renamed));
    let stream = fixtures::open(&server, options).unwrap();
    assert!(stream.is_empty());
    assert_eq!(stream.row().map(|r| r.file_name.as_str()), Some("first.txt"));
    stream.close().unwrap();

    assert_eq!(server.row_count(TABLE), 1);
    assert_eq!(server.blob(TABLE, document.id).unwrap(), b"");
    assert_eq!(server.stats().inserts, 1);
}

#[test]
fn test_append_with_read_only_access_is_rejected() {
    let server = fixtures::server();
    let document = Document::new("a", 1);
    fixtures::store(&server, &document, b"abc").unwrap();
    server.reset_stats();

    let options = StreamOptions::new(OpenMode::Append, Access::Read, col("Id").eq(document.id));
    let err = fixtures::open(&server, options).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidMode);
    assert_eq!(server.stats().statements, 0);
    assert_eq!(server.stats().open_connections(), 0);
}

#[test]
fn test_creating_mode_without_row_is_rejected() {
    let server = fixtures::server();
    for mode in [OpenMode::Create, OpenMode::CreateNew, OpenMode::OpenOrCreate] {
        let options = StreamOptions::new(mode, Access::Write, col("OwnerId").eq(1));
        let err = fixtures::open(&server, options).unwrap_err();
        assert!(matches!(err, RowStreamError::InvalidMode { .. }), "{}: {:?}", mode, err);
    }
    assert_eq!(server.stats().statements, 0);
}

#[test]
fn test_open_or_create_existing_row() {
    let server = fixtures::server();
    let document = Document::new("kept.txt", 5);
    fixtures::store(&server, &document, b"existing").unwrap();
    server.reset_stats();

    let other = Document {
        file_name: "ignored.txt".to_string(),
        owner_id: 99,
        ..document.clone()
    };
    let options = StreamOptions::new(OpenMode::OpenOrCreate, Access::Read, col("Id").eq(document.id))
        .new_row(new_row(&other));
    let mut stream = fixtures::open(&server, options).unwrap();
    let mut payload = String::new();
    stream.read_to_string(&mut payload).unwrap();
    stream.close().unwrap();

    assert_eq!(payload, "existing");
    assert_eq!(server.stats().inserts, 0);
    let row = server.row(TABLE, document.id).unwrap();
    assert_eq!(row["FileName"], Value::from("kept.txt"));
    assert_eq!(row["OwnerId"], Value::Int(5));
}

#[test]
fn test_open_or_create_missing_row() {
    let server = fixtures::server();
    let document = Document::new("new.txt", 6);

    let options = StreamOptions::new(OpenMode::OpenOrCreate, Access::Write, col("Id").eq(document.id))
        .new_row(new_row(&document));
    let mut stream = fixtures::open(&server, options).unwrap();
    stream.write_all(b"fresh").unwrap();
    stream.close().unwrap();

    assert_eq!(server.stats().inserts, 1);
    assert_eq!(server.row_count(TABLE), 1);
    assert_eq!(server.blob(TABLE, document.id).unwrap(), b"fresh");
}

#[test]
fn test_create_new_duplicate_releases_connection() {
    let server = fixtures::server();
    let document = Document::new("dup", 1);
    fixtures::store(&server, &document, b"x").unwrap();

    let err = fixtures::store(&server, &document, b"y").unwrap_err();
    assert!(err.is_store());
    assert_eq!(server.row_count(TABLE), 1);
    assert_eq!(server.blob(TABLE, document.id).unwrap(), b"x");
    assert_eq!(server.stats().open_connections(), 0);
}

#[test]
fn test_truncate_and_append() {
    let server = fixtures::server();
    let document = Document::new("log.txt", 2);
    fixtures::store(&server, &document, b"old contents").unwrap();

    let options = StreamOptions::new(OpenMode::Truncate, Access::Write, col("Id").eq(document.id));
    let mut stream = fixtures::open(&server, options).unwrap();
    assert_eq!(stream.len(), 0);
    stream.write_all(b"line 1\n").unwrap();
    stream.close().unwrap();

    let options = StreamOptions::new(OpenMode::Append, Access::ReadWrite, col("Id").eq(document.id));
    let mut stream = fixtures::open(&server, options).unwrap();
    assert_eq!(stream.position().unwrap(), 7);
    stream.write_all(b"line 2\n").unwrap();
    stream.seek(SeekFrom::Start(0)).unwrap();
    let mut all = String::new();
    stream.read_to_string(&mut all).unwrap();
    assert_eq!(all, "line 1\nline 2\n");
    assert_eq!(stream.row().map(|r| r.owner_id), Some(2));
    stream.close().unwrap();

    assert_eq!(server.blob(TABLE, document.id).unwrap(), b"line 1\nline 2\n");
    assert_eq!(server.row(TABLE, document.id).unwrap()["FileName"], Value::from("log.txt"));
}

#[test]
fn test_truncate_missing_row() {
    let server = fixtures::server();
    let options = StreamOptions::new(OpenMode::Truncate, Access::Write, col("Id").eq(uuid::Uuid::new_v4()));
    let err = fixtures::open(&server, options).unwrap_err();
    assert_eq!(err.code(), ErrorCode::RowNotFound);
    assert_eq!(server.stats().updates, 0);
    assert_eq!(server.stats().open_connections(), 0);
}

#[test]
fn test_set_len_and_seek() {
    let server = fixtures::server();
    let document = Document::new("blob", 1);
    fixtures::store(&server, &document, b"0123456789").unwrap();

    let options = StreamOptions::new(OpenMode::Open, Access::ReadWrite, col("Id").eq(document.id));
    let mut stream = fixtures::open(&server, options).unwrap();
    stream.set_len(4).unwrap();
    stream.seek(SeekFrom::End(0)).unwrap();
    stream.write_all(b"!").unwrap();
    assert_eq!(stream.len(), 5);
    stream.close().unwrap();

    assert_eq!(server.blob(TABLE, document.id).unwrap(), b"0123!");
}

#[test]
fn test_begin_failure_does_not_leak_connection() {
    let server = fixtures::server();
    server.fail_next_begin();

    let err = TransactionContext::owned(fixtures::descriptor(), &server, CONNECTION_STRING).unwrap_err();
    assert!(err.is_store());

    let stats = server.stats();
    assert_eq!(stats.connections_opened, 1);
    assert_eq!(stats.connections_closed, 1);
    assert_eq!(stats.open_connections(), 0);
}

#[test]
fn test_failed_open_rolls_back_lifecycle_statement() {
    let server = fixtures::server();
    let document = Document::new("a", 1);

    // Insert runs, then the handle query misses because the filter does not
    // match the inserted row
    let options = StreamOptions::new(OpenMode::CreateNew, Access::Write, col("OwnerId").eq(2))
        .new_row(new_row(&document));
    let err = fixtures::open(&server, options).unwrap_err();
    assert_eq!(err.code(), ErrorCode::RowNotFound);
    assert_eq!(server.stats().inserts, 1);
    assert_eq!(server.row_count(TABLE), 0);
    assert_eq!(server.stats().open_connections(), 0);
}

#[test]
fn test_close_hook_runs_in_transaction() {
    let server = fixtures::server();
    let document = Document::new("main", 1);
    let sibling = Document::new("sibling", 1);
    let sibling_row = new_row(&sibling);

    let options = StreamOptions::new(OpenMode::CreateNew, Access::Write, col("Id").eq(document.id))
        .new_row(new_row(&document))
        .on_close(move |context| {
            assert!(context.is_active());
            context.create_row(&sibling_row)?;
            Ok(())
        });
    let mut stream = fixtures::open(&server, options).unwrap();
    stream.write_all(b"payload").unwrap();
    stream.close().unwrap();

    assert_eq!(server.row_count(TABLE), 2);
    assert_eq!(server.blob(TABLE, sibling.id).unwrap(), b"");
    assert_eq!(server.stats().commits, 1);
}

#[test]
fn test_close_hook_may_roll_back() {
    let server = fixtures::server();
    let document = Document::new("vetoed", 1);

    let options = StreamOptions::new(OpenMode::CreateNew, Access::Write, col("Id").eq(document.id))
        .new_row(new_row(&document))
        .on_close(|context| context.rollback());
    let mut stream = fixtures::open(&server, options).unwrap();
    stream.write_all(b"discarded").unwrap();
    stream.close().unwrap();

    assert_eq!(server.row_count(TABLE), 0);
    assert_eq!(server.stats().open_connections(), 0);
}

#[test]
fn test_commit_error_wins() {
    let server = fixtures::server();
    let document = Document::new("a", 1);

    let options = StreamOptions::new(OpenMode::CreateNew, Access::Write, col("Id").eq(document.id))
        .new_row(new_row(&document))
        .on_close(|_| Err(RowStreamError::invalid_mode("hook failed")));
    let mut stream = fixtures::open(&server, options).unwrap();
    stream.write_all(b"x").unwrap();
    server.fail_next_commit();

    let err = stream.close().unwrap_err();
    assert!(err.is_store(), "{:?}", err);
    assert_eq!(server.row_count(TABLE), 0);
    assert_eq!(server.stats().open_connections(), 0);
}

#[test]
fn test_hook_error_is_reported_after_commit() {
    let server = fixtures::server();
    let document = Document::new("a", 1);

    let options = StreamOptions::new(OpenMode::CreateNew, Access::Write, col("Id").eq(document.id))
        .new_row(new_row(&document))
        .on_close(|_| Err(RowStreamError::invalid_mode("hook failed")));
    let stream = fixtures::open(&server, options).unwrap();

    let err = stream.close().unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidMode);
    assert_eq!(server.row_count(TABLE), 1);
}

#[test]
fn test_borrowed_transaction_spans_sessions() {
    let server = fixtures::server();
    let first = Document::new("first", 1);
    let second = Document::new("second", 1);
    let schema = document_schema();

    let mut connection = server.connect(CONNECTION_STRING).unwrap();
    connection.begin_transaction().unwrap();

    for (document, payload) in [(&first, b"one".as_slice()), (&second, b"two".as_slice())] {
        let context = TransactionContext::borrowed(fixtures::descriptor(), connection.as_mut());
        let options = StreamOptions::new(OpenMode::CreateNew, Access::Write, col("Id").eq(document.id))
            .new_row(new_row(document));
        let mut stream = RowStream::open(context, &schema, options).unwrap();
        assert_eq!(stream.state(), StreamState::HandleOpen);
        stream.write_all(payload).unwrap();
        stream.close().unwrap();
    }

    // Nothing is visible until the caller commits
    assert_eq!(server.row_count(TABLE), 0);
    connection.commit().unwrap();
    connection.close().unwrap();

    assert_eq!(server.blob(TABLE, first.id).unwrap(), b"one");
    assert_eq!(server.blob(TABLE, second.id).unwrap(), b"two");
    assert_eq!(server.stats().open_connections(), 0);
}

#[test]
fn test_pre_created_row_opened_for_write() {
    let server = fixtures::server();
    let document = Document::new("staged", 8);

    let mut context = TransactionContext::owned(fixtures::descriptor(), &server, CONNECTION_STRING).unwrap();
    assert_eq!(context.create_row(&new_row(&document)).unwrap(), 1);
    let options = StreamOptions::new(OpenMode::Open, Access::Write, col("Id").eq(document.id));
    let mut stream = RowStream::open(context, &document_schema(), options).unwrap();
    stream.write_all(b"staged payload").unwrap();
    stream.close().unwrap();

    assert_eq!(server.blob(TABLE, document.id).unwrap(), b"staged payload");
}

#[test]
fn test_identity_predicate() {
    let server = fixtures::server();
    let document = Document::new("by-id", 4);
    fixtures::store(&server, &document, b"abc").unwrap();

    let descriptor = fixtures::descriptor();
    let filter = rowstream_client::Predicate::identity(&descriptor, document.id).unwrap();
    let options = StreamOptions::new(OpenMode::Open, Access::Read, filter);
    let stream = fixtures::open(&server, options).unwrap();
    assert_eq!(stream.row().map(|r| r.id), Some(document.id));
    assert!(stream.path().starts_with("\\\\memory\\"));
    stream.close().unwrap();
}
