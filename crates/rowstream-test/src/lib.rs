//! # rowstream-test
//!
//! Integration tests for rowstream.
//!
//! This crate contains:
//! - Shared fixtures: a document record, its schema, table and server
//! - End-to-end session tests against the memory driver
//! - Predicate property tests
//! - Mapping provider tests, including metadata files on disk

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Records, schemas and servers shared by the integration tests
pub mod fixtures;
