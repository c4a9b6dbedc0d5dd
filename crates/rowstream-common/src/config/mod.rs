//! Configuration for rowstream.
//!
//! This module provides the connection settings an owned transaction
//! context is opened with.

mod connection;

pub use connection::ConnectionConfig;
