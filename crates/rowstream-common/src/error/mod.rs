//! Error handling for rowstream.
//!
//! This module provides a unified error type and result alias used
//! across the stream engine and its drivers.

mod stream;

pub use stream::{ErrorCode, RowStreamError};

/// Result type alias for rowstream operations.
pub type RowStreamResult<T> = std::result::Result<T, RowStreamError>;
