//! # rowstream-common
//!
//! Common types, errors, and configuration for rowstream.
//!
//! This crate provides the foundational pieces shared by the stream engine
//! and its drivers:
//!
//! - **Types**: the tagged scalar [`Value`], its SQL type tags ([`SqlType`],
//!   [`FieldType`]) and typed conversions ([`FromValue`], [`SqlEnum`])
//! - **Errors**: unified error handling with [`RowStreamError`]
//! - **Config**: connection settings with connection-string rendering and parsing
//!
//! ## Example
//!
//! ```rust
//! use rowstream_common::types::{SqlType, Value};
//! use rowstream_common::error::RowStreamResult;
//!
//! fn example() -> RowStreamResult<()> {
//!     let value = Value::from(42i32);
//!     assert_eq!(SqlType::of(&value), Some(SqlType::Int));
//!     let back: i32 = value.decode()?;
//!     assert_eq!(back, 42);
//!     Ok(())
//! }
//! # example().unwrap();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used items at the crate root
pub use config::ConnectionConfig;
pub use error::{ErrorCode, RowStreamError, RowStreamResult};
pub use types::{FieldType, FromValue, SqlEnum, SqlType, Value};
