//! Type definitions for rowstream.
//!
//! This module contains the scalar value model shared by the predicate
//! compiler, the row materializer and the drivers.

mod sql_type;
mod value;

pub use sql_type::{FieldType, SqlType};
pub use value::{FromValue, SqlEnum, Value};
