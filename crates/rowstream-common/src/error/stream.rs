//! Stream engine error types.

use std::error::Error as StdError;
use std::fmt;
use thiserror::Error;

/// Error codes for categorizing errors.
///
/// These codes can be used for programmatic error handling and
/// are stable across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    // Mapping errors (0x0100 - 0x01FF)
    /// Property has no column mapping.
    UnmappedProperty = 0x0100,
    /// Identifier property required but not mapped.
    MissingIdentifier = 0x0101,
    /// Mapping descriptor is inconsistent.
    InvalidMapping = 0x0102,
    /// Column value does not fit the field type.
    TypeMismatch = 0x0103,

    // Predicate errors (0x0200 - 0x02FF)
    /// Expression node or operator outside the supported grammar.
    UnsupportedExpression = 0x0200,
    /// Bound value has no SQL type mapping.
    UnsupportedType = 0x0201,

    // Mode errors (0x0300 - 0x03FF)
    /// Disallowed open mode / access combination.
    InvalidMode = 0x0300,

    // Row errors (0x0400 - 0x04FF)
    /// Handle-open query returned no row.
    RowNotFound = 0x0400,

    // Transaction errors (0x0500 - 0x05FF)
    /// Transaction context was already finalized.
    TransactionFinished = 0x0500,

    // Store errors (0x0600 - 0x06FF)
    /// The database rejected a statement.
    Store = 0x0600,
    /// I/O on the binary-object handle failed.
    Io = 0x0601,

    // Configuration errors (0x0700 - 0x07FF)
    /// Invalid configuration.
    InvalidConfig = 0x0700,
}

impl ErrorCode {
    /// Returns the numeric code.
    #[inline]
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Returns the error category name.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match (*self as u16) >> 8 {
            0x01 => "Mapping",
            0x02 => "Predicate",
            0x03 => "Mode",
            0x04 => "Row",
            0x05 => "Transaction",
            0x06 => "Store",
            0x07 => "Config",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The main error type for rowstream.
///
/// Every failure is fatal to the in-flight operation and surfaces to the
/// caller unmodified. Store failures keep the driver's error as their
/// [`source`](std::error::Error::source).
///
/// # Example
///
/// ```rust
/// use rowstream_common::error::{ErrorCode, RowStreamError};
///
/// let err = RowStreamError::unmapped("Size", "Files");
/// assert_eq!(err.code(), ErrorCode::UnmappedProperty);
/// assert_eq!(err.code().category(), "Mapping");
/// ```
#[derive(Debug, Error)]
pub enum RowStreamError {
    // ==========================================================================
    // Mapping Errors
    // ==========================================================================
    /// A property is absent from the mapping descriptor.
    #[error("failed to map property {property} of type {record}")]
    UnmappedProperty {
        /// The property name.
        property: String,
        /// The record or table the lookup was made against.
        record: String,
    },

    /// The identifier property is required but not available.
    #[error("no identifier property is mapped for table {table}")]
    MissingIdentifier {
        /// The table name.
        table: String,
    },

    /// The mapping descriptor is inconsistent.
    #[error("invalid mapping: {message}")]
    InvalidMapping {
        /// Error message.
        message: String,
    },

    /// A column value does not fit the field it is read into.
    #[error("type mismatch for column {column}: expected {expected}, got {actual}")]
    TypeMismatch {
        /// The column being read.
        column: String,
        /// Expected type.
        expected: String,
        /// Actual type.
        actual: String,
    },

    // ==========================================================================
    // Predicate Errors
    // ==========================================================================
    /// An expression node or operator is outside the supported grammar.
    #[error("unsupported expression: {node}")]
    UnsupportedExpression {
        /// Description of the offending node.
        node: String,
    },

    /// A bound value has no SQL type mapping.
    #[error("unsupported parameter type: {type_name}")]
    UnsupportedType {
        /// Name of the value's type.
        type_name: String,
    },

    // ==========================================================================
    // Mode Errors
    // ==========================================================================
    /// The open mode / access combination is not allowed.
    #[error("invalid open mode: {reason}")]
    InvalidMode {
        /// Why the combination was rejected.
        reason: String,
    },

    // ==========================================================================
    // Row Errors
    // ==========================================================================
    /// The handle-open query returned no row.
    #[error("no row in {table} matches {filter}")]
    RowNotFound {
        /// The table that was queried.
        table: String,
        /// The compiled filter.
        filter: String,
    },

    // ==========================================================================
    // Transaction Errors
    // ==========================================================================
    /// The transaction context has already been committed or rolled back.
    #[error("transaction already {state}")]
    TransactionFinished {
        /// The terminal state.
        state: String,
    },

    // ==========================================================================
    // Store Errors
    // ==========================================================================
    /// The underlying database rejected a statement.
    #[error("store error: {message}")]
    Store {
        /// Error message.
        message: String,
        /// The driver's original error.
        #[source]
        source: Box<dyn StdError + Send + Sync + 'static>,
    },

    /// I/O error from the binary-object handle.
    #[error("I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    // ==========================================================================
    // Configuration Errors
    // ==========================================================================
    /// Invalid configuration.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Error message.
        message: String,
    },
}

impl RowStreamError {
    /// Returns the error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::UnmappedProperty { .. } => ErrorCode::UnmappedProperty,
            Self::MissingIdentifier { .. } => ErrorCode::MissingIdentifier,
            Self::InvalidMapping { .. } => ErrorCode::InvalidMapping,
            Self::TypeMismatch { .. } => ErrorCode::TypeMismatch,
            Self::UnsupportedExpression { .. } => ErrorCode::UnsupportedExpression,
            Self::UnsupportedType { .. } => ErrorCode::UnsupportedType,
            Self::InvalidMode { .. } => ErrorCode::InvalidMode,
            Self::RowNotFound { .. } => ErrorCode::RowNotFound,
            Self::TransactionFinished { .. } => ErrorCode::TransactionFinished,
            Self::Store { .. } => ErrorCode::Store,
            Self::Io { .. } => ErrorCode::Io,
            Self::InvalidConfig { .. } => ErrorCode::InvalidConfig,
        }
    }

    /// Returns true for errors raised by the mapping layer.
    #[must_use]
    pub const fn is_mapping(&self) -> bool {
        matches!(
            self,
            Self::UnmappedProperty { .. }
                | Self::MissingIdentifier { .. }
                | Self::InvalidMapping { .. }
                | Self::TypeMismatch { .. }
        )
    }

    /// Returns true for errors raised by the predicate compiler.
    #[must_use]
    pub const fn is_unsupported_predicate(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedExpression { .. } | Self::UnsupportedType { .. }
        )
    }

    /// Returns true if the database or the handle reported the failure.
    #[must_use]
    pub const fn is_store(&self) -> bool {
        matches!(self, Self::Store { .. } | Self::Io { .. })
    }

    /// Creates an unmapped property error.
    #[must_use]
    pub fn unmapped(property: impl Into<String>, record: impl Into<String>) -> Self {
        Self::UnmappedProperty {
            property: property.into(),
            record: record.into(),
        }
    }

    /// Creates an invalid mapping error.
    #[must_use]
    pub fn invalid_mapping(message: impl Into<String>) -> Self {
        Self::InvalidMapping {
            message: message.into(),
        }
    }

    /// Creates an unsupported expression error.
    #[must_use]
    pub fn unsupported_expression(node: impl Into<String>) -> Self {
        Self::UnsupportedExpression { node: node.into() }
    }

    /// Creates an invalid mode error.
    #[must_use]
    pub fn invalid_mode(reason: impl Into<String>) -> Self {
        Self::InvalidMode {
            reason: reason.into(),
        }
    }

    /// Creates a store error wrapping the driver's original error.
    #[must_use]
    pub fn store(
        message: impl Into<String>,
        source: impl Into<Box<dyn StdError + Send + Sync + 'static>>,
    ) -> Self {
        Self::Store {
            message: message.into(),
            source: source.into(),
        }
    }

    /// Creates an invalid configuration error.
    #[must_use]
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}
