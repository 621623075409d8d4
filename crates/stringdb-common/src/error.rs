//! Error types for StringDB.

use thiserror::Error;

/// Result type alias using StringDbError.
pub type Result<T> = std::result::Result<T, StringDbError>;

/// Errors that can occur in StringDB operations.
#[derive(Debug, Error)]
pub enum StringDbError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Wire format errors
    #[error("Format error at offset {offset}: {reason}")]
    Format { offset: u64, reason: String },

    // Caller faults
    #[error("Key too large: {len} bytes (max {max})")]
    KeyTooLarge { len: usize, max: usize },

    #[error("Empty keys are not allowed")]
    EmptyKey,

    #[error("Value too large: {len} bytes (max {max})")]
    ValueTooLarge { len: u64, max: u64 },

    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter { name: String, value: String },

    // Query manager errors
    #[error("No record with id {0} in the current scan")]
    UnknownRecord(u64),

    // Lifecycle errors
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Resource is closed")]
    Closed,

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StringDbError {
    /// Constructs a Format error for the given offset and reason.
    pub fn format(offset: u64, reason: impl Into<String>) -> Self {
        StringDbError::Format {
            offset,
            reason: reason.into(),
        }
    }
}
