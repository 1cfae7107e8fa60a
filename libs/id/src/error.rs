//! Error types for name parsing and validation.

use thiserror::Error;

/// Errors that can occur when parsing or validating worker names.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The name string is empty.
    #[error("name cannot be empty")]
    Empty,

    /// The name does not start with the expected prefix.
    #[error("invalid name prefix: expected '{expected}-', got '{actual}'")]
    InvalidPrefix {
        expected: &'static str,
        actual: String,
    },

    /// The UUID portion of the name is invalid.
    #[error("invalid UUID: {0}")]
    InvalidUuid(String),

    /// The UUID portion is not in lowercase hyphenated form.
    #[error("non-canonical UUID: {0}")]
    NonCanonical(String),
}

impl IdError {
    /// Returns true if this error indicates the input was empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, IdError::Empty)
    }

    /// Returns true if this error indicates a prefix mismatch.
    pub fn is_prefix_error(&self) -> bool {
        matches!(self, IdError::InvalidPrefix { .. })
    }
}
