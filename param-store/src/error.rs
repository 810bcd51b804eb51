//! Error types for parameter store operations.
//!
//! A missing parameter is never an error: lookups return `None` and setters
//! return `false`. The variants here cover stale store handles and programmer
//! errors such as a typed accessor whose size disagrees with the key.

use std::fmt;

use crate::graph::StoreId;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur while working with parameter stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The handle refers to a store that was destroyed (or never existed).
    StoreNotFound(StoreId),

    /// A store cannot be bound into, or copied onto, itself.
    SelfBinding(StoreId),

    /// Value size disagrees with the parameter's declared size.
    SizeMismatch {
        parameter: String,
        expected: usize,
        actual: usize,
    },

    /// A value accessor was used on a data interface parameter, or the reverse.
    KindMismatch { parameter: String, expected: String },

    /// A raw offset/size pair does not fit inside the backing container.
    OutOfBounds {
        offset: usize,
        size: usize,
        len: usize,
    },

    /// Configuration could not be loaded or applied.
    Config(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::StoreNotFound(id) => {
                write!(f, "Store {} not found (destroyed or stale handle)", id)
            }
            StoreError::SelfBinding(id) => {
                write!(f, "Store {} cannot be both source and destination", id)
            }
            StoreError::SizeMismatch {
                parameter,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "Size mismatch for parameter '{}': declared {} bytes, got {}",
                    parameter, expected, actual
                )
            }
            StoreError::KindMismatch {
                parameter,
                expected,
            } => {
                write!(
                    f,
                    "Parameter '{}' is not a {} parameter",
                    parameter, expected
                )
            }
            StoreError::OutOfBounds { offset, size, len } => {
                write!(
                    f,
                    "Range [{}, {}) is out of bounds for container of length {}",
                    offset,
                    offset.saturating_add(*size),
                    len
                )
            }
            StoreError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Config(e.to_string())
    }
}
