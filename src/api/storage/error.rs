//! Storage error types for the repository backends.

use thiserror::Error;

/// Storage operation errors.
#[derive(Error, Debug, Clone)]
pub enum StorageError {
    /// Configuration is incomplete or inconsistent
    #[error("invalid storage configuration: {0}")]
    InvalidConfig(String),
    /// Database connection error
    #[error("connection error: {0}")]
    ConnectionError(String),
    /// A required field of a record is missing
    #[error("{0} is required")]
    MissingField(&'static str),
    /// General storage error
    #[error("storage error: {0}")]
    Other(String),
}
