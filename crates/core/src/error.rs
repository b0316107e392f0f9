// Central Error Type

use thiserror::Error;

/// Application-level error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using Error
pub type Result<T> = std::result::Result<T, Error>;
