// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("invalid job state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("job {id} is {state}, expected {expected}")]
    UnexpectedState {
        id: String,
        state: String,
        expected: String,
    },

    #[error("job already saved: {0}")]
    AlreadySaved(String),

    #[error("job not saved: {0}")]
    NotSaved(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
