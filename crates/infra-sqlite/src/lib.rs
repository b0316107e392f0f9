// Quern SQLite Infrastructure - embedded document store implementation

mod connection;
mod job_repository;
mod migration;

pub use connection::create_pool;
pub use job_repository::SqliteJobRepository;
pub use migration::run_migrations;

use std::path::PathBuf;

/// Options for the embedded store: a file-backed database, or a purely
/// in-memory one.
#[derive(Debug, Clone, Default)]
pub struct StorageOptions {
    pub filename: Option<PathBuf>,
    pub in_memory: bool,
}

impl StorageOptions {
    /// A store that lives only as long as the process.
    pub fn memory() -> Self {
        Self {
            filename: None,
            in_memory: true,
        }
    }

    /// A store persisted at the given path; created if missing.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            filename: Some(path.into()),
            in_memory: false,
        }
    }

    /// The SQLite URL these options resolve to. Missing filename falls back
    /// to in-memory.
    pub fn database_url(&self) -> String {
        match (&self.filename, self.in_memory) {
            (Some(path), false) => format!("sqlite://{}", path.display()),
            _ => "sqlite::memory:".to_string(),
        }
    }
}
