// Job Repository Port (Interface)

use crate::domain::{JobRecord, JobState};
use crate::error::Result;
use async_trait::async_trait;

/// Persistence facade over the embedded document store.
///
/// The store must support secondary-index sort and atomic single-document
/// update, insert, and delete. All methods observe inserts atomically: a
/// record returned by any query has been fully persisted.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Load or create the backing store. Idempotent.
    async fn init(&self) -> Result<()>;

    /// All jobs, optionally filtered by state, sorted by created_at ascending.
    async fn list(&self, state: Option<JobState>) -> Result<Vec<JobRecord>>;

    /// Find a job by ID.
    async fn find(&self, id: &str) -> Result<Option<JobRecord>>;

    /// The single most urgent INACTIVE job of the given type: smallest
    /// priority value first, then oldest created_at, ties broken by id so
    /// repeated calls without mutation return the same row.
    async fn find_next_inactive_by_type(&self, job_type: &str) -> Result<Option<JobRecord>>;

    /// Whether a job with this ID exists.
    async fn exists(&self, id: &str) -> Result<bool>;

    /// Persist a new record. Fails on ID collision.
    async fn insert(&self, record: &JobRecord) -> Result<()>;

    /// Replace mutable fields by ID. Fails unless exactly one row is affected.
    async fn update(&self, record: &JobRecord) -> Result<()>;

    /// Replace mutable fields by ID, guarded on the currently persisted
    /// state. Fails with a conflict if the row is gone or no longer in
    /// `expected` state. Every state transition persists through this guard
    /// so a stale in-memory copy cannot overwrite a terminal row.
    async fn update_from_state(&self, record: &JobRecord, expected: JobState) -> Result<()>;

    /// Delete by ID. Silent if absent.
    async fn remove(&self, id: &str) -> Result<()>;
}
