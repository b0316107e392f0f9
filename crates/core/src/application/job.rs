// Job Entity - a persisted record plus its queue handle
//
// Materialized jobs are snapshots: two copies of the same job do not see
// each other's in-memory mutations. Storage is the source of truth, and the
// expected-state guard on transitions keeps stale copies from overwriting
// newer rows.

use std::fmt;
use std::sync::Arc;

use crate::application::events::QueueEvent;
use crate::application::queue::QueueCore;
use crate::domain::{DomainError, JobRecord, JobState, Priority};
use crate::error::{Error, Result};

/// A job held by the host or a worker. Operations delegate persistence to
/// the queue's repository and emit lifecycle events.
#[derive(Clone)]
pub struct Job {
    pub(crate) core: Arc<QueueCore>,
    pub(crate) record: JobRecord,
    pub(crate) saved: bool,
}

impl Job {
    pub(crate) fn unsaved(core: Arc<QueueCore>, record: JobRecord) -> Self {
        Self {
            core,
            record,
            saved: false,
        }
    }

    /// Materialize a job that already exists in storage.
    pub(crate) fn attached(core: Arc<QueueCore>, record: JobRecord) -> Self {
        Self {
            core,
            record,
            saved: true,
        }
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn job_type(&self) -> &str {
        &self.record.job_type
    }

    pub fn state(&self) -> JobState {
        self.record.state
    }

    pub fn priority(&self) -> Priority {
        self.record.priority
    }

    pub fn data(&self) -> &serde_json::Value {
        &self.record.data
    }

    pub fn progress(&self) -> Option<u8> {
        self.record.progress
    }

    pub fn logs(&self) -> &[String] {
        &self.record.logs
    }

    /// The full persisted document.
    pub fn record(&self) -> &JobRecord {
        &self.record
    }

    pub fn is_saved(&self) -> bool {
        self.saved
    }

    /// Emit an Error event and hand the error back, so failures both reach
    /// subscribers and the caller.
    fn report(&self, err: Error) -> Error {
        self.core.events.emit(QueueEvent::Error {
            message: err.to_string(),
            job: Some(self.record.clone()),
        });
        err
    }

    fn require_saved(&self) -> Result<()> {
        if !self.saved {
            return Err(self.report(DomainError::NotSaved(self.record.id.clone()).into()));
        }
        Ok(())
    }

    /// Persist the job for the first time. A second call fails with
    /// "already saved". Triggers the insert-side handoff to a parked waiter
    /// of this type.
    pub async fn save(&mut self) -> Result<&mut Self> {
        if self.saved {
            return Err(self.report(DomainError::AlreadySaved(self.record.id.clone()).into()));
        }
        self.core
            .repo
            .insert(&self.record)
            .await
            .map_err(|e| self.report(e))?;
        self.saved = true;
        self.core.events.emit(QueueEvent::Enqueue {
            job: self.record.clone(),
        });
        self.core.dispatch_to_waiter(self).await;
        Ok(self)
    }

    /// Persist the current in-memory attributes. Fails if the job was never
    /// saved or its row has been removed.
    pub async fn update(&mut self) -> Result<()> {
        self.require_saved()?;
        self.record.updated_at = self.core.clock.now_millis();
        self.core
            .repo
            .update(&self.record)
            .await
            .map_err(|e| self.report(e))
    }

    /// Delete the job from storage. Fails if never saved.
    pub async fn remove(&mut self) -> Result<()> {
        self.require_saved()?;
        self.core
            .repo
            .remove(&self.record.id)
            .await
            .map_err(|e| self.report(e))?;
        self.core.events.emit(QueueEvent::Remove {
            job: self.record.clone(),
        });
        Ok(())
    }

    /// Claim the job: INACTIVE -> ACTIVE, started_at stamped, persisted.
    pub async fn set_state_to_active(&mut self) -> Result<()> {
        let now = self.core.clock.now_millis();
        let expected = self.record.state;
        self.record
            .start(now)
            .map_err(|e| self.report(e.into()))?;
        self.persist_transition(expected).await?;
        self.core.events.emit(QueueEvent::Start {
            job: self.record.clone(),
        });
        Ok(())
    }

    /// ACTIVE -> COMPLETE. `result` is the processor's return value; it
    /// rides the Complete event and is not persisted.
    pub async fn set_state_to_complete(
        &mut self,
        result: Option<serde_json::Value>,
    ) -> Result<()> {
        let now = self.core.clock.now_millis();
        let expected = self.record.state;
        self.record
            .complete(now)
            .map_err(|e| self.report(e.into()))?;
        self.persist_transition(expected).await?;
        self.core.events.emit(QueueEvent::Complete {
            job: self.record.clone(),
            result,
        });
        Ok(())
    }

    /// ACTIVE -> FAILURE. The error message joins the job's log buffer.
    pub async fn set_state_to_failure(&mut self, error: impl Into<String>) -> Result<()> {
        let message = error.into();
        let now = self.core.clock.now_millis();
        let expected = self.record.state;
        self.record
            .fail(now, &message)
            .map_err(|e| self.report(e.into()))?;
        self.persist_transition(expected).await?;
        self.core.events.emit(QueueEvent::Failure {
            job: self.record.clone(),
            error: message,
        });
        Ok(())
    }

    /// Report progress while ACTIVE, clamped to 0..=100.
    pub async fn set_progress(&mut self, completed: u64, total: u64) -> Result<()> {
        let now = self.core.clock.now_millis();
        self.record
            .set_progress(completed, total, now)
            .map_err(|e| self.report(e.into()))?;
        self.persist_attributes().await?;
        self.core.events.emit(QueueEvent::Progress {
            job: self.record.clone(),
            progress: self.record.progress.unwrap_or(0),
        });
        Ok(())
    }

    /// Change priority while still INACTIVE.
    pub async fn set_priority(&mut self, priority: Priority) -> Result<()> {
        let now = self.core.clock.now_millis();
        self.record
            .set_priority(priority, now)
            .map_err(|e| self.report(e.into()))?;
        self.persist_attributes().await
    }

    /// Append a line to the job's log buffer.
    pub async fn log(&mut self, message: impl Into<String>) -> Result<()> {
        let now = self.core.clock.now_millis();
        self.record.append_log(message, now);
        self.persist_attributes().await
    }

    /// Transitions on unsaved jobs mutate memory only; saved jobs persist
    /// through the expected-state guard.
    async fn persist_transition(&self, expected: JobState) -> Result<()> {
        if !self.saved {
            return Ok(());
        }
        self.core
            .repo
            .update_from_state(&self.record, expected)
            .await
            .map_err(|e| self.report(e))
    }

    async fn persist_attributes(&self) -> Result<()> {
        if !self.saved {
            return Ok(());
        }
        self.core
            .repo
            .update(&self.record)
            .await
            .map_err(|e| self.report(e))
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("record", &self.record)
            .field("saved", &self.saved)
            .finish()
    }
}
