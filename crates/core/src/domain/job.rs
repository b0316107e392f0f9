// Job Domain Model

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::error::{DomainError, Result};

/// Job ID (UUID v4)
pub type JobId = String;

/// Job State
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Inactive,
    Active,
    Complete,
    Failure,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Inactive => "INACTIVE",
            JobState::Active => "ACTIVE",
            JobState::Complete => "COMPLETE",
            JobState::Failure => "FAILURE",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job priority. Smaller numeric values are more urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    Normal,
    Medium,
    High,
    Critical,
}

impl Priority {
    /// Numeric value as persisted in storage.
    pub fn as_i32(self) -> i32 {
        match self {
            Priority::Low => 10,
            Priority::Normal => 0,
            Priority::Medium => -5,
            Priority::High => -10,
            Priority::Critical => -15,
        }
    }

    /// Coerce a stored priority value. Unknown values (legacy or
    /// externally-written rows) become `Normal` with a warning; the load
    /// itself never fails.
    pub fn sanitize(value: i32) -> Self {
        match value {
            10 => Priority::Low,
            0 => Priority::Normal,
            -5 => Priority::Medium,
            -10 => Priority::High,
            -15 => Priority::Critical,
            other => {
                warn!(priority = other, "unknown priority value, coercing to NORMAL");
                Priority::Normal
            }
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// The persisted job document. One row per job; `data` is opaque to the
/// queue and round-trips through storage untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub job_type: String,
    pub priority: Priority,
    pub data: serde_json::Value,
    pub state: JobState,

    pub created_at: i64, // epoch ms
    pub updated_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub failed_at: Option<i64>,

    /// (completed_at or failed_at) - started_at, in milliseconds
    pub duration: Option<i64>,
    pub progress: Option<u8>,
    pub logs: Vec<String>,
}

impl JobRecord {
    /// Create a new INACTIVE record.
    ///
    /// # Arguments
    ///
    /// * `id` - Unique job ID (injected, not generated)
    /// * `created_at` - Creation timestamp in epoch ms (injected, not system time)
    /// * `job_type` - Type tag partitioning jobs into independent queues
    /// * `priority` - Fetch priority
    /// * `data` - Opaque payload
    pub fn new(
        id: impl Into<String>,
        created_at: i64,
        job_type: impl Into<String>,
        priority: Priority,
        data: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            job_type: job_type.into(),
            priority,
            data,
            state: JobState::Inactive,
            created_at,
            updated_at: created_at,
            started_at: None,
            completed_at: None,
            failed_at: None,
            duration: None,
            progress: None,
            logs: Vec::new(),
        }
    }

    fn invalid_transition(&self, to: JobState) -> DomainError {
        DomainError::InvalidStateTransition {
            from: self.state.to_string(),
            to: to.to_string(),
        }
    }

    fn require_state(&self, expected: JobState) -> Result<()> {
        if self.state != expected {
            return Err(DomainError::UnexpectedState {
                id: self.id.clone(),
                state: self.state.to_string(),
                expected: expected.to_string(),
            });
        }
        Ok(())
    }

    /// INACTIVE -> ACTIVE (worker claims the job)
    pub fn start(&mut self, now_millis: i64) -> Result<()> {
        if self.state != JobState::Inactive {
            return Err(self.invalid_transition(JobState::Active));
        }
        self.state = JobState::Active;
        self.started_at = Some(now_millis);
        self.updated_at = now_millis;
        Ok(())
    }

    /// ACTIVE -> COMPLETE (processor returned)
    pub fn complete(&mut self, now_millis: i64) -> Result<()> {
        if self.state != JobState::Active {
            return Err(self.invalid_transition(JobState::Complete));
        }
        self.state = JobState::Complete;
        self.completed_at = Some(now_millis);
        self.duration = self.started_at.map(|started| now_millis - started);
        self.updated_at = now_millis;
        Ok(())
    }

    /// ACTIVE -> FAILURE. The error message is appended to the log buffer.
    pub fn fail(&mut self, now_millis: i64, error: &str) -> Result<()> {
        if self.state != JobState::Active {
            return Err(self.invalid_transition(JobState::Failure));
        }
        self.state = JobState::Failure;
        self.failed_at = Some(now_millis);
        self.duration = self.started_at.map(|started| now_millis - started);
        self.logs.push(error.to_string());
        self.updated_at = now_millis;
        Ok(())
    }

    /// Record progress as a 0..=100 percentage. Legal only while ACTIVE.
    pub fn set_progress(&mut self, completed: u64, total: u64, now_millis: i64) -> Result<()> {
        self.require_state(JobState::Active)?;
        let percent = if total == 0 {
            100
        } else {
            ((completed * 100) / total).min(100) as u8
        };
        self.progress = Some(percent);
        self.updated_at = now_millis;
        Ok(())
    }

    /// Change priority. Legal only while INACTIVE.
    pub fn set_priority(&mut self, priority: Priority, now_millis: i64) -> Result<()> {
        self.require_state(JobState::Inactive)?;
        self.priority = priority;
        self.updated_at = now_millis;
        Ok(())
    }

    /// Append a line to the log buffer.
    pub fn append_log(&mut self, message: impl Into<String>, now_millis: i64) {
        self.logs.push(message.into());
        self.updated_at = now_millis;
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, JobState::Complete | JobState::Failure)
    }
}
