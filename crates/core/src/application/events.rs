// Event surface - best-effort subscription bus

use crate::domain::JobRecord;
use tokio::sync::broadcast;

/// Events emitted by the queue. Job payloads are snapshots of the record at
/// emission time.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    /// An operation failed; carries the affected job when there is one.
    Error {
        message: String,
        job: Option<JobRecord>,
    },
    /// A job was persisted for the first time.
    Enqueue { job: JobRecord },
    /// A job was claimed and moved to ACTIVE.
    Start { job: JobRecord },
    /// A running job reported progress (0..=100).
    Progress { job: JobRecord, progress: u8 },
    /// A job completed; `result` is the processor's return value.
    Complete {
        job: JobRecord,
        result: Option<serde_json::Value>,
    },
    /// A job failed.
    Failure { job: JobRecord, error: String },
    /// A job was removed from storage.
    Remove { job: JobRecord },
}

/// Event discriminant, for subscription filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Error,
    Enqueue,
    Start,
    Progress,
    Complete,
    Failure,
    Remove,
}

impl QueueEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            QueueEvent::Error { .. } => EventKind::Error,
            QueueEvent::Enqueue { .. } => EventKind::Enqueue,
            QueueEvent::Start { .. } => EventKind::Start,
            QueueEvent::Progress { .. } => EventKind::Progress,
            QueueEvent::Complete { .. } => EventKind::Complete,
            QueueEvent::Failure { .. } => EventKind::Failure,
            QueueEvent::Remove { .. } => EventKind::Remove,
        }
    }

    /// The job this event concerns, if any.
    pub fn job(&self) -> Option<&JobRecord> {
        match self {
            QueueEvent::Error { job, .. } => job.as_ref(),
            QueueEvent::Enqueue { job }
            | QueueEvent::Start { job }
            | QueueEvent::Progress { job, .. }
            | QueueEvent::Complete { job, .. }
            | QueueEvent::Failure { job, .. }
            | QueueEvent::Remove { job } => Some(job),
        }
    }
}

/// Fan-out bus. Sends never block; subscribers that fall behind lose the
/// oldest buffered events.
pub(crate) struct EventBus {
    tx: broadcast::Sender<QueueEvent>,
}

impl EventBus {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.tx.subscribe()
    }

    pub(crate) fn emit(&self, event: QueueEvent) {
        // No subscribers is fine
        let _ = self.tx.send(event);
    }
}
