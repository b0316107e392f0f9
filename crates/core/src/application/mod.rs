// Application Layer - Dispatch core and job lifecycle

pub mod constants;
pub mod events;
pub mod job;
pub mod queue;
pub mod worker;

// Re-exports
pub use events::{EventKind, QueueEvent};
pub use job::Job;
pub use queue::{NewJob, Queue};
pub use worker::WorkerState;
