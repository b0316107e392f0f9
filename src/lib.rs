//! quern - an embeddable, persistent job queue.
//!
//! Jobs are typed units of work persisted to a local SQLite store and
//! dispatched to in-process worker pools in priority order. Delivery is
//! at-least-once: jobs found mid-run after a crash are failed on the next
//! startup, never silently resumed.
//!
//! ```no_run
//! use std::time::Duration;
//! use quern::{NewJob, Priority, StorageOptions};
//! use quern::port::processor;
//!
//! # async fn example() -> quern::Result<()> {
//! let queue = quern::open(StorageOptions::file("jobs.db")).await?;
//!
//! queue
//!     .process(
//!         "email",
//!         processor::from_fn(|job| async move {
//!             println!("sending {}", job.data);
//!             Ok(serde_json::json!({"sent": true}))
//!         }),
//!         2,
//!     )
//!     .await;
//!
//! queue
//!     .create_job(NewJob::new("email").priority(Priority::High))
//!     .await?;
//!
//! queue.shutdown(Duration::from_secs(5), None).await;
//! # Ok(())
//! # }
//! ```

pub use quern_core::{application, domain, error, port};

pub mod infrastructure {
    pub mod sqlite {
        pub use quern_infra_sqlite::{
            create_pool, run_migrations, SqliteJobRepository, StorageOptions,
        };
    }
}

// Convenience re-exports
pub use application::{EventKind, Job, NewJob, Queue, QueueEvent, WorkerState};
pub use domain::{JobRecord, JobState, Priority};
pub use error::{Error, Result};
pub use infrastructure::sqlite::StorageOptions;

use std::sync::Arc;

/// Open a queue backed by the embedded SQLite store. Migrations and crash
/// recovery run before the queue accepts any operation.
pub async fn open(options: StorageOptions) -> Result<Queue> {
    let pool = infrastructure::sqlite::create_pool(&options.database_url()).await?;
    let repo = Arc::new(infrastructure::sqlite::SqliteJobRepository::new(pool));
    Queue::create(repo).await
}
