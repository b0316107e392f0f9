// Worker - per-type execution unit
//
// A worker binds to one job type and loops: request a job, run the user
// processor, report the outcome. Shutdown is cooperative through a watch
// channel; the same signal backs the `still_interested` predicate handed to
// the dispatch core.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::application::constants::{ERROR_RECOVERY_SLEEP_DURATION, SHUTDOWN_TIMEOUT_ERROR};
use crate::application::events::QueueEvent;
use crate::application::job::Job;
use crate::application::queue::{Dispatch, InterestFn, QueueCore};
use crate::error::Result;
use crate::port::JobProcessor;

/// Worker lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Requesting,
    Running,
    Draining,
    Terminated,
}

pub(crate) struct Worker {
    job_type: String,
    core: Arc<QueueCore>,
    processor: Arc<dyn JobProcessor>,
    state: Arc<Mutex<WorkerState>>,
    current: Arc<Mutex<Option<Job>>>,
}

/// Registry entry for a spawned worker; owns the shutdown side.
pub(crate) struct WorkerHandle {
    job_type: String,
    shutdown: watch::Sender<bool>,
    state: Arc<Mutex<WorkerState>>,
    current: Arc<Mutex<Option<Job>>>,
    join: JoinHandle<()>,
}

impl Worker {
    pub(crate) fn spawn(
        core: Arc<QueueCore>,
        job_type: String,
        processor: Arc<dyn JobProcessor>,
    ) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let state = Arc::new(Mutex::new(WorkerState::Idle));
        let current = Arc::new(Mutex::new(None));
        let worker = Worker {
            job_type: job_type.clone(),
            core,
            processor,
            state: Arc::clone(&state),
            current: Arc::clone(&current),
        };
        let join = tokio::spawn(worker.run(shutdown_rx));
        WorkerHandle {
            job_type,
            shutdown: shutdown_tx,
            state,
            current,
            join,
        }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(job_type = %self.job_type, "worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            self.set_state(WorkerState::Requesting).await;

            let interested: InterestFn = {
                let rx = shutdown.clone();
                Arc::new(move || !*rx.borrow())
            };

            let outcome: Result<Option<Job>> =
                match self.core.acquire_or_park(&self.job_type, interested).await {
                    Ok(Dispatch::Job(job)) => Ok(Some(job)),
                    Ok(Dispatch::Declined) => Ok(None),
                    Ok(Dispatch::Parked(rx)) => {
                        // The parked continuation resolves on handoff; the
                        // shutdown signal cancels the wait. A waiter
                        // abandoned here is skipped by its predicate.
                        tokio::select! {
                            resolved = rx => match resolved {
                                Ok(result) => result,
                                Err(_) => Ok(None),
                            },
                            _ = shutdown.changed() => break,
                        }
                    }
                    Err(err) => Err(err),
                };

            match outcome {
                Ok(Some(job)) => self.run_job(job).await,
                // Shutdown path
                Ok(None) => break,
                Err(err) => {
                    error!(job_type = %self.job_type, error = %err, "worker failed to obtain a job");
                    self.core.events.emit(QueueEvent::Error {
                        message: err.to_string(),
                        job: None,
                    });
                    tokio::select! {
                        _ = sleep(ERROR_RECOVERY_SLEEP_DURATION) => {}
                        _ = shutdown.changed() => break,
                    }
                }
            }
        }
        self.set_state(WorkerState::Terminated).await;
        info!(job_type = %self.job_type, "worker stopped");
    }

    async fn run_job(&self, mut job: Job) {
        self.set_state(WorkerState::Running).await;
        *self.current.lock().await = Some(job.clone());

        info!(job_id = %job.id(), job_type = %self.job_type, "processing job");
        let outcome = self.processor.process(job.record()).await;

        *self.current.lock().await = None;
        match outcome {
            Ok(result) => {
                if let Err(err) = job.set_state_to_complete(Some(result)).await {
                    // Already emitted on the bus; the loop keeps going
                    warn!(job_id = %job.id(), error = %err, "failed to record job completion");
                }
            }
            Err(failure) => {
                if let Err(err) = job.set_state_to_failure(failure.message()).await {
                    warn!(job_id = %job.id(), error = %err, "failed to record job failure");
                }
            }
        }
    }

    async fn set_state(&self, state: WorkerState) {
        *self.state.lock().await = state;
    }
}

impl WorkerHandle {
    pub(crate) fn job_type(&self) -> &str {
        &self.job_type
    }

    /// Signal shutdown and wait up to `timeout` for the loop to exit. If
    /// the deadline elapses while a job is running, that job is failed with
    /// "shutdown timeout" and the processor is orphaned; its eventual
    /// terminal write fails the state guard and surfaces as an Error event.
    pub(crate) async fn shutdown(mut self, timeout: Duration) {
        {
            let mut state = self.state.lock().await;
            if *state != WorkerState::Terminated {
                *state = WorkerState::Draining;
            }
        }
        let _ = self.shutdown.send(true);

        match tokio::time::timeout(timeout, &mut self.join).await {
            Ok(joined) => {
                if let Err(err) = joined {
                    error!(job_type = %self.job_type, error = %err, "worker task failed");
                }
            }
            Err(_) => {
                warn!(job_type = %self.job_type, "worker did not stop within the shutdown timeout");
                let current = self.current.lock().await.take();
                if let Some(mut job) = current {
                    if let Err(err) = job.set_state_to_failure(SHUTDOWN_TIMEOUT_ERROR).await {
                        error!(
                            job_id = %job.id(),
                            error = %err,
                            "failed to fail job after shutdown timeout"
                        );
                    }
                }
                // The task is left to finish on its own; user processors
                // cannot be aborted safely.
            }
        }
    }
}
