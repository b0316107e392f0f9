// Queue - the dispatch core
//
// Coordinates the per-type waiter FIFO, the dispatch mutex serializing
// INACTIVE -> ACTIVE claims, the worker registry, and startup crash
// recovery.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, oneshot, Mutex};
use tracing::{error, info, warn};

use crate::application::constants::{
    CRASH_RECOVERY_ERROR, EVENT_BUS_CAPACITY, MAX_DATA_BYTES, MAX_JOB_TYPE_LEN,
};
use crate::application::events::{EventBus, EventKind, QueueEvent};
use crate::application::job::Job;
use crate::application::worker::{Worker, WorkerHandle};
use crate::domain::{JobRecord, JobState};
use crate::error::{Error, Result};
use crate::port::id_provider::UuidProvider;
use crate::port::time_provider::SystemTimeProvider;
use crate::port::{IdProvider, JobProcessor, JobRepository, TimeProvider};

/// Parameters for [`Queue::create_job`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub job_type: String,

    #[serde(default)]
    pub priority: Option<crate::domain::Priority>,

    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl NewJob {
    pub fn new(job_type: impl Into<String>) -> Self {
        Self {
            job_type: job_type.into(),
            priority: None,
            data: None,
        }
    }

    pub fn priority(mut self, priority: crate::domain::Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

pub(crate) type InterestFn = Arc<dyn Fn() -> bool + Send + Sync>;

/// A parked request for the next job of a type. Lives for at most one
/// dispatch cycle: it is resolved exactly once or discarded once its owner
/// loses interest.
pub(crate) struct Waiter {
    tx: oneshot::Sender<Result<Option<Job>>>,
    interested: InterestFn,
}

/// Outcome of a single dispatch attempt.
pub(crate) enum Dispatch {
    /// A job was claimed and persisted as ACTIVE.
    Job(Job),
    /// A candidate existed but the requester had already lost interest.
    Declined,
    /// No job available; the request is parked on the waiter FIFO.
    Parked(oneshot::Receiver<Result<Option<Job>>>),
}

/// State shared between the queue surface, its jobs, and its workers.
pub(crate) struct QueueCore {
    pub(crate) repo: Arc<dyn JobRepository>,
    pub(crate) clock: Arc<dyn TimeProvider>,
    pub(crate) ids: Arc<dyn IdProvider>,
    pub(crate) events: EventBus,
    waiters: Mutex<HashMap<String, VecDeque<Waiter>>>,
    dispatch: Mutex<()>,
}

impl QueueCore {
    /// The key dispatch algorithm. Returns a claimed ACTIVE job, a parked
    /// continuation, or a decline when `interested` already reports false.
    ///
    /// Fast-park: if anyone is already waiting for this type, the new
    /// request cannot legitimately jump the queue and parks at the tail
    /// without touching storage. Otherwise the dispatch mutex serializes
    /// the find-then-claim sequence against all other requesters.
    pub(crate) async fn acquire_or_park(
        self: &Arc<Self>,
        job_type: &str,
        interested: InterestFn,
    ) -> Result<Dispatch> {
        {
            let mut waiters = self.waiters.lock().await;
            if let Some(list) = waiters.get_mut(job_type) {
                if !list.is_empty() {
                    let (tx, rx) = oneshot::channel();
                    list.push_back(Waiter { tx, interested });
                    return Ok(Dispatch::Parked(rx));
                }
            }
        }

        let _guard = self.dispatch.lock().await;
        match self.repo.find_next_inactive_by_type(job_type).await? {
            None => {
                let (tx, rx) = oneshot::channel();
                self.waiters
                    .lock()
                    .await
                    .entry(job_type.to_string())
                    .or_default()
                    .push_back(Waiter { tx, interested });
                Ok(Dispatch::Parked(rx))
            }
            Some(record) => {
                if interested() {
                    let mut job = Job::attached(Arc::clone(self), record);
                    job.set_state_to_active().await?;
                    Ok(Dispatch::Job(job))
                } else {
                    Ok(Dispatch::Declined)
                }
            }
        }
    }

    /// Await a job of the given type. Resolves with a durably claimed
    /// ACTIVE job, or none once the requester lost interest.
    pub(crate) async fn request_job_for_processing(
        self: &Arc<Self>,
        job_type: &str,
        interested: InterestFn,
    ) -> Result<Option<Job>> {
        match self.acquire_or_park(job_type, interested).await? {
            Dispatch::Job(job) => Ok(Some(job)),
            Dispatch::Declined => Ok(None),
            Dispatch::Parked(rx) => match rx.await {
                Ok(resolved) => resolved,
                // Queue dropped while parked
                Err(_) => Ok(None),
            },
        }
    }

    /// Insert-side handoff: route a just-saved job to the head waiter of
    /// its type that still reports interest. Runs under the dispatch mutex
    /// so no requester can race the claim, and so a requester between its
    /// empty storage query and its park cannot miss the insert. Resolving
    /// the oneshot wakes the parked task at its next scheduling
    /// opportunity; the inserter never runs the waiter inline.
    pub(crate) async fn dispatch_to_waiter(self: &Arc<Self>, job: &Job) {
        {
            let waiters = self.waiters.lock().await;
            match waiters.get(job.job_type()) {
                Some(list) if !list.is_empty() => {}
                _ => return,
            }
        }

        let _guard = self.dispatch.lock().await;
        let waiter = {
            let mut waiters = self.waiters.lock().await;
            let Some(list) = waiters.get_mut(job.job_type()) else {
                return;
            };
            let mut willing = None;
            while let Some(candidate) = list.pop_front() {
                if (candidate.interested)() {
                    willing = Some(candidate);
                    break;
                }
                // Lost interest: discarded without notification
            }
            willing
        };
        let Some(waiter) = waiter else { return };

        let mut handed = job.clone();
        match handed.set_state_to_active().await {
            Ok(()) => {
                if let Err(returned) = waiter.tx.send(Ok(Some(handed))) {
                    // Receiver cancelled after the interest check
                    if let Ok(Some(job)) = returned {
                        self.release_claim(job).await;
                    }
                }
            }
            Err(err) => {
                let _ = waiter.tx.send(Err(err));
            }
        }
    }

    /// Return a claimed job nobody will run back to INACTIVE.
    async fn release_claim(&self, mut job: Job) {
        warn!(job_id = %job.id(), "handoff receiver gone after claim, releasing job");
        job.record.state = JobState::Inactive;
        job.record.started_at = None;
        job.record.updated_at = self.clock.now_millis();
        if let Err(err) = self
            .repo
            .update_from_state(&job.record, JobState::Active)
            .await
        {
            error!(job_id = %job.id(), error = %err, "failed to release claimed job");
        }
    }
}

/// The embeddable job queue: accepts typed jobs, persists them, and
/// dispatches them to in-process worker pools in priority order.
pub struct Queue {
    core: Arc<QueueCore>,
    workers: Mutex<Vec<WorkerHandle>>,
}

impl Queue {
    /// Open a queue over an initialized repository with the system clock
    /// and UUID ids. Runs crash recovery before accepting operations.
    pub async fn create(repo: Arc<dyn JobRepository>) -> Result<Self> {
        Self::create_with(repo, Arc::new(SystemTimeProvider), Arc::new(UuidProvider)).await
    }

    /// Like [`Queue::create`] with injected providers, for deterministic
    /// ids and timestamps in tests.
    pub async fn create_with(
        repo: Arc<dyn JobRepository>,
        clock: Arc<dyn TimeProvider>,
        ids: Arc<dyn IdProvider>,
    ) -> Result<Self> {
        repo.init().await?;
        let core = Arc::new(QueueCore {
            repo,
            clock,
            ids,
            events: EventBus::new(EVENT_BUS_CAPACITY),
            waiters: Mutex::new(HashMap::new()),
            dispatch: Mutex::new(()),
        });
        let recovered = recover_interrupted_jobs(&core).await?;
        if recovered > 0 {
            info!(recovered_jobs = recovered, "crash recovery complete");
        }
        Ok(Self {
            core,
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Create and persist a new INACTIVE job. If a waiter is parked for the
    /// type, the job is handed to it directly.
    pub async fn create_job(&self, new_job: NewJob) -> Result<Job> {
        validate_new_job(&new_job).map_err(|e| self.report(e, None))?;
        let now = self.core.clock.now_millis();
        let record = JobRecord::new(
            self.core.ids.generate_id(),
            now,
            new_job.job_type,
            new_job.priority.unwrap_or_default(),
            new_job.data.unwrap_or(serde_json::Value::Null),
        );
        let mut job = Job::unsaved(Arc::clone(&self.core), record);
        job.save().await?;
        Ok(job)
    }

    /// Spawn `concurrency` workers for the type, each running `processor`.
    pub async fn process(
        &self,
        job_type: impl Into<String>,
        processor: Arc<dyn JobProcessor>,
        concurrency: usize,
    ) {
        let job_type = job_type.into();
        let mut workers = self.workers.lock().await;
        for _ in 0..concurrency {
            workers.push(Worker::spawn(
                Arc::clone(&self.core),
                job_type.clone(),
                Arc::clone(&processor),
            ));
        }
    }

    /// Shut down workers of the given type (or all workers) sequentially,
    /// allowing each up to `timeout` to finish its current job. A job still
    /// running at the deadline is failed with "shutdown timeout"; its
    /// processor is left behind, not aborted.
    pub async fn shutdown(&self, timeout: Duration, job_type: Option<&str>) {
        let targets: Vec<WorkerHandle> = {
            let mut workers = self.workers.lock().await;
            match job_type {
                None => workers.drain(..).collect(),
                Some(t) => {
                    let mut kept = Vec::new();
                    let mut out = Vec::new();
                    for handle in workers.drain(..) {
                        if handle.job_type() == t {
                            out.push(handle);
                        } else {
                            kept.push(handle);
                        }
                    }
                    *workers = kept;
                    out
                }
            }
        };
        for handle in targets {
            handle.shutdown(timeout).await;
        }
    }

    /// Await the next job of the type. Public form of the dispatch
    /// protocol, for hosts that drive their own execution loop; workers
    /// spawned by [`Queue::process`] use it internally.
    pub async fn request_job_for_processing<F>(
        &self,
        job_type: &str,
        still_interested: F,
    ) -> Result<Option<Job>>
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.core
            .request_job_for_processing(job_type, Arc::new(still_interested))
            .await
    }

    pub async fn find_job(&self, id: &str) -> Result<Option<Job>> {
        let record = self
            .core
            .repo
            .find(id)
            .await
            .map_err(|e| self.report(e, None))?;
        Ok(record.map(|r| Job::attached(Arc::clone(&self.core), r)))
    }

    /// All jobs, optionally filtered by state, oldest first. The returned
    /// jobs are a snapshot.
    pub async fn list_jobs(&self, state: Option<JobState>) -> Result<Vec<Job>> {
        let records = self
            .core
            .repo
            .list(state)
            .await
            .map_err(|e| self.report(e, None))?;
        Ok(records
            .into_iter()
            .map(|r| Job::attached(Arc::clone(&self.core), r))
            .collect())
    }

    /// Remove one job by id. Fails if absent.
    pub async fn remove_job_by_id(&self, id: &str) -> Result<()> {
        let Some(mut job) = self.find_job(id).await? else {
            return Err(self.report(Error::NotFound(format!("job {id}")), None));
        };
        job.remove().await
    }

    /// Remove every job the predicate accepts; returns the removed jobs.
    /// The predicate runs over a list snapshot, so removal during iteration
    /// is safe. ACTIVE jobs are removed too: the owning worker's terminal
    /// write then affects no row and surfaces as an Error event.
    pub async fn remove_jobs_by_callback<F>(&self, predicate: F) -> Result<Vec<Job>>
    where
        F: Fn(&Job) -> bool,
    {
        let jobs = self.list_jobs(None).await?;
        let mut removed = Vec::new();
        for mut job in jobs {
            if predicate(&job) {
                job.remove().await?;
                removed.push(job);
            }
        }
        Ok(removed)
    }

    /// Subscribe to the event bus.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.core.events.subscribe()
    }

    /// Run `handler` for every event of the given kind on a background
    /// task. Handlers must not block; the bus is best-effort.
    pub fn on<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(QueueEvent) + Send + 'static,
    {
        let mut rx = self.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if event.kind() == kind {
                            handler(event);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    fn report(&self, err: Error, job: Option<&JobRecord>) -> Error {
        self.core.events.emit(QueueEvent::Error {
            message: err.to_string(),
            job: job.cloned(),
        });
        err
    }
}

/// Startup crash recovery: any ACTIVE row means a previous process died
/// mid-run. The in-memory processor context is not recoverable, so each is
/// failed rather than resumed.
async fn recover_interrupted_jobs(core: &Arc<QueueCore>) -> Result<usize> {
    let interrupted = core.repo.list(Some(JobState::Active)).await?;
    let mut recovered = 0;
    for record in interrupted {
        let mut job = Job::attached(Arc::clone(core), record);
        info!(job_id = %job.id(), "recovering job left ACTIVE by a previous run");
        job.set_state_to_failure(CRASH_RECOVERY_ERROR).await?;
        recovered += 1;
    }
    Ok(recovered)
}

/// Input validation: prevents empty types and oversized payloads.
fn validate_new_job(new_job: &NewJob) -> Result<()> {
    if new_job.job_type.is_empty() {
        return Err(Error::Validation("job type cannot be empty".to_string()));
    }
    if new_job.job_type.len() > MAX_JOB_TYPE_LEN {
        return Err(Error::Validation(format!(
            "job type too long (max {} chars, got {})",
            MAX_JOB_TYPE_LEN,
            new_job.job_type.len()
        )));
    }
    if let Some(data) = &new_job.data {
        let serialized = data.to_string();
        if serialized.len() > MAX_DATA_BYTES {
            return Err(Error::Validation(format!(
                "job data too large (max {} bytes, got {})",
                MAX_DATA_BYTES,
                serialized.len()
            )));
        }
    }
    Ok(())
}
