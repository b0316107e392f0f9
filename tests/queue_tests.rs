// Queue Integration Tests
// Dispatch protocol, lifecycle events, crash recovery, removal

use std::sync::Arc;
use std::time::Duration;

use quern::infrastructure::sqlite::{create_pool, SqliteJobRepository};
use quern::port::id_provider::mocks::SequentialIdProvider;
use quern::port::processor::mocks::MockProcessor;
use quern::port::time_provider::mocks::SteppingTimeProvider;
use quern::port::JobRepository;
use quern::{EventKind, JobRecord, JobState, NewJob, Priority, Queue, QueueEvent, StorageOptions};

use tokio::time::sleep;

const SHUTDOWN: Duration = Duration::from_secs(2);

async fn memory_queue() -> Queue {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let pool = create_pool("sqlite::memory:").await.unwrap();
    let repo = Arc::new(SqliteJobRepository::new(pool));
    Queue::create_with(
        repo,
        Arc::new(SteppingTimeProvider::new(1_000, 10)),
        Arc::new(SequentialIdProvider::new("job")),
    )
    .await
    .unwrap()
}

async fn wait_for_complete_count(queue: &Queue, count: usize) {
    for _ in 0..500 {
        let complete = queue.list_jobs(Some(JobState::Complete)).await.unwrap();
        if complete.len() == count {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("expected {count} complete jobs");
}

async fn wait_for_event(events: &mut tokio::sync::broadcast::Receiver<QueueEvent>, kind: EventKind) -> QueueEvent {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event bus closed");
        if event.kind() == kind {
            return event;
        }
    }
}

// S1: within a type, execution follows priority, then age
#[tokio::test]
async fn priority_orders_execution_within_a_type() {
    let queue = memory_queue().await;

    let j1 = queue.create_job(NewJob::new("transcode")).await.unwrap();
    let j2 = queue
        .create_job(NewJob::new("transcode").priority(Priority::High))
        .await
        .unwrap();
    let j3 = queue.create_job(NewJob::new("transcode")).await.unwrap();

    let processor = MockProcessor::succeeding();
    queue.process("transcode", processor.clone(), 1).await;

    wait_for_complete_count(&queue, 3).await;
    assert_eq!(
        processor.processed_ids(),
        vec![j2.id().to_string(), j1.id().to_string(), j3.id().to_string()]
    );

    queue.shutdown(SHUTDOWN, None).await;
}

// S2: a new job goes to the longest-parked worker of its type
#[tokio::test]
async fn handoff_goes_to_first_parked_worker() {
    let queue = memory_queue().await;

    let first = MockProcessor::succeeding();
    let second = MockProcessor::succeeding();
    queue.process("mail", first.clone(), 1).await;
    sleep(Duration::from_millis(100)).await;
    queue.process("mail", second.clone(), 1).await;
    sleep(Duration::from_millis(100)).await;

    queue.create_job(NewJob::new("mail")).await.unwrap();
    wait_for_complete_count(&queue, 1).await;

    assert_eq!(first.call_count(), 1);
    assert_eq!(second.call_count(), 0);

    queue.shutdown(SHUTDOWN, None).await;
}

// S3: a waiter whose interest lapsed never receives a job
#[tokio::test]
async fn cancelled_waiter_leaves_new_jobs_inactive() {
    let queue = memory_queue().await;

    let processor = MockProcessor::succeeding();
    queue.process("mail", processor.clone(), 1).await;
    sleep(Duration::from_millis(100)).await;

    queue.shutdown(Duration::from_millis(100), None).await;

    let job = queue.create_job(NewJob::new("mail")).await.unwrap();
    sleep(Duration::from_millis(200)).await;

    let inactive = queue.list_jobs(Some(JobState::Inactive)).await.unwrap();
    assert_eq!(inactive.len(), 1);
    assert_eq!(inactive[0].id(), job.id());
    assert_eq!(processor.call_count(), 0);
}

// S4: startup fails exactly the jobs a dead process left ACTIVE
#[tokio::test]
async fn crash_recovery_fails_only_interrupted_jobs() {
    let pool = create_pool("sqlite::memory:").await.unwrap();
    let repo = Arc::new(SqliteJobRepository::new(pool));
    repo.init().await.unwrap();

    let mut interrupted = JobRecord::new("a", 1000, "mail", Priority::Normal, serde_json::Value::Null);
    interrupted.start(1500).unwrap();
    repo.insert(&interrupted).await.unwrap();

    let waiting = JobRecord::new("b", 1000, "mail", Priority::Normal, serde_json::Value::Null);
    repo.insert(&waiting).await.unwrap();

    let mut finished = JobRecord::new("c", 1000, "mail", Priority::Normal, serde_json::Value::Null);
    finished.start(1200).unwrap();
    finished.complete(1300).unwrap();
    repo.insert(&finished).await.unwrap();

    let queue = Queue::create(repo).await.unwrap();

    let a = queue.find_job("a").await.unwrap().unwrap();
    assert_eq!(a.state(), JobState::Failure);
    assert!(a.record().failed_at.is_some());
    assert!(a
        .logs()
        .iter()
        .any(|line| line.contains("unexpectedly terminated")));

    let b = queue.find_job("b").await.unwrap().unwrap();
    assert_eq!(b.state(), JobState::Inactive);

    let c = queue.find_job("c").await.unwrap().unwrap();
    assert_eq!(c.state(), JobState::Complete);
    assert_eq!(c.record().completed_at, Some(1300));
}

// S5: a processor that outlives the shutdown deadline orphans its job
#[tokio::test]
async fn shutdown_timeout_fails_the_running_job() {
    let queue = memory_queue().await;
    let mut events = queue.subscribe();

    let slow = MockProcessor::sleeping(Duration::from_secs(10));
    queue.process("mail", slow, 1).await;

    let job = queue.create_job(NewJob::new("mail")).await.unwrap();
    wait_for_event(&mut events, EventKind::Start).await;

    queue.shutdown(Duration::from_millis(50), None).await;

    let failed = queue.find_job(job.id()).await.unwrap().unwrap();
    assert_eq!(failed.state(), JobState::Failure);
    assert!(failed
        .logs()
        .iter()
        .any(|line| line.contains("shutdown timeout")));
}

// S6: save is once-only
#[tokio::test]
async fn double_save_fails_and_keeps_one_row() {
    let queue = memory_queue().await;

    let mut job = queue.create_job(NewJob::new("mail")).await.unwrap();
    let err = job.save().await.unwrap_err();
    assert!(err.to_string().contains("already saved"));

    assert_eq!(queue.list_jobs(None).await.unwrap().len(), 1);
}

// Property 4: create then find returns identical fields
#[tokio::test]
async fn created_job_round_trips_through_find() {
    let queue = memory_queue().await;

    let job = queue
        .create_job(
            NewJob::new("mail")
                .priority(Priority::Medium)
                .data(serde_json::json!({"to": "ops@example.com", "ids": [1, 2, 3]})),
        )
        .await
        .unwrap();

    let found = queue.find_job(job.id()).await.unwrap().unwrap();
    assert_eq!(found.record(), job.record());
}

#[tokio::test]
async fn lifecycle_events_are_emitted_in_order() {
    let queue = memory_queue().await;
    let mut events = queue.subscribe();

    queue.process("mail", MockProcessor::succeeding(), 1).await;
    queue.create_job(NewJob::new("mail")).await.unwrap();

    let enqueue = wait_for_event(&mut events, EventKind::Enqueue).await;
    assert_eq!(enqueue.job().unwrap().state, JobState::Inactive);

    let start = wait_for_event(&mut events, EventKind::Start).await;
    assert_eq!(start.job().unwrap().state, JobState::Active);

    let complete = wait_for_event(&mut events, EventKind::Complete).await;
    assert_eq!(complete.job().unwrap().state, JobState::Complete);
    match complete {
        QueueEvent::Complete { result, .. } => {
            assert_eq!(result, Some(serde_json::json!({"ok": true})));
        }
        other => panic!("unexpected event {other:?}"),
    }

    queue.shutdown(SHUTDOWN, None).await;
}

#[tokio::test]
async fn failing_processor_fails_the_job() {
    let queue = memory_queue().await;
    let mut events = queue.subscribe();

    queue
        .process("mail", MockProcessor::failing("smtp unreachable"), 1)
        .await;
    let job = queue.create_job(NewJob::new("mail")).await.unwrap();

    let failure = wait_for_event(&mut events, EventKind::Failure).await;
    assert_eq!(failure.job().unwrap().id, job.id());

    let failed = queue.find_job(job.id()).await.unwrap().unwrap();
    assert_eq!(failed.state(), JobState::Failure);
    assert!(failed.logs().iter().any(|l| l.contains("smtp unreachable")));
    assert!(failed.record().duration.is_some());

    queue.shutdown(SHUTDOWN, None).await;
}

#[tokio::test]
async fn request_declines_when_interest_lost() {
    let queue = memory_queue().await;
    let job = queue.create_job(NewJob::new("mail")).await.unwrap();

    let declined = queue
        .request_job_for_processing("mail", || false)
        .await
        .unwrap();
    assert!(declined.is_none());
    assert_eq!(
        queue.find_job(job.id()).await.unwrap().unwrap().state(),
        JobState::Inactive
    );

    let claimed = queue
        .request_job_for_processing("mail", || true)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(claimed.id(), job.id());
    assert_eq!(claimed.state(), JobState::Active);
    assert_eq!(
        queue.find_job(job.id()).await.unwrap().unwrap().state(),
        JobState::Active
    );
}

#[tokio::test]
async fn progress_and_logs_persist_while_active() {
    let queue = memory_queue().await;
    let mut events = queue.subscribe();

    let job = queue.create_job(NewJob::new("mail")).await.unwrap();

    // Progress before the claim is illegal
    let mut premature = queue.find_job(job.id()).await.unwrap().unwrap();
    assert!(premature.set_progress(1, 2).await.is_err());

    let mut claimed = queue
        .request_job_for_processing("mail", || true)
        .await
        .unwrap()
        .unwrap();

    claimed.set_progress(5, 10).await.unwrap();
    let progress = wait_for_event(&mut events, EventKind::Progress).await;
    match progress {
        QueueEvent::Progress { progress, .. } => assert_eq!(progress, 50),
        other => panic!("unexpected event {other:?}"),
    }

    claimed.log("halfway there").await.unwrap();

    let stored = queue.find_job(job.id()).await.unwrap().unwrap();
    assert_eq!(stored.progress(), Some(50));
    assert!(stored.logs().iter().any(|l| l == "halfway there"));
}

#[tokio::test]
async fn priority_change_persists_only_while_inactive() {
    let queue = memory_queue().await;

    let mut job = queue.create_job(NewJob::new("mail")).await.unwrap();
    job.set_priority(Priority::Critical).await.unwrap();

    let stored = queue.find_job(job.id()).await.unwrap().unwrap();
    assert_eq!(stored.priority(), Priority::Critical);

    let mut claimed = queue
        .request_job_for_processing("mail", || true)
        .await
        .unwrap()
        .unwrap();
    assert!(claimed.set_priority(Priority::Low).await.is_err());
    assert_eq!(
        queue.find_job(job.id()).await.unwrap().unwrap().priority(),
        Priority::Critical
    );
}

#[tokio::test]
async fn update_persists_the_in_memory_attributes() {
    let queue = memory_queue().await;

    queue.create_job(NewJob::new("mail")).await.unwrap();
    let mut claimed = queue
        .request_job_for_processing("mail", || true)
        .await
        .unwrap()
        .unwrap();
    claimed.set_progress(3, 4).await.unwrap();

    let before = claimed.record().updated_at;
    claimed.update().await.unwrap();
    assert!(claimed.record().updated_at > before);

    let stored = queue.find_job(claimed.id()).await.unwrap().unwrap();
    assert_eq!(stored.record(), claimed.record());
    assert_eq!(stored.progress(), Some(75));
}

#[tokio::test]
async fn update_fails_once_the_row_is_removed() {
    let queue = memory_queue().await;

    let mut job = queue.create_job(NewJob::new("mail")).await.unwrap();
    queue.remove_job_by_id(job.id()).await.unwrap();

    let err = job.update().await.unwrap_err();
    assert!(matches!(err, quern::Error::Storage(_)));
}

#[tokio::test]
async fn remove_job_by_id_fails_when_absent() {
    let queue = memory_queue().await;

    let err = queue.remove_job_by_id("missing").await.unwrap_err();
    assert!(matches!(err, quern::Error::NotFound(_)));
}

#[tokio::test]
async fn remove_job_by_id_deletes_the_row() {
    let queue = memory_queue().await;

    let job = queue.create_job(NewJob::new("mail")).await.unwrap();
    queue.remove_job_by_id(job.id()).await.unwrap();

    assert!(queue.find_job(job.id()).await.unwrap().is_none());
}

#[tokio::test]
async fn remove_by_callback_returns_the_removed_jobs() {
    let queue = memory_queue().await;

    queue.create_job(NewJob::new("mail")).await.unwrap();
    queue.create_job(NewJob::new("report")).await.unwrap();
    queue.create_job(NewJob::new("mail")).await.unwrap();

    let removed = queue
        .remove_jobs_by_callback(|job| job.job_type() == "mail")
        .await
        .unwrap();
    assert_eq!(removed.len(), 2);

    let remaining = queue.list_jobs(None).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].job_type(), "report");
}

// Removing an ACTIVE job makes the owning worker's terminal write fail,
// which surfaces on the bus rather than as a worker crash
#[tokio::test]
async fn removing_an_active_job_surfaces_an_error_event() {
    let queue = memory_queue().await;
    let mut events = queue.subscribe();

    queue
        .process("mail", MockProcessor::sleeping(Duration::from_millis(300)), 1)
        .await;
    queue.create_job(NewJob::new("mail")).await.unwrap();
    wait_for_event(&mut events, EventKind::Start).await;

    let removed = queue.remove_jobs_by_callback(|_| true).await.unwrap();
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].state(), JobState::Active);

    let error = wait_for_event(&mut events, EventKind::Error).await;
    match error {
        QueueEvent::Error { message, .. } => assert!(message.contains("conflict")),
        other => panic!("unexpected event {other:?}"),
    }

    queue.shutdown(SHUTDOWN, None).await;
}

#[tokio::test]
async fn create_job_validates_input() {
    let queue = memory_queue().await;

    let err = queue.create_job(NewJob::new("")).await.unwrap_err();
    assert!(matches!(err, quern::Error::Validation(_)));

    let err = queue
        .create_job(NewJob::new("x".repeat(200)))
        .await
        .unwrap_err();
    assert!(matches!(err, quern::Error::Validation(_)));
}

#[tokio::test]
async fn on_runs_handlers_for_matching_events() {
    let queue = memory_queue().await;

    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    queue.on(EventKind::Enqueue, move |event| {
        sink.lock().unwrap().push(event.job().unwrap().id.clone());
    });

    let job = queue.create_job(NewJob::new("mail")).await.unwrap();

    for _ in 0..100 {
        if !seen.lock().unwrap().is_empty() {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(seen.lock().unwrap().clone(), vec![job.id().to_string()]);
}

#[tokio::test]
async fn jobs_survive_reopen_of_a_file_store() {
    let path = std::env::temp_dir().join(format!("quern-test-{}.db", uuid::Uuid::new_v4()));

    {
        let queue = quern::open(StorageOptions::file(&path)).await.unwrap();
        queue
            .create_job(NewJob::new("mail").data(serde_json::json!({"n": 1})))
            .await
            .unwrap();
    }

    let queue = quern::open(StorageOptions::file(&path)).await.unwrap();
    let jobs = queue.list_jobs(None).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].state(), JobState::Inactive);
    assert_eq!(jobs[0].data(), &serde_json::json!({"n": 1}));

    for suffix in ["", "-wal", "-shm"] {
        let _ = std::fs::remove_file(format!("{}{}", path.display(), suffix));
    }
}
