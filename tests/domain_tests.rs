// Domain Layer Tests
// Job record state machine and attribute invariants

use quern::domain::{DomainError, JobRecord, JobState, Priority};

fn record(id: &str) -> JobRecord {
    JobRecord::new(
        id,
        1000,
        "transcode",
        Priority::Normal,
        serde_json::json!({"path": "clip.mp4"}),
    )
}

#[test]
fn new_record_is_inactive() {
    let job = record("j1");

    assert_eq!(job.state, JobState::Inactive);
    assert_eq!(job.priority, Priority::Normal);
    assert_eq!(job.created_at, 1000);
    assert_eq!(job.updated_at, 1000);
    assert!(job.started_at.is_none());
    assert!(job.completed_at.is_none());
    assert!(job.failed_at.is_none());
    assert!(job.duration.is_none());
    assert!(job.progress.is_none());
    assert!(job.logs.is_empty());
    assert!(!job.is_terminal());
}

#[test]
fn lifecycle_to_complete_tracks_timestamps_and_duration() {
    let mut job = record("j2");

    job.start(2000).unwrap();
    assert_eq!(job.state, JobState::Active);
    assert_eq!(job.started_at, Some(2000));

    job.complete(4500).unwrap();
    assert_eq!(job.state, JobState::Complete);
    assert_eq!(job.completed_at, Some(4500));
    assert_eq!(job.duration, Some(2500));
    assert!(job.updated_at >= job.created_at);
    assert!(job.is_terminal());
}

#[test]
fn lifecycle_to_failure_appends_error_log() {
    let mut job = record("j3");

    job.start(2000).unwrap();
    job.fail(3000, "disk on fire").unwrap();

    assert_eq!(job.state, JobState::Failure);
    assert_eq!(job.failed_at, Some(3000));
    assert_eq!(job.duration, Some(1000));
    assert_eq!(job.logs, vec!["disk on fire"]);
}

#[test]
fn illegal_transitions_do_not_mutate() {
    let mut job = record("j4");

    // Cannot complete or fail without starting
    assert!(matches!(
        job.complete(2000),
        Err(DomainError::InvalidStateTransition { .. })
    ));
    assert!(job.fail(2000, "nope").is_err());
    assert_eq!(job.state, JobState::Inactive);
    assert!(job.logs.is_empty());

    job.start(2000).unwrap();
    assert!(job.start(3000).is_err());
    assert_eq!(job.started_at, Some(2000));

    job.complete(4000).unwrap();
    // Terminal states have no outgoing edges
    assert!(job.start(5000).is_err());
    assert!(job.fail(5000, "late").is_err());
    assert!(job.complete(5000).is_err());
    assert_eq!(job.state, JobState::Complete);
}

#[test]
fn progress_is_clamped_and_requires_active() {
    let mut job = record("j5");

    assert!(matches!(
        job.set_progress(1, 2, 2000),
        Err(DomainError::UnexpectedState { .. })
    ));

    job.start(2000).unwrap();
    job.set_progress(1, 3, 2100).unwrap();
    assert_eq!(job.progress, Some(33));

    job.set_progress(5, 2, 2200).unwrap();
    assert_eq!(job.progress, Some(100));

    job.set_progress(0, 0, 2300).unwrap();
    assert_eq!(job.progress, Some(100));
}

#[test]
fn priority_changes_only_while_inactive() {
    let mut job = record("j6");

    job.set_priority(Priority::Critical, 1500).unwrap();
    assert_eq!(job.priority, Priority::Critical);

    job.start(2000).unwrap();
    assert!(job.set_priority(Priority::Low, 2500).is_err());
    assert_eq!(job.priority, Priority::Critical);
}

#[test]
fn priority_values_round_trip_and_unknowns_coerce() {
    for priority in [
        Priority::Low,
        Priority::Normal,
        Priority::Medium,
        Priority::High,
        Priority::Critical,
    ] {
        assert_eq!(Priority::sanitize(priority.as_i32()), priority);
    }

    assert_eq!(Priority::sanitize(42), Priority::Normal);
    assert_eq!(Priority::sanitize(-1), Priority::Normal);
}

#[test]
fn priority_ordering_is_smaller_is_more_urgent() {
    assert!(Priority::Critical.as_i32() < Priority::High.as_i32());
    assert!(Priority::High.as_i32() < Priority::Medium.as_i32());
    assert!(Priority::Medium.as_i32() < Priority::Normal.as_i32());
    assert!(Priority::Normal.as_i32() < Priority::Low.as_i32());
}

#[test]
fn record_serialization_round_trips() {
    let mut job = record("j7");
    job.start(2000).unwrap();
    job.set_progress(1, 2, 2100).unwrap();
    job.append_log("halfway", 2100);

    let json = serde_json::to_string(&job).expect("serialize");
    let back: JobRecord = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(back, job);

    // States persist under their wire names
    assert!(json.contains("\"ACTIVE\""));
}
