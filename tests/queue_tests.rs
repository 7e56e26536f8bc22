
use std::collections::HashSet;

use aqualisten::error::BatchError;
use aqualisten::report::StatusCounts;
use aqualisten::scheduler::{AnalysisResult, HealthClass, JobStatus, JobStore, JobUpdate, RunState};
use test_harness::{wav, wavs};
use uuid::Uuid;

#[tokio::test]
async fn test_submit_creates_pending_jobs_in_order() {
    let store = JobStore::new(20);

    let outcome = store
        .submit(vec![wav("a.wav"), wav("b.wav"), wav("c.wav")])
        .await;

    assert_eq!(outcome.accepted.len(), 3);
    assert_eq!(outcome.rejected, 0);

    let snapshot = store.snapshot();
    let names: Vec<_> = snapshot.jobs.iter().map(|j| j.filename()).collect();
    assert_eq!(names, vec!["a.wav", "b.wav", "c.wav"]);
    for job in &snapshot.jobs {
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0.0);
        assert!(job.result.is_none());
        assert!(job.error.is_none());
    }
    assert_eq!(
        snapshot.counts(),
        StatusCounts {
            pending: 3,
            processing: 0,
            completed: 0,
            error: 0
        }
    );
    assert_eq!(snapshot.run_state, RunState::Idle);
    assert!(snapshot.can_start());
}

#[tokio::test]
async fn test_submit_beyond_capacity_rejects_overflow() {
    let store = JobStore::new(20);

    let outcome = store.submit(wavs(25)).await;

    assert_eq!(outcome.accepted.len(), 20);
    assert_eq!(outcome.rejected, 5);
    assert_eq!(store.len(), 20);
    assert!(store.is_full());
    // The first 20 files are the ones kept
    assert_eq!(store.snapshot().jobs[19].filename(), "reef_19.wav");
}

#[tokio::test]
async fn test_submit_fills_remaining_capacity() {
    let store = JobStore::new(20);
    store.submit(wavs(18)).await;

    let outcome = store
        .submit(vec![wav("x.wav"), wav("y.wav"), wav("z.wav")])
        .await;

    assert_eq!(outcome.accepted.len(), 2);
    assert_eq!(outcome.rejected, 1);
    assert_eq!(outcome.accepted[1].filename(), "y.wav");

    let outcome = store.submit(vec![wav("late.wav")]).await;
    assert!(outcome.accepted.is_empty());
    assert_eq!(outcome.rejected, 1);
}

#[tokio::test]
async fn test_job_ids_are_unique() {
    let store = JobStore::new(20);
    store.submit(wavs(10)).await;
    store.submit(vec![wav("reef_0.wav")]).await;

    let ids: HashSet<Uuid> = store.snapshot().jobs.iter().map(|j| j.id).collect();
    assert_eq!(ids.len(), 11);
}

#[tokio::test]
async fn test_update_unknown_job_is_noop() {
    let store = JobStore::new(20);
    store.submit(wavs(2)).await;
    let before = store.snapshot();

    assert!(!store.update_job(&Uuid::new_v4(), JobUpdate::Started).await);

    let after = store.snapshot();
    assert_eq!(before.counts(), after.counts());
}

#[tokio::test]
async fn test_illegal_transitions_are_ignored() {
    let store = JobStore::new(20);
    let id = store.submit(vec![wav("a.wav")]).await.accepted[0].id;

    let result = AnalysisResult {
        health_class: HealthClass::Ambient,
        confidence: 70.0,
        duration_seconds: 2.0,
    };
    // Completing a job that never started
    assert!(!store.update_job(&id, JobUpdate::Completed(result.clone())).await);
    assert_eq!(store.get(&id).unwrap().status, JobStatus::Pending);

    store.update_job(&id, JobUpdate::Started).await;
    store.update_job(&id, JobUpdate::Completed(result)).await;

    // Terminal jobs cannot fail afterwards
    assert!(!store.update_job(&id, JobUpdate::Failed("late".into())).await);
    let job = store.get(&id).unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.error.is_none());
}

#[tokio::test]
async fn test_remove_pending_and_unknown() {
    let store = JobStore::new(20);
    let ids: Vec<_> = store
        .submit(wavs(3))
        .await
        .accepted
        .iter()
        .map(|j| j.id)
        .collect();

    let removed = store.remove(&ids[1]).await.unwrap();
    assert_eq!(removed.filename(), "reef_1.wav");
    let names: Vec<_> = store
        .snapshot()
        .jobs
        .iter()
        .map(|j| j.filename().to_string())
        .collect();
    assert_eq!(names, vec!["reef_0.wav", "reef_2.wav"]);

    let err = store.remove(&ids[1]).await.unwrap_err();
    assert!(matches!(err, BatchError::JobNotFound(id) if id == ids[1]));
}

#[tokio::test]
async fn test_remove_processing_job_rejected() {
    let store = JobStore::new(20);
    let id = store.submit(vec![wav("a.wav")]).await.accepted[0].id;
    store.begin(&id).await;

    let err = store.remove(&id).await.unwrap_err();
    assert!(matches!(err, BatchError::InvalidState(_)));
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn test_removal_frees_capacity() {
    let store = JobStore::new(2);
    let ids: Vec<_> = store
        .submit(wavs(2))
        .await
        .accepted
        .iter()
        .map(|j| j.id)
        .collect();
    assert!(store.is_full());

    store.remove(&ids[0]).await.unwrap();
    let outcome = store.submit(vec![wav("next.wav")]).await;
    assert_eq!(outcome.accepted.len(), 1);
}

#[tokio::test]
async fn test_retry_failed_job_requeues_in_place() {
    let store = JobStore::new(20);
    let ids: Vec<_> = store
        .submit(wavs(2))
        .await
        .accepted
        .iter()
        .map(|j| j.id)
        .collect();
    store.begin(&ids[0]).await;
    store
        .update_job(&ids[0], JobUpdate::Progress(35.0))
        .await;
    store
        .update_job(&ids[0], JobUpdate::Failed("Processing timeout".into()))
        .await;

    store.retry(&ids[0]).await.unwrap();

    let snapshot = store.snapshot();
    let job = &snapshot.jobs[0];
    assert_eq!(job.id, ids[0]);
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.progress, 0.0);
    assert!(job.error.is_none());

    let err = store.retry(&Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, BatchError::JobNotFound(_)));
}

#[tokio::test]
async fn test_reset_processing_only_touches_processing_jobs() {
    let store = JobStore::new(20);
    let ids: Vec<_> = store
        .submit(wavs(3))
        .await
        .accepted
        .iter()
        .map(|j| j.id)
        .collect();
    store.begin(&ids[0]).await;
    store
        .update_job(&ids[0], JobUpdate::Failed("bad".into()))
        .await;
    store.begin(&ids[1]).await;
    store.update_job(&ids[1], JobUpdate::Progress(60.0)).await;

    let reset = store.reset_processing().await;

    assert_eq!(reset, vec![ids[1]]);
    let snapshot = store.snapshot();
    assert_eq!(snapshot.jobs[0].status, JobStatus::Error);
    assert_eq!(snapshot.jobs[1].status, JobStatus::Pending);
    assert_eq!(snapshot.jobs[1].progress, 0.0);
    assert_eq!(snapshot.jobs[2].status, JobStatus::Pending);
}

#[tokio::test]
async fn test_subscribers_see_each_change() {
    let store = JobStore::new(20);
    let mut rx = store.subscribe();

    let id = store.submit(vec![wav("a.wav")]).await.accepted[0].id;
    rx.changed().await.unwrap();
    assert_eq!(rx.borrow_and_update().counts().pending, 1);

    store.begin(&id).await;
    rx.changed().await.unwrap();
    assert_eq!(rx.borrow_and_update().counts().processing, 1);

    store.update_job(&id, JobUpdate::Progress(42.0)).await;
    rx.changed().await.unwrap();
    assert_eq!(rx.borrow_and_update().jobs[0].progress, 42.0);
}

#[tokio::test]
async fn test_next_pending_follows_submission_order() {
    let store = JobStore::new(20);
    let ids: Vec<_> = store
        .submit(wavs(3))
        .await
        .accepted
        .iter()
        .map(|j| j.id)
        .collect();

    assert_eq!(store.next_pending().await.unwrap().id, ids[0]);
    store.begin(&ids[0]).await;
    assert_eq!(store.next_pending().await.unwrap().id, ids[1]);
    store.remove(&ids[1]).await.unwrap();
    assert_eq!(store.next_pending().await.unwrap().id, ids[2]);
}
