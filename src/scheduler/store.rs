use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{watch, RwLock};
use uuid::Uuid;

use crate::error::{BatchError, Result};
use crate::report::{self, ExportEntry, StatusCounts};
use crate::scheduler::job::{AudioFile, Job, JobUpdate};
use crate::scheduler::queue::{JobQueue, SubmitOutcome};

/// Overall mode of the scheduler, distinct from any job's status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Paused,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Idle => write!(f, "idle"),
            RunState::Running => write!(f, "running"),
            RunState::Paused => write!(f, "paused"),
        }
    }
}

/// Point-in-time copy of the queue and run state.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueSnapshot {
    pub jobs: Vec<Job>,
    pub run_state: RunState,
    pub max_jobs: usize,
}

impl QueueSnapshot {
    pub fn counts(&self) -> StatusCounts {
        StatusCounts::from_jobs(&self.jobs)
    }

    pub fn can_start(&self) -> bool {
        report::can_start(&self.jobs, self.run_state)
    }

    pub fn has_results(&self) -> bool {
        self.counts().completed > 0
    }

    pub fn export_results(&self) -> Vec<ExportEntry> {
        report::export_results(&self.jobs)
    }

    pub fn get(&self, id: &Uuid) -> Option<&Job> {
        self.jobs.iter().find(|j| j.id == *id)
    }
}

#[derive(Debug)]
struct StoreState {
    queue: JobQueue,
    run_state: RunState,
}

impl StoreState {
    fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            jobs: self.queue.all_jobs().to_vec(),
            run_state: self.run_state,
            max_jobs: self.queue.max_jobs(),
        }
    }
}

/// Single source of truth for every job and the run state.
///
/// Writers go through the async methods below, which serialize on an
/// internal lock and publish a fresh [`QueueSnapshot`] after each change.
/// Readers use [`JobStore::snapshot`] or [`JobStore::subscribe`] and never
/// take the write lock.
#[derive(Debug, Clone)]
pub struct JobStore {
    state: Arc<RwLock<StoreState>>,
    snapshots: Arc<watch::Sender<QueueSnapshot>>,
}

impl JobStore {
    pub fn new(max_jobs: usize) -> Self {
        let state = StoreState {
            queue: JobQueue::with_capacity(max_jobs),
            run_state: RunState::Idle,
        };
        let (tx, _rx) = watch::channel(state.snapshot());
        Self {
            state: Arc::new(RwLock::new(state)),
            snapshots: Arc::new(tx),
        }
    }

    /// Run `f` under the write lock and publish the resulting state.
    /// The snapshot is sent before the lock is released so subscribers see
    /// mutations in the order they happened.
    async fn mutate<T>(&self, f: impl FnOnce(&mut StoreState) -> T) -> T {
        let mut state = self.state.write().await;
        let out = f(&mut *state);
        self.snapshots.send_replace(state.snapshot());
        out
    }

    pub async fn submit(&self, files: Vec<AudioFile>) -> SubmitOutcome {
        let outcome = self.mutate(|s| s.queue.submit(files)).await;
        tracing::info!(
            accepted = outcome.accepted.len(),
            rejected = outcome.rejected,
            "Files submitted"
        );
        if outcome.rejected > 0 {
            tracing::warn!(
                rejected = outcome.rejected,
                "Queue capacity reached, files rejected"
            );
        }
        outcome
    }

    /// Apply a transition to one job. Unknown ids are ignored.
    ///
    /// Intended for the scheduler and processor; user actions go through
    /// [`remove`](Self::remove), [`retry`](Self::retry) and [`clear`](Self::clear).
    pub async fn update_job(&self, id: &Uuid, update: JobUpdate) -> bool {
        self.mutate(|s| s.queue.update_job(id, update)).await
    }

    /// Apply a transition only if the job is still processing `attempt`.
    pub async fn update_attempt(&self, id: &Uuid, attempt: u32, update: JobUpdate) -> bool {
        self.mutate(|s| s.queue.update_attempt(id, attempt, update))
            .await
    }

    /// Move a pending job to processing. Returns the new attempt number, or
    /// `None` if the job is gone or no longer pending.
    pub async fn begin(&self, id: &Uuid) -> Option<u32> {
        self.mutate(|s| {
            let job = s.queue.get_job_mut(id)?;
            job.apply(JobUpdate::Started).then_some(job.attempt)
        })
        .await
    }

    pub async fn remove(&self, id: &Uuid) -> Result<Job> {
        let removed = self.mutate(|s| s.queue.remove(id)).await?;
        tracing::info!(job_id = %id, filename = %removed.filename(), "Job removed");
        Ok(removed)
    }

    pub async fn retry(&self, id: &Uuid) -> Result<()> {
        self.mutate(|s| s.queue.retry(id)).await?;
        tracing::info!(job_id = %id, "Job queued for retry");
        Ok(())
    }

    /// Remove every job. Not allowed while the scheduler is running.
    pub async fn clear(&self) -> Result<usize> {
        let removed = self
            .mutate(|s| {
                if s.run_state == RunState::Running {
                    return Err(BatchError::InvalidState(
                        "cannot clear the queue while processing is running".to_string(),
                    ));
                }
                Ok(s.queue.clear())
            })
            .await?;
        tracing::info!(removed, "Queue cleared");
        Ok(removed)
    }

    pub async fn next_pending(&self) -> Option<Job> {
        self.state.read().await.queue.next_pending().cloned()
    }

    pub async fn reset_processing(&self) -> Vec<Uuid> {
        self.mutate(|s| s.queue.reset_processing()).await
    }

    pub(crate) async fn set_run_state(&self, run_state: RunState) {
        self.mutate(|s| s.run_state = run_state).await
    }

    /// Set the run state only if it currently equals `expected`.
    pub(crate) async fn transition_run_state(&self, expected: RunState, next: RunState) -> bool {
        self.mutate(|s| {
            if s.run_state == expected {
                s.run_state = next;
                true
            } else {
                false
            }
        })
        .await
    }

    /// Consistent copy of the current state
    pub fn snapshot(&self) -> QueueSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Receiver that is notified after every mutation
    pub fn subscribe(&self) -> watch::Receiver<QueueSnapshot> {
        self.snapshots.subscribe()
    }

    pub fn run_state(&self) -> RunState {
        self.snapshots.borrow().run_state
    }

    pub fn get(&self, id: &Uuid) -> Option<Job> {
        self.snapshots.borrow().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.snapshots.borrow().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        let snapshot = self.snapshots.borrow();
        snapshot.jobs.len() >= snapshot.max_jobs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn snapshot_tracks_mutations() {
        let store = JobStore::new(20);
        let mut rx = store.subscribe();

        let outcome = store
            .submit(vec![AudioFile::from_metadata("a.wav", 10)])
            .await;
        assert!(rx.has_changed().unwrap());
        let snapshot = rx.borrow_and_update().clone();
        assert_eq!(snapshot.jobs.len(), 1);
        assert_eq!(snapshot.jobs[0].id, outcome.accepted[0].id);
        assert_eq!(snapshot.run_state, RunState::Idle);
    }

    #[tokio::test]
    async fn begin_only_once() {
        let store = JobStore::new(20);
        let id = store
            .submit(vec![AudioFile::from_metadata("a.wav", 10)])
            .await
            .accepted[0]
            .id;
        assert_eq!(store.begin(&id).await, Some(1));
        assert_eq!(store.begin(&id).await, None);
        assert_eq!(store.begin(&Uuid::new_v4()).await, None);
    }

    #[tokio::test]
    async fn clear_blocked_while_running() {
        let store = JobStore::new(20);
        store
            .submit(vec![AudioFile::from_metadata("a.wav", 10)])
            .await;
        store.set_run_state(RunState::Running).await;
        assert!(matches!(
            store.clear().await.unwrap_err(),
            BatchError::InvalidState(_)
        ));
        assert_eq!(store.len(), 1);

        store.set_run_state(RunState::Paused).await;
        assert_eq!(store.clear().await.unwrap(), 1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn transition_run_state_is_conditional() {
        let store = JobStore::new(20);
        assert!(!store
            .transition_run_state(RunState::Running, RunState::Paused)
            .await);
        assert!(store
            .transition_run_state(RunState::Idle, RunState::Running)
            .await);
        assert_eq!(store.run_state(), RunState::Running);
    }
}
