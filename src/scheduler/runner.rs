use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::BatchConfig;
use crate::error::Result;
use crate::scheduler::job::{AudioFile, Job};
use crate::scheduler::queue::SubmitOutcome;
use crate::scheduler::store::{JobStore, QueueSnapshot, RunState};
use crate::worker::{Analyzer, JobOutcome, JobProcessor};

/// Signals for the current run. Replaced on every `start`.
#[derive(Default)]
struct RunControl {
    cancel: CancellationToken,
    pause: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

struct Inner {
    store: JobStore,
    processor: JobProcessor,
    config: BatchConfig,
    control: Mutex<RunControl>,
}

/// Drives pending jobs through the processor in submission order.
///
/// At most `max_concurrent_jobs` jobs are in flight (one by default) and
/// consecutive starts are spaced by `inter_job_delay_ms`. Pause takes effect
/// once the in-flight work finishes; cancel abandons it immediately and
/// returns the affected jobs to pending.
#[derive(Clone)]
pub struct BatchScheduler {
    inner: Arc<Inner>,
}

impl BatchScheduler {
    pub fn new(store: JobStore, analyzer: Arc<dyn Analyzer>, config: BatchConfig) -> Self {
        let processor = JobProcessor::new(analyzer, store.clone(), config.clone());
        Self {
            inner: Arc::new(Inner {
                store,
                processor,
                config,
                control: Mutex::new(RunControl::default()),
            }),
        }
    }

    /// Build a scheduler with a fresh store sized from `config`.
    pub fn with_analyzer(analyzer: Arc<dyn Analyzer>, config: BatchConfig) -> Self {
        let store = JobStore::new(config.max_jobs);
        Self::new(store, analyzer, config)
    }

    pub fn store(&self) -> &JobStore {
        &self.inner.store
    }

    pub fn config(&self) -> &BatchConfig {
        &self.inner.config
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        self.inner.store.snapshot()
    }

    pub fn run_state(&self) -> RunState {
        self.inner.store.run_state()
    }

    pub async fn submit(&self, files: Vec<AudioFile>) -> SubmitOutcome {
        self.inner.store.submit(files).await
    }

    pub async fn remove(&self, id: &Uuid) -> Result<Job> {
        self.inner.store.remove(id).await
    }

    /// Return a failed job to pending. A running batch picks it up before
    /// any later-submitted job; otherwise it waits for the next `start`.
    pub async fn retry(&self, id: &Uuid) -> Result<()> {
        self.inner.store.retry(id).await
    }

    pub async fn clear(&self) -> Result<usize> {
        self.inner.store.clear().await
    }

    /// Start processing pending jobs. Returns false if already running.
    pub async fn start(&self) -> bool {
        let mut control = self.inner.control.lock().await;
        if self.inner.store.run_state() == RunState::Running {
            tracing::debug!("Start ignored, batch already running");
            return false;
        }

        // A paused loop has already exited; reap it before starting over
        if let Some(handle) = control.handle.take() {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Previous scheduler loop ended abnormally");
            }
        }

        let cancel = CancellationToken::new();
        let pause = CancellationToken::new();
        control.cancel = cancel.clone();
        control.pause = pause.clone();

        self.inner.store.set_run_state(RunState::Running).await;
        tracing::info!(
            pending = self.inner.store.snapshot().counts().pending,
            "Batch processing started"
        );

        let inner = self.inner.clone();
        control.handle = Some(tokio::spawn(async move {
            inner.run_loop(cancel, pause).await;
        }));
        true
    }

    /// Stop after the job currently in flight. Only effective while running.
    pub async fn pause(&self) -> bool {
        let control = self.inner.control.lock().await;
        if self.inner.store.run_state() != RunState::Running {
            return false;
        }
        control.pause.cancel();
        tracing::info!("Pause requested");
        true
    }

    /// Abandon in-flight work and return it to pending. Effective while
    /// running or paused. When this returns no job is processing.
    pub async fn cancel(&self) -> bool {
        let mut control = self.inner.control.lock().await;
        if self.inner.store.run_state() == RunState::Idle {
            return false;
        }

        control.cancel.cancel();
        if let Some(handle) = control.handle.take() {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Scheduler loop ended abnormally");
            }
        }

        let reset = self.inner.store.reset_processing().await;
        self.inner.store.set_run_state(RunState::Idle).await;
        tracing::info!(reset = reset.len(), "Batch processing cancelled");
        true
    }

    /// Wait until the scheduler is no longer running and return the final
    /// snapshot.
    pub async fn wait_until_settled(&self) -> QueueSnapshot {
        let mut rx = self.inner.store.subscribe();
        let settled = rx
            .wait_for(|s| s.run_state != RunState::Running)
            .await
            .map(|s| (*s).clone());
        settled.unwrap_or_else(|_| self.inner.store.snapshot())
    }
}

impl Inner {
    /// Claim the earliest pending job. Jobs removed between the lookup and
    /// the claim are skipped without another delay.
    async fn claim_next(&self) -> Option<(Job, u32)> {
        loop {
            let job = self.store.next_pending().await?;
            if let Some(attempt) = self.processor.begin(&job.id).await {
                return Some((job, attempt));
            }
        }
    }

    async fn run_loop(self: Arc<Self>, cancel: CancellationToken, pause: CancellationToken) {
        let limit = self.config.max_concurrent_jobs.max(1);
        let mut in_flight: JoinSet<(Uuid, JobOutcome)> = JoinSet::new();
        let mut started_any = false;

        loop {
            while in_flight.len() < limit && !pause.is_cancelled() && !cancel.is_cancelled() {
                if self.store.next_pending().await.is_none() {
                    break;
                }

                if started_any {
                    let interrupted = tokio::select! {
                        _ = cancel.cancelled() => true,
                        _ = pause.cancelled() => true,
                        _ = tokio::time::sleep(self.config.inter_job_delay()) => false,
                    };
                    if interrupted {
                        break;
                    }
                }

                // Chosen after the delay so a job retried meanwhile keeps its place
                let Some((job, attempt)) = self.claim_next().await else {
                    break;
                };
                started_any = true;

                let processor = self.processor.clone();
                let token = cancel.clone();
                in_flight.spawn(async move {
                    let id = job.id;
                    (id, processor.execute(job, attempt, token).await)
                });
            }

            if cancel.is_cancelled() {
                while in_flight.join_next().await.is_some() {}
                tracing::debug!("Scheduler loop stopped by cancel");
                return;
            }

            if in_flight.is_empty() {
                let next = if pause.is_cancelled() {
                    RunState::Paused
                } else {
                    RunState::Idle
                };
                self.store
                    .transition_run_state(RunState::Running, next)
                    .await;
                let counts = self.store.snapshot().counts();
                tracing::info!(
                    state = %next,
                    pending = counts.pending,
                    completed = counts.completed,
                    failed = counts.error,
                    "Batch processing stopped"
                );
                return;
            }

            let joined = tokio::select! {
                _ = cancel.cancelled() => None,
                joined = in_flight.join_next() => joined,
            };
            match joined {
                Some(Ok((job_id, outcome))) => {
                    tracing::debug!(job_id = %job_id, outcome = ?outcome, "Job finished");
                }
                Some(Err(e)) => {
                    tracing::error!(error = %e, "Job task ended abnormally");
                }
                None => {}
            }
        }
    }
}
