use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::BatchConfig;
use crate::scheduler::job::{AnalysisResult, AudioFile, Job, JobUpdate};
use crate::scheduler::store::JobStore;
use crate::worker::analyzer::{AnalysisError, Analyzer};
use crate::worker::progress::ProgressReporter;

/// Terminal outcome of one processing attempt
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed(AnalysisResult),
    Failed(String),
    /// The attempt was abandoned; the job is reset by whoever cancelled it
    Cancelled,
}

/// Runs one job through the analyzer and records the outcome in the store.
///
/// Every failure mode (rejected input, analyzer error, timeout, panic inside
/// the analyzer) ends up in the job's `error` field. Nothing escapes to the
/// caller except the returned [`JobOutcome`].
#[derive(Clone)]
pub struct JobProcessor {
    analyzer: Arc<dyn Analyzer>,
    store: JobStore,
    config: BatchConfig,
}

impl JobProcessor {
    pub fn new(analyzer: Arc<dyn Analyzer>, store: JobStore, config: BatchConfig) -> Self {
        Self {
            analyzer,
            store,
            config,
        }
    }

    /// Move a pending job to processing with progress 0.
    /// Returns the attempt number, or `None` if the job is no longer pending.
    pub async fn begin(&self, job_id: &Uuid) -> Option<u32> {
        let attempt = self.store.begin(job_id).await?;
        tracing::info!(job_id = %job_id, attempt, analyzer = self.analyzer.name(), "Processing job");
        Some(attempt)
    }

    /// Claim a pending job and run it to a terminal outcome. A cancelled
    /// attempt is returned to pending.
    pub async fn process(&self, job_id: &Uuid, cancel: CancellationToken) -> Option<JobOutcome> {
        let attempt = self.begin(job_id).await?;
        let job = self.store.get(job_id)?;
        let outcome = self.execute(job, attempt, cancel).await;
        if outcome == JobOutcome::Cancelled {
            self.store
                .update_attempt(job_id, attempt, JobUpdate::Reset)
                .await;
        }
        Some(outcome)
    }

    /// Run an already claimed attempt. Must follow a successful [`begin`](Self::begin).
    pub async fn execute(&self, job: Job, attempt: u32, cancel: CancellationToken) -> JobOutcome {
        if let Err(e) = self.validate(&job.source_file) {
            return self.fail(&job.id, attempt, e.to_string()).await;
        }

        let reporter = ProgressReporter::new(self.store.clone(), job.id, attempt);
        let analyzer = self.analyzer.clone();
        let file = job.source_file.clone();
        let mut handle =
            tokio::spawn(async move { analyzer.analyze(&file, &reporter).await });

        let timeout = self.config.job_timeout();
        let waited = tokio::select! {
            _ = cancel.cancelled() => None,
            res = tokio::time::timeout(timeout, &mut handle) => Some(res),
        };

        let Some(result) = waited else {
            handle.abort();
            tracing::info!(job_id = %job.id, attempt, "Job cancelled");
            return JobOutcome::Cancelled;
        };

        let analysis = match result {
            Err(_elapsed) => {
                handle.abort();
                Err(AnalysisError::Timeout(timeout).to_string())
            }
            Ok(Err(join_err)) if join_err.is_panic() => {
                tracing::error!(job_id = %job.id, "Analyzer panicked");
                Err("Analysis failed unexpectedly".to_string())
            }
            Ok(Err(_)) => Err("Analysis was aborted".to_string()),
            Ok(Ok(Err(e))) => Err(e.to_string()),
            Ok(Ok(Ok(result))) => Ok(result),
        };

        match analysis {
            Ok(result) => self.complete(&job.id, attempt, result).await,
            Err(message) => self.fail(&job.id, attempt, message).await,
        }
    }

    fn validate(&self, file: &AudioFile) -> Result<(), AnalysisError> {
        if !self.config.accepts_format(&file.name) {
            return Err(AnalysisError::UnsupportedFormat {
                accepted: self.config.accepted_formats.join(", "),
            });
        }
        if file.size > self.config.max_file_size_bytes() {
            return Err(AnalysisError::FileTooLarge {
                limit_mb: self.config.max_file_size_mb,
            });
        }
        Ok(())
    }

    async fn complete(&self, job_id: &Uuid, attempt: u32, result: AnalysisResult) -> JobOutcome {
        if !self
            .store
            .update_attempt(job_id, attempt, JobUpdate::Completed(result.clone()))
            .await
        {
            tracing::debug!(job_id = %job_id, attempt, "Dropping result of stale attempt");
            return JobOutcome::Cancelled;
        }
        tracing::info!(
            job_id = %job_id,
            health_class = %result.health_class,
            confidence = result.confidence,
            "Job completed"
        );
        JobOutcome::Completed(result)
    }

    async fn fail(&self, job_id: &Uuid, attempt: u32, message: String) -> JobOutcome {
        if !self
            .store
            .update_attempt(job_id, attempt, JobUpdate::Failed(message.clone()))
            .await
        {
            tracing::debug!(job_id = %job_id, attempt, "Dropping failure of stale attempt");
            return JobOutcome::Cancelled;
        }
        tracing::warn!(job_id = %job_id, error = %message, "Job failed");
        JobOutcome::Failed(message)
    }
}
