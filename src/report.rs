//! Aggregation and export over queue snapshots.
//!
//! Everything here is a pure function of a job list, except
//! [`write_export`] which persists the export artifact.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BatchError, Result};
use crate::scheduler::job::{HealthClass, Job, JobStatus};
use crate::scheduler::store::RunState;

/// Number of jobs per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub error: usize,
}

impl StatusCounts {
    pub fn from_jobs(jobs: &[Job]) -> Self {
        jobs.iter().fold(Self::default(), |mut acc, job| {
            match job.status {
                JobStatus::Pending => acc.pending += 1,
                JobStatus::Processing => acc.processing += 1,
                JobStatus::Completed => acc.completed += 1,
                JobStatus::Error => acc.error += 1,
            }
            acc
        })
    }

    pub fn total(&self) -> usize {
        self.pending + self.processing + self.completed + self.error
    }
}

/// One row of the export artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportEntry {
    pub filename: String,
    pub health_class: HealthClass,
    pub confidence: f64,
    pub duration_seconds: f64,
}

/// Totals for a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total_files: usize,
    pub successful: usize,
    pub failed: usize,
}

impl From<StatusCounts> for BatchSummary {
    fn from(counts: StatusCounts) -> Self {
        Self {
            total_files: counts.total(),
            successful: counts.completed,
            failed: counts.error,
        }
    }
}

/// True when there is pending work and the scheduler is not already running.
pub fn can_start(jobs: &[Job], run_state: RunState) -> bool {
    run_state != RunState::Running && jobs.iter().any(|j| j.status == JobStatus::Pending)
}

/// One entry per completed job, in submission order.
pub fn export_results(jobs: &[Job]) -> Vec<ExportEntry> {
    jobs.iter()
        .filter(|j| j.status == JobStatus::Completed)
        .filter_map(|j| {
            j.result.as_ref().map(|r| ExportEntry {
                filename: j.filename().to_string(),
                health_class: r.health_class,
                confidence: r.confidence,
                duration_seconds: r.duration_seconds,
            })
        })
        .collect()
}

/// `batch_results_<unix-ms>.json`
pub fn export_filename(at: DateTime<Utc>) -> String {
    format!("batch_results_{}.json", at.timestamp_millis())
}

pub fn export_json(entries: &[ExportEntry]) -> Result<String> {
    Ok(serde_json::to_string_pretty(entries)?)
}

/// Write the export artifact for `jobs` into `dir` and return its path.
pub async fn write_export(jobs: &[Job], dir: &Path, at: DateTime<Utc>) -> Result<PathBuf> {
    let entries = export_results(jobs);
    let body = export_json(&entries)?;
    let path = dir.join(export_filename(at));

    tokio::fs::write(&path, body)
        .await
        .map_err(|source| BatchError::Export {
            path: path.clone(),
            source,
        })?;

    tracing::info!(path = %path.display(), entries = entries.len(), "Export written");
    Ok(path)
}
