use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Error => write!(f, "error"),
        }
    }
}

/// Reef health label produced by an analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthClass {
    Healthy,
    Stressed,
    Ambient,
}

impl HealthClass {
    pub const ALL: [HealthClass; 3] = [
        HealthClass::Healthy,
        HealthClass::Stressed,
        HealthClass::Ambient,
    ];
}

impl std::fmt::Display for HealthClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthClass::Healthy => write!(f, "healthy"),
            HealthClass::Stressed => write!(f, "stressed"),
            HealthClass::Ambient => write!(f, "ambient"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub health_class: HealthClass,
    /// Confidence in percent, 0 to 100
    pub confidence: f64,
    pub duration_seconds: f64,
}

/// An uploaded recording. The payload is opaque to the queue and only
/// handed to the analyzer.
#[derive(Clone, Serialize)]
pub struct AudioFile {
    pub name: String,
    pub size: u64,
    #[serde(skip)]
    pub payload: Arc<[u8]>,
}

impl AudioFile {
    pub fn new(name: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            size: payload.len() as u64,
            payload: payload.into(),
        }
    }

    /// A file known only by its metadata, with an empty payload.
    pub fn from_metadata(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
            payload: Arc::from(Vec::<u8>::new()),
        }
    }
}

impl std::fmt::Debug for AudioFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioFile")
            .field("name", &self.name)
            .field("size", &self.size)
            .finish()
    }
}

/// A single transition of the per-job state machine.
///
/// ```text
/// pending --Started--> processing --Completed--> completed
///                      processing --Failed-----> error
///                      processing --Reset------> pending   (cancel)
///                           error --Reset------> pending   (retry)
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum JobUpdate {
    Started,
    Progress(f64),
    Completed(AnalysisResult),
    Failed(String),
    Reset,
}

#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: Uuid,
    pub source_file: AudioFile,
    pub status: JobStatus,
    pub progress: f64,
    pub result: Option<AnalysisResult>,
    pub error: Option<String>,
    /// Number of times this job has entered `processing`
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn new(source_file: AudioFile) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_file,
            status: JobStatus::Pending,
            progress: 0.0,
            result: None,
            error: None,
            attempt: 0,
            created_at: Utc::now(),
        }
    }

    pub fn filename(&self) -> &str {
        &self.source_file.name
    }

    /// Apply a state transition. Transitions that are not legal from the
    /// current status leave the job untouched and return false.
    pub fn apply(&mut self, update: JobUpdate) -> bool {
        match (self.status, update) {
            (JobStatus::Pending, JobUpdate::Started) => {
                self.status = JobStatus::Processing;
                self.progress = 0.0;
                self.result = None;
                self.error = None;
                self.attempt += 1;
                true
            }
            (JobStatus::Processing, JobUpdate::Progress(value)) => {
                let value = value.clamp(0.0, 100.0);
                if value > self.progress {
                    self.progress = value;
                }
                true
            }
            (JobStatus::Processing, JobUpdate::Completed(result)) => {
                self.status = JobStatus::Completed;
                self.progress = 100.0;
                self.result = Some(result);
                self.error = None;
                true
            }
            (JobStatus::Processing, JobUpdate::Failed(message)) => {
                self.status = JobStatus::Error;
                self.result = None;
                self.error = Some(message);
                true
            }
            (JobStatus::Processing | JobStatus::Error, JobUpdate::Reset) => {
                self.status = JobStatus::Pending;
                self.progress = 0.0;
                self.result = None;
                self.error = None;
                true
            }
            _ => false,
        }
    }
}
