pub mod job;
pub mod queue;
pub mod runner;
pub mod store;

pub use job::{AnalysisResult, AudioFile, HealthClass, Job, JobStatus, JobUpdate};
pub use queue::{JobQueue, SubmitOutcome};
pub use runner::BatchScheduler;
pub use store::{JobStore, QueueSnapshot, RunState};
