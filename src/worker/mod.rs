//! Per-file analysis.
//!
//! - [`Analyzer`]: the analysis service seam, with [`SimulatedAnalyzer`]
//!   standing in for the real inference backend
//! - [`ProgressReporter`]: forwards partial progress to the job store
//! - [`JobProcessor`]: runs one job through an analyzer and records the
//!   terminal outcome
//!
//! # Execution Flow
//!
//! 1. The scheduler claims a pending job via [`JobProcessor::begin`]
//! 2. [`JobProcessor::execute`] validates the file and spawns the analysis
//! 3. Progress reports flow to the store while the analysis runs
//! 4. The outcome is written as `completed` or `error`, unless the attempt
//!    was cancelled first

pub mod analyzer;
pub mod executor;
pub mod progress;

pub use analyzer::{AnalysisError, Analyzer, SimulatedAnalyzer};
pub use executor::{JobOutcome, JobProcessor};
pub use progress::ProgressReporter;
