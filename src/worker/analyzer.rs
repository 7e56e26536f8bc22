use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

use crate::config::AnalyzerConfig;
use crate::scheduler::job::{AnalysisResult, AudioFile, HealthClass};
use crate::worker::progress::ProgressReporter;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    #[error("Format not supported. Accepted: {accepted}")]
    UnsupportedFormat { accepted: String },

    #[error("File size exceeds {limit_mb}MB limit")]
    FileTooLarge { limit_mb: u64 },

    #[error("Processing timeout after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Failed(String),
}

/// A reef-health analysis service.
///
/// Implementations report partial progress through the supplied
/// [`ProgressReporter`] and resolve to a result or an error. A production
/// implementation streams the upload to an inference service; tests plug in
/// a scripted fake.
#[async_trait]
pub trait Analyzer: Send + Sync + 'static {
    /// Short name used in logs
    fn name(&self) -> &str;

    async fn analyze(
        &self,
        file: &AudioFile,
        progress: &ProgressReporter,
    ) -> Result<AnalysisResult, AnalysisError>;
}

/// Stand-in for the inference service.
///
/// Emits bursty progress ticks, then draws a random health class, a
/// confidence between 60 and 100 and a duration between 1 and 6 seconds.
/// A configurable share of analyses fail with "Processing timeout".
pub struct SimulatedAnalyzer {
    config: AnalyzerConfig,
    rng: Mutex<StdRng>,
}

struct DrawnOutcome {
    health_class: HealthClass,
    confidence: f64,
    duration_seconds: f64,
    fail: bool,
}

impl SimulatedAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            config,
            rng: Mutex::new(rng),
        }
    }

    fn with_rng<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        let mut rng = match self.rng.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut rng)
    }

    fn next_step(&self) -> f64 {
        let (min, max) = (self.config.min_step, self.config.max_step);
        if max <= min {
            return min;
        }
        self.with_rng(|rng| rng.gen_range(min..max))
    }

    fn draw_outcome(&self) -> DrawnOutcome {
        let failure_rate = self.config.failure_rate.clamp(0.0, 1.0);
        self.with_rng(|rng| DrawnOutcome {
            health_class: HealthClass::ALL[rng.gen_range(0..HealthClass::ALL.len())],
            confidence: rng.gen_range(60.0..100.0),
            duration_seconds: rng.gen_range(1.0..6.0),
            fail: rng.gen_bool(failure_rate),
        })
    }
}

#[async_trait]
impl Analyzer for SimulatedAnalyzer {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn analyze(
        &self,
        file: &AudioFile,
        progress: &ProgressReporter,
    ) -> Result<AnalysisResult, AnalysisError> {
        let tick = Duration::from_millis(self.config.progress_tick_ms);
        let mut percent = 0.0;

        loop {
            progress.report(percent).await;
            if percent >= 100.0 {
                break;
            }
            tokio::time::sleep(tick).await;
            percent = (percent + self.next_step()).min(100.0);
        }

        let outcome = self.draw_outcome();
        if outcome.fail {
            tracing::debug!(filename = %file.name, "Injected analysis failure");
            return Err(AnalysisError::Failed("Processing timeout".to_string()));
        }

        Ok(AnalysisResult {
            health_class: outcome.health_class,
            confidence: outcome.confidence,
            duration_seconds: outcome.duration_seconds,
        })
    }
}
