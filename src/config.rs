use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

pub(crate) const DEFAULT_MAX_JOBS: usize = 20;

/// Settings for the batch queue and the scheduler loop.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Maximum number of jobs held by the queue
    pub max_jobs: usize,
    /// Pause between consecutive job starts
    pub inter_job_delay_ms: u64,
    /// Jobs allowed in flight at once. 1 means strictly sequential.
    pub max_concurrent_jobs: usize,
    /// Per-job analysis deadline
    pub job_timeout_ms: u64,
    /// Largest accepted input, in megabytes
    pub max_file_size_mb: u64,
    /// Lowercase file extensions (with leading dot) accepted for analysis
    pub accepted_formats: Vec<String>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_jobs: DEFAULT_MAX_JOBS,
            inter_job_delay_ms: 500,
            max_concurrent_jobs: 1,
            job_timeout_ms: 30_000,
            max_file_size_mb: 50,
            accepted_formats: [".wav", ".mp3", ".flac", ".m4a"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl BatchConfig {
    pub fn with_max_jobs(mut self, max_jobs: usize) -> Self {
        self.max_jobs = max_jobs;
        self
    }

    pub fn with_inter_job_delay_ms(mut self, delay_ms: u64) -> Self {
        self.inter_job_delay_ms = delay_ms;
        self
    }

    pub fn with_max_concurrent_jobs(mut self, limit: usize) -> Self {
        self.max_concurrent_jobs = limit.max(1);
        self
    }

    pub fn with_job_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.job_timeout_ms = timeout_ms;
        self
    }

    pub fn inter_job_delay(&self) -> Duration {
        Duration::from_millis(self.inter_job_delay_ms)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_millis(self.job_timeout_ms)
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }

    /// Returns true if the file name ends in one of the accepted extensions.
    pub fn accepts_format(&self, filename: &str) -> bool {
        let lower = filename.to_lowercase();
        self.accepted_formats
            .iter()
            .any(|ext| lower.ends_with(ext.as_str()))
    }
}

/// Settings for the simulated analysis service.
///
/// The defaults reproduce the mock behaviour of the dashboard: bursty
/// progress ticks and an occasional injected failure. None of these values
/// are a contract of a real analysis backend.
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// Delay between progress reports
    pub progress_tick_ms: u64,
    /// Smallest progress increment per tick, in percent
    pub min_step: f64,
    /// Largest progress increment per tick, in percent
    pub max_step: f64,
    /// Probability that an analysis fails, 0.0 to 1.0
    pub failure_rate: f64,
    /// Seed for reproducible outcomes. `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            progress_tick_ms: 100,
            min_step: 5.0,
            max_step: 20.0,
            failure_rate: 0.1,
            seed: None,
        }
    }
}

/// Settings for the dashboard server process.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// Directory the results export is written to on shutdown
    pub export_dir: PathBuf,
    pub batch: BatchConfig,
    pub analyzer: AnalyzerConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            export_dir: PathBuf::from("."),
            batch: BatchConfig::default(),
            analyzer: AnalyzerConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_batch(mut self, batch: BatchConfig) -> Self {
        self.batch = batch;
        self
    }

    pub fn with_analyzer(mut self, analyzer: AnalyzerConfig) -> Self {
        self.analyzer = analyzer;
        self
    }

    pub fn with_export_dir(mut self, export_dir: impl Into<PathBuf>) -> Self {
        self.export_dir = export_dir.into();
        self
    }
}
