use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::dashboard::{run_dashboard, DashboardState};
use crate::report;
use crate::scheduler::BatchScheduler;
use crate::worker::{Analyzer, SimulatedAnalyzer};

/// Wires the scheduler to the dashboard server
pub struct BatchService {
    pub config: ServerConfig,
    pub scheduler: BatchScheduler,
}

impl BatchService {
    /// Build a service backed by the simulated analyzer.
    pub fn new(config: ServerConfig) -> Self {
        let analyzer = Arc::new(SimulatedAnalyzer::new(config.analyzer.clone()));
        Self::with_analyzer(config, analyzer)
    }

    pub fn with_analyzer(config: ServerConfig, analyzer: Arc<dyn Analyzer>) -> Self {
        let scheduler = BatchScheduler::with_analyzer(analyzer, config.batch.clone());
        Self { config, scheduler }
    }

    /// Serve the dashboard until `shutdown` fires.
    ///
    /// On shutdown a running or paused batch is cancelled, which returns any
    /// in-flight job to pending, and completed results are written to
    /// `export_dir` before the process exits.
    pub async fn run(self, shutdown: CancellationToken) {
        let state = DashboardState {
            scheduler: self.scheduler.clone(),
        };

        run_dashboard(self.config.listen_addr, state, shutdown.clone()).await;

        if self.scheduler.cancel().await {
            tracing::info!("Cancelled in-flight batch during shutdown");
        }

        let snapshot = self.scheduler.snapshot();
        if snapshot.has_results() {
            if let Err(e) =
                report::write_export(&snapshot.jobs, &self.config.export_dir, Utc::now()).await
            {
                tracing::error!(error = %e, "Failed to write export during shutdown");
            }
        }
    }
}
