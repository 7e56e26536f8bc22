use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use aqualisten::config::{AnalyzerConfig, BatchConfig, ServerConfig};
use aqualisten::report::{self, BatchSummary, ExportEntry};
use aqualisten::scheduler::{AudioFile, BatchScheduler, JobStatus, QueueSnapshot};
use aqualisten::service::BatchService;
use aqualisten::shutdown::install_shutdown_handler;
use aqualisten::worker::SimulatedAnalyzer;

#[derive(Parser, Debug)]
#[command(name = "aqualisten")]
#[command(version)]
#[command(about = "Batch reef-health analysis of hydrophone recordings")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Serve the batch dashboard API
    Serve(ServeArgs),

    /// Analyse local recordings and write the results export
    Run(RunArgs),
}

// =============================================================================
// Shared Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct BatchArgs {
    /// Maximum number of files held in the queue
    #[arg(long, default_value = "20")]
    max_jobs: usize,

    /// Delay between consecutive job starts, in milliseconds
    #[arg(long, default_value = "500")]
    delay_ms: u64,

    /// Number of jobs analysed at the same time
    #[arg(long, default_value = "1")]
    concurrency: usize,

    /// Per-job analysis timeout, in milliseconds
    #[arg(long, default_value = "30000")]
    timeout_ms: u64,

    /// Seed for the simulated analyzer (random if omitted)
    #[arg(long)]
    seed: Option<u64>,

    /// Share of simulated analyses that fail, 0.0 to 1.0
    #[arg(long, default_value = "0.1")]
    failure_rate: f64,
}

impl BatchArgs {
    fn batch_config(&self) -> BatchConfig {
        BatchConfig::default()
            .with_max_jobs(self.max_jobs)
            .with_inter_job_delay_ms(self.delay_ms)
            .with_max_concurrent_jobs(self.concurrency)
            .with_job_timeout_ms(self.timeout_ms)
    }

    fn analyzer_config(&self) -> AnalyzerConfig {
        AnalyzerConfig {
            failure_rate: self.failure_rate,
            seed: self.seed,
            ..AnalyzerConfig::default()
        }
    }
}

#[derive(Parser, Debug)]
struct ServeArgs {
    /// Port for the dashboard API
    #[arg(long, default_value = "8080")]
    port: u16,

    /// Bind on all interfaces instead of localhost
    #[arg(long)]
    public: bool,

    /// Directory for the results export written on shutdown
    #[arg(long, default_value = ".")]
    export_dir: PathBuf,

    #[command(flatten)]
    batch: BatchArgs,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Audio files to analyse, processed in the order given
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Directory for the results export
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,

    #[command(flatten)]
    batch: BatchArgs,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct RunOutput {
    summary: BatchSummary,
    rejected: usize,
    export_path: Option<String>,
    results: Vec<ExportEntry>,
    failures: Vec<FailureOutput>,
}

#[derive(Serialize)]
struct FailureOutput {
    filename: String,
    error: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Serve(serve_args) => run_server(serve_args).await,
        Commands::Run(run_args) => run_batch(run_args).await,
    }
}

// =============================================================================
// Server
// =============================================================================

async fn run_server(args: ServeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let host = if args.public { [0, 0, 0, 0] } else { [127, 0, 0, 1] };
    let listen_addr = SocketAddr::from((host, args.port));

    let config = ServerConfig::new(listen_addr)
        .with_batch(args.batch.batch_config())
        .with_analyzer(args.batch.analyzer_config())
        .with_export_dir(args.export_dir);

    tracing::info!(
        listen_addr = %config.listen_addr,
        max_jobs = config.batch.max_jobs,
        concurrency = config.batch.max_concurrent_jobs,
        "Starting aqualisten dashboard"
    );

    let shutdown = install_shutdown_handler();
    BatchService::new(config).run(shutdown).await;
    Ok(())
}

// =============================================================================
// Local Batch Run
// =============================================================================

async fn run_batch(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let batch_config = args.batch.batch_config();
    let analyzer = Arc::new(SimulatedAnalyzer::new(args.batch.analyzer_config()));
    let scheduler = BatchScheduler::with_analyzer(analyzer, batch_config);

    let mut files = Vec::with_capacity(args.files.len());
    for path in &args.files {
        let payload = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        files.push(AudioFile::new(name, payload));
    }

    let outcome = scheduler.submit(files).await;
    if outcome.rejected > 0 {
        eprintln!(
            "Warning: {} file(s) rejected, queue holds at most {}",
            outcome.rejected,
            scheduler.config().max_jobs
        );
    }

    let shutdown = install_shutdown_handler();
    scheduler.start().await;

    let snapshot = tokio::select! {
        snapshot = scheduler.wait_until_settled() => snapshot,
        _ = shutdown.cancelled() => {
            scheduler.cancel().await;
            scheduler.snapshot()
        }
    };

    let export_path = if snapshot.has_results() {
        Some(report::write_export(&snapshot.jobs, &args.out_dir, chrono::Utc::now()).await?)
    } else {
        None
    };

    print_run(&snapshot, outcome.rejected, export_path, &args.output)?;
    Ok(())
}

fn print_run(
    snapshot: &QueueSnapshot,
    rejected: usize,
    export_path: Option<PathBuf>,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let summary = BatchSummary::from(snapshot.counts());
    let failures: Vec<FailureOutput> = snapshot
        .jobs
        .iter()
        .filter(|j| j.status == JobStatus::Error)
        .map(|j| FailureOutput {
            filename: j.filename().to_string(),
            error: j.error.clone().unwrap_or_default(),
        })
        .collect();

    match output_format {
        OutputFormat::Json => {
            let output = RunOutput {
                summary,
                rejected,
                export_path: export_path.map(|p| p.display().to_string()),
                results: snapshot.export_results(),
                failures,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            println!(
                "{:<32} {:<11} {:<10} {:>10} {:>9}",
                "FILE", "STATUS", "HEALTH", "CONFIDENCE", "TIME (s)"
            );
            println!("{}", "-".repeat(76));
            for job in &snapshot.jobs {
                match &job.result {
                    Some(result) => println!(
                        "{:<32} {:<11} {:<10} {:>9.1}% {:>9.2}",
                        job.filename(),
                        job.status.to_string(),
                        result.health_class.to_string(),
                        result.confidence,
                        result.duration_seconds
                    ),
                    None => println!(
                        "{:<32} {:<11} {}",
                        job.filename(),
                        job.status.to_string(),
                        job.error.as_deref().unwrap_or("")
                    ),
                }
            }
            println!();
            println!(
                "Total: {}  Successful: {}  Failed: {}  Rejected: {}",
                summary.total_files, summary.successful, summary.failed, rejected
            );
            if let Some(path) = export_path {
                println!("Results written to {}", path.display());
            }
        }
    }
    Ok(())
}
