use std::convert::Infallible;
use std::net::SocketAddr;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_stream::{wrappers::WatchStream, Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::error::BatchError;
use crate::report::{self, BatchSummary, StatusCounts};
use crate::scheduler::{AnalysisResult, AudioFile, BatchScheduler, Job, QueueSnapshot, RunState};

#[derive(Clone)]
pub struct DashboardState {
    pub scheduler: BatchScheduler,
}

#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub id: String,
    pub filename: String,
    pub size_bytes: u64,
    pub status: String,
    pub progress: f64,
    pub result: Option<AnalysisResult>,
    pub error: Option<String>,
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
}

impl From<&Job> for JobResponse {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.to_string(),
            filename: job.source_file.name.clone(),
            size_bytes: job.source_file.size,
            status: job.status.to_string(),
            progress: job.progress,
            result: job.result.clone(),
            error: job.error.clone(),
            attempt: job.attempt,
            created_at: job.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    run_state: RunState,
    counts: StatusCounts,
    summary: BatchSummary,
    can_start: bool,
    has_results: bool,
    queue_length: usize,
    max_jobs: usize,
}

impl From<&QueueSnapshot> for StatusResponse {
    fn from(snapshot: &QueueSnapshot) -> Self {
        let counts = snapshot.counts();
        Self {
            run_state: snapshot.run_state,
            counts,
            summary: BatchSummary::from(counts),
            can_start: snapshot.can_start(),
            has_results: snapshot.has_results(),
            queue_length: snapshot.jobs.len(),
            max_jobs: snapshot.max_jobs,
        }
    }
}

#[derive(Debug, Serialize)]
struct SnapshotResponse {
    #[serde(flatten)]
    status: StatusResponse,
    jobs: Vec<JobResponse>,
}

impl From<&QueueSnapshot> for SnapshotResponse {
    fn from(snapshot: &QueueSnapshot) -> Self {
        Self {
            status: StatusResponse::from(snapshot),
            jobs: snapshot.jobs.iter().map(JobResponse::from).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
struct SubmitResponse {
    accepted: Vec<JobResponse>,
    rejected: usize,
}

#[derive(Debug, Serialize)]
struct ControlResponse {
    changed: bool,
    run_state: RunState,
}

#[derive(Debug, Serialize)]
struct ClearResponse {
    removed: usize,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug)]
enum ApiError {
    Batch(BatchError),
    BadRequest(String),
}

impl From<BatchError> for ApiError {
    fn from(e: BatchError) -> Self {
        ApiError::Batch(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Batch(BatchError::InvalidState(_)) => StatusCode::CONFLICT,
            ApiError::Batch(BatchError::JobNotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Batch(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let error = match self {
            ApiError::BadRequest(message) => message,
            ApiError::Batch(e) => e.to_string(),
        };
        (status, Json(ErrorResponse { error })).into_response()
    }
}

/// Build the dashboard API router.
pub fn router(state: DashboardState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let config = state.scheduler.config();
    let upload_limit = config
        .max_file_size_bytes()
        .saturating_mul(config.max_jobs as u64);
    let upload_limit = usize::try_from(upload_limit).unwrap_or(usize::MAX);

    Router::new()
        .route(
            "/api/jobs",
            get(list_jobs_handler)
                .post(upload_handler)
                .delete(clear_handler),
        )
        .route("/api/jobs/:id", delete(remove_handler))
        .route("/api/jobs/:id/retry", post(retry_handler))
        .route("/api/status", get(status_handler))
        .route("/api/batch/start", post(start_handler))
        .route("/api/batch/pause", post(pause_handler))
        .route("/api/batch/cancel", post(cancel_handler))
        .route("/api/export", get(export_handler))
        .route("/api/events", get(events_handler))
        .layer(DefaultBodyLimit::max(upload_limit))
        .layer(cors)
        .with_state(state)
}

pub async fn run_dashboard(addr: SocketAddr, state: DashboardState, shutdown: CancellationToken) {
    let app = router(state);

    tracing::info!(addr = %addr, "Starting dashboard server");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind dashboard server");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
    {
        tracing::error!(error = %e, "Dashboard server failed");
    }
}

async fn list_jobs_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    let snapshot = state.scheduler.snapshot();
    let jobs: Vec<JobResponse> = snapshot.jobs.iter().map(JobResponse::from).collect();
    Json(jobs)
}

async fn status_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    Json(StatusResponse::from(&state.scheduler.snapshot()))
}

async fn upload_handler(
    State(state): State<DashboardState>,
    mut multipart: Multipart,
) -> Result<Json<SubmitResponse>, ApiError> {
    let mut files = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        // Plain form fields carry no file name and are skipped
        let Some(name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
        files.push(AudioFile::new(name, data.to_vec()));
    }

    let outcome = state.scheduler.submit(files).await;
    Ok(Json(SubmitResponse {
        accepted: outcome.accepted.iter().map(JobResponse::from).collect(),
        rejected: outcome.rejected,
    }))
}

async fn remove_handler(
    State(state): State<DashboardState>,
    Path(id): Path<Uuid>,
) -> Result<Json<JobResponse>, ApiError> {
    let removed = state.scheduler.remove(&id).await?;
    Ok(Json(JobResponse::from(&removed)))
}

async fn retry_handler(
    State(state): State<DashboardState>,
    Path(id): Path<Uuid>,
) -> Result<Json<JobResponse>, ApiError> {
    state.scheduler.retry(&id).await?;
    let job = state
        .scheduler
        .store()
        .get(&id)
        .ok_or(BatchError::JobNotFound(id))?;
    Ok(Json(JobResponse::from(&job)))
}

async fn clear_handler(State(state): State<DashboardState>) -> Result<Json<ClearResponse>, ApiError> {
    let removed = state.scheduler.clear().await?;
    Ok(Json(ClearResponse { removed }))
}

async fn start_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    let changed = state.scheduler.start().await;
    Json(ControlResponse {
        changed,
        run_state: state.scheduler.run_state(),
    })
}

async fn pause_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    let changed = state.scheduler.pause().await;
    Json(ControlResponse {
        changed,
        run_state: state.scheduler.run_state(),
    })
}

async fn cancel_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    let changed = state.scheduler.cancel().await;
    Json(ControlResponse {
        changed,
        run_state: state.scheduler.run_state(),
    })
}

async fn export_handler(State(state): State<DashboardState>) -> Result<Response, ApiError> {
    let entries = state.scheduler.snapshot().export_results();
    let body = report::export_json(&entries)?;
    let filename = report::export_filename(Utc::now());

    Ok((
        [
            (header::CONTENT_TYPE, "application/json".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        body,
    )
        .into_response())
}

async fn events_handler(
    State(state): State<DashboardState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = WatchStream::new(state.scheduler.store().subscribe()).map(|snapshot| {
        let event = Event::default()
            .event("snapshot")
            .json_data(SnapshotResponse::from(&snapshot))
            .unwrap_or_else(|e| Event::default().event("error").data(e.to_string()));
        Ok(event)
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
