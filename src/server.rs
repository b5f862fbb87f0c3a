//! HTTP surface (axum). Compiled with the `server` feature.
//!
//! | Route                                  | Success                          |
//! |----------------------------------------|----------------------------------|
//! | `POST /documents/convert`              | 200 `ConversionResult`           |
//! | `POST /documents/batch-convert`        | 200 `[ConversionResult]`         |
//! | `POST /conversion-jobs`                | 202 `JobRecord` (QUEUED)         |
//! | `GET  /conversion-jobs/{job_id}`       | 200 terminal / 202 in progress   |
//! | `POST /batch-conversion-jobs`          | 202 `BatchJobRecord`             |
//! | `GET  /batch-conversion-jobs/{job_id}` | 200 terminal / 202 in progress   |
//! | `GET  /health`                         | 200 healthy / 503 unhealthy      |
//!
//! Inputs arrive as multipart (`document` / `documents` file fields, `url` /
//! `urls` text fields) or as a JSON body `{"url": ...}` / `{"urls": [...]}`.
//! Options are query parameters. Errors are `{"detail": "..."}`: 400 for
//! caller errors, 404 for unknown ids, 500 with a generic message for
//! system faults (the real cause goes to the log).

use crate::batch::BatchOrchestrator;
use crate::config::{ConversionOptions, ServiceConfig, MAX_IMAGE_RESOLUTION_SCALE};
use crate::convert::DirectConverter;
use crate::dispatch::{LocalDispatcher, TaskDispatcher, WorkerPool};
use crate::engine::ConversionEngine;
use crate::error::ServiceError;
use crate::gate::{CapabilityGate, FormatGate};
use crate::health::HealthProbe;
use crate::jobs::JobOrchestrator;
use crate::schema::{JobRecord, Lookup};
use crate::source::DocumentSource;
use crate::store::{InMemoryJobStore, JobStore};
use axum::extract::rejection::QueryRejection;
use axum::extract::{DefaultBodyLimit, FromRequest, Multipart, Path, Query, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Largest accepted request body.
pub const MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

// ── State ────────────────────────────────────────────────────────────────────

/// Everything the handlers need, cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub converter: DirectConverter,
    pub jobs: JobOrchestrator,
    pub batches: BatchOrchestrator,
    pub gate: Arc<dyn CapabilityGate>,
    pub health: HealthProbe,
}

impl AppState {
    /// Wire the in-process store, queue and workers around `engine`.
    ///
    /// Must run inside a tokio runtime: it spawns the workers and the
    /// retention sweeper. Keep the returned [`WorkerPool`] alive for as long
    /// as the state is served and call [`WorkerPool::shutdown`] afterwards.
    pub fn from_config(config: &ServiceConfig, engine: Arc<dyn ConversionEngine>) -> (Self, WorkerPool) {
        let store = Arc::new(InMemoryJobStore::new(config.retention()));
        store.spawn_sweeper(config.sweep_interval());
        let store: Arc<dyn JobStore> = store;

        let (dispatcher, pool) = LocalDispatcher::spawn(
            Arc::clone(&engine),
            Arc::clone(&store),
            config.workers,
            config.queue_capacity,
        );
        let dispatcher: Arc<dyn TaskDispatcher> = Arc::new(dispatcher);

        let jobs = JobOrchestrator::new(Arc::clone(&store), Arc::clone(&dispatcher));
        let state = Self {
            converter: DirectConverter::new(engine, config.convert_concurrency),
            batches: BatchOrchestrator::new(jobs.clone(), store),
            jobs,
            gate: Arc::new(FormatGate),
            health: HealthProbe::new(dispatcher, config.health_timeout()),
        };
        (state, pool)
    }
}

// ── Errors ───────────────────────────────────────────────────────────────────

/// An error response: status plus `{"detail": ...}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn bad_request(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            detail: detail.into(),
        }
    }

    fn not_found(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            detail: detail.into(),
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        if e.is_caller_error() {
            Self::bad_request(e.to_string())
        } else {
            error!("request failed: {e}");
            Self {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                detail: "Internal server error".into(),
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

// ── Request parsing ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct OptionsQuery {
    #[serde(default)]
    extract_tables_as_images: bool,
    #[serde(default = "default_scale")]
    image_resolution_scale: i64,
}

fn default_scale() -> i64 {
    i64::from(MAX_IMAGE_RESOLUTION_SCALE)
}

fn options(query: Result<Query<OptionsQuery>, QueryRejection>) -> Result<ConversionOptions, ApiError> {
    let Query(q) = query.map_err(|e| ApiError::bad_request(e.body_text()))?;
    Ok(ConversionOptions::new(q.extract_tables_as_images, q.image_resolution_scale)?)
}

#[derive(Debug, Default, Deserialize)]
struct UrlBody {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    urls: Vec<String>,
}

/// Raw inputs of one request, before validation.
#[derive(Debug, Default)]
pub struct Upload {
    files: Vec<(String, Bytes)>,
    urls: Vec<String>,
}

impl<S: Send + Sync> FromRequest<S> for Upload {
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if content_type.starts_with("multipart/form-data") {
            let multipart = Multipart::from_request(req, state)
                .await
                .map_err(|e| ApiError::bad_request(e.body_text()))?;
            Self::from_multipart(multipart).await
        } else if content_type.starts_with("application/json") {
            let Json(body) = Json::<UrlBody>::from_request(req, state)
                .await
                .map_err(|e| ApiError::bad_request(e.body_text()))?;
            let mut urls = body.urls;
            urls.extend(body.url);
            Ok(Self {
                files: Vec::new(),
                urls,
            })
        } else {
            Ok(Self::default())
        }
    }
}

impl Upload {
    async fn from_multipart(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut upload = Self::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::bad_request(e.body_text()))?
        {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "document" | "documents" => {
                    let filename = field.file_name().unwrap_or("document").to_string();
                    let bytes = field
                        .bytes()
                        .await
                        .map_err(|e| ApiError::bad_request(e.body_text()))?;
                    upload.files.push((filename, bytes));
                }
                "url" | "urls" => {
                    let text = field
                        .text()
                        .await
                        .map_err(|e| ApiError::bad_request(e.body_text()))?;
                    let text = text.trim();
                    if !text.is_empty() {
                        upload.urls.push(text.to_string());
                    }
                }
                _ => {}
            }
        }
        Ok(upload)
    }

    /// Exactly one file or one URL.
    fn into_single(self) -> Result<DocumentSource, ServiceError> {
        if self.files.len() > 1 || self.urls.len() > 1 {
            return Err(ServiceError::AmbiguousInput {
                what: "a single document or a single url",
            });
        }
        DocumentSource::from_parts(self.files.into_iter().next(), self.urls.into_iter().next())
    }

    /// A non-empty set of files, or of URLs, but not both.
    fn into_many(self) -> Result<Vec<DocumentSource>, ServiceError> {
        match (self.files.is_empty(), self.urls.is_empty()) {
            (true, true) => Err(ServiceError::MissingInput {
                what: "documents or urls",
            }),
            (false, false) => Err(ServiceError::AmbiguousInput {
                what: "documents or urls",
            }),
            (false, true) => Ok(self
                .files
                .into_iter()
                .map(|(filename, bytes)| DocumentSource::file(filename, bytes))
                .collect()),
            (true, false) => self.urls.into_iter().map(DocumentSource::url).collect(),
        }
    }
}

fn progress_code(settled: bool) -> StatusCode {
    if settled {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    }
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn convert_document(
    State(state): State<AppState>,
    query: Result<Query<OptionsQuery>, QueryRejection>,
    upload: Upload,
) -> Result<Response, ApiError> {
    let options = options(query)?;
    let source = upload.into_single()?;
    state.gate.admit(&source)?;
    let result = state.converter.convert_one(&source, &options).await?;
    Ok(Json(result).into_response())
}

async fn batch_convert(
    State(state): State<AppState>,
    query: Result<Query<OptionsQuery>, QueryRejection>,
    upload: Upload,
) -> Result<Response, ApiError> {
    let options = options(query)?;
    let sources = upload.into_many()?;
    state.gate.admit_all(&sources)?;
    let results = state.converter.convert_many(&sources, &options).await?;
    Ok(Json(results).into_response())
}

async fn create_job(
    State(state): State<AppState>,
    query: Result<Query<OptionsQuery>, QueryRejection>,
    upload: Upload,
) -> Result<Response, ApiError> {
    let options = options(query)?;
    let source = upload.into_single()?;
    state.gate.admit(&source)?;
    let job_id = state.jobs.submit(source, options).await?;
    Ok((StatusCode::ACCEPTED, Json(JobRecord::queued(job_id))).into_response())
}

async fn get_job(State(state): State<AppState>, Path(job_id): Path<String>) -> Result<Response, ApiError> {
    match state.jobs.status(&job_id).await? {
        Lookup::Found(record) => Ok((progress_code(record.status.is_terminal()), Json(record)).into_response()),
        Lookup::NotFound => Err(ApiError::not_found("Job not found")),
    }
}

async fn create_batch_job(
    State(state): State<AppState>,
    query: Result<Query<OptionsQuery>, QueryRejection>,
    upload: Upload,
) -> Result<Response, ApiError> {
    let options = options(query)?;
    let sources = upload.into_many()?;
    state.gate.admit_all(&sources)?;
    let batch_id = state.batches.submit_batch(sources, options).await?;
    match state.batches.batch_status(&batch_id).await? {
        Lookup::Found(record) => Ok((StatusCode::ACCEPTED, Json(record)).into_response()),
        Lookup::NotFound => Err(ServiceError::Internal(format!("batch {batch_id} vanished after creation")).into()),
    }
}

async fn get_batch_job(State(state): State<AppState>, Path(job_id): Path<String>) -> Result<Response, ApiError> {
    // FAILURE can be reported while siblings still run; stay 202 until all settle.
    match state.batches.batch_status(&job_id).await? {
        Lookup::Found(record) => Ok((progress_code(record.is_settled()), Json(record)).into_response()),
        Lookup::NotFound => Err(ApiError::not_found("Job not found")),
    }
}

async fn health(State(state): State<AppState>) -> Response {
    let report = state.health.check().await;
    let code = if report.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(report)).into_response()
}

// ── Router / serve ───────────────────────────────────────────────────────────

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/documents/convert", post(convert_document))
        .route("/documents/batch-convert", post(batch_convert))
        .route("/conversion-jobs", post(create_job))
        .route("/conversion-jobs/{job_id}", get(get_job))
        .route("/batch-conversion-jobs", post(create_batch_job))
        .route("/batch-conversion-jobs/{job_id}", get(get_batch_job))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until Ctrl-C, then stop accepting and finish in-flight requests.
pub async fn serve(listener: TcpListener, router: Router) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("listening on {addr}");
    }
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => {
            error!("cannot listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    }
}
