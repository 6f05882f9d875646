//! Core library for the transcription gate.  This module wires the
//! admission pipeline (resource guard, request validation, permit pool,
//! metrics and the error envelope) in front of a transcription backend and
//! exposes it as an Axum router.

pub mod admission;
mod config;
pub mod error;
pub mod guards;
pub mod metrics;
pub mod request_log;
pub mod transcriber;
pub mod upload;

pub use config::{parse_extensions, AppConfig, BackendConfig, RotationConfig};

use std::sync::Arc;
use std::time::Instant;

use axum::extract::multipart::MultipartRejection;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

use crate::admission::{Admission, AdmissionController, AdmissionError};
use crate::error::GateError;
use crate::guards::{MemoryProbe, RequestValidator, ResourceGuard, SystemMemoryProbe};
use crate::metrics::MetricsRecorder;
use crate::request_log::{RequestLog, RequestRecord};
use crate::transcriber::{CommandTranscriber, Transcriber};
use crate::upload::{read_upload, RequestContext, UploadSummary};

/// Room for multipart boundaries and part headers on top of the file limit.
pub const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

#[derive(Debug, Serialize)]
pub struct TranscriptionResponse {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub memory_percent: f64,
    pub active_tasks: usize,
}

/// Shared application state.  Every field is either immutable or internally
/// synchronised; cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub admission: Arc<AdmissionController>,
    pub metrics: Arc<MetricsRecorder>,
    pub resource_guard: Arc<ResourceGuard>,
    pub validator: Arc<RequestValidator>,
    pub memory: Arc<dyn MemoryProbe>,
    pub transcriber: Arc<dyn Transcriber>,
    pub request_log: RequestLog,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        transcriber: Arc<dyn Transcriber>,
        memory: Arc<dyn MemoryProbe>,
    ) -> Self {
        let admission = AdmissionController::new(config.max_concurrent_jobs, config.admission_timeout);
        let resource_guard = ResourceGuard::new(config.max_memory_threshold);
        let validator = RequestValidator::new(
            config.allowed_extensions.clone(),
            config.max_file_size_bytes,
        );
        Self {
            config: Arc::new(config),
            admission: Arc::new(admission),
            metrics: Arc::new(MetricsRecorder::new()),
            resource_guard: Arc::new(resource_guard),
            validator: Arc::new(validator),
            memory,
            transcriber,
            request_log: RequestLog::disabled(),
        }
    }

    pub fn with_request_log(mut self, request_log: RequestLog) -> Self {
        self.request_log = request_log;
        self
    }

    fn record(
        &self,
        user: &str,
        status: StatusCode,
        duration_ms: f64,
        upload: Option<&UploadSummary>,
    ) {
        let accepted = status == StatusCode::OK;
        self.metrics.record(accepted, duration_ms);
        self.request_log.emit(&RequestRecord {
            ts: chrono::Utc::now().to_rfc3339(),
            outcome: if accepted { "accepted" } else { "rejected" },
            status: status.as_u16(),
            duration_ms,
            user,
            extension: upload.map(|u| u.extension.as_str()),
            size_bytes: upload.map(|u| u.size),
            sha256: upload.and_then(|u| u.sha256.as_deref()),
        });
    }

    /// Terminal outcome for a request that never started real work.
    fn reject(&self, user: &str, err: GateError, upload: Option<&RequestContext>) -> Response {
        let summary = upload.map(|u| u.summary(self.request_log.is_enabled()));
        self.record(user, err.status(), 0.0, summary.as_ref());
        err.into_response()
    }
}

/// Build state from environment variables: configuration (see
/// [`AppConfig::from_env`]), the command-line transcriber, the host memory
/// probe and the optional request log (`LOG_FILE`).
pub async fn build_state_from_env() -> Result<AppState, Box<dyn std::error::Error>> {
    let config = AppConfig::from_env().map_err(|e| -> Box<dyn std::error::Error> { e.into() })?;
    let request_log = RequestLog::open(config.log_file.as_deref(), &config.rotation);
    let transcriber = Arc::new(CommandTranscriber::new(config.backend.clone()));
    let state = AppState::new(config, transcriber, Arc::new(SystemMemoryProbe::new()))
        .with_request_log(request_log);
    state.admission.ensure();
    Ok(state)
}

/// Build the Axum router and attach handlers.
pub fn app(state: AppState) -> Router {
    let body_limit = state
        .validator
        .max_bytes()
        .saturating_add(MULTIPART_OVERHEAD_BYTES);

    Router::new()
        .route(
            "/v1/transcribe",
            post(transcribe_handler).fallback(method_not_allowed),
        )
        .route("/health", get(health_handler).fallback(method_not_allowed))
        .route("/metrics", get(metrics_handler).fallback(method_not_allowed))
        .fallback(error::not_found)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CatchPanicLayer::custom(error::panic_response))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn method_not_allowed() -> Response {
    GateError::MethodNotAllowed.into_response()
}

/// Optional marketplace proxy-secret check. Disabled when no secret is
/// configured.
fn ensure_authorized(headers: &HeaderMap, secret: Option<&str>) -> Result<(), GateError> {
    let Some(expected) = secret else {
        return Ok(());
    };
    let provided = headers
        .get("x-rapidapi-proxy-secret")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| GateError::Forbidden("Missing RapidAPI authentication".into()))?;
    if provided != expected {
        return Err(GateError::Forbidden("Invalid RapidAPI secret".into()));
    }
    Ok(())
}

fn caller(headers: &HeaderMap) -> String {
    headers
        .get("x-rapidapi-user")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or("anonymous")
        .to_string()
}

/// Handler for `POST /v1/transcribe`.  Runs the guards in cost order, takes
/// a permit and hands the upload to the transcriber on its own task.
async fn transcribe_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let started = Instant::now();
    let user = caller(&headers);

    if let Err(err) = ensure_authorized(&headers, state.config.proxy_secret.as_deref()) {
        return state.reject(&user, err, None);
    }
    // Cheapest check first: nothing of the body has been read yet.
    if let Err(err) = state.resource_guard.check(state.memory.as_ref()) {
        return state.reject(&user, err, None);
    }
    let mut multipart = match multipart {
        Ok(m) => m,
        Err(rejection) => {
            return state.reject(&user, GateError::BadRequest(vec![rejection.body_text()]), None)
        }
    };
    let upload = match read_upload(&mut multipart, &state.validator, started).await {
        Ok(upload) => upload,
        Err(err) => return state.reject(&user, err, None),
    };

    let admission = match state.admission.acquire().await {
        Ok(admission) => admission,
        Err(AdmissionError::Timeout(waited)) => {
            tracing::info!(
                waited_ms = waited.as_millis() as u64,
                active = state.admission.held(),
                "all workers busy, asking client to retry"
            );
            let busy = GateError::Busy {
                retry_after_secs: state.config.retry_after_secs,
            };
            return state.reject(&user, busy, Some(&upload));
        }
        Err(err @ AdmissionError::Closed) => {
            return state.reject(&user, GateError::Internal(err.to_string()), Some(&upload))
        }
    };

    // The job owns the permit and finishes even if the client goes away.
    let job = tokio::spawn(run_job(state.clone(), upload, admission, user));
    match job.await {
        Ok(Ok(text)) => (StatusCode::OK, Json(TranscriptionResponse { text })).into_response(),
        Ok(Err(err)) => err.into_response(),
        Err(join_err) => {
            tracing::error!(error = %join_err, "transcription job aborted");
            GateError::Internal(join_err.to_string()).into_response()
        }
    }
}

async fn run_job(
    state: AppState,
    upload: RequestContext,
    admission: Admission,
    user: String,
) -> Result<String, GateError> {
    let summary = upload.summary(state.request_log.is_enabled());
    let RequestContext {
        bytes,
        filename,
        started,
        ..
    } = upload;
    let transcriber = state.transcriber.clone();
    let job_filename = filename.clone();
    let mut work = tokio::spawn(async move {
        transcriber.initialize().await?;
        transcriber.transcribe(&bytes, &job_filename).await
    });

    let deadline = state.config.transcribe_timeout;
    let outcome = match tokio::time::timeout(deadline, &mut work).await {
        Ok(Ok(Ok(text))) => Ok(text),
        Ok(Ok(Err(err))) => {
            tracing::error!(error = %err, %filename, "transcription failed");
            Err(GateError::Backend(err))
        }
        Ok(Err(join_err)) => {
            tracing::error!(error = %join_err, %filename, "transcription panicked");
            Err(GateError::Internal(join_err.to_string()))
        }
        Err(_) => {
            work.abort();
            tracing::warn!(
                deadline_ms = deadline.as_millis() as u64,
                %filename,
                "transcription exceeded deadline, aborted"
            );
            Err(GateError::BackendTimeout)
        }
    };

    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
    let status = match &outcome {
        Ok(_) => StatusCode::OK,
        Err(err) => err.status(),
    };
    state.record(&user, status, elapsed_ms, Some(&summary));
    drop(admission);
    outcome
}

/// Liveness plus the two numbers that explain most rejections.
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        memory_percent: state.memory.memory_percent(),
        active_tasks: state.admission.held(),
    })
}

async fn metrics_handler(State(state): State<AppState>) -> Json<metrics::MetricsSnapshot> {
    Json(state.metrics.snapshot())
}
