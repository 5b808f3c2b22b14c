//! HTTP routes.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use fusion_shared::{
    ErrorBody, GenerationAccepted, GenerationRequest, HealthResponse, PlanRequest, PlanResponse,
    PresignedUrlsResponse,
};
use serde::Deserialize;

use crate::app::App;
use crate::infrastructure::ports::StorageError;
use crate::use_cases::{ArtifactError, JobError, JobStatusView, PlanningError};

const ENDPOINTS: [&str; 6] = [
    "/health",
    "/v1/plan",
    "/v1/generations",
    "/v1/generations/{id}/status",
    "/v1/generations/{id}/presigned",
    "/v1/artifacts/{key}",
];

/// Create all HTTP routes.
pub fn routes() -> Router<Arc<App>> {
    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/v1/plan", post(plan))
        .route("/v1/generations", post(submit_generation))
        .route("/v1/generations/{id}/status", get(generation_status))
        .route("/v1/generations/{id}/presigned", get(presigned_urls))
        .route("/v1/artifacts/{*key}", get(artifact))
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        service: "fusion-engine".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        endpoints: ENDPOINTS.iter().map(|e| e.to_string()).collect(),
    })
}

async fn plan(
    State(app): State<Arc<App>>,
    Json(request): Json<PlanRequest>,
) -> Result<Json<PlanResponse>, ApiError> {
    tracing::debug!(seed = request.seed, "Plan requested");
    let outcome = app.use_cases.plan_scene.execute(&request.prompt).await?;
    Ok(Json(PlanResponse {
        scene_plan: outcome.plan,
        planner: outcome.provider,
    }))
}

async fn submit_generation(
    State(app): State<Arc<App>>,
    Json(request): Json<GenerationRequest>,
) -> Result<Json<GenerationAccepted>, ApiError> {
    if request.prompt.trim().is_empty() {
        return Err(ApiError::BadRequest("prompt must not be empty".to_string()));
    }
    let accepted = app.use_cases.submit_generation.execute(request.prompt).await?;
    Ok(Json(accepted))
}

async fn generation_status(
    State(app): State<Arc<App>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let response = match app.use_cases.job_status.execute(&id).await? {
        JobStatusView::Local(status) => Json(status).into_response(),
        JobStatusView::Remote(status) => Json(status).into_response(),
    };
    Ok(response)
}

async fn presigned_urls(
    State(app): State<Arc<App>>,
    Path(id): Path<String>,
) -> Result<Json<PresignedUrlsResponse>, ApiError> {
    Ok(Json(app.use_cases.presign.execute(&id).await?))
}

#[derive(Debug, Deserialize)]
struct SignedQuery {
    expires: i64,
    signature: String,
}

async fn artifact(
    State(app): State<Arc<App>>,
    Path(key): Path<String>,
    Query(query): Query<SignedQuery>,
) -> Result<Response, ApiError> {
    let bytes = app
        .use_cases
        .serve_artifact
        .execute(&key, query.expires, &query.signature)
        .await?;
    Ok(([(header::CONTENT_TYPE, content_type(&key))], Bytes::from(bytes)).into_response())
}

fn content_type(key: &str) -> &'static str {
    match key.rsplit('.').next() {
        Some("json") => "application/json",
        Some("glb") => "model/gltf-binary",
        Some("mp3") => "audio/mpeg",
        _ => "application/octet-stream",
    }
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Forbidden(String),
    BadGateway(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal error".to_string())
            }
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

impl From<PlanningError> for ApiError {
    fn from(e: PlanningError) -> Self {
        ApiError::BadGateway(e.to_string())
    }
}

impl From<JobError> for ApiError {
    fn from(e: JobError) -> Self {
        match e {
            JobError::InvalidId(e) => ApiError::BadRequest(e.to_string()),
            JobError::Batch(e) => ApiError::BadGateway(e.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<ArtifactError> for ApiError {
    fn from(e: ArtifactError) -> Self {
        match e {
            ArtifactError::NotFound(_) => ApiError::NotFound(e.to_string()),
            ArtifactError::InvalidId(e) => ApiError::BadRequest(e.to_string()),
            ArtifactError::Storage(e) => e.into(),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::BadSignature(_) | StorageError::Expired(_) => {
                ApiError::Forbidden(e.to_string())
            }
            StorageError::NotFound(_) => ApiError::NotFound(e.to_string()),
            StorageError::InvalidKey(_) => ApiError::BadRequest(e.to_string()),
            StorageError::Io(_) => ApiError::Internal(e.to_string()),
        }
    }
}
