//! HTTP front-end for the ipasign job runner.
//!
//! | Method | Path | Handler |
//! |--------|------|---------|
//! | `POST` | `/api/sign` | submit a multipart signing job |
//! | `GET` | `/api/sign/progress/{jobId}` | job progress snapshot |
//! | `DELETE` | `/api/sign/{jobId}` | cancel a job |
//! | `GET` | `/api/manifest/{jobId}` | OTA install manifest |
//! | `GET` | `/jobs/{jobId}/output/{filename}` | signed archive download |
//! | `GET` | `/api/ping` | liveness |

pub mod error;
pub mod form;

use crate::error::ApiError;
use crate::form::SignForm;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use ipasign::job::{validate_job_id, SigningProgress};
use ipasign::{Error, JobRunner};
use serde::Serialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub runner: JobRunner,
}

impl AppState {
    pub fn new(runner: JobRunner) -> Self {
        Self { runner }
    }
}

/// Build the application router.
///
/// Request bodies larger than `max_upload_bytes` are rejected with 413.
pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/api/ping", get(ping))
        .route("/api/sign", post(submit))
        .route("/api/sign/progress/{job_id}", get(progress))
        .route("/api/sign/{job_id}", delete(cancel))
        .route("/api/manifest/{job_id}", get(manifest))
        .route("/jobs/{job_id}/output/{filename}", get(download))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_upload_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub success: bool,
    pub job_id: String,
    pub message: String,
}

async fn ping() -> Json<Value> {
    Json(json!({ "success": true, "message": "pong" }))
}

async fn submit(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<SubmitResponse>, ApiError> {
    let job_id = Uuid::new_v4().to_string();
    let input_dir = state.runner.engine().config().input_dir(&job_id);

    let submitted = match SignForm::read(multipart, &input_dir).await {
        Ok(form) => form.into_request().and_then(|(files, params)| {
            state
                .runner
                .submit_with_id(job_id.clone(), files, params)
                .map_err(ApiError::from)
        }),
        Err(e) => Err(e),
    };

    if let Err(ref e) = submitted {
        warn!(%job_id, error = %e.0, "Rejected signing request");
        let job_dir = state.runner.engine().config().job_dir(&job_id);
        if let Err(cleanup) = tokio::fs::remove_dir_all(&job_dir).await {
            if cleanup.kind() != std::io::ErrorKind::NotFound {
                warn!(%job_id, error = %cleanup, "Failed to remove rejected uploads");
            }
        }
    }

    let job_id = submitted?;
    info!(%job_id, "Signing job accepted");

    Ok(Json(SubmitResponse {
        success: true,
        job_id,
        message: "Signing job started".to_string(),
    }))
}

async fn progress(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<SigningProgress>, ApiError> {
    Ok(Json(state.runner.get_progress(&job_id)?))
}

async fn cancel(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let record = state.runner.cancel(&job_id)?;
    Ok(Json(json!({
        "success": true,
        "message": record.message,
    })))
}

async fn manifest(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Response, ApiError> {
    let body = state.runner.manifest(&job_id)?;
    let disposition = format!("attachment; filename=\"{}-manifest.plist\"", job_id);

    Ok((
        [
            (header::CONTENT_TYPE, "application/xml".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}

async fn download(
    State(state): State<AppState>,
    Path((job_id, filename)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    validate_job_id(&job_id).map_err(|_| Error::NotFound(format!("Job {} not found", job_id)))?;
    if !is_plain_file_name(&filename) {
        return Err(Error::NotFound(format!("File {} not found", filename)).into());
    }

    let path = state.runner.engine().config().output_dir(&job_id).join(&filename);
    let data = match tokio::fs::read(&path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::NotFound(format!("File {} not found", filename)).into())
        }
        Err(e) => return Err(e.into()),
    };

    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        data,
    )
        .into_response())
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}
