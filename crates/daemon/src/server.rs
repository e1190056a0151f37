use std::io::Cursor;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use coop_backup_core::{BackupRecord, BackupStatus};
use coop_backup_engine::{BackupEngine, BackupError, CreateOptions, RestoreOptions, RestoreSummary};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{error, warn};
use uuid::Uuid;

const DEFAULT_LIST_LIMIT: usize = 50;
const RESTORE_COOLDOWN_SECS: i64 = 10;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<BackupEngine>,
    pub restore_gate: Arc<Mutex<Option<chrono::DateTime<Utc>>>>,
    pub csrf_token: Option<String>,
    pub api_token: Option<String>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/healthz", get(healthz))
        .route("/api/v1/backups", get(list_backups).post(create_backup))
        .route("/api/v1/backups/{id}", get(backup_detail).delete(delete_backup))
        .route("/api/v1/backups/{id}/download", get(download_backup))
        .route("/api/v1/backups/{id}/restore", post(restore_backup))
        .route("/api/v1/cleanup", post(cleanup))
        .route("/api/v1/schedule", post(schedule))
        .with_state(state)
}

/// JSON error body paired with the status it is sent with.
struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(serde_json::json!({ "error": self.1 }))).into_response()
    }
}

impl From<StatusCode> for ApiError {
    fn from(status: StatusCode) -> Self {
        let reason = status.canonical_reason().unwrap_or("error").to_lowercase();
        ApiError(status, reason)
    }
}

impl From<BackupError> for ApiError {
    fn from(err: BackupError) -> Self {
        let status = match &err {
            BackupError::Validation(_) => StatusCode::BAD_REQUEST,
            BackupError::NotFound(_) => StatusCode::NOT_FOUND,
            BackupError::InvalidState { .. } => StatusCode::CONFLICT,
            BackupError::MissingFile { .. } => StatusCode::GONE,
            BackupError::Collection { .. }
            | BackupError::Write { .. }
            | BackupError::Restore { .. }
            | BackupError::Store(_) => {
                error!(error = %err, "request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        ApiError(status, err.to_string())
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Serialize)]
struct HealthzResponse {
    status: &'static str,
}

async fn healthz() -> Json<HealthzResponse> {
    Json(HealthzResponse { status: "ok" })
}

fn require_api_auth(state: &AppState, headers: &HeaderMap) -> Result<(), StatusCode> {
    let Some(expected) = &state.api_token else {
        return Ok(());
    };

    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match provided {
        Some(token) if token == expected => Ok(()),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}

fn parse_id(raw: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| ApiError(StatusCode::BAD_REQUEST, format!("invalid backup id: {raw}")))
}

#[derive(Debug, Deserialize)]
struct ListParams {
    limit: Option<usize>,
}

async fn list_backups(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<BackupRecord>>> {
    require_api_auth(&state, &headers)?;
    let records = state
        .engine
        .get_backups(params.limit.unwrap_or(DEFAULT_LIST_LIMIT))
        .await?;
    Ok(Json(records))
}

async fn backup_detail(
    Path(id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<BackupRecord>> {
    require_api_auth(&state, &headers)?;
    let id = parse_id(&id)?;
    let record = state
        .engine
        .get_backup(id)
        .await?
        .ok_or(BackupError::NotFound(id))?;
    Ok(Json(record))
}

async fn create_backup(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(options): Json<CreateOptions>,
) -> ApiResult<(StatusCode, Json<BackupRecord>)> {
    require_api_auth(&state, &headers)?;
    let id = state.engine.create_backup(options).await?;
    let record = state
        .engine
        .get_backup(id)
        .await?
        .ok_or(BackupError::NotFound(id))?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn delete_backup(
    Path(id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    require_api_auth(&state, &headers)?;
    state.engine.delete_backup(parse_id(&id)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RestoreBody {
    include_media: bool,
    include_logs: bool,
}

async fn restore_backup(
    Path(id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<RestoreBody>>,
) -> ApiResult<Json<RestoreSummary>> {
    require_api_auth(&state, &headers)?;
    if let Some(expected_csrf) = &state.csrf_token {
        let provided = headers
            .get("x-csrf-token")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if provided != expected_csrf {
            return Err(StatusCode::FORBIDDEN.into());
        }
    }
    let mut gate = state.restore_gate.lock().await;
    if let Some(last) = *gate {
        if (Utc::now() - last).num_seconds() < RESTORE_COOLDOWN_SECS {
            return Err(StatusCode::TOO_MANY_REQUESTS.into());
        }
    }

    let body = body.map(|Json(body)| body).unwrap_or_default();
    let summary = state
        .engine
        .restore_backup(RestoreOptions {
            backup_id: parse_id(&id)?,
            include_media: body.include_media,
            include_logs: body.include_logs,
        })
        .await?;
    *gate = Some(Utc::now());
    Ok(Json(summary))
}

#[derive(Debug, Serialize)]
struct CleanupResponse {
    removed: usize,
}

async fn cleanup(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<CleanupResponse>> {
    require_api_auth(&state, &headers)?;
    let removed = state.engine.cleanup().await?;
    Ok(Json(CleanupResponse { removed }))
}

#[derive(Debug, Serialize)]
struct ScheduleResponse {
    created: Option<Uuid>,
}

async fn schedule(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<ScheduleResponse>> {
    require_api_auth(&state, &headers)?;
    let created = state.engine.schedule_backups().await?;
    Ok(Json(ScheduleResponse { created }))
}

async fn download_backup(
    Path(id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    require_api_auth(&state, &headers)?;
    let id = parse_id(&id)?;
    let record = state
        .engine
        .get_backup(id)
        .await?
        .ok_or(BackupError::NotFound(id))?;
    if record.status != BackupStatus::Completed {
        return Err(BackupError::InvalidState {
            id,
            status: record.status,
        }
        .into());
    }

    let bytes = match std::fs::read(&record.file_path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(BackupError::MissingFile {
                id,
                path: record.file_path.clone(),
            }
            .into())
        }
        Err(e) => {
            warn!(backup_id = %id, error = %e, "could not read snapshot for download");
            return Err(StatusCode::INTERNAL_SERVER_ERROR.into());
        }
    };

    let archive = tar_zst(&record.filename, bytes).map_err(|e| {
        error!(backup_id = %id, error = %e, "could not build download archive");
        ApiError::from(StatusCode::INTERNAL_SERVER_ERROR)
    })?;

    let disposition = format!(
        "attachment; filename={}.tar.zst",
        record.filename.trim_end_matches(".json")
    );
    let mut response = archive.into_response();
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/zstd"));
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        response.headers_mut().insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

fn tar_zst(filename: &str, bytes: Vec<u8>) -> std::io::Result<Vec<u8>> {
    let mut tar_data = Vec::new();
    {
        let mut builder = tar::Builder::new(&mut tar_data);
        let mut hdr = tar::Header::new_gnu();
        hdr.set_size(bytes.len() as u64);
        hdr.set_mode(0o644);
        hdr.set_cksum();
        builder.append_data(&mut hdr, filename, Cursor::new(bytes))?;
        builder.finish()?;
    }
    zstd::encode_all(Cursor::new(&tar_data), 3)
}
