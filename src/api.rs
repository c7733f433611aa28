use crate::server::AppState;
use crate::store::StoreError;
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::{Value, json};

/// Errors surfaced to API callers as `{"ok":false,"error":…}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Missing code string")]
    MissingCode,
    #[error("No backup available")]
    NoBackup,
    #[error("{0}")]
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NoBackupAvailable => ApiError::NoBackup,
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::MissingCode | ApiError::NoBackup => StatusCode::BAD_REQUEST,
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "ok": false, "error": self.to_string() }))).into_response()
    }
}

pub async fn get_version(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let version = state.store.current_version().await?;
    Ok(Json(json!({ "version": version })))
}

#[derive(Debug, Deserialize)]
pub struct UpdateRequest {
    /// Raw value: a missing or non-string `code` must produce the 400
    /// envelope, not an extractor rejection.
    #[serde(default)]
    pub code: Value,
    #[serde(default)]
    pub note: String,
}

pub async fn update_system(
    State(state): State<AppState>,
    Json(body): Json<UpdateRequest>,
) -> Result<Json<Value>, ApiError> {
    let Some(code) = body.code.as_str() else {
        return Err(ApiError::MissingCode);
    };
    let (version, meta) = state.store.replace_script(code, &body.note).await?;
    Ok(Json(json!({ "ok": true, "version": version, "meta": meta })))
}

pub async fn rollback(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let (restored, version) = state.store.rollback().await?;
    Ok(Json(json!({ "ok": true, "restored": restored, "version": version })))
}

pub async fn get_history(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let history = state.store.history().await?;
    Ok(Json(json!({
        "ok": true,
        "backups": history.backups,
        "version": history.version,
    })))
}
