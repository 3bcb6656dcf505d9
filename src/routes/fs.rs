//! `GET /api/fs?path=...` — read-only directory listing via [`crate::fs_browser::FileBrowser`].

use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::fs_browser::FsBrowserError;
use crate::AppState;

#[derive(Deserialize)]
pub struct FsQuery {
    #[serde(default)]
    pub path: String,
}

pub async fn list(
    State(state): State<AppState>,
    axum::extract::Query(query): axum::extract::Query<FsQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    match state.fs_browser.list(&query.path) {
        Ok(entries) => Ok(Json(json!({ "path": query.path, "files": entries }))),
        Err(FsBrowserError::Containment) => Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "path escapes the browse root", "error_code": "INVALID_FORMAT"})),
        )),
        Err(FsBrowserError::NotADirectory) => Err((
            StatusCode::NOT_FOUND,
            Json(json!({"error": "not a directory", "error_code": "INVALID_FORMAT"})),
        )),
        Err(FsBrowserError::ReadFailed(e)) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e, "error_code": "MESSAGE_PROCESSING_ERROR"})),
        )),
    }
}
