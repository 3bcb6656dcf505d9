//! Engine introspection endpoints.
//!
//! - `GET /api/engines` — static list of recognized engine names
//! - `GET /api/engines/{name}` — delegates to [`crate::oneshot::describe`]

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};

use crate::oneshot::{describe, DescribeError};
use crate::AppState;

/// `GET /api/engines` — the configured list of recognized engine names.
pub async fn list_engines(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "engines": state.config.engine.engine_names }))
}

/// `GET /api/engines/{name}` — run `<binary> --describe <name>` and return
/// its parsed introspection payload.
pub async fn describe_engine(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    if !state.config.engine.engine_names.iter().any(|n| n == &name) {
        return Err((
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Unrecognized engine name", "error_code": "CLI_NOT_FOUND"})),
        ));
    }

    let binary = format!("{}/{name}", state.config.engine.binary_dir);
    match describe(&binary, &name, state.config.engine.describe_timeout_secs).await {
        Ok(value) => Ok(Json(value)),
        Err(DescribeError::Timeout) => Err((
            StatusCode::GATEWAY_TIMEOUT,
            Json(json!({"error": "describe invocation timed out", "error_code": "TIMEOUT"})),
        )),
        Err(DescribeError::SpawnFailed(e)) => Err((
            StatusCode::NOT_FOUND,
            Json(json!({"error": e, "error_code": "CLI_NOT_FOUND"})),
        )),
        Err(DescribeError::ProcessFailed { exit_code, stderr_tail }) => Err((
            StatusCode::BAD_GATEWAY,
            Json(json!({
                "error": format!("engine exited with code {exit_code}"),
                "error_code": "CLI_EXITED",
                "stderr": stderr_tail,
            })),
        )),
        Err(DescribeError::InvalidOutput(e)) => Err((
            StatusCode::BAD_GATEWAY,
            Json(json!({"error": e, "error_code": "INVALID_FORMAT"})),
        )),
    }
}
