//! `POST /api/analysis` — delegates to [`crate::analysis::invoke`].

use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::analysis::{invoke, AnalysisError, Flag};
use crate::AppState;

#[derive(Deserialize)]
pub struct AnalysisRequest {
    pub script: String,
    pub target: String,
    #[serde(default)]
    pub flags: std::collections::HashMap<String, String>,
}

pub async fn run(
    State(state): State<AppState>,
    Json(payload): Json<AnalysisRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let flags: Vec<Flag> = payload
        .flags
        .into_iter()
        .map(|(name, value)| Flag { name, value })
        .collect();

    match invoke(
        &state.config.engine.analysis_binary,
        &payload.script,
        &payload.target,
        &flags,
        state.config.engine.analysis_timeout_secs,
    )
    .await
    {
        Ok(result) => Ok(Json(json!({
            "exit_code": result.exit_code,
            "stdout": result.stdout,
            "stderr": result.stderr,
            "success": result.exit_code == 0,
            "duration_ms": result.duration_ms,
        }))),
        Err(AnalysisError::SpawnFailed(e)) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e, "error_code": "CLI_NOT_FOUND"})),
        )),
        Err(AnalysisError::Timeout { partial_stdout }) => Err((
            StatusCode::GATEWAY_TIMEOUT,
            Json(json!({
                "error": "analysis invocation timed out",
                "error_code": "TIMEOUT",
                "partial_stdout": partial_stdout,
            })),
        )),
    }
}
