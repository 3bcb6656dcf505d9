//! Thin adapters over symbolic/tutorial helper programs.
//!
//! Out of core scope per the supervisor's own design — these are external
//! collaborators, not part of the session/engine contract — so both
//! handlers are one-line proxies onto [`crate::analysis::invoke`] with a
//! fixed script name, reusing its bounded-wait and non-raising-on-exit-code
//! behavior rather than inventing a second invocation path.

use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::analysis::{invoke, AnalysisError, Flag};
use crate::AppState;

#[derive(Deserialize)]
pub struct AdapterRequest {
    pub target: String,
    #[serde(default)]
    pub flags: std::collections::HashMap<String, String>,
}

/// `POST /api/symbolic`.
pub async fn symbolic(state: State<AppState>, payload: Json<AdapterRequest>) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    run_adapter(state, "symbolic", payload).await
}

/// `POST /api/tutorial`.
pub async fn tutorial(state: State<AppState>, payload: Json<AdapterRequest>) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    run_adapter(state, "tutorial", payload).await
}

async fn run_adapter(
    State(state): State<AppState>,
    script: &str,
    Json(payload): Json<AdapterRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let flags: Vec<Flag> = payload
        .flags
        .into_iter()
        .map(|(name, value)| Flag { name, value })
        .collect();

    match invoke(
        &state.config.engine.helper_binary,
        script,
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
            "duration_ms": result.duration_ms,
        }))),
        Err(AnalysisError::SpawnFailed(e)) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e, "error_code": "CLI_NOT_FOUND"})),
        )),
        Err(AnalysisError::Timeout { partial_stdout }) => Err((
            StatusCode::GATEWAY_TIMEOUT,
            Json(json!({
                "error": format!("{script} helper invocation timed out"),
                "error_code": "TIMEOUT",
                "partial_stdout": partial_stdout,
            })),
        )),
    }
}
