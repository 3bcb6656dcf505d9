//! `GET/POST /missions*` — delegates to [`crate::missions::MissionStore`].

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info};

use crate::missions::{Mission, MissionCommand, MissionError};
use crate::AppState;

#[derive(Deserialize)]
pub struct CreateMissionRequest {
    pub name: String,
    pub engine: String,
    #[serde(default)]
    pub parameters: Value,
}

#[derive(Deserialize)]
pub struct MissionCommandRequest {
    pub command: String,
}

/// `POST /api/missions` — create a mission in `pending` status, return it
/// immediately with `202 Accepted`, and asynchronously drive the launch
/// procedure.
pub async fn create(State(state): State<AppState>, Json(payload): Json<CreateMissionRequest>) -> (StatusCode, Json<Value>) {
    let mission = state.missions.create(payload.name, payload.engine, payload.parameters);
    spawn_launch(state, mission.id.clone());
    (StatusCode::ACCEPTED, Json(mission_json(&mission)))
}

/// `GET /api/missions` — list all missions known to this process.
pub async fn list(State(state): State<AppState>) -> Json<Value> {
    let missions: Vec<Value> = state.missions.list().iter().map(mission_json).collect();
    Json(json!({ "missions": missions }))
}

/// `GET /api/missions/{id}`.
pub async fn get(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, StatusCode> {
    state.missions.get(&id).map(|m| Json(mission_json(&m))).ok_or(StatusCode::NOT_FOUND)
}

/// `POST /api/missions/{id}/commands` — `start`, `pause`, `resume`, or `abort`.
pub async fn command(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<MissionCommandRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let command = match payload.command.as_str() {
        "start" => MissionCommand::Start,
        "pause" => MissionCommand::Pause,
        "resume" => MissionCommand::Resume,
        "abort" => MissionCommand::Abort,
        other => {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(json!({"error": format!("unknown mission command '{other}'"), "error_code": "INVALID_FORMAT"})),
            ));
        }
    };

    match state.missions.command(&id, command).await {
        Ok(mission) => Ok(Json(mission_json(&mission))),
        Err(MissionError::NotFound) => Err((
            StatusCode::NOT_FOUND,
            Json(json!({"error": "mission not found", "error_code": "INVALID_FORMAT"})),
        )),
        Err(e @ MissionError::InvalidTransition { .. }) => Err((
            StatusCode::CONFLICT,
            Json(json!({"error": e.to_string(), "error_code": "INVALID_FORMAT"})),
        )),
    }
}

fn mission_json(mission: &Mission) -> Value {
    json!({
        "id": mission.id,
        "name": mission.name,
        "engine": mission.engine,
        "status": mission.status,
        "created_at": mission.created_at,
        "parameters": mission.parameters,
        "brief_markdown": mission.brief_markdown,
        "brief_latex": mission.brief_latex,
        "error": mission.error,
    })
}

/// The launch procedure: invoke the engine's one-shot describe call as a
/// stand-in readiness probe, then flip the mission to `running` or `failed`.
///
/// A real engine launch would hand the mission a long-lived
/// [`crate::child::ChildProcess`] wired into a [`crate::session_supervisor::SessionSupervisor`];
/// that wiring happens at the WebSocket upgrade, not here — `POST /missions`
/// only stages the record so a subsequent control session can reference it.
fn spawn_launch(state: AppState, mission_id: String) {
    tokio::spawn(async move {
        let mission = match state.missions.get(&mission_id) {
            Some(m) => m,
            None => return,
        };
        let binary = format!("{}/{}", state.config.engine.binary_dir, mission.engine);
        match crate::oneshot::describe(&binary, &mission.engine, state.config.engine.describe_timeout_secs).await {
            Ok(_) => {
                info!(mission_id = %mission_id, "mission launch succeeded");
                state.missions.mark_running(&mission_id).await;
            }
            Err(e) => {
                error!(mission_id = %mission_id, error = %e, "mission launch failed");
                state.missions.mark_failed(&mission_id, e.to_string()).await;
            }
        }
    });
}
