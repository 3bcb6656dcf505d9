//! WebSocket transport: the control session upgrade (`/`) and the passive
//! metrics upgrade (`/metrics`).
//!
//! Grounded in `ws::mod::ws_upgrade`/`handle_ws`'s split-socket, send-task,
//! `tokio::select!` shape, but re-pointed at [`crate::session_supervisor::SessionSupervisor`]
//! instead of the reference server's shell session pool. The credential is
//! read from the query parameter or `Authorization` header (via
//! [`crate::auth::extract_credential`]) before the handshake, since this
//! surface accepts either form, but it is validated against the
//! [`crate::admission::AdmissionController`] only after `on_upgrade` —
//! see [`control_upgrade`] for why.

use std::time::Duration;

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::{header, HeaderMap},
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::admission::AdmissionError;
use crate::auth::extract_credential;
use crate::child::ChildProcess;
use crate::session_supervisor::{SessionSupervisor, SupervisorConfig};
use crate::AppState;

/// Query parameters accepted on either upgrade path.
#[derive(Deserialize)]
pub struct WsQuery {
    /// Bearer credential. Prefer the `Authorization` header when available;
    /// this exists because browsers can't set custom headers on a WebSocket
    /// upgrade request.
    pub token: Option<String>,
    /// Engine name to spawn for this control session. Defaults to the first
    /// configured engine.
    pub engine: Option<String>,
}

/// `GET /` (or `/ws`) — the control session upgrade. Spawns a new engine
/// process and hands it to a [`SessionSupervisor`].
///
/// Admission (credential check, capacity check) happens *after* the
/// WebSocket handshake completes, per §6.1: a rejected client still
/// receives a JSON error frame and a policy-level close code (1008 auth,
/// 1013 capacity) rather than a bare HTTP status, since by the time the
/// cap or credential is known the upgrade has already been requested over
/// the same socket the client is listening on for frames.
pub async fn control_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let credential = extract_credential(query.token.as_deref(), auth_header(&headers));
    let engine_name = query
        .engine
        .unwrap_or_else(|| state.config.engine.engine_names.first().cloned().unwrap_or_else(|| "default".to_string()));
    let binary = format!("{}/{engine_name}", state.config.engine.binary_dir);

    ws.on_upgrade(move |socket| async move {
        match state.admission.admit(credential.as_deref()) {
            Ok(slot) => handle_control_session(socket, state, slot, binary).await,
            Err(AdmissionError::MissingCredential | AdmissionError::InvalidCredential) => {
                reject_upgrade(socket, "missing or invalid credential", "AUTH_REQUIRED", 1008).await;
            }
            Err(AdmissionError::AtCapacity) => {
                reject_upgrade(socket, "server at capacity", "SERVER_BUSY", 1013).await;
            }
        }
    })
}

/// `GET /metrics` (or `/ws/metrics`) — the passive metrics upgrade. Does not
/// count against `MAX_SESSIONS`.
pub async fn metrics_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let credential = extract_credential(query.token.as_deref(), auth_header(&headers));

    ws.on_upgrade(move |socket| async move {
        if state.admission.check_credential(credential.as_deref()).is_err() {
            reject_upgrade(socket, "missing or invalid credential", "AUTH_REQUIRED", 1008).await;
            return;
        }
        handle_metrics_session(socket, state).await;
    })
}

/// Send the single error frame plus close code an already-upgraded socket
/// owes a rejected client, per §6.1 and the close-code table in §6.1.
async fn reject_upgrade(socket: WebSocket, error: &str, error_code: &str, close_code: u16) {
    let (mut sink, _stream) = socket.split();
    let frame = json!({"status": "error", "error": error, "error_code": error_code});
    let _ = sink.send(Message::Text(serde_json::to_string(&frame).unwrap_or_default())).await;
    let _ = sink
        .send(Message::Close(Some(CloseFrame {
            code: close_code,
            reason: error.to_string().into(),
        })))
        .await;
}

fn auth_header(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok())
}

async fn handle_control_session(
    socket: WebSocket,
    state: AppState,
    slot: crate::admission::SessionSlot,
    binary: String,
) {
    let child = match ChildProcess::spawn(&binary, &[], ".") {
        Ok(child) => child,
        Err(e) => {
            warn!(error = %e, binary, "failed to spawn engine for control session");
            let (mut sink, _stream) = socket.split();
            let _ = sink
                .send(Message::Text(
                    serde_json::to_string(&json!({
                        "status": "error",
                        "error": e.to_string(),
                        "error_code": "CLI_NOT_FOUND",
                    }))
                    .unwrap_or_default(),
                ))
                .await;
            let _ = sink
                .send(Message::Close(Some(CloseFrame {
                    code: 1011,
                    reason: "engine spawn failed".into(),
                })))
                .await;
            slot.release();
            return;
        }
    };

    let session_id = state.active_sessions.register(child.handle());

    let config = SupervisorConfig {
        idle_timeout: Duration::from_secs(state.config.server.idle_timeout_secs),
        command_timeout: Duration::from_secs(state.config.server.command_timeout_secs),
        max_stderr_buffer: state.config.server.max_buffer_bytes,
        benign_stderr_patterns: state.config.engine.benign_stderr_patterns.clone(),
    };
    let supervisor = SessionSupervisor::new(child, state.subscribers.clone(), config, state.config.server.max_buffer_bytes);

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Value>(state.config.server.outbound_high_water_mark);
    let (inbound_tx, inbound_rx) = mpsc::channel::<Value>(64);

    let (mut sink, mut stream) = socket.split();

    let send_task = tokio::spawn(async move {
        while let Some(value) = outbound_rx.recv().await {
            let text = serde_json::to_string(&value).unwrap_or_default();
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        sink
    });

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = stream.next().await {
            match msg {
                Message::Text(text) => {
                    let value = serde_json::from_str::<Value>(&text).unwrap_or(Value::Null);
                    if inbound_tx.send(value).await.is_err() {
                        break;
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    let close_reason = supervisor.run(inbound_rx, outbound_tx).await;
    state.active_sessions.remove(session_id);
    recv_task.abort();

    if let Ok(mut sink) = send_task.await {
        let _ = sink
            .send(Message::Close(Some(CloseFrame {
                code: close_reason.ws_close_code(),
                reason: close_reason.reason_text().into(),
            })))
            .await;
    }

    slot.release();
    info!("control session slot released");
}

async fn handle_metrics_session(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let _ = sink
        .send(Message::Text(
            serde_json::to_string(&json!({"status": "connected", "message": "subscribed to metrics"})).unwrap_or_default(),
        ))
        .await;

    let (id, mut rx) = state.subscribers.add(256);

    loop {
        tokio::select! {
            value = rx.recv() => {
                match value {
                    Some(value) => {
                        let text = serde_json::to_string(&value).unwrap_or_default();
                        if sink.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            // Passive subscribers never send meaningful frames, but reading
            // the stream is what notices a client-initiated disconnect.
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    state.subscribers.remove(id);
}
