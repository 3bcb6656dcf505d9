//! The session supervisor: one instance per accepted control session,
//! composing a [`ChildProcess`], a [`LineFramer`], a [`FrameClassifier`],
//! and the three concurrently scheduled activities described below.
//!
//! There is no single teacher file this generalizes cleanly from — the
//! reference server's closest analogue, `ws::mod::handle_ws`, hardcodes a
//! `tokio::select!` over a client websocket and a broadcast receiver for
//! shell sessions it does not itself own. The shape (one `select!` loop per
//! connection, a send task forwarding an mpsc channel to the socket) is
//! kept; what it's selecting over is rebuilt for a single owned child
//! process instead of a session pool.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::child::{ChildProcess, ExitOutcome, TerminationMode};
use crate::framing::{classify, Classified, LineFramer};
use crate::subscribers::SubscriberRegistry;

/// Why a session ended. Each variant maps to a WebSocket close code per the
/// error taxonomy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    ClientInitiated,
    ChildExited(i32),
    Overflow,
    IdleTimeout,
    PeerWriteFailure,
    StdinWriteFailure,
}

impl CloseReason {
    /// The WebSocket close code a caller should send when tearing down the
    /// socket for this reason.
    pub fn ws_close_code(&self) -> u16 {
        match self {
            Self::ClientInitiated | Self::ChildExited(_) | Self::IdleTimeout => 1000,
            Self::Overflow => 1009,
            Self::PeerWriteFailure | Self::StdinWriteFailure => 1000,
        }
    }

    pub fn reason_text(&self) -> String {
        match self {
            Self::ClientInitiated => "client closed".to_string(),
            Self::ChildExited(code) => format!("engine exited with code {code}"),
            Self::Overflow => "stdout buffer overflow".to_string(),
            Self::IdleTimeout => "idle timeout".to_string(),
            Self::PeerWriteFailure => "client write failed".to_string(),
            Self::StdinWriteFailure => "engine stdin write failed".to_string(),
        }
    }
}

/// Tunable knobs for one supervised session, sourced from [`crate::config::ServerConfig`].
pub struct SupervisorConfig {
    pub idle_timeout: Duration,
    pub command_timeout: Duration,
    pub max_stderr_buffer: usize,
    pub benign_stderr_patterns: Vec<String>,
}

/// Owns a spawned engine process for the lifetime of one control session.
pub struct SessionSupervisor {
    child: ChildProcess,
    stdout_framer: LineFramer,
    stderr_framer: LineFramer,
    subscribers: SubscriberRegistry,
    config: SupervisorConfig,
}

impl SessionSupervisor {
    pub fn new(child: ChildProcess, subscribers: SubscriberRegistry, config: SupervisorConfig, max_buffer_bytes: usize) -> Self {
        Self {
            child,
            stdout_framer: LineFramer::new(max_buffer_bytes),
            stderr_framer: LineFramer::new(config.max_stderr_buffer),
            subscribers,
            config,
        }
    }

    /// Run the session to completion. `inbound` carries decoded client
    /// messages (one JSON value per WebSocket text frame); `outbound`
    /// carries JSON values this session wants delivered to its own client.
    /// The caller owns the actual socket and is expected to translate
    /// `outbound` values into text frames and the returned [`CloseReason`]
    /// into a close frame.
    pub async fn run(mut self, mut inbound: mpsc::Receiver<Value>, outbound: mpsc::Sender<Value>) -> CloseReason {
        let pid = self.child.pid();
        let welcome = json!({"status": "connected", "message": "session ready", "pid": pid});
        if self.send(&outbound, welcome).await.is_err() {
            self.child.abort_tasks();
            return CloseReason::PeerWriteFailure;
        }

        let mut stdout_rx = self.child.stdout_reader().expect("stdout reader taken exactly once");
        let mut stderr_rx = self.child.stderr_reader().expect("stderr reader taken exactly once");
        let mut exit_rx = self.child.exit_channel().expect("exit channel taken exactly once");

        // FIFO queue of outstanding command deadlines. The engine's wire
        // protocol carries no request ids, so a response is assumed to
        // satisfy the oldest still-pending command.
        let mut pending: VecDeque<(String, Instant)> = VecDeque::new();
        let mut timeout_ids: HashMap<String, ()> = HashMap::new();

        let idle_sleep = tokio::time::sleep(self.config.idle_timeout);
        tokio::pin!(idle_sleep);
        let mut command_tick = tokio::time::interval(Duration::from_secs(1));

        let close_reason = loop {
            tokio::select! {
                biased;

                maybe_msg = inbound.recv() => {
                    match maybe_msg {
                        Some(value) => {
                            idle_sleep.as_mut().reset(Instant::now() + self.config.idle_timeout);
                            match self.handle_client_message(value, &outbound, &mut pending).await {
                                Ok(()) => {}
                                Err(reason) => break reason,
                            }
                        }
                        None => break CloseReason::ClientInitiated,
                    }
                }

                chunk = stdout_rx.recv() => {
                    if let Some(bytes) = chunk {
                        match self.handle_stdout_chunk(&bytes, &outbound, &mut pending, &mut timeout_ids).await {
                            Ok(None) => {}
                            Ok(Some(reason)) => break reason,
                            Err(reason) => break reason,
                        }
                    }
                }

                chunk = stderr_rx.recv() => {
                    if let Some(bytes) = chunk {
                        if self.handle_stderr_chunk(&bytes, &outbound).await.is_err() {
                            break CloseReason::PeerWriteFailure;
                        }
                    }
                }

                exit = &mut exit_rx => {
                    let outcome = exit.unwrap_or(ExitOutcome::Signaled(None));
                    let code = match outcome {
                        ExitOutcome::Exited(code) => code,
                        ExitOutcome::Signaled(_) => -1,
                    };
                    let _ = self.send(&outbound, json!({
                        "status": "error",
                        "error": format!("engine exited with code {code}"),
                        "error_code": "CLI_EXITED",
                        "exit_code": code,
                    })).await;
                    break CloseReason::ChildExited(code);
                }

                () = &mut idle_sleep => {
                    break CloseReason::IdleTimeout;
                }

                _ = command_tick.tick() => {
                    self.expire_commands(&outbound, &mut pending, &mut timeout_ids).await;
                }
            }
        };

        // Destroying the session must terminate the child, for every reason
        // except the child already having exited on its own. Overflow skips
        // straight to Hard since a runaway stdout producer isn't expected to
        // respond to SIGTERM; everything else gets a soft termination first
        // and a bounded wait for the exit channel before escalating.
        match close_reason {
            CloseReason::ChildExited(_) => {}
            CloseReason::Overflow => self.child.terminate(TerminationMode::Hard),
            _ => {
                self.child.terminate(TerminationMode::Soft);
                if tokio::time::timeout(Duration::from_secs(3), &mut exit_rx).await.is_err() {
                    self.child.terminate(TerminationMode::Hard);
                }
            }
        }
        self.child.abort_tasks();
        info!(pid, reason = ?close_reason, "session closed");
        close_reason
    }

    /// Activity A: client → child relay.
    async fn handle_client_message(
        &self,
        value: Value,
        outbound: &mpsc::Sender<Value>,
        pending: &mut VecDeque<(String, Instant)>,
    ) -> Result<(), CloseReason> {
        let Some(object) = value.as_object() else {
            self.send(outbound, invalid_format()).await?;
            return Ok(());
        };

        let command = object.get("command").and_then(Value::as_str);
        let params_present = object.get("params").is_some_and(|p| !p.is_null());
        let (Some(command), true) = (command, params_present) else {
            self.send(outbound, invalid_format()).await?;
            return Ok(());
        };
        if command.is_empty() {
            self.send(outbound, invalid_format()).await?;
            return Ok(());
        }

        let request_id = Uuid::new_v4().to_string();
        let line = serde_json::to_vec(&value).expect("JSON values always serialize");

        if self.child.write_line(&line).await.is_err() {
            return Err(CloseReason::StdinWriteFailure);
        }
        pending.push_back((request_id, Instant::now() + self.config.command_timeout));
        Ok(())
    }

    /// Activity B (stdout half): child → client demux.
    async fn handle_stdout_chunk(
        &mut self,
        bytes: &[u8],
        outbound: &mpsc::Sender<Value>,
        pending: &mut VecDeque<(String, Instant)>,
        timeout_ids: &mut HashMap<String, ()>,
    ) -> Result<Option<CloseReason>, CloseReason> {
        let result = self.stdout_framer.ingest(bytes);
        if result.overflow {
            self.send(outbound, json!({
                "status": "error",
                "error": "stdout accumulator exceeded its configured cap",
                "error_code": "BUFFER_OVERFLOW",
            }))
            .await?;
            return Ok(Some(CloseReason::Overflow));
        }

        for frame in result.frames {
            match classify(&frame) {
                None => {}
                Some(Classified::Telemetry(obj)) => {
                    let wrapped = json!({"type": "metrics:update", "data": obj});
                    self.send(outbound, wrapped.clone()).await?;
                    self.subscribers.broadcast(wrapped);
                }
                Some(Classified::Response(obj)) => {
                    if let Some((id, _deadline)) = pending.pop_front() {
                        timeout_ids.remove(&id);
                    }
                    self.send(outbound, obj).await?;
                }
                Some(Classified::Malformed) => {
                    warn!(frame = %truncate_for_log(&frame), "malformed stdout frame dropped");
                }
            }
        }
        Ok(None)
    }

    /// Activity B (stderr half): benign-pattern filtering and forwarding.
    async fn handle_stderr_chunk(&mut self, bytes: &[u8], outbound: &mpsc::Sender<Value>) -> Result<(), CloseReason> {
        let result = self.stderr_framer.ingest(bytes);
        for frame in result.frames {
            let text = String::from_utf8_lossy(&frame);
            let trimmed = text.trim();
            if trimmed.is_empty() {
                continue;
            }
            if self.config.benign_stderr_patterns.iter().any(|pat| trimmed.contains(pat.as_str())) {
                info!(stderr = %trimmed, "benign stderr line");
                continue;
            }
            self.send(outbound, json!({
                "status": "error",
                "error": trimmed,
                "error_code": "CLI_STDERR",
            }))
            .await?;
        }
        Ok(())
    }

    /// Activity C helper: sweep expired command deadlines and notify the
    /// client without tearing down the session.
    async fn expire_commands(
        &self,
        outbound: &mpsc::Sender<Value>,
        pending: &mut VecDeque<(String, Instant)>,
        timeout_ids: &mut HashMap<String, ()>,
    ) {
        let now = Instant::now();
        while let Some((id, deadline)) = pending.front() {
            if *deadline > now {
                break;
            }
            let id = id.clone();
            pending.pop_front();
            if timeout_ids.insert(id.clone(), ()).is_none() {
                let _ = self
                    .send(outbound, json!({
                        "status": "error",
                        "error": "command deadline expired; the session remains open",
                        "error_code": "TIMEOUT",
                        "request_id": id,
                    }))
                    .await;
            }
        }
    }

    async fn send(&self, outbound: &mpsc::Sender<Value>, value: Value) -> Result<(), CloseReason> {
        outbound.send(value).await.map_err(|_| CloseReason::PeerWriteFailure)
    }
}

fn invalid_format() -> Value {
    json!({
        "status": "error",
        "error": "expected a JSON object with non-empty `command` and `params`",
        "error_code": "INVALID_FORMAT",
    })
}

fn truncate_for_log(bytes: &[u8]) -> String {
    const MAX: usize = 256;
    let text = String::from_utf8_lossy(bytes);
    if text.chars().count() <= MAX {
        text.into_owned()
    } else {
        let head: String = text.chars().take(MAX).collect();
        format!("{head}...<{} bytes total>", text.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_reasons_map_to_taxonomy_codes() {
        assert_eq!(CloseReason::Overflow.ws_close_code(), 1009);
        assert_eq!(CloseReason::IdleTimeout.ws_close_code(), 1000);
        assert_eq!(CloseReason::ChildExited(1).ws_close_code(), 1000);
    }

    #[test]
    fn invalid_format_message_has_the_right_error_code() {
        let msg = invalid_format();
        assert_eq!(msg["error_code"], "INVALID_FORMAT");
    }

    #[test]
    fn truncate_for_log_caps_long_frames() {
        let long = vec![b'x'; 1000];
        let truncated = truncate_for_log(&long);
        assert!(truncated.len() < 1000);
        assert!(truncated.contains("bytes total"));
    }
}
