//! Process-scoped mission registry.
//!
//! Grounded in `sessions::SessionManager`'s `Arc<RwLock<HashMap<...>>>` pool
//! shape, narrowed to this surface's requirements: no journaling, no
//! persistent/PTY distinction, and per-mission serialization via a mutex on
//! the individual record rather than holding the registry's write lock
//! across a launch procedure that may itself take a while.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

/// Mission lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MissionStatus {
    Pending,
    Running,
    Paused,
    Terminated,
    Failed,
}

/// A mission record.
#[derive(Debug, Clone, Serialize)]
pub struct Mission {
    pub id: String,
    pub name: String,
    pub engine: String,
    pub status: MissionStatus,
    pub created_at: u64,
    pub parameters: Value,
    pub brief_markdown: Option<String>,
    pub brief_latex: Option<String>,
    pub error: Option<String>,
}

/// Commands accepted against an existing mission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissionCommand {
    Start,
    Pause,
    Resume,
    Abort,
}

/// Why a mission command was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MissionError {
    NotFound,
    /// The command doesn't apply from the mission's current status.
    InvalidTransition { from: MissionStatus, command: MissionCommand },
}

impl std::fmt::Display for MissionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound => write!(f, "mission not found"),
            Self::InvalidTransition { from, command } => {
                write!(f, "command {command:?} invalid for mission in status {from:?}")
            }
        }
    }
}

struct MissionEntry {
    mission: Mission,
    /// Serializes command handling for this mission so two concurrent
    /// `start`/`abort` calls against the same id can't race each other.
    lock: Arc<Mutex<()>>,
}

/// Process-scoped mission registry. Cloneable — all clones share the same
/// inner map.
#[derive(Clone)]
pub struct MissionStore {
    missions: Arc<std::sync::RwLock<HashMap<String, MissionEntry>>>,
}

impl MissionStore {
    pub fn new() -> Self {
        Self {
            missions: Arc::new(std::sync::RwLock::new(HashMap::new())),
        }
    }

    /// Create a mission in `pending` status and return it immediately. The
    /// caller is expected to drive the async launch procedure separately
    /// (see [`MissionStore::mark_running`] / [`MissionStore::mark_failed`]).
    pub fn create(&self, name: String, engine: String, parameters: Value) -> Mission {
        let id = Uuid::new_v4().to_string();
        let mission = Mission {
            id: id.clone(),
            name,
            engine,
            status: MissionStatus::Pending,
            created_at: now_epoch_ms(),
            parameters,
            brief_markdown: None,
            brief_latex: None,
            error: None,
        };
        self.missions.write().expect("mission store poisoned").insert(
            id,
            MissionEntry {
                mission: mission.clone(),
                lock: Arc::new(Mutex::new(())),
            },
        );
        mission
    }

    pub fn get(&self, id: &str) -> Option<Mission> {
        self.missions
            .read()
            .expect("mission store poisoned")
            .get(id)
            .map(|entry| entry.mission.clone())
    }

    pub fn list(&self) -> Vec<Mission> {
        self.missions
            .read()
            .expect("mission store poisoned")
            .values()
            .map(|entry| entry.mission.clone())
            .collect()
    }

    /// Transition a pending mission to `running`. Called by the launch
    /// procedure on success.
    pub async fn mark_running(&self, id: &str) {
        self.with_lock(id, |mission| {
            mission.status = MissionStatus::Running;
        })
        .await;
    }

    /// Transition a pending mission to `failed`, recording `error`. Called
    /// by the launch procedure on failure.
    pub async fn mark_failed(&self, id: &str, error: String) {
        self.with_lock(id, |mission| {
            mission.status = MissionStatus::Failed;
            mission.error = Some(error);
        })
        .await;
    }

    /// Apply a lifecycle command to an existing mission.
    pub async fn command(&self, id: &str, command: MissionCommand) -> Result<Mission, MissionError> {
        let lock = {
            let missions = self.missions.read().expect("mission store poisoned");
            missions.get(id).map(|e| Arc::clone(&e.lock)).ok_or(MissionError::NotFound)?
        };
        let _guard = lock.lock().await;

        // Re-check existence under the per-mission lock: another command
        // (notably `abort`) may have removed the record while we waited.
        let from = {
            let missions = self.missions.read().expect("mission store poisoned");
            missions.get(id).map(|e| e.mission.status).ok_or(MissionError::NotFound)?
        };

        let new_status = match (from, command) {
            (MissionStatus::Pending | MissionStatus::Paused, MissionCommand::Start) => MissionStatus::Running,
            (MissionStatus::Running, MissionCommand::Pause) => MissionStatus::Paused,
            (MissionStatus::Paused, MissionCommand::Resume) => MissionStatus::Running,
            (_, MissionCommand::Abort) => MissionStatus::Terminated,
            _ => return Err(MissionError::InvalidTransition { from, command }),
        };

        if command == MissionCommand::Abort {
            let mut missions = self.missions.write().expect("mission store poisoned");
            let mut mission = missions
                .remove(id)
                .map(|e| e.mission)
                .ok_or(MissionError::NotFound)?;
            mission.status = new_status;
            info!(mission_id = %id, "mission aborted and removed");
            return Ok(mission);
        }

        let mut missions = self.missions.write().expect("mission store poisoned");
        let entry = missions.get_mut(id).ok_or(MissionError::NotFound)?;
        entry.mission.status = new_status;
        Ok(entry.mission.clone())
    }

    async fn with_lock(&self, id: &str, mutate: impl FnOnce(&mut Mission)) {
        let lock = {
            let missions = self.missions.read().expect("mission store poisoned");
            match missions.get(id) {
                Some(e) => Arc::clone(&e.lock),
                None => {
                    warn!(mission_id = %id, "launch completion for unknown mission");
                    return;
                }
            }
        };
        let _guard = lock.lock().await;
        let mut missions = self.missions.write().expect("mission store poisoned");
        if let Some(entry) = missions.get_mut(id) {
            mutate(&mut entry.mission);
        }
    }
}

impl Default for MissionStore {
    fn default() -> Self {
        Self::new()
    }
}

fn now_epoch_ms() -> u64 {
    #[allow(clippy::cast_possible_truncation)]
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn create_starts_pending() {
        let store = MissionStore::new();
        let mission = store.create("m1".to_string(), "default".to_string(), json!({}));
        assert_eq!(mission.status, MissionStatus::Pending);
    }

    #[tokio::test]
    async fn launch_completion_flips_to_running() {
        let store = MissionStore::new();
        let mission = store.create("m1".to_string(), "default".to_string(), json!({}));
        store.mark_running(&mission.id).await;
        assert_eq!(store.get(&mission.id).unwrap().status, MissionStatus::Running);
    }

    #[tokio::test]
    async fn launch_failure_flips_to_failed_with_error() {
        let store = MissionStore::new();
        let mission = store.create("m1".to_string(), "default".to_string(), json!({}));
        store.mark_failed(&mission.id, "boom".to_string()).await;
        let got = store.get(&mission.id).unwrap();
        assert_eq!(got.status, MissionStatus::Failed);
        assert_eq!(got.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn abort_removes_the_record() {
        let store = MissionStore::new();
        let mission = store.create("m1".to_string(), "default".to_string(), json!({}));
        store.command(&mission.id, MissionCommand::Abort).await.unwrap();
        assert!(store.get(&mission.id).is_none());
    }

    #[tokio::test]
    async fn command_on_unknown_mission_is_not_found() {
        let store = MissionStore::new();
        let err = store.command("nonexistent", MissionCommand::Start).await.unwrap_err();
        assert_eq!(err, MissionError::NotFound);
    }

    #[tokio::test]
    async fn invalid_transition_is_rejected() {
        let store = MissionStore::new();
        let mission = store.create("m1".to_string(), "default".to_string(), json!({}));
        let err = store.command(&mission.id, MissionCommand::Pause).await.unwrap_err();
        assert!(matches!(err, MissionError::InvalidTransition { .. }));
    }
}
