//! Shared application state passed to every handler via Axum's `State` extractor.

use std::sync::Arc;
use std::time::Instant;

use crate::active_sessions::ActiveSessions;
use crate::admission::AdmissionController;
use crate::auth::TokenRegistry;
use crate::config::Config;
use crate::fs_browser::FileBrowser;
use crate::missions::MissionStore;
use crate::subscribers::SubscriberRegistry;

/// Shared application state for the engine supervisor server.
#[derive(Clone)]
pub struct AppState {
    /// Immutable configuration loaded at startup.
    pub config: Arc<Config>,
    /// Monotonic instant when the server started (for uptime calculation).
    pub start_time: Instant,
    /// Valid bearer tokens for the control and metrics upgrade paths.
    pub tokens: TokenRegistry,
    /// Enforces `MAX_SESSIONS` and fronts the token check for control-session upgrades.
    pub admission: AdmissionController,
    /// Passive metrics subscribers, fed by every session's telemetry frames.
    pub subscribers: SubscriberRegistry,
    /// Process-scoped mission registry.
    pub missions: MissionStore,
    /// Read-only directory browser rooted at `config.fs.browse_root`.
    pub fs_browser: FileBrowser,
    /// Live control sessions' engine handles, swept on shutdown.
    pub active_sessions: ActiveSessions,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let tokens = TokenRegistry::new(config.auth.tokens.clone());
        let admission = AdmissionController::new(tokens.clone(), config.server.max_sessions);
        let fs_browser = FileBrowser::new(config.fs.browse_root.clone());
        Self {
            config: Arc::new(config),
            start_time: Instant::now(),
            tokens,
            admission,
            subscribers: SubscriberRegistry::new(),
            missions: MissionStore::new(),
            fs_browser,
            active_sessions: ActiveSessions::new(),
        }
    }
}
