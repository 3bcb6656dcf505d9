//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables** — `ENGSUP_LISTEN`, `ENGSUP_MAX_SESSIONS`,
//!    `ENGSUP_API_TOKEN`
//! 2. **Config file** — path via `--config <path>`, or `engsup.toml` in CWD
//! 3. **Compiled defaults** — see each field's default value below
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! [server]
//! listen = "0.0.0.0:8080"
//! max_sessions = 50
//! max_buffer_bytes = 10485760
//! idle_timeout_secs = 3600
//! command_timeout_secs = 60
//!
//! [auth]
//! tokens = ["a-pre-shared-token"]
//!
//! [engine]
//! binary_dir = "/opt/engines"
//! analysis_binary = "/opt/engines/bin/analyze"
//! describe_timeout_secs = 10
//! analysis_timeout_secs = 300
//! benign_stderr_patterns = ["Initializing", "Loaded physics tables"]
//!
//! [fs]
//! browse_root = "/var/lib/engsup/missions"
//!
//! [logging]
//! level = "info"
//! ```

use serde::Deserialize;
use std::path::Path;

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub fs: FsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP/WebSocket server and resource-limit settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Socket address to bind (default `0.0.0.0:8080`).
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Maximum concurrent TCP connections (default 256).
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// `MAX_SESSIONS` — maximum concurrent control sessions (default 50).
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// `MAX_BUFFER` — per-session stdout accumulator cap in bytes (default 10 MiB).
    #[serde(default = "default_max_buffer_bytes")]
    pub max_buffer_bytes: usize,
    /// `IDLE_TIMEOUT` — seconds of client quiescence before teardown (default 3600).
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// `COMMAND_TIMEOUT` — per-command response deadline in seconds (default 60).
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    /// Outbound client-channel high-water mark before a session is torn down
    /// as a slow consumer (default 1024 queued messages).
    #[serde(default = "default_outbound_high_water_mark")]
    pub outbound_high_water_mark: usize,
}

/// Authentication settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Pre-shared bearer tokens. If empty, a fresh token is minted at startup
    /// and logged once.
    #[serde(default)]
    pub tokens: Vec<String>,
}

/// Engine CLI invocation settings.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Directory containing engine CLI executables, one per recognized engine name.
    #[serde(default = "default_binary_dir")]
    pub binary_dir: String,
    /// Path to the short-lived analysis helper binary.
    #[serde(default = "default_analysis_binary")]
    pub analysis_binary: String,
    /// Path to the symbolic/tutorial helper binary (thin adapters, §6.5).
    #[serde(default = "default_helper_binary")]
    pub helper_binary: String,
    /// Bounded wait for `OneShotExecutor` (`--describe`) in seconds (default 10).
    #[serde(default = "default_describe_timeout_secs")]
    pub describe_timeout_secs: u64,
    /// Bounded wait for `AnalysisInvoker` in seconds (default 300).
    #[serde(default = "default_analysis_timeout_secs")]
    pub analysis_timeout_secs: u64,
    /// Engine names recognized by `GET /api/engines`.
    #[serde(default = "default_engine_names")]
    pub engine_names: Vec<String>,
    /// Stderr substrings treated as benign banner/performance output, logged
    /// only instead of forwarded to the client as `CLI_STDERR`.
    #[serde(default = "default_benign_stderr_patterns")]
    pub benign_stderr_patterns: Vec<String>,
}

/// File-browsing settings.
#[derive(Debug, Clone, Deserialize)]
pub struct FsConfig {
    /// Base directory that `GET /api/fs` listings are rooted at and may not escape.
    #[serde(default = "default_browse_root")]
    pub browse_root: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG` env var.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_max_connections() -> usize {
    256
}
fn default_max_sessions() -> usize {
    50
}
fn default_max_buffer_bytes() -> usize {
    10 * 1024 * 1024
}
fn default_idle_timeout_secs() -> u64 {
    3600
}
fn default_command_timeout_secs() -> u64 {
    60
}
fn default_outbound_high_water_mark() -> usize {
    1024
}
fn default_binary_dir() -> String {
    "/opt/engines".to_string()
}
fn default_analysis_binary() -> String {
    "/opt/engines/bin/analyze".to_string()
}
fn default_helper_binary() -> String {
    "/opt/engines/bin/helper".to_string()
}
fn default_describe_timeout_secs() -> u64 {
    10
}
fn default_analysis_timeout_secs() -> u64 {
    300
}
fn default_engine_names() -> Vec<String> {
    vec!["default".to_string()]
}
fn default_benign_stderr_patterns() -> Vec<String> {
    vec![
        "Initializing".to_string(),
        "Loaded physics tables".to_string(),
        "Warming up".to_string(),
    ]
}
fn default_browse_root() -> String {
    "/var/lib/engsup/missions".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_connections: default_max_connections(),
            max_sessions: default_max_sessions(),
            max_buffer_bytes: default_max_buffer_bytes(),
            idle_timeout_secs: default_idle_timeout_secs(),
            command_timeout_secs: default_command_timeout_secs(),
            outbound_high_water_mark: default_outbound_high_water_mark(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self { tokens: Vec::new() }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            binary_dir: default_binary_dir(),
            analysis_binary: default_analysis_binary(),
            helper_binary: default_helper_binary(),
            describe_timeout_secs: default_describe_timeout_secs(),
            analysis_timeout_secs: default_analysis_timeout_secs(),
            engine_names: default_engine_names(),
            benign_stderr_patterns: default_benign_stderr_patterns(),
        }
    }
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            browse_root: default_browse_root(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `Some`, reads that file (panics on failure). Otherwise looks
    /// for `engsup.toml` in the current directory, falling back to compiled defaults.
    pub fn load(path: Option<&str>) -> Self {
        let mut config = if let Some(p) = path {
            let content = std::fs::read_to_string(p)
                .unwrap_or_else(|e| panic!("Failed to read config file {p}: {e}"));
            toml::from_str(&content)
                .unwrap_or_else(|e| panic!("Failed to parse config file {p}: {e}"))
        } else if Path::new("engsup.toml").exists() {
            let content =
                std::fs::read_to_string("engsup.toml").expect("Failed to read engsup.toml");
            toml::from_str(&content).expect("Failed to parse engsup.toml")
        } else {
            Config {
                server: ServerConfig::default(),
                auth: AuthConfig::default(),
                engine: EngineConfig::default(),
                fs: FsConfig::default(),
                logging: LoggingConfig::default(),
            }
        };

        if let Ok(listen) = std::env::var("ENGSUP_LISTEN") {
            config.server.listen = listen;
        }
        if let Ok(max_sessions) = std::env::var("ENGSUP_MAX_SESSIONS") {
            if let Ok(n) = max_sessions.parse() {
                config.server.max_sessions = n;
            }
        }
        if let Ok(token) = std::env::var("ENGSUP_API_TOKEN") {
            config.auth.tokens.push(token);
        }

        config
    }

    /// Validate cross-field invariants. Returns a list of human-readable errors.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.server.max_sessions == 0 {
            errors.push("server.max_sessions must be greater than 0".to_string());
        }
        if self.server.max_buffer_bytes == 0 {
            errors.push("server.max_buffer_bytes must be greater than 0".to_string());
        }
        errors
    }
}
