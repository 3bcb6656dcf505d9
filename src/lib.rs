#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::unused_async)]
#![allow(clippy::implicit_hasher)]
#![allow(clippy::redundant_closure_for_method_calls)]

//! engsup library — exposes the building blocks of the engine supervisor server.
//!
//! - `active_sessions` — live-session child registry, swept on shutdown
//! - `admission` — session admission control (`MAX_SESSIONS`) and credential gating
//! - `analysis` — bounded-wait analysis helper invocation
//! - `auth` — bearer-token registry and middleware
//! - `child` — subprocess adapter over a spawned engine process
//! - `config` — configuration loading
//! - `framing` — newline-delimited frame accumulation and classification
//! - `fs_browser` — read-only, containment-checked directory listing
//! - `missions` — process-scoped mission registry
//! - `oneshot` — bounded-wait `--describe` invocation
//! - `routes` — REST API route handlers
//! - `session_supervisor` — the control-session event loop
//! - `state` — shared application state
//! - `subscribers` — best-effort telemetry fan-out
//! - `ws` — WebSocket upgrade handling

pub mod active_sessions;
pub mod admission;
pub mod analysis;
pub mod auth;
pub mod child;
pub mod config;
pub mod framing;
pub mod fs_browser;
pub mod missions;
pub mod oneshot;
pub mod routes;
pub mod session_supervisor;
pub mod state;
pub mod subscribers;
pub mod ws;

// Re-export key types at crate root for convenience.
pub use admission::AdmissionController;
pub use auth::TokenRegistry;
pub use config::Config;
pub use state::AppState;
