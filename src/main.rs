#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # engsup
//!
//! Session-scoped subprocess supervisor and stream multiplexer fronting an
//! external native simulation engine CLI. engsup exposes HTTP and WebSocket
//! APIs that let a client spawn and drive an engine process, subscribe to its
//! telemetry, run one-shot introspection and analysis helpers, and browse the
//! read-only mission filesystem — all protected by a pre-shared bearer token.
//!
//! ## Subcommands
//!
//! - `engsup serve` (default) — run the HTTP/WS server

use axum::{middleware, routing::get, Extension, Router};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use engsup::{auth, config::Config, routes, state::AppState, ws};

/// Session-scoped subprocess supervisor fronting an external simulation engine CLI.
#[derive(Parser)]
#[command(name = "engsup", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP/WS server (default when no subcommand given).
    Serve {
        /// Path to TOML config file.
        #[arg(long)]
        config: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Serve { config }) => run_server(config.as_deref()).await,
        None => {
            // Backward compat: no subcommand but --config may be passed.
            let args: Vec<String> = std::env::args().collect();
            let config_path = args
                .windows(2)
                .find(|w| w[0] == "--config")
                .map(|w| w[1].clone());
            run_server(config_path.as_deref()).await;
        }
    }
}

async fn run_server(config_path: Option<&str>) {
    let config = Config::load(config_path);

    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    let validation_errors = config.validate();
    if !validation_errors.is_empty() {
        for err in &validation_errors {
            tracing::error!("Config error: {err}");
        }
        std::process::exit(1);
    }

    info!("engsup v{} starting", env!("CARGO_PKG_VERSION"));
    info!("Listening on {}", config.server.listen);
    info!(
        "Engines: {:?} (binary_dir: {})",
        config.engine.engine_names, config.engine.binary_dir
    );

    let state = AppState::new(config);

    // Public routes: no auth required.
    let public_routes = Router::new().route("/api/health", get(routes::health::health));

    // Authenticated HTTP surface.
    let authed_routes = Router::new()
        .route("/api/engines", get(routes::engines::list_engines))
        .route("/api/engines/{name}", get(routes::engines::describe_engine))
        .route("/api/fs", get(routes::fs::list))
        .route("/api/analysis", axum::routing::post(routes::analysis::run))
        .route("/api/symbolic", axum::routing::post(routes::adapters::symbolic))
        .route("/api/tutorial", axum::routing::post(routes::adapters::tutorial))
        .route(
            "/api/missions",
            get(routes::missions::list).post(routes::missions::create),
        )
        .route("/api/missions/{id}", get(routes::missions::get))
        .route(
            "/api/missions/{id}/commands",
            axum::routing::post(routes::missions::command),
        )
        .layer(middleware::from_fn(auth::require_bearer_token));

    // The control and metrics WebSocket upgrades authenticate themselves
    // (query param or header) before completing the handshake, since the
    // `require_bearer_token` middleware can't run ahead of an upgrade that a
    // browser initiated without custom headers.
    let ws_routes = Router::new()
        .route("/", get(ws::control_upgrade))
        .route("/metrics", get(ws::metrics_upgrade))
        .route("/ws/metrics", get(ws::metrics_upgrade));

    // GUARD: Headers must be listed explicitly — `allow_headers(Any)` works in
    // Chrome but Firefox rejects credentialed requests without explicit listing.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::header::ACCEPT,
        ]);

    // GUARD: .layer() only applies to routes merged BEFORE the call.
    let app = Router::new()
        .merge(public_routes)
        .merge(authed_routes)
        .merge(ws_routes)
        .layer(Extension(state.tokens.clone()))
        .with_state(state.clone())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(tower::limit::ConcurrencyLimitLayer::new(
            state.config.server.max_connections,
        ));

    let listener = TcpListener::bind(&state.config.server.listen)
        .await
        .expect("Failed to bind");

    info!("Server ready");

    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("Failed to register SIGTERM");
            tokio::select! {
                _ = ctrl_c => info!("Received SIGINT"),
                _ = sigterm.recv() => info!("Received SIGTERM"),
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            info!("Received SIGINT");
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .expect("Server error");

    // Graceful shutdown only waits for in-flight HTTP/WS connections to
    // finish on their own; a control session's engine subprocess outlives
    // its connection unless something reaps it here.
    state.active_sessions.kill_all().await;

    info!("Shutting down...");
}
