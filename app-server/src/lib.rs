//! HTTP surface of the execution engine: a WebSocket endpoint speaking the
//! run/stdin/kill protocol and a health probe.

mod args;
mod websocket;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::routing::get;
use nospace_core::Config;
use nospace_core::SessionRegistry;
use serde_json::Value;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::info;

pub use args::ConfigArgs;
pub use args::DEFAULT_PORT;
pub use args::ServeArgs;

/// Shared across connections. Each connection still gets its own backend.
#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: SessionRegistry,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            registry: SessionRegistry::new(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(websocket::ws_handler))
        .route("/healthz", get(healthz))
        .with_state(state)
}

async fn healthz(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "backend": state.config.backend.to_string(),
        "activeSessions": state.registry.len(),
    }))
}

/// Loads configuration from `args` and serves until Ctrl-C.
pub async fn run_main(args: ServeArgs) -> anyhow::Result<()> {
    let addr = SocketAddr::new(args.host, args.port);
    let config = args.config.load()?;
    info!(
        interpreter = %config.interpreter_path.display(),
        timeout_secs = config.timeout.as_secs(),
        max_processes = config.max_processes,
        backend = %config.backend,
        "⚙️ [server] configuration loaded"
    );

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("🚀 [server] listening on ws://{addr}/ws");

    axum::serve(listener, router(AppState::new(config)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    info!("[server] stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "[server] failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
