//! HTTP shell: `GET /` liveness and `POST /audit`, which runs the agent over a
//! clause. The agent is loaded in the background after the listener binds.

mod error;
mod handlers;
mod state;

use std::sync::{Arc, Mutex};

use anyhow::Context;
use axum::Router;
use axum::routing::{get, post};
use documind_agent::AgentPipeline;
use documind_core::ServerConfig;
use tokio::net::TcpListener;
use tracing::{error, info};

pub use error::ApiError;
pub use handlers::{MIN_TEXT_CHARS, RootResponse};
pub use state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/audit", post(handlers::audit))
        .with_state(state)
}

/// Bind, start loading the agent with `load`, and serve until Ctrl-C. A
/// failed load stops the server and is returned as the error.
pub async fn serve<F>(config: &ServerConfig, load: F) -> anyhow::Result<()>
where
    F: FnOnce() -> anyhow::Result<AgentPipeline> + Send + 'static,
{
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(addr = %listener.local_addr()?, "DocuMind API listening");

    let state = AppState::default();
    let (failed_tx, failed_rx) = tokio::sync::oneshot::channel::<anyhow::Error>();
    let slot = state.clone();
    tokio::spawn(async move {
        info!(">>> STARTUP: Loading AI models <<<");
        let loaded = match tokio::task::spawn_blocking(load).await {
            Ok(result) => result,
            Err(e) => Err(anyhow::anyhow!("model loading task panicked: {e}")),
        };
        match loaded {
            Ok(agent) => {
                slot.install(agent);
                info!(">>> STARTUP: Models loaded successfully <<<");
            }
            Err(e) => {
                error!("failed to load AI models: {e:#}");
                let _ = failed_tx.send(e);
            }
        }
    });

    let failure: Arc<Mutex<Option<anyhow::Error>>> = Arc::default();
    let failure_slot = Arc::clone(&failure);
    let shutdown = async move {
        tokio::select! {
            result = failed_rx => match result {
                Ok(e) => {
                    if let Ok(mut slot) = failure_slot.lock() {
                        *slot = Some(e);
                    }
                }
                // Loaded fine; keep serving until Ctrl-C.
                Err(_) => {
                    let _ = tokio::signal::ctrl_c().await;
                }
            },
            _ = tokio::signal::ctrl_c() => {}
        }
        info!("shutting down");
    };

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("serving HTTP")?;

    let failed = failure.lock().ok().and_then(|mut slot| slot.take());
    match failed {
        Some(e) => Err(e.context("AI models failed to load")),
        None => Ok(()),
    }
}
