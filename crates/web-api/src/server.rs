use crate::{handlers, websocket};
use axum::{routing::get, Router};
use qtrade_alpaca::RequestExecutor;
use qtrade_bot_orchestrator::DashboardStatus;
use qtrade_core::{BotEvent, Shutdown};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub status: watch::Receiver<DashboardStatus>,
    pub events: broadcast::Sender<BotEvent>,
    pub executor: Arc<RequestExecutor>,
    pub shutdown: Shutdown,
}

pub struct ApiServer {
    state: AppState,
}

impl ApiServer {
    #[must_use]
    pub const fn new(state: AppState) -> Self {
        Self { state }
    }

    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .route("/health", get(handlers::health))
            .route("/api/status", get(handlers::get_status))
            .route("/api/rate-limits", get(handlers::get_rate_limits))
            .route("/ws", get(websocket::websocket_handler))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Serves the dashboard API until shutdown is signalled.
    ///
    /// # Errors
    /// Returns an error if the server fails to bind to the address or serve requests.
    pub async fn serve(self, addr: &str) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        self.serve_on(listener).await
    }

    /// Serves on an already bound listener.
    ///
    /// # Errors
    /// Returns an error if serving fails.
    pub async fn serve_on(self, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
        tracing::info!("Web API listening on {}", listener.local_addr()?);

        let mut shutdown = self.state.shutdown.clone();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { shutdown.wait().await })
            .await?;

        tracing::info!("Web API stopped");
        Ok(())
    }
}
