// SPDX-License-Identifier: GPL-3.0-only
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use crate::api::handlers::{ApiHandlers, ApiResponse, ExtensionView};
use crate::orchestrator::Orchestrator;
use crate::reconcile::{EngineStatus, SyncSummary};

pub struct HttpServer {
    handlers: ApiHandlers,
    addr: SocketAddr,
}

impl HttpServer {
    pub fn new(orchestrator: Arc<Orchestrator>, addr: SocketAddr) -> Self {
        Self {
            handlers: ApiHandlers::new(orchestrator),
            addr,
        }
    }

    pub async fn serve(self) -> anyhow::Result<()> {
        let handlers = Arc::new(self.handlers);

        let app = Router::new()
            .route("/api/health", get(ApiHandlers::health))
            .route("/api/extensions", get(list_extensions_handler))
            .route("/api/status", get(status_handler))
            .route("/api/sync", post(sync_handler))
            .route("/api/settings/save", post(save_settings_handler))
            .with_state(handlers);

        info!(addr = %self.addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(&self.addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}

async fn list_extensions_handler(
    State(handlers): State<Arc<ApiHandlers>>,
) -> Result<Json<ApiResponse<Vec<ExtensionView>>>, StatusCode> {
    handlers.list_extensions().await
}

async fn status_handler(State(handlers): State<Arc<ApiHandlers>>) -> Json<ApiResponse<EngineStatus>> {
    handlers.status().await
}

async fn sync_handler(State(handlers): State<Arc<ApiHandlers>>) -> Json<ApiResponse<SyncSummary>> {
    handlers.sync().await
}

async fn save_settings_handler(
    State(handlers): State<Arc<ApiHandlers>>,
) -> Result<Json<ApiResponse<String>>, StatusCode> {
    handlers.save_settings().await
}
