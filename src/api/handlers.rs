// SPDX-License-Identifier: GPL-3.0-only
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use crate::extension::ExtensionRecord;
use crate::orchestrator::Orchestrator;
use crate::reconcile::{EngineStatus, SyncSummary};

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

/// Installed extension as reported over the API
#[derive(Debug, Serialize, Deserialize)]
pub struct ExtensionView {
    pub name: String,
    pub identifier: String,
    pub version: Option<String>,
    pub installed_at: Option<DateTime<Utc>>,
}

impl From<ExtensionRecord> for ExtensionView {
    fn from(record: ExtensionRecord) -> Self {
        Self {
            name: record.name,
            identifier: record.identifier,
            version: record.version.map(|v| v.to_string()),
            installed_at: record.installed_at,
        }
    }
}

pub struct ApiHandlers {
    orchestrator: Arc<Orchestrator>,
}

impl ApiHandlers {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }
}

impl ApiHandlers {
    pub async fn health() -> Json<ApiResponse<&'static str>> {
        Json(ApiResponse::success("ok"))
    }

    pub async fn list_extensions(&self) -> Result<Json<ApiResponse<Vec<ExtensionView>>>, StatusCode> {
        match self.orchestrator.installed() {
            Ok(installed) => Ok(Json(ApiResponse::success(
                installed.into_iter().map(ExtensionView::from).collect(),
            ))),
            Err(e) => {
                error!(error = %e, "Failed to list extensions");
                Err(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    pub async fn status(&self) -> Json<ApiResponse<EngineStatus>> {
        Json(ApiResponse::success(self.orchestrator.status()))
    }

    pub async fn sync(&self) -> Json<ApiResponse<SyncSummary>> {
        info!("Synchronization requested over the API");
        Json(ApiResponse::success(self.orchestrator.synchronize().await))
    }

    pub async fn save_settings(&self) -> Result<Json<ApiResponse<String>>, StatusCode> {
        if self.orchestrator.persist().await {
            let path = self.orchestrator.settings_path().await;
            info!(path = %path.display(), "Settings saved over the API");
            Ok(Json(ApiResponse::success(path.display().to_string())))
        } else {
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
