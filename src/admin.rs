//! `GET /health` aggregate status endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::registry::PodInfo;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub pods: std::collections::HashMap<String, Vec<PodInfo>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rolling_updates: Vec<String>,
    pub version: String,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let pods = state.registry.all_pods_info().await;
    let rolling_updates = state.registry.rolling_update_names().await;
    let total_healthy = state.registry.all_healthy_pods().await.len();

    let status = if total_healthy == 0 {
        "degraded"
    } else if !rolling_updates.is_empty() {
        "updating"
    } else {
        "healthy"
    };

    Json(HealthResponse {
        status,
        pods,
        rolling_updates,
        version: state.version.clone(),
    })
}
