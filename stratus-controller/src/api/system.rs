//! System API Handlers
//!
//! Configuration and cluster-state endpoints for operators and peer
//! control planes.

use axum::{Json, extract::State};
use stratus_core::dto::cluster::{ClusterInfo, ClusterView};

use crate::api::AppState;
use crate::api::error::ApiResult;

/// GET /system/config
pub async fn get_config(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(state.config.public_view())
}

/// GET /system/status
///
/// Capacity report of this cluster, polled by peers to build their snapshots.
pub async fn get_status(State(state): State<AppState>) -> ApiResult<Json<ClusterInfo>> {
    tracing::debug!("Reporting cluster status");

    let mut info = state.backend.cluster_info().await?;
    info.name = state.config.name.clone();
    Ok(Json(info))
}

/// GET /system/clusters
pub async fn list_clusters(State(state): State<AppState>) -> Json<Vec<ClusterView>> {
    Json(state.manager.registry().views())
}
