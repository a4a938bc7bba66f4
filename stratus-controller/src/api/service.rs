//! Service API Handlers
//!
//! CRUD over service definitions held by the local backend.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use stratus_core::domain::service::Service;

use crate::api::AppState;
use crate::api::error::ApiResult;

// =============================================================================
// Service Management
// =============================================================================

/// POST /system/services
pub async fn create_service(
    State(state): State<AppState>,
    Json(service): Json<Service>,
) -> ApiResult<StatusCode> {
    tracing::info!(service = %service.name, "Creating service");

    state.backend.create_service(&service).await?;
    Ok(StatusCode::CREATED)
}

/// PUT /system/services
pub async fn update_service(
    State(state): State<AppState>,
    Json(service): Json<Service>,
) -> ApiResult<StatusCode> {
    tracing::info!(service = %service.name, "Updating service");

    state.backend.update_service(&service).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /system/services
pub async fn list_services(State(state): State<AppState>) -> ApiResult<Json<Vec<Service>>> {
    tracing::debug!("Listing services");

    let services = state.backend.list_services().await?;
    Ok(Json(services))
}

/// GET /system/services/{name}
pub async fn get_service(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<Service>> {
    tracing::debug!(service = %name, "Getting service");

    let service = state.backend.read_service(&name).await?;
    Ok(Json(service))
}

/// DELETE /system/services/{name}
pub async fn delete_service(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    tracing::info!(service = %name, "Deleting service");

    state.backend.delete_service(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}
