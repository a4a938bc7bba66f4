//! API Module
//!
//! HTTP API layer of the control plane.
//! Each submodule handles endpoints for a specific domain.

pub mod auth;
pub mod error;
pub mod health;
pub mod job;
pub mod service;
pub mod system;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::backend::ServerlessBackend;
use crate::config::Config;
use crate::router::InvocationRouter;
use crate::scheduler::ResourceManager;

/// Shared state of every handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub backend: Arc<dyn ServerlessBackend>,
    pub manager: Arc<ResourceManager>,
    pub router: Arc<InvocationRouter>,
}

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    let system = Router::new()
        .route("/config", get(system::get_config))
        .route("/status", get(system::get_status))
        .route("/clusters", get(system::list_clusters))
        // Service endpoints
        .route(
            "/services",
            get(service::list_services)
                .post(service::create_service)
                .put(service::update_service),
        )
        .route(
            "/services/{name}",
            get(service::get_service).delete(service::delete_service),
        )
        // Job endpoints
        .route(
            "/jobs",
            get(job::list_jobs).delete(job::delete_service_jobs),
        )
        .route("/jobs/{id}", get(job::get_job).delete(job::delete_job))
        .route("/jobs/{id}/logs", get(job::get_job_logs))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_basic_auth,
        ));

    let mut app = Router::new()
        // Health check
        .route("/health", get(health::health_check))
        .route("/job/{service}", post(job::admit_job))
        .nest("/system", system);

    if state.router.supports_sync() {
        app = app.route("/run/{service}", post(job::run_service));
    }

    // Add state and middleware
    app.with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
