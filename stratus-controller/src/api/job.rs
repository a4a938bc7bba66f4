//! Job API Handlers
//!
//! Invocation entry points and job inspection.

use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use stratus_core::domain::job::Job;
use stratus_core::dto::job::{AdmitResponse, DELEGATED_HEADER, DeletedJobs, JobDetails};
use uuid::Uuid;

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};
use crate::router::{AdmitMode, AdmitOutcome};

// =============================================================================
// Invocation
// =============================================================================

/// POST /job/{service}
///
/// Asynchronous admission. Submissions carrying the delegation header come
/// from a peer control plane and are admitted pinned to this cluster.
pub async fn admit_job(
    State(state): State<AppState>,
    Path(service): Path<String>,
    headers: HeaderMap,
    payload: Bytes,
) -> ApiResult<Response> {
    let origin = match headers.get(DELEGATED_HEADER) {
        Some(value) => Some(
            value
                .to_str()
                .map_err(|_| ApiError::BadRequest(format!("invalid {} header", DELEGATED_HEADER)))?
                .to_string(),
        ),
        None => None,
    };

    tracing::debug!(service = %service, delegated = origin.is_some(), "Admitting job");

    if let Some(origin) = origin {
        let job = state
            .router
            .admit_delegated(&service, payload.to_vec(), &origin)
            .await?;
        return Ok(accepted(&job));
    }

    match state
        .router
        .admit(&service, payload.to_vec(), AdmitMode::Async)
        .await?
    {
        AdmitOutcome::Job(job) => Ok(accepted(&job)),
        AdmitOutcome::Sync(body) => Ok(body.into_response()),
    }
}

/// POST /run/{service}
///
/// Synchronous invocation. The backend call is dropped with the request
/// when the caller disconnects.
pub async fn run_service(
    State(state): State<AppState>,
    Path(service): Path<String>,
    payload: Bytes,
) -> ApiResult<Response> {
    tracing::debug!(service = %service, "Running service synchronously");

    match state
        .router
        .admit(&service, payload.to_vec(), AdmitMode::Sync)
        .await?
    {
        AdmitOutcome::Sync(body) => Ok(body.into_response()),
        AdmitOutcome::Job(job) => Ok(accepted(&job)),
    }
}

fn accepted(job: &Job) -> Response {
    (StatusCode::ACCEPTED, Json(AdmitResponse { job_id: job.id })).into_response()
}

// =============================================================================
// Job Inspection
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct JobListQuery {
    pub service: Option<String>,
}

/// GET /system/jobs
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<JobListQuery>,
) -> ApiResult<Json<Vec<Job>>> {
    tracing::debug!(service = ?query.service, "Listing jobs");

    let jobs = state.manager.store().list(query.service.as_deref()).await?;
    Ok(Json(jobs))
}

/// GET /system/jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<JobDetails>> {
    tracing::debug!(job_id = %id, "Getting job");

    let job = state.manager.store().get(id).await?;
    let phase = state.manager.phase(&job).await;
    Ok(Json(JobDetails { job, phase }))
}

/// DELETE /system/jobs/{id}
pub async fn delete_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    tracing::info!(job_id = %id, "Deleting job");

    state.manager.remove(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /system/jobs/{id}/logs
pub async fn get_job_logs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<String> {
    tracing::debug!(job_id = %id, "Getting job logs");

    Ok(state.manager.logs(id).await?)
}

#[derive(Debug, Deserialize)]
pub struct JobDeleteQuery {
    pub service: Option<String>,
    #[serde(default)]
    pub all: bool,
}

/// DELETE /system/jobs?service={service}&all={all}
///
/// Removes the finished jobs of a service. `all` removes the unfinished
/// ones too.
pub async fn delete_service_jobs(
    State(state): State<AppState>,
    Query(query): Query<JobDeleteQuery>,
) -> ApiResult<Json<DeletedJobs>> {
    let service = query
        .service
        .ok_or_else(|| ApiError::BadRequest("the service query parameter is required".to_string()))?;

    tracing::info!(service = %service, all = query.all, "Deleting service jobs");

    let deleted = state.manager.remove_service_jobs(&service, query.all).await?;
    Ok(Json(DeletedJobs { deleted }))
}
