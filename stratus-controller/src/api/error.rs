//! API Error Handling
//!
//! Maps the scheduling error taxonomy onto HTTP responses.

use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};

use crate::error::SchedError;

/// API error type
#[derive(Debug)]
pub enum ApiError {
    Sched(SchedError),
    Unauthorized,
    BadRequest(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Sched(err) => match err {
                SchedError::NotFound(_) => StatusCode::NOT_FOUND,
                SchedError::InvalidSpec(_) => StatusCode::BAD_REQUEST,
                SchedError::Conflict(_) => StatusCode::CONFLICT,
                SchedError::BackendUnsupported(_) => StatusCode::BAD_REQUEST,
                SchedError::NoCapacity(_) => StatusCode::SERVICE_UNAVAILABLE,
                SchedError::Transient(_) => StatusCode::BAD_GATEWAY,
                SchedError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            ApiError::Sched(SchedError::Internal(msg)) => {
                tracing::error!("Internal error: {}", msg);
                "Internal server error".to_string()
            }
            ApiError::Sched(err) => err.to_string(),
            ApiError::Unauthorized => {
                return (
                    status,
                    [(header::WWW_AUTHENTICATE, "Basic realm=\"stratus\"")],
                    Json(serde_json::json!({ "error": "unauthorized" })),
                )
                    .into_response();
            }
            ApiError::BadRequest(msg) => msg,
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<SchedError> for ApiError {
    fn from(err: SchedError) -> Self {
        ApiError::Sched(err)
    }
}

impl From<crate::store::StoreError> for ApiError {
    fn from(err: crate::store::StoreError) -> Self {
        ApiError::Sched(err.into())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
