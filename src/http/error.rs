use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use coincache_core::error::ServiceError;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Service(#[from] ServiceError),
    #[error("{0}")]
    NotFound(String),
}

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Service(e) if e.is_not_found() => StatusCode::NOT_FOUND,
            ApiError::Service(ServiceError::Validation(_)) => StatusCode::BAD_REQUEST,
            ApiError::Service(e) => {
                error!(error = %e, "Request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = Json(ErrorBody {
            detail: self.to_string(),
        });
        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
