use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::cache::CacheError;
use crate::engine::pagination::PaginationError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidCursor(#[from] PaginationError),

    #[error("{0}")]
    AggregationFailure(#[from] CacheError),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::InvalidCursor(_) => (StatusCode::BAD_REQUEST, "INVALID_CURSOR"),
            ApiError::AggregationFailure(_) => (StatusCode::SERVICE_UNAVAILABLE, "AGGREGATION_FAILURE"),
            ApiError::ServiceUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE"),
        };

        let body = Json(json!({
            "error": code,
            "message": self.to_string()
        }));

        (status, body).into_response()
    }
}
