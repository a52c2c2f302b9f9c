use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Failures reported by the page-automation boundary.
///
/// None of these leave the extraction pipeline; they only pick the next strategy.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("element not found: {0}")]
    NotFound(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DriverError {
    /// Classify a failed request; `limit` is the client timeout it ran under,
    /// since reqwest does not report it.
    pub fn from_request(e: reqwest::Error, limit: Duration) -> Self {
        if e.is_timeout() {
            DriverError::Timeout(limit)
        } else {
            DriverError::Navigation(e.to_string())
        }
    }
}

/// Errors surfaced to HTTP clients.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Category '{0}' not found")]
    CategoryNotFound(String),

    #[error("Scrape failed: {0}")]
    ScrapeFailed(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::CategoryNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::ScrapeFailed(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "detail": self.to_string() }));
        (self.status(), body).into_response()
    }
}
