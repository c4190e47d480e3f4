//! Routes gateway (EMBP).
//!
//! Sibling modules each export a subrouter; this module merges them, attaches
//! the shared [`DashboardHandle`] state and owns the error-to-HTTP mapping.
//! `main.rs` only ever calls [`router`].

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde::Serialize;

use crate::{DashboardHandle, PipelineError};

mod control;
mod health;
mod readings;

// ---

pub fn router(handle: DashboardHandle) -> Router {
    // ---
    Router::new()
        .merge(readings::router())
        .merge(control::router())
        .merge(health::router())
        .with_state(handle)
}

/// JSON error body returned by every route.
#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

/// Wrapper so handlers can return `Result<_, ApiError>` and use `?`.
pub(crate) struct ApiError(PipelineError);

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // ---
        let status = match self.0 {
            PipelineError::InvalidParameter(_) => StatusCode::BAD_REQUEST,
            PipelineError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            PipelineError::QueryError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            error: self.0.kind(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
