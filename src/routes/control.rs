//! Refresh control and status routes.
//!
//! `PUT /view` is the runtime-override layer of the configuration: it wins
//! over environment, file and defaults for the keys it sets.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use super::ApiError;
use crate::cache::View;
use crate::dashboard::{Status, ViewUpdate};
use crate::store::Bucketing;
use crate::DashboardHandle;

// ---

pub fn router() -> Router<DashboardHandle> {
    // ---
    Router::new()
        .route("/status", get(status))
        .route("/refresh", post(refresh_now))
        .route("/view", put(update_view))
}

#[derive(Serialize)]
struct StatusResponse {
    session: Uuid,
    status: Status,
    message: String,
    records: usize,
    view: View,
    update_frequency: u64,
    auto_refresh: bool,
    last_refresh: Option<DateTime<Utc>>,
    next_refresh_in: u64,
    backend: &'static str,
    bucketing: Bucketing,
}

/// `GET /status`
async fn status(State(handle): State<DashboardHandle>) -> Json<StatusResponse> {
    // ---
    let snapshot = handle.snapshot();
    let now = Utc::now();
    Json(StatusResponse {
        session: snapshot.session,
        status: snapshot.status.clone(),
        message: snapshot.status_line(now),
        records: snapshot.series.len(),
        view: snapshot.view,
        update_frequency: snapshot.update_frequency,
        auto_refresh: snapshot.auto_refresh,
        last_refresh: snapshot.last_refresh,
        next_refresh_in: snapshot.next_refresh_in(now),
        backend: snapshot.backend,
        bucketing: snapshot.bucketing,
    })
}

/// `POST /refresh`: queue a manual refresh; the loop picks it up at once.
async fn refresh_now(State(handle): State<DashboardHandle>) -> Result<Response, ApiError> {
    // ---
    info!("POST /refresh");
    handle.request_refresh().await?;
    Ok(StatusCode::ACCEPTED.into_response())
}

/// `PUT /view` with any of `time_range_hours`, `resample`,
/// `update_frequency`, `auto_refresh`.
async fn update_view(
    State(handle): State<DashboardHandle>,
    Json(update): Json<ViewUpdate>,
) -> Result<Response, ApiError> {
    // ---
    info!("PUT /view - {:?}", update);
    handle.update_view(update).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}
