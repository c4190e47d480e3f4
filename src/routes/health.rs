// src/routes/health.rs
//! Liveness endpoint for the dashboard service.
//!
//! Used by container orchestrators and CI to check that the process is up
//! and answering HTTP. Follows the Explicit Module Boundary Pattern (EMBP):
//! the handler stays private, the gateway (`mod.rs`) merges the subrouter.

use axum::{routing::get, Json, Router};
use serde::Serialize;

/// JSON response body for the `/health` endpoint.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Handle `GET /health`.
///
/// Does not touch the store or the refresh loop; a store outage shows up in
/// `/status`, not here.
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// Subrouter with the `/health` route, generic over the gateway state.
pub fn router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route("/health", get(health))
}
