//! Read-only data routes: the cached series and its summary.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tracing::debug;

use super::ApiError;
use crate::models::Column;
use crate::summary::summarize;
use crate::DashboardHandle;

// ---

pub fn router() -> Router<DashboardHandle> {
    // ---
    Router::new()
        .route("/readings", get(readings))
        .route("/summary", get(summary))
}

/// `GET /readings`: the current series, ascending and deduplicated.
async fn readings(State(handle): State<DashboardHandle>) -> Response {
    // ---
    let snapshot = handle.snapshot();
    debug!("GET /readings - {} records", snapshot.series.len());
    (StatusCode::OK, Json(snapshot.series.as_ref())).into_response()
}

#[derive(Debug, Deserialize)]
struct SummaryQuery {
    /// Comma separated column names, e.g. `temp,ph`.
    params: Option<String>,
}

/// `GET /summary?params=temp,ph`
async fn summary(
    Query(query): Query<SummaryQuery>,
    State(handle): State<DashboardHandle>,
) -> Result<Response, ApiError> {
    // ---
    let columns = parse_columns(query.params.as_deref())?;
    let snapshot = handle.snapshot();
    let summary = summarize(&snapshot.series, &columns);
    Ok((StatusCode::OK, Json(summary)).into_response())
}

fn parse_columns(params: Option<&str>) -> Result<Vec<Column>, ApiError> {
    // ---
    let Some(params) = params else {
        return Ok(Vec::new());
    };
    params
        .split(',')
        .filter(|p| !p.trim().is_empty())
        .map(|p| p.parse::<Column>().map_err(ApiError::from))
        .collect()
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_parse_columns() {
        // ---
        let cols = parse_columns(Some("temp, pH,")).ok().unwrap();
        assert_eq!(cols, vec![Column::Temp, Column::Ph]);
        assert!(parse_columns(None).ok().unwrap().is_empty());
        assert!(parse_columns(Some("temp,depth")).is_err());
    }
}
