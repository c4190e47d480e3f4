//! Summary statistics over the cached series.
//!
//! These are the numbers the dashboard shows beside the charts: per column
//! latest / mean / range and the latest-minus-mean delta, plus the extent of
//! the geographic track and the current position.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{Column, TimeSeries};

/// Columns selected when a caller does not pick any.
pub const DEFAULT_COLUMNS: [Column; 2] = [Column::Rhodamine, Column::Ph];

// ---

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnStats {
    pub column: Column,
    pub latest: f64,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    /// `latest - mean`.
    pub delta_vs_avg: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Position {
    pub timestamp: DateTime<Utc>,
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackExtent {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
    pub center_lat: f64,
    pub center_lon: f64,
    /// The larger of the lat and lon spans, in degrees.
    pub span_deg: f64,
    pub current: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub records: usize,
    pub columns: Vec<ColumnStats>,
    pub track: Option<TrackExtent>,
}

pub fn column_stats(series: &TimeSeries, column: Column) -> Option<ColumnStats> {
    // ---
    let latest = series.latest()?.value(column);
    let (mut sum, mut min, mut max) = (0.0, f64::INFINITY, f64::NEG_INFINITY);
    for value in series.iter().map(|r| r.value(column)) {
        sum += value;
        min = min.min(value);
        max = max.max(value);
    }
    let mean = sum / series.len() as f64;
    Some(ColumnStats {
        column,
        latest,
        mean,
        min,
        max,
        delta_vs_avg: latest - mean,
    })
}

pub fn track_extent(series: &TimeSeries) -> Option<TrackExtent> {
    // ---
    let latest = series.latest()?;
    let init = (f64::INFINITY, f64::NEG_INFINITY, f64::INFINITY, f64::NEG_INFINITY);
    let (min_lat, max_lat, min_lon, max_lon) =
        series.iter().fold(init, |(a, b, c, d), r| {
            (a.min(r.lat), b.max(r.lat), c.min(r.lon), d.max(r.lon))
        });

    Some(TrackExtent {
        min_lat,
        max_lat,
        min_lon,
        max_lon,
        center_lat: (min_lat + max_lat) / 2.0,
        center_lon: (min_lon + max_lon) / 2.0,
        span_deg: (max_lat - min_lat).max(max_lon - min_lon),
        current: Position {
            timestamp: latest.timestamp,
            lat: latest.lat,
            lon: latest.lon,
        },
    })
}

/// Summarize `series` for `columns` (or [`DEFAULT_COLUMNS`] when empty).
pub fn summarize(series: &TimeSeries, columns: &[Column]) -> Summary {
    // ---
    let selected = if columns.is_empty() {
        &DEFAULT_COLUMNS[..]
    } else {
        columns
    };
    Summary {
        records: series.len(),
        columns: selected
            .iter()
            .filter_map(|&c| column_stats(series, c))
            .collect(),
        track: track_extent(series),
    }
}
