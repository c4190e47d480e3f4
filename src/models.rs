//! Data models for the dashboard pipeline.
//!
//! A [`Reading`] is one immutable row of the store. A [`TimeSeries`] is the
//! in-memory working set: sorted ascending, one reading per timestamp.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

// ---

/// One timestamped sensor observation with position and measurements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Reading {
    // ---
    pub timestamp: DateTime<Utc>,
    pub lat: f64,
    pub lon: f64,
    pub temp: f64,
    pub salinity: f64,
    /// Tracer dye concentration.
    pub rhodamine: f64,
    pub ph: f64,
    /// Moving average of `ph`, derived at ingest.
    pub ph_ma: f64,
}

/// Numeric columns of a [`Reading`], in table order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Column {
    Lat,
    Lon,
    Temp,
    Salinity,
    Rhodamine,
    Ph,
    PhMa,
}

impl Column {
    // ---
    pub const ALL: [Column; 7] = [
        Column::Lat,
        Column::Lon,
        Column::Temp,
        Column::Salinity,
        Column::Rhodamine,
        Column::Ph,
        Column::PhMa,
    ];

    /// Column name as it appears in the store.
    pub fn name(self) -> &'static str {
        match self {
            Column::Lat => "lat",
            Column::Lon => "lon",
            Column::Temp => "temp",
            Column::Salinity => "salinity",
            Column::Rhodamine => "rhodamine",
            Column::Ph => "ph",
            Column::PhMa => "ph_ma",
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Column {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // ---
        let wanted = s.trim().to_ascii_lowercase();
        Column::ALL
            .into_iter()
            .find(|c| c.name() == wanted)
            .ok_or_else(|| PipelineError::invalid(format!("unknown column '{}'", s.trim())))
    }
}

impl Reading {
    // ---
    pub fn value(&self, column: Column) -> f64 {
        match column {
            Column::Lat => self.lat,
            Column::Lon => self.lon,
            Column::Temp => self.temp,
            Column::Salinity => self.salinity,
            Column::Rhodamine => self.rhodamine,
            Column::Ph => self.ph,
            Column::PhMa => self.ph_ma,
        }
    }

    pub fn set_value(&mut self, column: Column, value: f64) {
        let slot = match column {
            Column::Lat => &mut self.lat,
            Column::Lon => &mut self.lon,
            Column::Temp => &mut self.temp,
            Column::Salinity => &mut self.salinity,
            Column::Rhodamine => &mut self.rhodamine,
            Column::Ph => &mut self.ph,
            Column::PhMa => &mut self.ph_ma,
        };
        *slot = value;
    }
}

/// Sorted, timestamp-unique sequence of readings.
///
/// Invariant: `readings[i].timestamp < readings[i + 1].timestamp` for all `i`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct TimeSeries {
    readings: Vec<Reading>,
}

impl TimeSeries {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a series from rows in any order; later duplicates win.
    pub fn from_readings(readings: Vec<Reading>) -> Self {
        let mut series = Self::new();
        series.merge(readings);
        series
    }

    /// Append `incoming`, then restore the sort and uniqueness invariant.
    ///
    /// On a timestamp collision the reading that arrived later (later in
    /// `incoming`, or from `incoming` rather than the existing series) wins.
    /// Returns the number of readings the series grew by.
    pub fn merge(&mut self, incoming: Vec<Reading>) -> usize {
        // ---
        if incoming.is_empty() {
            return 0;
        }
        let before = self.readings.len();
        let needs_sort = match (self.readings.last(), incoming.first()) {
            (Some(last), Some(first)) => first.timestamp <= last.timestamp,
            _ => false,
        } || incoming.windows(2).any(|w| w[1].timestamp <= w[0].timestamp);

        self.readings.extend(incoming);

        if needs_sort {
            // Stable sort keeps arrival order among equal timestamps, so the
            // last of each run is the newest arrival.
            self.readings.sort_by_key(|r| r.timestamp);
            let mut deduped: Vec<Reading> = Vec::with_capacity(self.readings.len());
            for reading in self.readings.drain(..) {
                match deduped.last_mut() {
                    Some(prev) if prev.timestamp == reading.timestamp => *prev = reading,
                    _ => deduped.push(reading),
                }
            }
            self.readings = deduped;
        }
        self.readings.len().saturating_sub(before)
    }

    /// Drop readings strictly older than `cutoff`.
    pub fn retain_since(&mut self, cutoff: DateTime<Utc>) -> usize {
        // ---
        let split = self.readings.partition_point(|r| r.timestamp < cutoff);
        self.readings.drain(..split);
        split
    }

    /// Maximum timestamp present, `None` when empty.
    pub fn watermark(&self) -> Option<DateTime<Utc>> {
        self.readings.last().map(|r| r.timestamp)
    }

    pub fn latest(&self) -> Option<&Reading> {
        self.readings.last()
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn as_slice(&self) -> &[Reading] {
        &self.readings
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Reading> {
        self.readings.iter()
    }

    pub fn into_vec(self) -> Vec<Reading> {
        self.readings
    }

    /// Check the ordering invariant. Used by tests and debug assertions.
    pub fn is_strictly_ascending(&self) -> bool {
        self.readings
            .windows(2)
            .all(|w| w[0].timestamp < w[1].timestamp)
    }
}

/// Validate a table name before it is interpolated into SQL.
pub fn validate_table_name(name: &str) -> PipelineResult<&str> {
    // ---
    let mut chars = name.chars();
    let valid_head = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if valid_head && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(name)
    } else {
        Err(PipelineError::invalid(format!(
            "table name '{}' is not a plain SQL identifier",
            name
        )))
    }
}
