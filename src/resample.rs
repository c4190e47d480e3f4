//! Client-side resampling into fixed-width time buckets.
//!
//! Buckets are half-open intervals `[t, t + width)` aligned to the Unix epoch.
//! The bucket key is the floor of the epoch time divided by the width, the
//! same expression the analytical backend evaluates in SQL, so both paths
//! produce identical bucket boundaries.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{PipelineError, PipelineResult};
use crate::models::{Column, Reading, TimeSeries};

const MICROS_PER_SEC: i64 = 1_000_000;

// ---

/// Positive bucket width, whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketWidth(u32);

impl BucketWidth {
    // ---
    pub const ONE_MINUTE: BucketWidth = BucketWidth(60);

    pub fn from_secs(secs: i64) -> PipelineResult<Self> {
        if secs <= 0 {
            return Err(PipelineError::invalid(format!(
                "bucket width must be positive, got {}s",
                secs
            )));
        }
        u32::try_from(secs)
            .map(BucketWidth)
            .map_err(|_| PipelineError::invalid(format!("bucket width {}s is too large", secs)))
    }

    pub fn secs(self) -> u32 {
        self.0
    }

    /// Start of the bucket containing `ts`.
    pub fn bucket_start(self, ts: DateTime<Utc>) -> DateTime<Utc> {
        // ---
        let width = i64::from(self.0) * MICROS_PER_SEC;
        let start = ts.timestamp_micros().div_euclid(width) * width;
        DateTime::from_timestamp_micros(start).unwrap_or(ts)
    }
}

impl fmt::Display for BucketWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ---
        let secs = self.0;
        if secs % 86_400 == 0 {
            write!(f, "{}d", secs / 86_400)
        } else if secs % 3_600 == 0 {
            write!(f, "{}h", secs / 3_600)
        } else if secs % 60 == 0 {
            write!(f, "{}min", secs / 60)
        } else {
            write!(f, "{}s", secs)
        }
    }
}

/// Resampling choice for the dashboard view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Resample {
    #[default]
    None,
    Every(BucketWidth),
}

impl Resample {
    /// The fixed choices offered in the dashboard selector.
    pub const PRESETS: [&'static str; 7] = ["none", "10s", "1min", "5min", "15min", "1h", "6h"];

    pub fn width(self) -> Option<BucketWidth> {
        match self {
            Resample::None => None,
            Resample::Every(width) => Some(width),
        }
    }
}

impl fmt::Display for Resample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resample::None => f.write_str("none"),
            Resample::Every(width) => width.fmt(f),
        }
    }
}

impl FromStr for Resample {
    type Err = PipelineError;

    /// Accepts `none` (or an empty string) and `<n><unit>` durations with
    /// units `s`, `sec`, `m`, `min`, `h`, `d`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // ---
        let text = s.trim().to_ascii_lowercase();
        if text.is_empty() || text == "none" || text == "no resampling" {
            return Ok(Resample::None);
        }
        let split = text
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| PipelineError::invalid(format!("resample '{}' has no unit", s)))?;
        let (digits, unit) = text.split_at(split);
        let count: i64 = digits
            .parse()
            .map_err(|_| PipelineError::invalid(format!("resample '{}' has no count", s)))?;
        let scale = match unit.trim() {
            "s" | "sec" | "secs" => 1,
            "m" | "min" | "mins" => 60,
            "h" | "hr" | "hour" | "hours" => 3_600,
            "d" | "day" | "days" => 86_400,
            other => {
                return Err(PipelineError::invalid(format!(
                    "resample '{}' has unknown unit '{}'",
                    s, other
                )))
            }
        };
        let secs = count
            .checked_mul(scale)
            .ok_or_else(|| PipelineError::invalid(format!("resample '{}' overflows", s)))?;
        BucketWidth::from_secs(secs).map(Resample::Every)
    }
}

impl Serialize for Resample {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Resample {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Bucket `readings` by `width`, emitting the column means of each
/// non-empty bucket at the bucket start, ascending.
///
/// A bucket with a single reading reproduces that reading's values.
/// Latitude and longitude are averaged arithmetically like every other
/// column, which is wrong across the antimeridian.
pub fn resample(readings: &[Reading], width: BucketWidth) -> TimeSeries {
    // ---
    let mut buckets: BTreeMap<DateTime<Utc>, Accumulator> = BTreeMap::new();
    for reading in readings {
        buckets
            .entry(width.bucket_start(reading.timestamp))
            .or_default()
            .add(reading);
    }

    let rows = buckets
        .into_iter()
        .filter_map(|(start, acc)| acc.mean_at(start))
        .collect();
    TimeSeries::from_readings(rows)
}

/// Per-bucket running sums.
#[derive(Default)]
struct Accumulator {
    sums: [f64; Column::ALL.len()],
    count: u32,
}

impl Accumulator {
    // ---
    fn add(&mut self, reading: &Reading) {
        for (sum, column) in self.sums.iter_mut().zip(Column::ALL) {
            *sum += reading.value(column);
        }
        self.count += 1;
    }

    fn mean_at(&self, start: DateTime<Utc>) -> Option<Reading> {
        // ---
        if self.count == 0 {
            return None;
        }
        let n = f64::from(self.count);
        let mut row = Reading {
            timestamp: start,
            lat: 0.0,
            lon: 0.0,
            temp: 0.0,
            salinity: 0.0,
            rhodamine: 0.0,
            ph: 0.0,
            ph_ma: 0.0,
        };
        for (sum, column) in self.sums.iter().zip(Column::ALL) {
            row.set_value(column, sum / n);
        }
        Some(row)
    }
}
