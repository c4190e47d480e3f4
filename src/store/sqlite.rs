//! SQLite backend: connection per query, raw rows only.
//!
//! Timestamps are stored as REAL seconds since the epoch so the range filter
//! is a numeric comparison.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{ConnectOptions, Connection, SqliteConnection};
use tracing::{debug, trace};

use super::{Capabilities, Cutoff, ReadingSink, ReadingStore, StoreSettings};
use crate::error::{PipelineError, PipelineResult};
use crate::models::{validate_table_name, Reading};
use crate::schema;

const COLUMNS: &str = "timestamp, lat, lon, temp, salinity, rhodamine, ph, ph_ma";

// ---

pub struct SqliteStore {
    path: PathBuf,
    table: String,
    writable: bool,
}

/// Row shape as stored.
#[derive(sqlx::FromRow)]
struct StoredRow {
    timestamp: f64,
    lat: f64,
    lon: f64,
    temp: f64,
    salinity: f64,
    rhodamine: f64,
    ph: f64,
    ph_ma: f64,
}

impl StoredRow {
    fn into_reading(self) -> PipelineResult<Reading> {
        // ---
        let timestamp = from_epoch_secs(self.timestamp).ok_or_else(|| {
            PipelineError::QueryError(format!("timestamp {} is out of range", self.timestamp))
        })?;
        Ok(Reading {
            timestamp,
            lat: self.lat,
            lon: self.lon,
            temp: self.temp,
            salinity: self.salinity,
            rhodamine: self.rhodamine,
            ph: self.ph,
            ph_ma: self.ph_ma,
        })
    }
}

pub(crate) fn to_epoch_secs(ts: DateTime<Utc>) -> f64 {
    ts.timestamp_micros() as f64 / 1e6
}

pub(crate) fn from_epoch_secs(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    DateTime::from_timestamp_micros((secs * 1e6).round() as i64)
}

pub(crate) fn range_sql(table: &str, cutoff: Option<Cutoff>) -> String {
    // ---
    let filter = cutoff
        .map(|c| format!(" WHERE timestamp {} ?", c.sql_operator()))
        .unwrap_or_default();
    format!("SELECT {COLUMNS} FROM {table}{filter} ORDER BY timestamp")
}

impl SqliteStore {
    // ---
    pub fn new(settings: &StoreSettings, writable: bool) -> PipelineResult<Self> {
        // ---
        let table = validate_table_name(&settings.table)?.to_string();
        let path = settings
            .location
            .strip_prefix("sqlite://")
            .unwrap_or(&settings.location);
        Ok(Self {
            path: PathBuf::from(path),
            table,
            writable,
        })
    }

    /// Open one connection. Readers never create the file: a missing store
    /// is `StoreUnavailable`.
    async fn open(&self) -> PipelineResult<SqliteConnection> {
        // ---
        if !self.writable && !self.path.exists() {
            return Err(PipelineError::StoreUnavailable(format!(
                "store file '{}' does not exist",
                self.path.display()
            )));
        }
        let options = SqliteConnectOptions::new()
            .filename(&self.path)
            .create_if_missing(self.writable)
            .read_only(!self.writable);
        trace!(path = %self.path.display(), writable = self.writable, "opening sqlite store");
        options.connect().await.map_err(|e| {
            PipelineError::StoreUnavailable(format!(
                "cannot open '{}': {}",
                self.path.display(),
                e
            ))
        })
    }
}

#[async_trait]
impl ReadingStore for SqliteStore {
    // ---
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            backend: "sqlite",
            native_bucketing: false,
        }
    }

    async fn query_range(&self, cutoff: Option<Cutoff>) -> PipelineResult<Vec<Reading>> {
        // ---
        let sql = range_sql(&self.table, cutoff);
        let mut conn = self.open().await?;

        let mut query = sqlx::query_as::<_, StoredRow>(&sql);
        if let Some(c) = cutoff {
            query = query.bind(to_epoch_secs(c.instant()));
        }
        let fetched = query.fetch_all(&mut conn).await;
        conn.close().await.ok();

        let rows = fetched?
            .into_iter()
            .map(StoredRow::into_reading)
            .collect::<PipelineResult<Vec<_>>>()?;
        debug!(rows = rows.len(), cutoff = ?cutoff, "sqlite range query");
        Ok(rows)
    }
}

#[async_trait]
impl ReadingSink for SqliteStore {
    // ---
    async fn ensure_schema(&self) -> PipelineResult<()> {
        let mut conn = self.open().await?;
        let result = schema::create_sqlite_schema(&mut conn, &self.table).await;
        conn.close().await.ok();
        result
    }

    async fn insert(&self, readings: &[Reading]) -> PipelineResult<u64> {
        // ---
        let sql = format!(
            "INSERT INTO {} ({COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            self.table
        );
        let mut conn = self.open().await?;
        let mut tx = conn.begin().await?;
        let mut inserted = 0;
        for r in readings {
            inserted += sqlx::query(&sql)
                .bind(to_epoch_secs(r.timestamp))
                .bind(r.lat)
                .bind(r.lon)
                .bind(r.temp)
                .bind(r.salinity)
                .bind(r.rhodamine)
                .bind(r.ph)
                .bind(r.ph_ma)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;
        conn.close().await.ok();
        Ok(inserted)
    }

    async fn latest(&self) -> PipelineResult<Option<Reading>> {
        // ---
        let sql = format!(
            "SELECT {COLUMNS} FROM {} ORDER BY timestamp DESC LIMIT 1",
            self.table
        );
        let mut conn = self.open().await?;
        let row = sqlx::query_as::<_, StoredRow>(&sql)
            .fetch_optional(&mut conn)
            .await;
        conn.close().await.ok();
        row?.map(StoredRow::into_reading).transpose()
    }

    async fn count(&self) -> PipelineResult<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.table);
        let mut conn = self.open().await?;
        let count = sqlx::query_scalar::<_, i64>(&sql).fetch_one(&mut conn).await;
        conn.close().await.ok();
        Ok(count?)
    }
}
