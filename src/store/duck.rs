//! DuckDB backend: embedded analytical file, native bucketing.
//!
//! The driver is synchronous. Every call runs on the blocking pool with its
//! own connection, opened read-only for the dashboard, and closed on return.
//! `timestamp` is a `TIMESTAMP` column; it crosses the boundary as epoch
//! microseconds so no time-zone setting is involved.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::DateTime;
use duckdb::{params, params_from_iter, AccessMode, Config, Connection, Row};
use tracing::{debug, trace};

use super::{Capabilities, Cutoff, ReadingSink, ReadingStore, StoreSettings};
use crate::error::{PipelineError, PipelineResult};
use crate::models::{validate_table_name, Reading};
use crate::resample::BucketWidth;
use crate::schema;

const COLUMNS: &str = r#"epoch_us("timestamp"), lat, lon, temp, salinity, rhodamine, ph, ph_ma"#;
const MICROS_PER_SEC: i64 = 1_000_000;

// ---

pub struct DuckDbStore {
    path: PathBuf,
    table: String,
    writable: bool,
}

/// Row shape as selected: epoch micros plus the seven columns.
struct StoredRow {
    micros: i64,
    values: [f64; 7],
}

impl StoredRow {
    fn from_row(row: &Row<'_>) -> duckdb::Result<Self> {
        // ---
        let mut values = [0.0; 7];
        for (i, value) in values.iter_mut().enumerate() {
            *value = row.get(i + 1)?;
        }
        Ok(Self {
            micros: row.get(0)?,
            values,
        })
    }

    fn into_reading(self) -> PipelineResult<Reading> {
        // ---
        let timestamp = DateTime::from_timestamp_micros(self.micros).ok_or_else(|| {
            PipelineError::QueryError(format!("timestamp {}us is out of range", self.micros))
        })?;
        let [lat, lon, temp, salinity, rhodamine, ph, ph_ma] = self.values;
        Ok(Reading {
            timestamp,
            lat,
            lon,
            temp,
            salinity,
            rhodamine,
            ph,
            ph_ma,
        })
    }
}

/// Raw range query; the cutoff, when present, is the only parameter.
pub(crate) fn range_sql(table: &str, cutoff: Option<Cutoff>) -> String {
    // ---
    let filter = cutoff
        .map(|c| format!(r#" WHERE epoch_us("timestamp") {} $1"#, c.sql_operator()))
        .unwrap_or_default();
    format!(r#"SELECT {COLUMNS} FROM {table}{filter} ORDER BY "timestamp""#)
}

/// Server-side bucketing with `$1` as the width in microseconds and `$2` as
/// the cutoff. The key is the Euclidean floor of epoch micros by the width,
/// the same division the client-side resampler does.
pub(crate) fn bucketed_sql(table: &str, cutoff: Option<Cutoff>) -> String {
    // ---
    let filter = cutoff
        .map(|c| format!(r#" WHERE epoch_us("timestamp") {} $2"#, c.sql_operator()))
        .unwrap_or_default();
    format!(
        r#"SELECT
    epoch_us("timestamp") - ((epoch_us("timestamp") % $1) + $1) % $1 AS bucket,
    AVG(lat), AVG(lon), AVG(temp), AVG(salinity), AVG(rhodamine), AVG(ph), AVG(ph_ma)
FROM {table}{filter}
GROUP BY bucket
ORDER BY bucket"#
    )
}

fn open(path: &Path, writable: bool) -> PipelineResult<Connection> {
    // ---
    if !writable && !path.exists() {
        return Err(PipelineError::StoreUnavailable(format!(
            "store file '{}' does not exist",
            path.display()
        )));
    }
    let mode = if writable {
        AccessMode::ReadWrite
    } else {
        AccessMode::ReadOnly
    };
    let unavailable = |e: duckdb::Error| {
        PipelineError::StoreUnavailable(format!("cannot open '{}': {}", path.display(), e))
    };
    trace!(path = %path.display(), writable, "opening duckdb store");
    let config = Config::default().access_mode(mode).map_err(unavailable)?;
    Connection::open_with_flags(path, config).map_err(unavailable)
}

fn select(conn: &Connection, sql: &str, binds: Vec<i64>) -> PipelineResult<Vec<Reading>> {
    // ---
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params_from_iter(binds), StoredRow::from_row)?
        .collect::<duckdb::Result<Vec<_>>>()?;
    rows.into_iter().map(StoredRow::into_reading).collect()
}

impl DuckDbStore {
    // ---
    pub fn new(settings: &StoreSettings, writable: bool) -> PipelineResult<Self> {
        // ---
        let table = validate_table_name(&settings.table)?.to_string();
        Ok(Self {
            path: PathBuf::from(&settings.location),
            table,
            writable,
        })
    }

    /// Run `work` against a fresh connection on the blocking pool.
    async fn with_connection<T, F>(&self, work: F) -> PipelineResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection, &str) -> PipelineResult<T> + Send + 'static,
    {
        // ---
        let path = self.path.clone();
        let table = self.table.clone();
        let writable = self.writable;
        tokio::task::spawn_blocking(move || {
            let mut conn = open(&path, writable)?;
            work(&mut conn, &table)
        })
        .await
        .map_err(|e| PipelineError::QueryError(format!("duckdb task failed: {}", e)))?
    }
}

#[async_trait]
impl ReadingStore for DuckDbStore {
    // ---
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            backend: "duckdb",
            native_bucketing: true,
        }
    }

    async fn query_range(&self, cutoff: Option<Cutoff>) -> PipelineResult<Vec<Reading>> {
        // ---
        let binds: Vec<i64> = cutoff.map(|c| c.instant().timestamp_micros()).into_iter().collect();
        let rows = self
            .with_connection(move |conn, table| select(conn, &range_sql(table, cutoff), binds))
            .await?;
        debug!(rows = rows.len(), cutoff = ?cutoff, "duckdb range query");
        Ok(rows)
    }

    async fn query_bucketed(
        &self,
        cutoff: Option<Cutoff>,
        width: BucketWidth,
    ) -> PipelineResult<Vec<Reading>> {
        // ---
        let mut binds = vec![i64::from(width.secs()) * MICROS_PER_SEC];
        binds.extend(cutoff.map(|c| c.instant().timestamp_micros()));
        let rows = self
            .with_connection(move |conn, table| select(conn, &bucketed_sql(table, cutoff), binds))
            .await?;
        debug!(rows = rows.len(), cutoff = ?cutoff, %width, "duckdb bucketed query");
        Ok(rows)
    }
}

#[async_trait]
impl ReadingSink for DuckDbStore {
    // ---
    async fn ensure_schema(&self) -> PipelineResult<()> {
        self.with_connection(|conn, table| schema::create_duckdb_schema(conn, table))
            .await
    }

    async fn insert(&self, readings: &[Reading]) -> PipelineResult<u64> {
        // ---
        let readings = readings.to_vec();
        self.with_connection(move |conn, table| {
            let sql = format!(
                r#"INSERT INTO {table} ("timestamp", lat, lon, temp, salinity, rhodamine, ph, ph_ma)
                   VALUES (make_timestamp($1), $2, $3, $4, $5, $6, $7, $8)"#
            );
            let tx = conn.transaction()?;
            let mut inserted = 0;
            {
                let mut stmt = tx.prepare(&sql)?;
                for r in &readings {
                    inserted += stmt.execute(params![
                        r.timestamp.timestamp_micros(),
                        r.lat,
                        r.lon,
                        r.temp,
                        r.salinity,
                        r.rhodamine,
                        r.ph,
                        r.ph_ma
                    ])? as u64;
                }
            }
            tx.commit()?;
            Ok(inserted)
        })
        .await
    }

    async fn latest(&self) -> PipelineResult<Option<Reading>> {
        // ---
        self.with_connection(|conn, table| {
            let sql = format!(r#"SELECT {COLUMNS} FROM {table} ORDER BY "timestamp" DESC LIMIT 1"#);
            Ok(select(conn, &sql, Vec::new())?.pop())
        })
        .await
    }

    async fn count(&self) -> PipelineResult<i64> {
        self.with_connection(|conn, table| {
            let count = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get::<_, i64>(0)
            })?;
            Ok(count)
        })
        .await
    }
}
