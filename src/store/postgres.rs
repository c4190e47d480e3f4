//! PostgreSQL backend: pooled session connection, native bucketing.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::debug;

use super::{Capabilities, Cutoff, ReadingSink, ReadingStore, StoreSettings};
use crate::error::{PipelineError, PipelineResult};
use crate::models::{validate_table_name, Reading};
use crate::resample::BucketWidth;
use crate::schema;

const COLUMNS: &str = r#""timestamp", lat, lon, temp, salinity, rhodamine, ph, ph_ma"#;

// ---

pub struct PostgresStore {
    pool: PgPool,
    table: String,
}

impl PostgresStore {
    // ---
    /// Build the pool without connecting; connection failures surface on the
    /// first query as `StoreUnavailable` instead of at startup.
    pub fn connect_lazy(settings: &StoreSettings) -> PipelineResult<Self> {
        // ---
        let table = validate_table_name(&settings.table)?.to_string();
        let pool = PgPoolOptions::new()
            .max_connections(settings.pool_max.max(1))
            .acquire_timeout(settings.connect_timeout)
            .connect_lazy(&settings.location)
            .map_err(|e| PipelineError::StoreUnavailable(format!("bad database url: {}", e)))?;
        Ok(Self { pool, table })
    }
}

/// Raw range query; `$1` is the cutoff when present.
pub(crate) fn range_sql(table: &str, cutoff: Option<Cutoff>) -> String {
    // ---
    let filter = cutoff
        .map(|c| format!(r#" WHERE "timestamp" {} $1"#, c.sql_operator()))
        .unwrap_or_default();
    format!(
        r#"SELECT {COLUMNS} FROM {table}{filter} ORDER BY "timestamp""#
    )
}

/// Server-side bucketing. The bucket key is the same floor division the
/// client-side resampler uses. The width is the last bind parameter.
pub(crate) fn bucketed_sql(table: &str, cutoff: Option<Cutoff>) -> String {
    // ---
    let (filter, width_param) = match cutoff {
        Some(c) => (format!(r#" WHERE "timestamp" {} $1"#, c.sql_operator()), "$2"),
        None => (String::new(), "$1"),
    };
    format!(
        r#"SELECT
    to_timestamp((floor(extract(epoch FROM "timestamp") / {w}) * {w})::float8) AS "timestamp",
    AVG(lat) AS lat,
    AVG(lon) AS lon,
    AVG(temp) AS temp,
    AVG(salinity) AS salinity,
    AVG(rhodamine) AS rhodamine,
    AVG(ph) AS ph,
    AVG(ph_ma) AS ph_ma
FROM {table}{filter}
GROUP BY 1
ORDER BY 1"#,
        w = width_param,
    )
}

#[async_trait]
impl ReadingStore for PostgresStore {
    // ---
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            backend: "postgres",
            native_bucketing: true,
        }
    }

    async fn query_range(&self, cutoff: Option<Cutoff>) -> PipelineResult<Vec<Reading>> {
        // ---
        let sql = range_sql(&self.table, cutoff);
        let mut query = sqlx::query_as::<_, Reading>(&sql);
        if let Some(c) = cutoff {
            query = query.bind(c.instant());
        }
        let rows = query.fetch_all(&self.pool).await?;
        debug!(rows = rows.len(), cutoff = ?cutoff, "postgres range query");
        Ok(rows)
    }

    async fn query_bucketed(
        &self,
        cutoff: Option<Cutoff>,
        width: BucketWidth,
    ) -> PipelineResult<Vec<Reading>> {
        // ---
        let sql = bucketed_sql(&self.table, cutoff);
        let mut query = sqlx::query_as::<_, Reading>(&sql);
        if let Some(c) = cutoff {
            query = query.bind(c.instant());
        }
        let rows = query
            .bind(i64::from(width.secs()))
            .fetch_all(&self.pool)
            .await?;
        debug!(rows = rows.len(), width = %width, "postgres bucketed query");
        Ok(rows)
    }
}

#[async_trait]
impl ReadingSink for PostgresStore {
    // ---
    async fn ensure_schema(&self) -> PipelineResult<()> {
        schema::create_postgres_schema(&self.pool, &self.table).await
    }

    async fn insert(&self, readings: &[Reading]) -> PipelineResult<u64> {
        // ---
        let sql = format!(
            "INSERT INTO {} ({COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            self.table
        );
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for r in readings {
            inserted += sqlx::query(&sql)
                .bind(r.timestamp)
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
        Ok(inserted)
    }

    async fn latest(&self) -> PipelineResult<Option<Reading>> {
        // ---
        let sql = format!(
            r#"SELECT {COLUMNS} FROM {} ORDER BY "timestamp" DESC LIMIT 1"#,
            self.table
        );
        Ok(sqlx::query_as::<_, Reading>(&sql)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn count(&self) -> PipelineResult<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.table);
        Ok(sqlx::query_scalar::<_, i64>(&sql).fetch_one(&self.pool).await?)
    }
}
