//! Table schema for the reading store.
//!
//! The dashboard itself never creates tables; a missing table is reported as
//! `StoreUnavailable`. These helpers are used by the `seed` binary and tests
//! to prepare a store. Both are idempotent.

use sqlx::{PgPool, SqliteConnection};

use crate::error::PipelineResult;

// ---

/// Create the readings table and its timestamp index on PostgreSQL.
///
/// `table` must already be validated as a plain identifier.
pub async fn create_postgres_schema(pool: &PgPool, table: &str) -> PipelineResult<()> {
    // ---
    let mut tx = pool.begin().await?;

    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            id          BIGSERIAL PRIMARY KEY,
            "timestamp" TIMESTAMPTZ      NOT NULL,
            lat         DOUBLE PRECISION NOT NULL,
            lon         DOUBLE PRECISION NOT NULL,
            temp        DOUBLE PRECISION NOT NULL,
            salinity    DOUBLE PRECISION NOT NULL,
            rhodamine   DOUBLE PRECISION NOT NULL,
            ph          DOUBLE PRECISION NOT NULL,
            ph_ma       DOUBLE PRECISION NOT NULL
        );
        "#
    ))
    .execute(&mut *tx)
    .await?;

    // Range filters and ORDER BY both hit the timestamp
    sqlx::query(&format!(
        r#"
        CREATE INDEX IF NOT EXISTS idx_{table}_timestamp
            ON {table} ("timestamp");
        "#
    ))
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

/// Same table on SQLite; `timestamp` is REAL seconds since the epoch.
pub async fn create_sqlite_schema(conn: &mut SqliteConnection, table: &str) -> PipelineResult<()> {
    // ---
    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            id        INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp REAL NOT NULL,
            lat       REAL NOT NULL,
            lon       REAL NOT NULL,
            temp      REAL NOT NULL,
            salinity  REAL NOT NULL,
            rhodamine REAL NOT NULL,
            ph        REAL NOT NULL,
            ph_ma     REAL NOT NULL
        );
        "#
    ))
    .execute(&mut *conn)
    .await?;

    sqlx::query(&format!(
        "CREATE INDEX IF NOT EXISTS idx_{table}_timestamp ON {table} (timestamp);"
    ))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Same table in a DuckDB file, with a native `TIMESTAMP` column.
pub fn create_duckdb_schema(conn: &duckdb::Connection, table: &str) -> PipelineResult<()> {
    // ---
    conn.execute_batch(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            "timestamp" TIMESTAMP NOT NULL,
            lat         DOUBLE    NOT NULL,
            lon         DOUBLE    NOT NULL,
            temp        DOUBLE    NOT NULL,
            salinity    DOUBLE    NOT NULL,
            rhodamine   DOUBLE    NOT NULL,
            ph          DOUBLE    NOT NULL,
            ph_ma       DOUBLE    NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_{table}_timestamp ON {table} ("timestamp");
        "#
    ))?;
    Ok(())
}
