//! Error taxonomy for the refresh pipeline.
//!
//! Every failure inside a refresh cycle is one of three kinds. The refresh
//! loop catches all of them at its boundary and turns them into a
//! user-visible status; none of them is allowed to touch the cached series.
//!
//! - `StoreUnavailable`: file, table or connection missing, or the query
//!   exceeded its deadline. Fatal for the current cycle only.
//! - `QueryError`: the store rejected a query that validation let through.
//!   Logged as a logic bug.
//! - `InvalidParameter`: bad bucket width, time range or table name. Rejected
//!   before any query is issued.

use thiserror::Error;

/// Result alias used across the pipeline modules.
pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    // ---
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("query failed: {0}")]
    QueryError(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

impl PipelineError {
    // ---
    pub fn invalid(msg: impl Into<String>) -> Self {
        PipelineError::InvalidParameter(msg.into())
    }

    /// Short machine-friendly tag, used in logs and in the status payload.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::StoreUnavailable(_) => "store_unavailable",
            PipelineError::QueryError(_) => "query_error",
            PipelineError::InvalidParameter(_) => "invalid_parameter",
        }
    }
}

impl From<sqlx::Error> for PipelineError {
    fn from(err: sqlx::Error) -> Self {
        // ---
        match &err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Configuration(_) => PipelineError::StoreUnavailable(err.to_string()),
            sqlx::Error::Database(db) if is_missing_relation(db.code().as_deref(), db.message()) => {
                PipelineError::StoreUnavailable(err.to_string())
            }
            _ => PipelineError::QueryError(err.to_string()),
        }
    }
}

impl From<duckdb::Error> for PipelineError {
    fn from(err: duckdb::Error) -> Self {
        // ---
        let message = err.to_string();
        if is_missing_relation(None, &message) {
            PipelineError::StoreUnavailable(message)
        } else {
            PipelineError::QueryError(message)
        }
    }
}

/// Postgres reports `undefined_table` as SQLSTATE 42P01; SQLite and DuckDB
/// only have the message text. A file that is not a database, or one locked
/// by a writer, counts as a missing store.
fn is_missing_relation(code: Option<&str>, message: &str) -> bool {
    // ---
    const MARKERS: [&str; 6] = [
        "no such table",
        "unable to open database",
        "file is not a database",
        "Table with name",
        "not a valid DuckDB database",
        "Could not set lock",
    ];
    code == Some("42P01")
        || code == Some("3D000")
        || MARKERS.iter().any(|m| message.contains(m))
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_pool_timeout_is_store_unavailable() {
        let err: PipelineError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, PipelineError::StoreUnavailable(_)));
        assert_eq!(err.kind(), "store_unavailable");
    }

    #[test]
    fn test_row_not_found_is_query_error() {
        let err: PipelineError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, PipelineError::QueryError(_)));
    }

    #[test]
    fn test_missing_relation_detection() {
        assert!(is_missing_relation(Some("42P01"), "relation \"x\" does not exist"));
        assert!(is_missing_relation(Some("1"), "no such table: sensor_data"));
        assert!(is_missing_relation(Some("26"), "(code: 26) file is not a database"));
        assert!(is_missing_relation(
            None,
            "Catalog Error: Table with name sensor_data does not exist!"
        ));
        assert!(!is_missing_relation(Some("23505"), "duplicate key"));
    }

    #[test]
    fn test_display_carries_message() {
        let err = PipelineError::invalid("bucket width must be positive");
        assert_eq!(
            err.to_string(),
            "invalid parameter: bucket width must be positive"
        );
    }
}
