//! Store adapters for the sensor reading table.
//!
//! Three backends share the [`ReadingStore`] contract:
//! - `duck`: embedded analytical file (`.duckdb`), buckets in the engine.
//! - `postgres`: analytical server, buckets server side.
//! - `sqlite`: lightweight row store, always returns raw rows.
//!
//! [`Source`] is the only thing the refresh loop talks to. It picks the
//! bucketing strategy once, from the store's declared capability, and puts a
//! deadline on every query.
//!
//! Follows the Explicit Module Boundary Pattern (EMBP): backends are private
//! siblings, this gateway exports the trait, the selector and [`Source`].

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::models::{Reading, TimeSeries};
use crate::resample::{resample, BucketWidth, Resample};

mod duck;
mod postgres;
mod sqlite;

pub use duck::DuckDbStore;
pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;

// ---

/// Lower bound on the timestamp column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cutoff {
    /// `timestamp >= t`, used for full reloads.
    Inclusive(DateTime<Utc>),
    /// `timestamp > t`, used for incremental appends.
    Exclusive(DateTime<Utc>),
}

impl Cutoff {
    // ---
    pub fn instant(self) -> DateTime<Utc> {
        match self {
            Cutoff::Inclusive(t) | Cutoff::Exclusive(t) => t,
        }
    }

    pub(crate) fn sql_operator(self) -> &'static str {
        match self {
            Cutoff::Inclusive(_) => ">=",
            Cutoff::Exclusive(_) => ">",
        }
    }

    pub fn admits(self, ts: DateTime<Utc>) -> bool {
        match self {
            Cutoff::Inclusive(t) => ts >= t,
            Cutoff::Exclusive(t) => ts > t,
        }
    }
}

impl fmt::Display for Cutoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timestamp {} {}", self.sql_operator(), self.instant().to_rfc3339())
    }
}

/// What a backend can do natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub backend: &'static str,
    pub native_bucketing: bool,
}

/// Read side of a store. Results are always ascending by timestamp.
#[async_trait]
pub trait ReadingStore: Send + Sync {
    // ---
    fn capabilities(&self) -> Capabilities;

    /// Raw rows admitted by `cutoff` (all rows when `None`).
    async fn query_range(&self, cutoff: Option<Cutoff>) -> PipelineResult<Vec<Reading>>;

    /// Rows averaged into `width` buckets by the store itself.
    async fn query_bucketed(
        &self,
        _cutoff: Option<Cutoff>,
        _width: BucketWidth,
    ) -> PipelineResult<Vec<Reading>> {
        Err(PipelineError::QueryError(format!(
            "{} backend has no native bucketing",
            self.capabilities().backend
        )))
    }
}

/// Write side, used by the seeder and tests only. The dashboard never writes.
#[async_trait]
pub trait ReadingSink: Send + Sync {
    // ---
    async fn ensure_schema(&self) -> PipelineResult<()>;

    async fn insert(&self, readings: &[Reading]) -> PipelineResult<u64>;

    async fn latest(&self) -> PipelineResult<Option<Reading>>;

    async fn count(&self) -> PipelineResult<i64>;
}

/// Backend choice from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Auto,
    DuckDb,
    Postgres,
    Sqlite,
}

impl Backend {
    /// Resolve `Auto` against the store location: a PostgreSQL URL, a
    /// `.duckdb`/`.ddb` file, or else a SQLite file.
    pub fn resolve(self, location: &str) -> Backend {
        // ---
        let extension = std::path::Path::new(location)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match self {
            Backend::Auto
                if location.starts_with("postgres://") || location.starts_with("postgresql://") =>
            {
                Backend::Postgres
            }
            Backend::Auto if matches!(extension.as_deref(), Some("duckdb" | "ddb")) => {
                Backend::DuckDb
            }
            Backend::Auto => Backend::Sqlite,
            explicit => explicit,
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" | "" => Ok(Backend::Auto),
            "duckdb" => Ok(Backend::DuckDb),
            "postgres" | "postgresql" => Ok(Backend::Postgres),
            "sqlite" => Ok(Backend::Sqlite),
            other => Err(PipelineError::invalid(format!("unknown backend '{}'", other))),
        }
    }
}

/// Everything needed to reach the table.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub location: String,
    pub table: String,
    pub backend: Backend,
    pub pool_max: u32,
    pub connect_timeout: Duration,
}

/// Open the read side for `settings`.
pub fn open_store(settings: &StoreSettings) -> PipelineResult<Box<dyn ReadingStore>> {
    // ---
    match settings.backend.resolve(&settings.location) {
        Backend::DuckDb => Ok(Box::new(DuckDbStore::new(settings, false)?)),
        Backend::Postgres => Ok(Box::new(PostgresStore::connect_lazy(settings)?)),
        _ => Ok(Box::new(SqliteStore::new(settings, false)?)),
    }
}

/// Open the write side for `settings`. SQLite files are created on demand.
pub fn open_sink(settings: &StoreSettings) -> PipelineResult<Box<dyn ReadingSink>> {
    // ---
    match settings.backend.resolve(&settings.location) {
        Backend::DuckDb => Ok(Box::new(DuckDbStore::new(settings, true)?)),
        Backend::Postgres => Ok(Box::new(PostgresStore::connect_lazy(settings)?)),
        _ => Ok(Box::new(SqliteStore::new(settings, true)?)),
    }
}

/// How a [`Source`] produces bucketed rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucketing {
    Native,
    ClientSide,
}

/// A store plus the bucketing strategy chosen for it and a query deadline.
pub struct Source {
    store: Box<dyn ReadingStore>,
    bucketing: Bucketing,
    deadline: Duration,
}

impl Source {
    // ---
    pub fn new(store: Box<dyn ReadingStore>, deadline: Duration) -> Self {
        // ---
        let caps = store.capabilities();
        let bucketing = if caps.native_bucketing {
            Bucketing::Native
        } else {
            Bucketing::ClientSide
        };
        debug!(backend = caps.backend, ?bucketing, "Source ready");
        Self {
            store,
            bucketing,
            deadline,
        }
    }

    pub fn bucketing(&self) -> Bucketing {
        self.bucketing
    }

    pub fn capabilities(&self) -> Capabilities {
        self.store.capabilities()
    }

    /// Fetch rows admitted by `cutoff`, resampled per `resample`.
    ///
    /// The whole result set is materialized before returning, so callers
    /// never observe a partial fetch.
    pub async fn fetch(
        &self,
        cutoff: Option<Cutoff>,
        resample_to: Resample,
    ) -> PipelineResult<TimeSeries> {
        // ---
        let query = async {
            match (resample_to.width(), self.bucketing) {
                (None, _) => self
                    .store
                    .query_range(cutoff)
                    .await
                    .map(TimeSeries::from_readings),
                (Some(width), Bucketing::Native) => self
                    .store
                    .query_bucketed(cutoff, width)
                    .await
                    .map(TimeSeries::from_readings),
                (Some(width), Bucketing::ClientSide) => {
                    let raw = self.store.query_range(cutoff).await?;
                    Ok(resample(&raw, width))
                }
            }
        };

        match tokio::time::timeout(self.deadline, query).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Store query exceeded {:?}", self.deadline);
                Err(PipelineError::StoreUnavailable(format!(
                    "query did not complete within {}s",
                    self.deadline.as_secs_f64()
                )))
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    // ---
    use super::*;
    use crate::models::tests::reading_at;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// In-memory store for pipeline tests. Records every cutoff it is asked for.
    ///
    /// With `loose_exclusive` set it serves `Exclusive(t)` as `>= t`, like a
    /// backend whose timestamps lose precision at the boundary.
    #[derive(Clone, Default)]
    pub(crate) struct MemoryStore {
        pub rows: Arc<Mutex<Vec<Reading>>>,
        pub cutoffs: Arc<Mutex<Vec<Option<Cutoff>>>>,
        pub fail: Arc<Mutex<bool>>,
        pub native: bool,
        pub loose_exclusive: bool,
        pub calls: Arc<AtomicUsize>,
    }

    impl MemoryStore {
        pub(crate) fn with_rows(rows: Vec<Reading>) -> Self {
            let store = Self::default();
            *store.rows.lock().unwrap() = rows;
            store
        }

        pub(crate) fn push(&self, reading: Reading) {
            self.rows.lock().unwrap().push(reading);
        }

        pub(crate) fn set_failing(&self, fail: bool) {
            *self.fail.lock().unwrap() = fail;
        }

        fn select(&self, cutoff: Option<Cutoff>) -> PipelineResult<Vec<Reading>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.cutoffs.lock().unwrap().push(cutoff);
            if *self.fail.lock().unwrap() {
                return Err(PipelineError::StoreUnavailable("memory store offline".into()));
            }
            let cutoff = match cutoff {
                Some(Cutoff::Exclusive(t)) if self.loose_exclusive => Some(Cutoff::Inclusive(t)),
                other => other,
            };
            let mut rows: Vec<Reading> = self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|r| cutoff.map_or(true, |c| c.admits(r.timestamp)))
                .cloned()
                .collect();
            rows.sort_by_key(|r| r.timestamp);
            Ok(rows)
        }
    }

    #[async_trait]
    impl ReadingStore for MemoryStore {
        fn capabilities(&self) -> Capabilities {
            Capabilities {
                backend: "memory",
                native_bucketing: self.native,
            }
        }

        async fn query_range(&self, cutoff: Option<Cutoff>) -> PipelineResult<Vec<Reading>> {
            self.select(cutoff)
        }

        async fn query_bucketed(
            &self,
            cutoff: Option<Cutoff>,
            width: BucketWidth,
        ) -> PipelineResult<Vec<Reading>> {
            let raw = self.select(cutoff)?;
            Ok(resample(&raw, width).into_vec())
        }
    }

    struct StalledStore;

    #[async_trait]
    impl ReadingStore for StalledStore {
        fn capabilities(&self) -> Capabilities {
            Capabilities {
                backend: "stalled",
                native_bucketing: false,
            }
        }

        async fn query_range(&self, _cutoff: Option<Cutoff>) -> PipelineResult<Vec<Reading>> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_backend_resolution() {
        // ---
        assert_eq!(
            Backend::Auto.resolve("postgres://u:p@localhost/db"),
            Backend::Postgres
        );
        assert_eq!(Backend::Auto.resolve("data/ocean.db"), Backend::Sqlite);
        assert_eq!(
            Backend::Auto.resolve("oceanographic_data.duckdb"),
            Backend::DuckDb
        );
        assert_eq!(Backend::Auto.resolve("archive/OCEAN.DDB"), Backend::DuckDb);
        assert_eq!("duckdb".parse::<Backend>().unwrap(), Backend::DuckDb);
        assert_eq!(Backend::Sqlite.resolve("postgres://x"), Backend::Sqlite);
        assert_eq!("PostgreSQL".parse::<Backend>().unwrap(), Backend::Postgres);
    }

    #[test]
    fn test_cutoff_policy() {
        // ---
        let t = reading_at(10, 0.0).timestamp;
        assert!(Cutoff::Inclusive(t).admits(t));
        assert!(!Cutoff::Exclusive(t).admits(t));
        assert_eq!(Cutoff::Exclusive(t).sql_operator(), ">");
    }

    #[tokio::test]
    async fn test_strategy_follows_capability() {
        // ---
        let rows: Vec<Reading> = (0..6).map(|i| reading_at(i * 10, (i + 1) as f64)).collect();
        let client = Source::new(
            Box::new(MemoryStore::with_rows(rows.clone())),
            Duration::from_secs(5),
        );
        let native_store = MemoryStore {
            native: true,
            ..MemoryStore::with_rows(rows)
        };
        let native = Source::new(Box::new(native_store), Duration::from_secs(5));

        assert_eq!(client.bucketing(), Bucketing::ClientSide);
        assert_eq!(native.bucketing(), Bucketing::Native);

        let every_30s: Resample = "30s".parse().unwrap();
        let a = client.fetch(None, every_30s).await.unwrap();
        let b = native.fetch(None, every_30s).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_query_becomes_store_unavailable() {
        // ---
        let source = Source::new(Box::new(StalledStore), Duration::from_secs(2));
        let err = source.fetch(None, Resample::None).await.unwrap_err();
        assert!(matches!(err, PipelineError::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn test_default_bucketed_query_is_refused() {
        // ---
        struct RawOnly;

        #[async_trait]
        impl ReadingStore for RawOnly {
            fn capabilities(&self) -> Capabilities {
                Capabilities {
                    backend: "raw-only",
                    native_bucketing: false,
                }
            }

            async fn query_range(&self, _: Option<Cutoff>) -> PipelineResult<Vec<Reading>> {
                Ok(Vec::new())
            }
        }

        let width = BucketWidth::from_secs(60).unwrap();
        let err = RawOnly.query_bucketed(None, width).await.unwrap_err();
        assert!(matches!(err, PipelineError::QueryError(_)));
    }
}
