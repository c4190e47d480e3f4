//! Incremental cache of the visible time window.
//!
//! [`CacheState`] is a plain value owned by the refresh loop. [`refresh`]
//! decides between a full reload and an incremental append, fetches, and
//! only then mutates the state, so a failed or partial fetch never changes
//! what renderers see.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{PipelineError, PipelineResult};
use crate::models::TimeSeries;
use crate::resample::Resample;
use crate::store::{Cutoff, Source};

pub const MIN_TIME_RANGE_HOURS: u32 = 1;
pub const MAX_TIME_RANGE_HOURS: u32 = 168;

// ---

/// The time-range filter and resampling the renderers asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct View {
    pub time_range_hours: u32,
    pub resample: Resample,
}

impl View {
    // ---
    pub fn new(time_range_hours: u32, resample: Resample) -> PipelineResult<Self> {
        // ---
        if !(MIN_TIME_RANGE_HOURS..=MAX_TIME_RANGE_HOURS).contains(&time_range_hours) {
            return Err(PipelineError::invalid(format!(
                "time range must be {}..={} hours, got {}",
                MIN_TIME_RANGE_HOURS, MAX_TIME_RANGE_HOURS, time_range_hours
            )));
        }
        Ok(Self {
            time_range_hours,
            resample,
        })
    }

    /// Oldest timestamp visible at `now`.
    pub fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::hours(i64::from(self.time_range_hours))
    }
}

/// Which kind of refresh ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshMode {
    FullReload,
    IncrementalAppend,
}

/// Outcome of one [`refresh`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshReport {
    pub mode: RefreshMode,
    pub fetched: usize,
    pub added: usize,
    pub expired: usize,
}

/// Cached series plus the view it was loaded for.
#[derive(Debug, Clone, Default)]
pub struct CacheState {
    series: TimeSeries,
    view: Option<View>,
}

impl CacheState {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    pub fn series(&self) -> &TimeSeries {
        &self.series
    }

    /// Maximum timestamp in the series, unset when empty.
    pub fn watermark(&self) -> Option<DateTime<Utc>> {
        self.series.watermark()
    }

    pub fn view(&self) -> Option<View> {
        self.view
    }

    /// Mode and lower bound the next refresh for `view` would use.
    pub fn plan(&self, view: &View, now: DateTime<Utc>) -> (RefreshMode, Cutoff) {
        // ---
        match (self.view, self.watermark()) {
            (Some(cached), Some(watermark)) if cached == *view => {
                // A resampled watermark is the start of a bucket that may
                // still be filling, so that bucket is fetched again in full
                // and replaced through dedup.
                let cutoff = match view.resample {
                    Resample::None => Cutoff::Exclusive(watermark),
                    Resample::Every(_) => Cutoff::Inclusive(watermark),
                };
                (RefreshMode::IncrementalAppend, cutoff)
            }
            _ => (
                RefreshMode::FullReload,
                Cutoff::Inclusive(view.window_start(now)),
            ),
        }
    }
}

/// Bring `state` up to date for `view`.
///
/// On error `state` is untouched.
pub async fn refresh(
    state: &mut CacheState,
    source: &Source,
    view: &View,
    now: DateTime<Utc>,
) -> PipelineResult<RefreshReport> {
    // ---
    let (mode, cutoff) = state.plan(view, now);
    debug!(?mode, %cutoff, "refresh planned");

    let fetched = source.fetch(Some(cutoff), view.resample).await?;
    let fetched_len = fetched.len();

    let report = match mode {
        RefreshMode::FullReload => {
            state.series = fetched;
            state.view = Some(*view);
            info!(rows = fetched_len, "full reload");
            RefreshReport {
                mode,
                fetched: fetched_len,
                added: fetched_len,
                expired: 0,
            }
        }
        RefreshMode::IncrementalAppend => {
            let added = state.series.merge(fetched.into_vec());
            let window_start = match view.resample {
                Resample::None => view.window_start(now),
                Resample::Every(width) => width.bucket_start(view.window_start(now)),
            };
            let expired = state.series.retain_since(window_start);
            if fetched_len > 0 || expired > 0 {
                info!(fetched = fetched_len, added, expired, "incremental append");
            }
            RefreshReport {
                mode,
                fetched: fetched_len,
                added,
                expired,
            }
        }
    };

    debug_assert!(state.series.is_strictly_ascending());
    Ok(report)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::tests::reading_at;
    use crate::models::Reading;
    use crate::store::tests::MemoryStore;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn source(store: &MemoryStore) -> Source {
        Source::new(Box::new(store.clone()), std::time::Duration::from_secs(5))
    }

    fn raw_view() -> View {
        View::new(24, Resample::None).unwrap()
    }

    const BASE: i64 = 1_750_000_000;

    #[tokio::test]
    async fn test_cold_start_on_empty_store() {
        // ---
        let store = MemoryStore::default();
        let mut state = CacheState::new();

        let report = refresh(&mut state, &source(&store), &raw_view(), at(BASE))
            .await
            .unwrap();

        assert_eq!(report.mode, RefreshMode::FullReload);
        assert!(state.series().is_empty());
        assert_eq!(state.watermark(), None);
    }

    #[tokio::test]
    async fn test_steady_growth_appends_new_rows() {
        // ---
        let rows: Vec<Reading> = (0..100).map(|i| reading_at(BASE + i, i as f64)).collect();
        let store = MemoryStore::with_rows(rows);
        let src = source(&store);
        let mut state = CacheState::new();

        refresh(&mut state, &src, &raw_view(), at(BASE + 100)).await.unwrap();
        assert_eq!(state.series().len(), 100);

        for i in 100..105 {
            store.push(reading_at(BASE + i, i as f64));
        }
        let report = refresh(&mut state, &src, &raw_view(), at(BASE + 105))
            .await
            .unwrap();

        assert_eq!(report.mode, RefreshMode::IncrementalAppend);
        assert_eq!(report.added, 5);
        assert_eq!(state.series().len(), 105);
        assert!(state.series().is_strictly_ascending());
        assert_eq!(state.watermark(), Some(at(BASE + 104)));
    }

    #[tokio::test]
    async fn test_incremental_cutoff_is_exclusive_watermark() {
        // ---
        let store = MemoryStore::with_rows(vec![reading_at(BASE, 1.0), reading_at(BASE + 10, 2.0)]);
        let src = source(&store);
        let mut state = CacheState::new();

        refresh(&mut state, &src, &raw_view(), at(BASE + 20)).await.unwrap();
        refresh(&mut state, &src, &raw_view(), at(BASE + 30)).await.unwrap();

        let cutoffs = store.cutoffs.lock().unwrap().clone();
        assert_eq!(
            cutoffs[0],
            Some(Cutoff::Inclusive(raw_view().window_start(at(BASE + 20))))
        );
        assert_eq!(cutoffs[1], Some(Cutoff::Exclusive(at(BASE + 10))));
    }

    #[tokio::test]
    async fn test_boundary_row_refetched_is_not_duplicated() {
        // ---
        // The store serves `> T` as `>= T`, so the watermark row comes back.
        let store = MemoryStore {
            loose_exclusive: true,
            ..MemoryStore::with_rows(vec![reading_at(BASE, 1.0), reading_at(BASE + 10, 2.0)])
        };
        let src = source(&store);
        let mut state = CacheState::new();
        refresh(&mut state, &src, &raw_view(), at(BASE + 20)).await.unwrap();

        store.rows.lock().unwrap()[1].temp = 2.5;
        store.push(reading_at(BASE + 20, 3.0));
        let report = refresh(&mut state, &src, &raw_view(), at(BASE + 30)).await.unwrap();

        assert_eq!(report.mode, RefreshMode::IncrementalAppend);
        assert_eq!(report.fetched, 2);
        assert_eq!(report.added, 1);
        assert_eq!(state.series().len(), 3);
        assert!(state.series().is_strictly_ascending());
        let at_boundary: Vec<f64> = state
            .series()
            .iter()
            .filter(|r| r.timestamp == at(BASE + 10))
            .map(|r| r.temp)
            .collect();
        assert_eq!(at_boundary, vec![2.5]);
    }

    #[tokio::test]
    async fn test_view_change_forces_full_reload() {
        // ---
        let store = MemoryStore::with_rows(vec![reading_at(BASE, 1.0)]);
        let src = source(&store);
        let mut state = CacheState::new();
        refresh(&mut state, &src, &raw_view(), at(BASE + 10)).await.unwrap();

        let wider = View::new(48, Resample::None).unwrap();
        let report = refresh(&mut state, &src, &wider, at(BASE + 20)).await.unwrap();

        assert_eq!(report.mode, RefreshMode::FullReload);
        assert_eq!(state.view(), Some(wider));
    }

    #[tokio::test]
    async fn test_failed_fetch_leaves_cache_untouched() {
        // ---
        let store = MemoryStore::with_rows(vec![reading_at(BASE, 1.0)]);
        let src = source(&store);
        let mut state = CacheState::new();
        refresh(&mut state, &src, &raw_view(), at(BASE + 10)).await.unwrap();

        store.push(reading_at(BASE + 5, 2.0));
        store.set_failing(true);
        let err = refresh(&mut state, &src, &raw_view(), at(BASE + 20))
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::StoreUnavailable(_)));
        assert_eq!(state.series().len(), 1);
        assert_eq!(state.watermark(), Some(at(BASE)));
    }

    #[tokio::test]
    async fn test_resampled_append_recomputes_open_bucket() {
        // ---
        let view = View::new(24, "60s".parse().unwrap()).unwrap();
        let start = BASE - BASE.rem_euclid(60);
        let store = MemoryStore::with_rows(vec![
            reading_at(start, 1.0),
            reading_at(start + 10, 3.0),
        ]);
        let src = source(&store);
        let mut state = CacheState::new();
        refresh(&mut state, &src, &view, at(start + 20)).await.unwrap();
        assert_eq!(state.series().latest().unwrap().temp, 2.0);

        store.push(reading_at(start + 20, 5.0));
        store.push(reading_at(start + 70, 7.0));
        refresh(&mut state, &src, &view, at(start + 80)).await.unwrap();

        let temps: Vec<f64> = state.series().iter().map(|r| r.temp).collect();
        assert_eq!(temps, vec![3.0, 7.0]);
        assert_eq!(
            store.cutoffs.lock().unwrap()[1],
            Some(Cutoff::Inclusive(at(start)))
        );
    }

    #[tokio::test]
    async fn test_rows_leaving_window_are_trimmed() {
        // ---
        let view = View::new(1, Resample::None).unwrap();
        let store = MemoryStore::with_rows(vec![reading_at(BASE, 1.0)]);
        let src = source(&store);
        let mut state = CacheState::new();
        refresh(&mut state, &src, &view, at(BASE + 60)).await.unwrap();

        store.push(reading_at(BASE + 3_700, 2.0));
        let report = refresh(&mut state, &src, &view, at(BASE + 3_700))
            .await
            .unwrap();

        assert_eq!(report.expired, 1);
        assert_eq!(state.series().len(), 1);
        assert_eq!(state.watermark(), Some(at(BASE + 3_700)));
    }

    #[test]
    fn test_time_range_bounds() {
        // ---
        assert!(View::new(0, Resample::None).is_err());
        assert!(View::new(169, Resample::None).is_err());
        assert!(View::new(168, Resample::None).is_ok());
    }
}
