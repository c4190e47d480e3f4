//! The refresh loop: one owner for the cache, many readers of snapshots.
//!
//! [`RefreshLoop`] runs as a single tokio task. It is the only writer of the
//! [`CacheState`]; it drives the [`Scheduler`], applies [`Command`]s between
//! cycles, and after every cycle publishes an immutable [`Snapshot`] through
//! a `watch` channel. Renderers hold a [`DashboardHandle`] and never see a
//! half-merged series.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::cache::{refresh, CacheState, RefreshMode, RefreshReport, View};
use crate::config::MAX_UPDATE_FREQUENCY_SECS;
use crate::error::{PipelineError, PipelineResult};
use crate::models::TimeSeries;
use crate::resample::Resample;
use crate::scheduler::{Busy, Clock, Scheduler};
use crate::store::{Bucketing, Source};

const COMMAND_QUEUE: usize = 32;

// ---

/// User-visible outcome of the most recent cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Status {
    /// No cycle has completed yet.
    Pending,
    Loaded {
        records: usize,
        latest_data: DateTime<Utc>,
    },
    NoData,
    /// The cycle failed; `retained_records` are still being served.
    Failed {
        kind: &'static str,
        message: String,
        retained_records: usize,
    },
}

/// Everything a renderer needs, frozen at the end of a cycle.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub session: Uuid,
    pub series: Arc<TimeSeries>,
    pub view: View,
    pub update_frequency: u64,
    pub auto_refresh: bool,
    pub last_refresh: Option<DateTime<Utc>>,
    pub status: Status,
    pub backend: &'static str,
    pub bucketing: Bucketing,
}

impl Snapshot {
    // ---
    /// Seconds until the next scheduled refresh as seen at `now`.
    pub fn next_refresh_in(&self, now: DateTime<Utc>) -> u64 {
        // ---
        match self.last_refresh {
            None => 0,
            Some(last) => {
                let elapsed = (now - last).num_seconds().max(0) as u64;
                self.update_frequency.saturating_sub(elapsed)
            }
        }
    }

    /// One-line status for display.
    pub fn status_line(&self, now: DateTime<Utc>) -> String {
        // ---
        let last = self
            .last_refresh
            .map(|t| t.format("%H:%M:%S").to_string())
            .unwrap_or_else(|| "never".into());
        match &self.status {
            Status::Pending => "Waiting for first refresh".to_string(),
            Status::Loaded {
                records,
                latest_data,
            } => format!(
                "Data loaded: {} records | Last update: {} | Latest data: {} | Next update in: {} seconds",
                records,
                last,
                latest_data.format("%H:%M:%S"),
                self.next_refresh_in(now)
            ),
            Status::NoData => "No data available".to_string(),
            Status::Failed {
                message,
                retained_records,
                ..
            } => format!(
                "Refresh failed: {} (showing {} cached records)",
                message, retained_records
            ),
        }
    }
}

/// Runtime override of the view and cadence. Unset fields keep their value.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ViewUpdate {
    pub time_range_hours: Option<u32>,
    pub resample: Option<Resample>,
    pub update_frequency: Option<u64>,
    pub auto_refresh: Option<bool>,
}

#[derive(Debug)]
pub enum Command {
    /// Manual refresh request.
    RefreshNow,
    UpdateView(ViewUpdate, oneshot::Sender<PipelineResult<()>>),
}

pub struct RefreshLoop<C: Clock> {
    session: Uuid,
    source: Source,
    cache: CacheState,
    scheduler: Scheduler<C>,
    view: View,
    status: Status,
    published: Arc<TimeSeries>,
    snapshots: watch::Sender<Arc<Snapshot>>,
}

impl<C: Clock> RefreshLoop<C> {
    // ---
    pub fn new(
        source: Source,
        clock: C,
        view: View,
        update_interval: Duration,
    ) -> (Self, watch::Receiver<Arc<Snapshot>>) {
        // ---
        let session = Uuid::new_v4();
        let scheduler = Scheduler::new(clock, update_interval);
        let caps = source.capabilities();
        let first = Arc::new(Snapshot {
            session,
            series: Arc::new(TimeSeries::new()),
            view,
            update_frequency: scheduler.interval().as_secs(),
            auto_refresh: scheduler.auto_refresh(),
            last_refresh: None,
            status: Status::Pending,
            backend: caps.backend,
            bucketing: source.bucketing(),
        });
        let (tx, rx) = watch::channel(first);
        let refresh_loop = Self {
            session,
            source,
            cache: CacheState::new(),
            scheduler,
            view,
            status: Status::Pending,
            published: Arc::new(TimeSeries::new()),
            snapshots: tx,
        };
        (refresh_loop, rx)
    }

    pub fn session(&self) -> Uuid {
        self.session
    }

    /// Apply a command between cycles.
    pub fn apply(&mut self, command: Command) {
        // ---
        match command {
            Command::RefreshNow => {
                info!(session = %self.session, "Manual refresh requested");
                self.scheduler.request_refresh();
            }
            Command::UpdateView(update, reply) => {
                let result = self.update_view(update);
                if let Err(e) = &result {
                    warn!("Rejected view update: {}", e);
                }
                // The requester may have gone away; nothing to do then.
                let _ = reply.send(result);
            }
        }
    }

    fn update_view(&mut self, update: ViewUpdate) -> PipelineResult<()> {
        // ---
        if let Some(secs) = update.update_frequency {
            if !(1..=MAX_UPDATE_FREQUENCY_SECS).contains(&secs) {
                return Err(PipelineError::invalid(format!(
                    "update frequency must be 1..={} seconds, got {}",
                    MAX_UPDATE_FREQUENCY_SECS, secs
                )));
            }
        }
        let view = View::new(
            update.time_range_hours.unwrap_or(self.view.time_range_hours),
            update.resample.unwrap_or(self.view.resample),
        )?;

        if let Some(secs) = update.update_frequency {
            self.scheduler.set_interval(Duration::from_secs(secs));
        }
        if let Some(enabled) = update.auto_refresh {
            self.scheduler.set_auto_refresh(enabled);
        }
        if view != self.view {
            info!(?view, "View changed, scheduling full reload");
            self.view = view;
            self.scheduler.request_refresh();
        }
        self.publish();
        Ok(())
    }

    /// Run one cycle if the scheduler says so. Returns the cache report when
    /// a fetch happened and succeeded.
    pub async fn tick(&mut self) -> Option<RefreshReport> {
        // ---
        let ticket = match self.scheduler.begin_fetch() {
            Ok(Some(ticket)) => ticket,
            Ok(None) => return None,
            Err(Busy) => {
                debug!("Refresh already in flight, skipping");
                return None;
            }
        };

        let now = ticket.started();
        let (mode, _) = self.cache.plan(&self.view, now);
        let span = info_span!("refresh", session = %self.session, ?mode);
        let result = refresh(&mut self.cache, &self.source, &self.view, now)
            .instrument(span)
            .await;
        self.scheduler.finish(ticket);

        let report = match result {
            Ok(report) => {
                let series = self.cache.series();
                self.status = match series.latest() {
                    Some(latest) => Status::Loaded {
                        records: series.len(),
                        latest_data: latest.timestamp,
                    },
                    None => Status::NoData,
                };
                let changed = report.mode == RefreshMode::FullReload
                    || report.fetched > 0
                    || report.expired > 0;
                if changed {
                    self.published = Arc::new(series.clone());
                }
                Some(report)
            }
            Err(e) => {
                match &e {
                    PipelineError::QueryError(_) => error!("Refresh failed: {}", e),
                    _ => warn!("Refresh failed: {}", e),
                }
                self.status = Status::Failed {
                    kind: e.kind(),
                    message: e.to_string(),
                    retained_records: self.cache.series().len(),
                };
                None
            }
        };
        self.publish();
        report
    }

    fn publish(&self) {
        // ---
        let caps = self.source.capabilities();
        let snapshot = Snapshot {
            session: self.session,
            series: Arc::clone(&self.published),
            view: self.view,
            update_frequency: self.scheduler.interval().as_secs(),
            auto_refresh: self.scheduler.auto_refresh(),
            last_refresh: self.scheduler.last_refresh(),
            status: self.status.clone(),
            backend: caps.backend,
            bucketing: self.source.bucketing(),
        };
        self.snapshots.send_replace(Arc::new(snapshot));
    }

    /// Poll the scheduler every `poll_every` and apply commands as they
    /// arrive, until every command sender is dropped.
    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>, poll_every: Duration) {
        // ---
        info!(session = %self.session, "Refresh loop started");
        let mut ticker = tokio::time::interval(poll_every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                command = commands.recv() => match command {
                    Some(command) => self.apply(command),
                    None => break,
                },
            }
            self.tick().await;
        }
        info!(session = %self.session, "Refresh loop stopped");
    }
}

/// Cloneable front end used by renderers.
#[derive(Clone)]
pub struct DashboardHandle {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<Arc<Snapshot>>,
}

impl DashboardHandle {
    // ---
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.snapshots.borrow())
    }

    pub async fn request_refresh(&self) -> PipelineResult<()> {
        self.commands
            .send(Command::RefreshNow)
            .await
            .map_err(|_| PipelineError::StoreUnavailable("refresh loop is not running".into()))
    }

    pub async fn update_view(&self, update: ViewUpdate) -> PipelineResult<()> {
        // ---
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::UpdateView(update, reply))
            .await
            .map_err(|_| PipelineError::StoreUnavailable("refresh loop is not running".into()))?;
        response
            .await
            .map_err(|_| PipelineError::StoreUnavailable("refresh loop is not running".into()))?
    }

    /// Wait for the next published snapshot.
    pub async fn changed(&mut self) -> Option<Arc<Snapshot>> {
        self.snapshots.changed().await.ok()?;
        Some(self.snapshot())
    }
}

/// Start the refresh loop on the current runtime.
pub fn spawn<C: Clock + 'static>(
    source: Source,
    clock: C,
    view: View,
    update_interval: Duration,
    poll_every: Duration,
) -> (DashboardHandle, tokio::task::JoinHandle<()>) {
    // ---
    let (refresh_loop, snapshots) = RefreshLoop::new(source, clock, view, update_interval);
    let (commands, receiver) = mpsc::channel(COMMAND_QUEUE);
    let task = tokio::spawn(refresh_loop.run(receiver, poll_every));
    (
        DashboardHandle {
            commands,
            snapshots,
        },
        task,
    )
}
