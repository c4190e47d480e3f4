//! Refresh cadence as an explicit state machine.
//!
//! ```text
//!   Idle --(elapsed >= interval | manual request | never refreshed)--> Due
//!   Due  --(begin_fetch)--> Fetching
//!   Fetching --(finish, success or failure)--> Idle
//! ```
//!
//! Time comes from an injected [`Clock`], so cadence is testable without
//! sleeping.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

// ---

/// Source of wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    // ---
    pub fn starting_at(now: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(moved) = chrono::Duration::from_std(by)
            .ok()
            .and_then(|by| now.checked_add_signed(by))
        {
            *now = moved;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Due,
    Fetching,
}

/// Returned when a fetch is requested while one is already in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Busy;

/// Proof that the scheduler moved to `Fetching`; hand it back to `finish`.
#[derive(Debug)]
#[must_use = "a started fetch must be finished"]
pub struct FetchTicket {
    started: DateTime<Utc>,
}

impl FetchTicket {
    pub fn started(&self) -> DateTime<Utc> {
        self.started
    }
}

pub struct Scheduler<C: Clock> {
    clock: C,
    interval: Duration,
    auto_refresh: bool,
    last_refresh: Option<DateTime<Utc>>,
    phase: Phase,
}

impl<C: Clock> Scheduler<C> {
    // ---
    pub fn new(clock: C, interval: Duration) -> Self {
        Self {
            clock,
            interval: interval.max(Duration::from_secs(1)),
            auto_refresh: true,
            last_refresh: None,
            phase: Phase::Idle,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        self.last_refresh
    }

    pub fn auto_refresh(&self) -> bool {
        self.auto_refresh
    }

    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval.max(Duration::from_secs(1));
    }

    pub fn set_auto_refresh(&mut self, enabled: bool) {
        self.auto_refresh = enabled;
    }

    fn elapsed(&self) -> Option<Duration> {
        self.last_refresh
            .map(|last| (self.clock.now() - last).to_std().unwrap_or(Duration::ZERO))
    }

    /// Re-evaluate `Idle -> Due`. Other phases are returned unchanged.
    pub fn poll(&mut self) -> Phase {
        // ---
        if self.phase == Phase::Idle {
            let due = match self.elapsed() {
                None => true,
                Some(elapsed) => self.auto_refresh && elapsed >= self.interval,
            };
            if due {
                self.phase = Phase::Due;
            }
        }
        self.phase
    }

    /// Manual refresh: push the last refresh back one interval so the
    /// scheduler is due right now, even with auto refresh off.
    pub fn request_refresh(&mut self) {
        // ---
        if self.last_refresh.is_some() {
            let now = self.clock.now();
            self.last_refresh = chrono::Duration::from_std(self.interval)
                .ok()
                .and_then(|interval| now.checked_sub_signed(interval))
                .or(Some(DateTime::<Utc>::MIN_UTC));
        }
        if self.phase == Phase::Idle {
            self.phase = Phase::Due;
        }
    }

    /// `Due -> Fetching`. Refused while a fetch is in flight; from `Idle`
    /// the scheduler is polled first.
    pub fn begin_fetch(&mut self) -> Result<Option<FetchTicket>, Busy> {
        // ---
        match self.poll() {
            Phase::Fetching => Err(Busy),
            Phase::Idle => Ok(None),
            Phase::Due => {
                self.phase = Phase::Fetching;
                Ok(Some(FetchTicket {
                    started: self.clock.now(),
                }))
            }
        }
    }

    /// `Fetching -> Idle`. The completion instant is recorded whether or not
    /// the fetch succeeded, so a failure waits for the next cycle.
    pub fn finish(&mut self, _ticket: FetchTicket) -> DateTime<Utc> {
        // ---
        let now = self.clock.now();
        self.last_refresh = Some(now);
        self.phase = Phase::Idle;
        now
    }

    /// Whole seconds until the next scheduled refresh, zero when due.
    pub fn seconds_until_due(&self) -> u64 {
        // ---
        match self.elapsed() {
            None => 0,
            Some(elapsed) => self.interval.saturating_sub(elapsed).as_secs(),
        }
    }
}
