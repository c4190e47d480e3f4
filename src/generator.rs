//! Synthetic reading generator for seeding a store or faking a live feed.
//!
//! Each field is a fixed-frequency sinusoid plus independent noise, so
//! consecutive readings are smooth and auto-correlated. The tracer is an
//! exponential draw clipped at 500, matching a dye sensor sitting mostly
//! near background.

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Exp1, StandardNormal};
use tracing::warn;

use crate::models::Reading;

/// Boston harbour.
pub const ORIGIN: (f64, f64) = (42.3601, -71.0589);

const PH_MA_ALPHA: f64 = 0.1;
const RHODAMINE_SCALE: f64 = 1.25;
const RHODAMINE_CAP: f64 = 500.0;

// ---

pub struct Generator {
    rng: StdRng,
    origin: (f64, f64),
}

impl Default for Generator {
    fn default() -> Self {
        Self::new()
    }
}

impl Generator {
    // ---
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
            origin: ORIGIN,
        }
    }

    /// Reproducible output for tests.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            origin: ORIGIN,
        }
    }

    /// Zero-mean Gaussian noise with standard deviation `sigma`.
    fn normal(&mut self, sigma: f64) -> f64 {
        let z: f64 = self.rng.sample(StandardNormal);
        sigma * z
    }

    /// Exponential with mean `RHODAMINE_SCALE`, clipped.
    fn rhodamine(&mut self) -> f64 {
        let e: f64 = self.rng.sample(Exp1);
        (e * RHODAMINE_SCALE).min(RHODAMINE_CAP)
    }

    /// `n` readings at `frequency_hz`, the last one at `end`.
    ///
    /// A non-positive or non-finite frequency falls back to 1 Hz.
    pub fn generate(&mut self, n: usize, frequency_hz: f64, end: DateTime<Utc>) -> Vec<Reading> {
        // ---
        let hz = if frequency_hz.is_finite() && frequency_hz > 0.0 {
            frequency_hz
        } else {
            warn!(frequency_hz, "Invalid sample frequency, using 1 Hz");
            1.0
        };
        let step_micros = (1e6 / hz).round().max(1.0) as i64;
        let start = end - Duration::microseconds(step_micros * n.saturating_sub(1) as i64);
        let (lat0, lon0) = self.origin;

        let mut out: Vec<Reading> = Vec::with_capacity(n);
        for i in 0..n {
            let x = i as f64;
            let ph = 8.1 + 0.3 * (x * 0.025).sin() + self.normal(0.05);
            let ph_ma = out.last().map_or(ph, |prev| ema(prev.ph_ma, ph));
            out.push(Reading {
                timestamp: start + Duration::microseconds(step_micros * i as i64),
                lat: lat0 + (x * 0.01).sin() * 0.1 + self.normal(0.01),
                lon: lon0 + (x * 0.01).cos() * 0.1 + self.normal(0.01),
                temp: 15.0 + 5.0 * (x * 0.02).sin() + self.normal(0.5),
                salinity: 35.0 + 2.0 * (x * 0.015).sin() + self.normal(0.2),
                rhodamine: self.rhodamine(),
                ph,
                ph_ma,
            });
        }
        out
    }

    /// Next reading of a live feed at `at`, drifting from `last`.
    ///
    /// Periodic terms are driven by the wall-clock epoch seconds so a feed
    /// resumed after a restart continues the same curves.
    pub fn append_one(&mut self, last: Option<&Reading>, at: DateTime<Utc>) -> Reading {
        // ---
        let t = at.timestamp_micros() as f64 / 1e6;
        let (lat, lon) = match last {
            Some(prev) => (prev.lat + self.normal(0.001), prev.lon + self.normal(0.001)),
            None => self.origin,
        };
        let ph = 8.1 + 0.3 * (t * 0.025).sin() + self.normal(0.05);
        Reading {
            timestamp: at,
            lat,
            lon,
            temp: 15.0 + 5.0 * (t * 0.02).sin() + self.normal(0.5),
            salinity: 35.0 + 2.0 * (t * 0.015).sin() + self.normal(0.2),
            rhodamine: self.rhodamine(),
            ph,
            ph_ma: last.map_or(ph, |prev| ema(prev.ph_ma, ph)),
        }
    }
}

fn ema(previous: f64, sample: f64) -> f64 {
    previous + PH_MA_ALPHA * (sample - previous)
}
