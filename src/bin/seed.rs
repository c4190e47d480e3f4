//! Seed a reading store with synthetic data, or keep appending to fake a
//! live feed.
//!
//! Uses the same configuration as the dashboard (`FILE_PATH`, `DB_TABLE`,
//! `BACKEND`, ...) plus:
//! - `SEED_NUM` – readings to generate into an empty table (default: 1000)
//! - `SEED_FREQ_HZ` – sample frequency of the seeded block (default: 1.0)
//! - `SEED_LIVE` – `1|true|yes` to append one reading per interval forever
//! - `SEED_LIVE_INTERVAL` – seconds between live appends (default: 1)
use std::env;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use dotenvy::dotenv;

use oceanflow::{config, open_sink, telemetry, ConfigLayer, Generator, ReadingSink};

/// Parse an optional environment variable with a default value.
macro_rules! parse_env {
    ($var_name:expr, $ty:ty, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.trim().parse::<$ty>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    dotenv().ok();
    telemetry::init_tracing();

    let cfg = config::load(ConfigLayer::default())?;
    let num = parse_env!("SEED_NUM", usize, 1000);
    let freq_hz = parse_env!("SEED_FREQ_HZ", f64, 1.0);
    let live_interval = parse_env!("SEED_LIVE_INTERVAL", u64, 1).max(1);
    let live = matches!(
        env::var("SEED_LIVE").as_deref(),
        Ok("1") | Ok("true") | Ok("yes")
    );

    let sink = open_sink(&cfg.store_settings())
        .with_context(|| format!("Failed to open store '{}'", config::mask_password(&cfg.file_path)))?;
    sink.ensure_schema().await?;

    let mut generator = Generator::new();
    seed_if_empty(sink.as_ref(), &mut generator, num, freq_hz).await?;

    if live {
        run_live_feed(sink.as_ref(), &mut generator, Duration::from_secs(live_interval)).await?;
    }
    Ok(())
}

/// Insert `num` readings ending now, only when the table is empty.
async fn seed_if_empty(
    sink: &dyn ReadingSink,
    generator: &mut Generator,
    num: usize,
    freq_hz: f64,
) -> Result<()> {
    // ---
    let existing = sink.count().await?;
    if existing > 0 {
        tracing::info!("Table already holds {} readings, not seeding", existing);
        return Ok(());
    }
    tracing::info!("Generating {} samples at {} Hz ...", num, freq_hz);
    let readings = generator.generate(num, freq_hz, Utc::now());
    let inserted = sink.insert(&readings).await?;
    tracing::info!("Inserted {} readings", inserted);
    Ok(())
}

/// Append one reading per `every` until interrupted.
async fn run_live_feed(sink: &dyn ReadingSink, generator: &mut Generator, every: Duration) -> Result<()> {
    // ---
    tracing::info!("Live feed: one reading every {:?}, Ctrl-C to stop", every);
    let mut ticker = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let last = sink.latest().await?;
                let next = generator.append_one(last.as_ref(), Utc::now());
                sink.insert(std::slice::from_ref(&next)).await?;
                tracing::debug!("Appended reading at {}", next.timestamp);
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Live feed stopped");
                return Ok(());
            }
        }
    }
}
