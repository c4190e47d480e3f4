//! Tracing subscriber setup shared by the binaries.
//!
//! - `DASHBOARD_LOG_LEVEL`: `trace`..`error`, default `info`; `RUST_LOG` wins
//! - `DASHBOARD_SPAN_EVENTS`: `full`, `enter_exit`, else close events only
//! - `FORCE_COLOR`: `1|true|yes` / `0|false|no`, else TTY detection
use std::env;

use is_terminal::IsTerminal;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

const QUIET_TARGETS: &str = "sqlx::query=warn";

// ---

/// Install the global subscriber. Call once, before any logging.
pub fn init_tracing() {
    // ---
    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = level_directive(env::var("DASHBOARD_LOG_LEVEL").ok().as_deref());
        EnvFilter::new(format!("{level},{QUIET_TARGETS}"))
    };
    let use_color = color_choice(env::var("FORCE_COLOR").ok().as_deref())
        .unwrap_or_else(|| std::io::stdout().is_terminal());

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events(env::var("DASHBOARD_SPAN_EVENTS").ok().as_deref()))
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}

fn level_directive(value: Option<&str>) -> &'static str {
    match value.map(str::trim) {
        Some("trace") => "trace",
        Some("debug") => "debug",
        Some("warn") => "warn",
        Some("error") => "error",
        _ => "info",
    }
}

/// `None` means "detect".
fn color_choice(value: Option<&str>) -> Option<bool> {
    match value {
        Some("1" | "true" | "yes") => Some(true),
        Some("0" | "false" | "no") => Some(false),
        _ => None,
    }
}

fn span_events(value: Option<&str>) -> FmtSpan {
    match value {
        Some("full") => FmtSpan::FULL,
        Some("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    }
}
