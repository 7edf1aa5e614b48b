//! File logging for the hook binary.
//!
//! Hooks run with stdout/stderr owned by the agent, so everything goes to
//! `<root>/logs/hook.log` through a non-blocking writer. The returned guard
//! must live until exit or buffered lines are lost.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub const LOG_FILTER_ENV: &str = "TETHER_LOG";
pub const DEBUG_ENV: &str = "TETHER_DEBUG_LOG";
const LOG_FILE: &str = "hook.log";
const DEFAULT_FILTER: &str = "info";

pub fn init(log_dir: &Path) -> Option<WorkerGuard> {
    if fs_err::create_dir_all(log_dir).is_err() {
        return None;
    }

    let file_appender = tracing_appender::rolling::never(log_dir, LOG_FILE);
    let (writer, guard) = tracing_appender::non_blocking(file_appender);

    let result = tracing_subscriber::registry()
        .with(filter())
        .with(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true),
        )
        .try_init();

    result.ok().map(|()| guard)
}

fn filter() -> EnvFilter {
    if debug_enabled(std::env::var(DEBUG_ENV).ok().as_deref()) {
        return EnvFilter::new("debug");
    }
    std::env::var(LOG_FILTER_ENV)
        .ok()
        .and_then(|value| EnvFilter::try_new(value).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}

fn debug_enabled(value: Option<&str>) -> bool {
    matches!(value, Some("1" | "true" | "TRUE" | "yes" | "YES"))
}
