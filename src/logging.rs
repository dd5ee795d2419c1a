// src/logging.rs

//! `tracing` subscriber setup.
//!
//! The filter comes from, in order: the `--log-level` flag, the
//! `EVENTDROID_LOG` environment variable (full `EnvFilter` directive syntax,
//! e.g. `info,eventdroid::bridge=trace`), then plain `info`.
//!
//! Everything goes to stderr. Worker output never passes through here; it is
//! captured to files in the node directory.

use anyhow::{Result, anyhow};
use tracing_subscriber::EnvFilter;

use crate::cli::LogLevel;

pub const LOG_ENV: &str = "EVENTDROID_LOG";

/// Install the global subscriber. Fails if one is already set.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let env = std::env::var(LOG_ENV).ok();
    let filter = select_filter(cli_level, env.as_deref());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("installing log subscriber: {e}"))
}

/// Pick the filter without touching global state.
///
/// A malformed `EVENTDROID_LOG` value is ignored rather than fatal.
pub fn select_filter(cli_level: Option<LogLevel>, env: Option<&str>) -> EnvFilter {
    if let Some(level) = cli_level {
        return EnvFilter::new(level.as_directive());
    }
    env.map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| EnvFilter::try_new(s).ok())
        .unwrap_or_else(|| EnvFilter::new(LogLevel::Info.as_directive()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_wins_over_env() {
        let f = select_filter(Some(LogLevel::Debug), Some("error"));
        assert_eq!(f.to_string(), "debug");
    }

    #[test]
    fn env_directives_are_kept() {
        let f = select_filter(None, Some("info,eventdroid::bridge=trace"));
        assert!(f.to_string().contains("eventdroid::bridge=trace"));
    }

    #[test]
    fn empty_env_falls_back_to_info() {
        assert_eq!(select_filter(None, Some("  ")).to_string(), "info");
        assert_eq!(select_filter(None, None).to_string(), "info");
    }
}
