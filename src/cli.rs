// src/cli.rs

//! Command-line interface.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Command-line arguments for `eventdroid`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "eventdroid",
    version,
    about = "Feed event ranges from a coordinator to a local worker pool.",
    long_about = None
)]
pub struct CliArgs {
    /// Node config file (TOML).
    #[arg(long, value_name = "PATH", default_value = "eventdroid.toml")]
    pub config: PathBuf,

    /// Override `[node].id`.
    #[arg(long, value_name = "N")]
    pub node_id: Option<u32>,

    /// Override `[node].work_dir`.
    #[arg(long, value_name = "DIR")]
    pub work_dir: Option<PathBuf>,

    /// Log level. Without it, `EVENTDROID_LOG` is consulted.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Resolve the config, print it and exit without contacting the
    /// coordinator.
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

pub fn parse() -> CliArgs {
    CliArgs::parse()
}
