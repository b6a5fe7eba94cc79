//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Cache Publisher - buffers records and forwards rate-limited samples
#[derive(Parser, Debug)]
#[command(
    name = "cache-publisher",
    author,
    version,
    about = "Rate-limited sampling publisher for an MQTT broker and a CouchDB store",
    long_about = "Buffers newline-delimited JSON records in memory and forwards a\n\
                  down-sampled subset of them to each configured destination,\n\
                  never exceeding the destination's per-interval budget."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "CACHE_PUBLISHER_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "CACHE_PUBLISHER_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Read records and publish samples until EOF or a shutdown signal
    Run(RunArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),

    /// Display configuration information (credentials redacted)
    Info(InfoArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file (TOML or JSON)
    #[arg(
        short,
        long,
        default_value = "config.toml",
        env = "CACHE_PUBLISHER_CONFIG"
    )]
    pub config: PathBuf,

    /// Newline-delimited JSON input (stdin if omitted)
    #[arg(short, long, env = "CACHE_PUBLISHER_INPUT")]
    pub input: Option<PathBuf>,

    /// Evaluate triggers every N seconds even without new records
    /// (overrides cache.tick_interval_s)
    #[arg(long, env = "CACHE_PUBLISHER_TICK_INTERVAL")]
    pub tick_interval: Option<f64>,

    /// Log samples instead of sending them to the configured destinations
    #[arg(long)]
    pub dry_run: bool,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "0", env = "CACHE_PUBLISHER_METRICS_PORT")]
    pub metrics_port: u16,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => Self::Json,
            LogFormat::Pretty => Self::Pretty,
            LogFormat::Compact => Self::Compact,
        }
    }
}
