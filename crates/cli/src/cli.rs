//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Traffic Bridge - microsimulation to key-value store bridge
#[derive(Parser, Debug)]
#[command(
    name = "traffic-bridge",
    author,
    version,
    about = "Traffic microsimulation bridge",
    long_about = "Runs one or more traffic simulation instances and mirrors their state into a\n\
                  key-value store.\n\n\
                  Each instance publishes vehicle and signal updates every frame and reacts to\n\
                  hazard, navigation and cancel events polled from the store."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "TRAFFIC_BRIDGE_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "TRAFFIC_BRIDGE_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the configured simulation instances
    Run(RunArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),

    /// Display configuration information
    Info(InfoArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file (TOML or JSON)
    #[arg(
        short,
        long,
        default_value = "traffic.toml",
        env = "TRAFFIC_BRIDGE_CONFIG"
    )]
    pub config: PathBuf,

    /// Override store host from configuration
    #[arg(long, env = "STORE_HOST")]
    pub host: Option<String>,

    /// Override store port from configuration
    #[arg(long, env = "STORE_PORT")]
    pub port: Option<u16>,

    /// Run only these instances (repeatable)
    #[arg(short, long = "instance", value_name = "ID")]
    pub instances: Vec<String>,

    /// Stop every instance after this many frames (0 = unlimited)
    #[arg(long, default_value = "0", env = "TRAFFIC_BRIDGE_MAX_FRAMES")]
    pub max_frames: u64,

    /// Run timeout in seconds (0 = no timeout)
    #[arg(long, default_value = "0", env = "TRAFFIC_BRIDGE_TIMEOUT")]
    pub timeout: u64,

    /// Validate configuration and exit without running
    #[arg(long)]
    pub dry_run: bool,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "9000", env = "TRAFFIC_BRIDGE_METRICS_PORT")]
    pub metrics_port: u16,

    /// Print the run summary as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "traffic.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "traffic.toml")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Show controller loop intervals
    #[arg(long)]
    pub controller: bool,

    /// Show store and pool settings
    #[arg(long)]
    pub store: bool,
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
            LogFormat::Json => observability::LogFormat::Json,
            LogFormat::Pretty => observability::LogFormat::Pretty,
            LogFormat::Compact => observability::LogFormat::Compact,
        }
    }
}
