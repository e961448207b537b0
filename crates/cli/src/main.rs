//! # Traffic Bridge CLI
//!
//! 命令行接口入口点。
//!
//! 提供：
//! - 配置加载与验证
//! - 实例编排与生命周期管理
//! - 优雅关闭处理

mod cli;
mod commands;
mod error;
mod pipeline;

use anyhow::Result;
use clap::Parser;
use observability::ObservabilityConfig;
use tracing::info;

use cli::{Cli, Commands};
use commands::{run_bridge, run_info, run_validate};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Prometheus is installed by `run` when a port is given
    observability::init_with_config(ObservabilityConfig {
        log_format: cli.log_format.into(),
        metrics_port: None,
        default_log_level: log_level(&cli).to_string(),
    })?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Traffic Bridge CLI starting"
    );

    let result = match &cli.command {
        Commands::Run(args) => run_bridge(args).await,
        Commands::Validate(args) => run_validate(args),
        Commands::Info(args) => run_info(args),
    };

    if let Err(ref e) = result {
        tracing::error!(error = %e, "Command failed");
    }

    result
}

fn log_level(cli: &Cli) -> &'static str {
    if cli.quiet {
        return "warn";
    }
    match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}
