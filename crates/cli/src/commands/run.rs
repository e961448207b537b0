//! `run` command implementation.

use anyhow::{Context, Result};
use contracts::TrafficConfig;
use std::time::Duration;
use tracing::{info, warn};

use crate::cli::RunArgs;
use crate::error::CliError;
use crate::pipeline::{Bridge, BridgeConfig};

/// Execute the `run` command
pub async fn run_bridge(args: &RunArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration");

    if !args.config.exists() {
        return Err(CliError::config_not_found(args.config.display().to_string()).into());
    }

    let mut config = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    apply_overrides(&mut config, args.host.as_deref(), args.port, &args.instances)?;

    info!(
        host = %config.store.host,
        port = config.store.port,
        instances = config.instances.len(),
        "Configuration loaded"
    );

    // Dry run - just validate and exit
    if args.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        print_config_summary(&config);
        return Ok(());
    }

    let bridge = Bridge::new(BridgeConfig {
        config,
        max_frames: (args.max_frames > 0).then_some(args.max_frames),
        timeout: (args.timeout > 0).then(|| Duration::from_secs(args.timeout)),
        metrics_port: (args.metrics_port > 0).then_some(args.metrics_port),
    });

    info!("Starting instances...");
    let stats = bridge
        .run(shutdown_signal())
        .await
        .context("Bridge run failed")?;

    info!(
        frames = stats.total_frames(),
        duration_secs = stats.duration.as_secs_f64(),
        fps = format!("{:.2}", stats.fps()),
        interrupted = ?stats.interrupted,
        "Run completed"
    );
    if args.json {
        let json = serde_json::to_string_pretty(&stats.to_record())
            .context("Failed to serialize run summary")?;
        println!("{}", json);
    } else {
        stats.print_summary();
    }

    if !stats.failures.is_empty() {
        return Err(CliError::InstancesFailed {
            failed: stats.failures.len(),
            total: stats.failures.len() + stats.reports.len(),
        }
        .into());
    }

    info!("Traffic Bridge finished");
    Ok(())
}

/// Apply store overrides and the instance filter, then re-validate
fn apply_overrides(
    config: &mut TrafficConfig,
    host: Option<&str>,
    port: Option<u16>,
    filter: &[String],
) -> std::result::Result<(), CliError> {
    if let Some(host) = host {
        info!(host = %host, "Overriding store host from CLI");
        config.store.host = host.to_string();
    }
    if let Some(port) = port {
        info!(port = %port, "Overriding store port from CLI");
        config.store.port = port;
    }

    if !filter.is_empty() {
        config
            .instances
            .retain(|instance| filter.contains(&instance.instance_id));
        if config.instances.is_empty() {
            return Err(CliError::NoInstances {
                filter: filter.to_vec(),
            });
        }
    }

    config_loader::ConfigLoader::validate(config)?;
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    warn!("Received shutdown signal, stopping instances...");
}

/// Print configuration summary for dry-run mode
fn print_config_summary(config: &TrafficConfig) {
    println!("\n=== Configuration Summary ===\n");
    println!("Store:");
    println!("  Endpoint: {}:{}", config.store.host, config.store.port);
    println!("  Retries: {}", config.store.retry_count);

    println!("\nInstances ({}):", config.instances.len());
    for instance in &config.instances {
        println!(
            "  - {} - {} vehicles @ {} fps, step {}s",
            instance.instance_id, instance.max_vehicles, instance.frame_rate, instance.step_length
        );
        if instance.run_hdmap {
            println!("    map service enabled");
        }
    }

    println!();
}
