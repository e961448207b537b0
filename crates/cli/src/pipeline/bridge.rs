//! Bridge runner - starts every configured instance on a shared pool and
//! waits for them to finish, time out or be interrupted.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use contracts::TrafficConfig;
use orchestrator::{mock_context, spawn_instance, RunOptions};
use store::ConnectionPool;
use tracing::{error, info, warn};

use super::RunStats;
use crate::error::CliError;

/// Bridge run configuration
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Loaded configuration, overrides applied
    pub config: TrafficConfig,

    /// Frames per instance (None = unlimited)
    pub max_frames: Option<u64>,

    /// Run timeout (None = no timeout)
    pub timeout: Option<Duration>,

    /// Metrics server port (None = disabled)
    pub metrics_port: Option<u16>,
}

/// Runs every instance of a [`TrafficConfig`] in this process
pub struct Bridge {
    config: BridgeConfig,
}

impl Bridge {
    pub fn new(config: BridgeConfig) -> Self {
        Self { config }
    }

    /// Run until every instance ends, the timeout fires or `shutdown` resolves
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<RunStats> {
        let started = Instant::now();
        let BridgeConfig {
            config,
            max_frames,
            timeout,
            metrics_port,
        } = self.config;

        if let Some(port) = metrics_port {
            observability::init_metrics_only(port)?;
            info!("Metrics endpoint available on port {}", port);
        }

        let pool = Arc::new(
            ConnectionPool::new(config.store.clone(), config.pool.clone())
                .map_err(CliError::from)
                .context("Failed to create connection pool")?,
        );

        let options = RunOptions { max_frames };
        let mut handles = Vec::with_capacity(config.instances.len());
        for instance in &config.instances {
            let ctx = Arc::new(mock_context(instance.clone(), options.clone(), pool.clone()));
            match spawn_instance(ctx) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    error!(instance = %instance.instance_id, error = %e, "Failed to start instance");
                    for handle in handles {
                        handle.stop();
                        let _ = handle.join();
                    }
                    pool.shutdown();
                    return Err(CliError::from(e).into());
                }
            }
        }
        info!(
            instances = handles.len(),
            max_frames = ?max_frames,
            "All instances started"
        );

        let contexts: Vec<_> = handles.iter().map(|h| h.context().clone()).collect();
        let stop_all = |reason: &'static str| {
            warn!(reason, "Stopping all instances");
            for ctx in &contexts {
                ctx.stop();
            }
            reason
        };

        let mut joined = tokio::task::spawn_blocking(move || {
            handles
                .into_iter()
                .map(|h| (h.instance_id().to_string(), h.join()))
                .collect::<Vec<_>>()
        });
        let deadline = async {
            match timeout {
                Some(after) => tokio::time::sleep(after).await,
                None => std::future::pending().await,
            }
        };

        let (results, interrupted) = tokio::select! {
            results = &mut joined => (results, None),
            _ = shutdown => {
                let reason = stop_all("signal");
                ((&mut joined).await, Some(reason))
            }
            _ = deadline => {
                let reason = stop_all("timeout");
                ((&mut joined).await, Some(reason))
            }
        };
        let results = results.map_err(|e| CliError::shutdown(e.to_string()))?;
        pool.shutdown();

        let mut stats = RunStats {
            duration: started.elapsed(),
            interrupted,
            ..RunStats::default()
        };
        for (instance_id, result) in results {
            match result {
                Ok(report) => stats.reports.push(report),
                Err(e) => {
                    error!(instance = %instance_id, error = %e, "Instance failed");
                    stats.failures.push((instance_id, e.to_string()));
                }
            }
        }
        Ok(stats)
    }
}
