//! # Observability
//!
//! 桥接进程的日志与指标出口。
//!
//! - 日志只放开工作区内各 crate 的级别，第三方依赖统一压到 `warn`
//! - Prometheus 导出器为帧耗时配置了按帧周期划分的直方图桶
//! - 帧、变更集、存储连接的指标记录见 [`metrics`]
//!
//! ```ignore
//! observability::init_with_config(ObservabilityConfig {
//!     log_format: LogFormat::Compact,
//!     metrics_port: Some(9000),
//!     default_log_level: "debug".into(),
//! })?;
//! observability::record_frame("XD", 12.5);
//! ```

pub mod metrics;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

pub use crate::metrics::{
    record_change_set, record_commands_executed, record_frame, record_pool_connectors,
    record_step_timeout, record_store_op, record_store_reconnect, record_store_redirect,
    FrameTimingAggregator, RunningStats, StatsSummary, TimingSummary,
};

/// 受 `default_log_level` 控制的工作区 crate
const BRIDGE_TARGETS: &[&str] = &[
    "contracts",
    "config_loader",
    "sim_engine",
    "frame_sync",
    "change_tracker",
    "store",
    "orchestrator",
    "observability",
    "traffic_bridge",
];

/// 第三方依赖的日志级别
const DEPENDENCY_LEVEL: &str = "warn";

/// 帧耗时直方图桶 (ms)，覆盖 20 fps 的 50ms 帧周期及其超时区间
const FRAME_TIME_BUCKETS_MS: &[f64] = &[
    1.0, 2.5, 5.0, 10.0, 20.0, 35.0, 50.0, 75.0, 100.0, 250.0, 500.0, 1000.0,
];

/// 日志格式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON 结构化日志，带线程名与源码位置
    #[default]
    Json,
    Pretty,
    Compact,
}

/// 可观测性配置
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub log_format: LogFormat,
    /// Prometheus 端口 (None = 不导出)
    pub metrics_port: Option<u16>,
    /// 工作区 crate 的日志级别
    pub default_log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Json,
            metrics_port: Some(9000),
            default_log_level: "info".to_string(),
        }
    }
}

/// 以默认配置初始化：JSON 日志，指标监听 9000 端口
pub fn init() -> Result<()> {
    init_with_config(ObservabilityConfig::default())
}

/// 使用自定义配置初始化
///
/// `RUST_LOG` 存在时完全取代内置的过滤规则。
pub fn init_with_config(config: ObservabilityConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(bridge_directives(&config.default_log_level))
            .with_context(|| format!("Invalid log level '{}'", config.default_log_level))?,
    };

    tracing_subscriber::registry()
        .with(format_layer(config.log_format))
        .with(filter)
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    if let Some(port) = config.metrics_port {
        install_prometheus(port)?;
    }

    tracing::info!(
        log_format = ?config.log_format,
        metrics_port = ?config.metrics_port,
        level = %config.default_log_level,
        "Observability initialized"
    );
    Ok(())
}

/// 仅安装 Prometheus 导出器，日志已由调用方初始化
pub fn init_metrics_only(port: u16) -> Result<()> {
    install_prometheus(port)
}

/// 第三方依赖压到 `warn`，工作区 crate 使用 `level`
fn bridge_directives(level: &str) -> String {
    let mut directives = String::from(DEPENDENCY_LEVEL);
    for target in BRIDGE_TARGETS {
        directives.push_str(&format!(",{target}={level}"));
    }
    directives
}

fn format_layer(format: LogFormat) -> Box<dyn Layer<Registry> + Send + Sync> {
    match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        // 各实例的 simulation 线程以实例 ID 命名
        LogFormat::Pretty => fmt::layer().pretty().with_thread_names(true).boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_names(true)
            .boxed(),
    }
}

fn prometheus_builder(port: u16) -> Result<PrometheusBuilder> {
    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .set_buckets_for_metric(
            Matcher::Full("traffic_frame_time_ms".to_string()),
            FRAME_TIME_BUCKETS_MS,
        )
        .context("Invalid frame time buckets")
}

fn install_prometheus(port: u16) -> Result<()> {
    prometheus_builder(port)?
        .install()
        .context("Failed to install Prometheus recorder")?;

    tracing::info!(port, "Prometheus metrics endpoint initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ObservabilityConfig::default();
        assert_eq!(config.metrics_port, Some(9000));
        assert_eq!(config.default_log_level, "info");
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_bridge_directives_scope_level() {
        let directives = bridge_directives("debug");
        assert!(directives.starts_with("warn,"));
        assert!(directives.contains(",frame_sync=debug"));
        assert!(directives.contains(",store=debug"));
        assert!(directives.contains(",traffic_bridge=debug"));
        assert!(!directives.contains("tokio"));

        assert!(EnvFilter::try_new(directives).is_ok());
        assert!(EnvFilter::try_new(bridge_directives("loud")).is_err());
    }

    #[test]
    fn test_frame_time_buckets() {
        assert!(FRAME_TIME_BUCKETS_MS.windows(2).all(|w| w[0] < w[1]));
        assert!(FRAME_TIME_BUCKETS_MS.contains(&50.0));
        assert!(prometheus_builder(9000).is_ok());
    }
}
