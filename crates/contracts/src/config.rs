//! TrafficConfig - Config Loader output
//!
//! 描述进程级配置：仿真实例、数据存储连接、连接池。

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use validator::Validate;

/// 配置版本
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// Complete process configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TrafficConfig {
    /// 配置版本
    #[serde(default)]
    pub version: ConfigVersion,

    /// Simulation instances run by this process
    #[validate(length(min = 1), nested)]
    pub instances: Vec<InstanceConfig>,

    /// Datastore connection settings
    #[serde(default)]
    #[validate(nested)]
    pub store: StoreConfig,

    /// Connection pool settings
    #[serde(default)]
    #[validate(nested)]
    pub pool: PoolConfig,
}

/// One independently threaded simulation run
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct InstanceConfig {
    /// Namespace for every datastore key of this instance
    #[validate(length(min = 1))]
    pub instance_id: String,

    /// Target vehicle population
    #[serde(default = "default_max_vehicles")]
    #[validate(range(max = 100_000))]
    pub max_vehicles: u32,

    /// Vehicles added per frame at most
    #[serde(default = "default_add_max")]
    #[validate(range(min = 1))]
    pub add_max: u32,

    /// Frames per second
    #[serde(default = "default_frame_rate")]
    #[validate(range(min = 1, max = 240))]
    pub frame_rate: u32,

    /// Engine step length (s)
    #[serde(default = "default_step_length")]
    #[validate(range(min = 0.001, max = 10.0))]
    pub step_length: f64,

    /// Change-tracking window capacity (frames)
    #[serde(default = "default_sliding_window_size")]
    #[validate(range(min = 1, max = 1000))]
    pub sliding_window_size: usize,

    /// Bound on a single engine step (ms)
    #[serde(default = "default_step_timeout_ms")]
    #[validate(range(min = 1))]
    pub step_timeout_ms: u64,

    /// Consecutive step timeouts tolerated before the instance stops
    #[serde(default = "default_max_step_timeouts")]
    pub max_step_timeouts: u32,

    /// Map offset added to published x
    #[serde(default)]
    pub offset_x: f64,

    /// Map offset added to published y
    #[serde(default)]
    pub offset_y: f64,

    /// Run the map-service task
    #[serde(default)]
    pub run_hdmap: bool,

    /// Publish traffic light documents
    #[serde(default)]
    pub traffic_signals: bool,

    /// Controller cadences
    #[serde(default)]
    #[validate(nested)]
    pub controller: ControllerConfig,

    /// In-process engine settings
    #[serde(default)]
    #[validate(nested)]
    pub mock: MockEngineSettings,
}

fn default_max_vehicles() -> u32 {
    1000
}

fn default_add_max() -> u32 {
    1
}

fn default_frame_rate() -> u32 {
    30
}

fn default_step_length() -> f64 {
    0.03
}

fn default_sliding_window_size() -> usize {
    10
}

fn default_step_timeout_ms() -> u64 {
    5000
}

fn default_max_step_timeouts() -> u32 {
    10
}

impl InstanceConfig {
    /// Instance with every default
    pub fn with_id(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            max_vehicles: default_max_vehicles(),
            add_max: default_add_max(),
            frame_rate: default_frame_rate(),
            step_length: default_step_length(),
            sliding_window_size: default_sliding_window_size(),
            step_timeout_ms: default_step_timeout_ms(),
            max_step_timeouts: default_max_step_timeouts(),
            offset_x: 0.0,
            offset_y: 0.0,
            run_hdmap: false,
            traffic_signals: false,
            controller: ControllerConfig::default(),
            mock: MockEngineSettings::default(),
        }
    }

    /// Target frame interval
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.frame_rate.max(1)))
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }
}

/// Controller sub-loop cadences (seconds)
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ControllerConfig {
    #[serde(default = "default_navigate_secs")]
    #[validate(range(min = 0.01))]
    pub navigate_interval_secs: f64,

    #[serde(default = "default_hazard_secs")]
    #[validate(range(min = 0.01))]
    pub hazard_interval_secs: f64,

    #[serde(default = "default_proximity_secs")]
    #[validate(range(min = 0.01))]
    pub proximity_interval_secs: f64,

    #[serde(default = "default_nav_stop_secs")]
    #[validate(range(min = 0.01))]
    pub nav_stop_interval_secs: f64,
}

fn default_navigate_secs() -> f64 {
    10.0
}

fn default_hazard_secs() -> f64 {
    10.0
}

fn default_proximity_secs() -> f64 {
    5.0
}

fn default_nav_stop_secs() -> f64 {
    10.0
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            navigate_interval_secs: default_navigate_secs(),
            hazard_interval_secs: default_hazard_secs(),
            proximity_interval_secs: default_proximity_secs(),
            nav_stop_interval_secs: default_nav_stop_secs(),
        }
    }
}

/// Synthetic road network used by the in-process engine
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct MockEngineSettings {
    /// Number of straight edges laid out along the x axis
    #[serde(default = "default_edge_count")]
    #[validate(range(min = 1, max = 10_000))]
    pub edge_count: u32,

    /// Edge length (m)
    #[serde(default = "default_edge_length")]
    #[validate(range(min = 10.0))]
    pub edge_length: f64,

    /// Lanes per edge
    #[serde(default = "default_lanes_per_edge")]
    #[validate(range(min = 1, max = 8))]
    pub lanes_per_edge: u32,

    /// Cruise speed of spawned vehicles (m/s)
    #[serde(default = "default_cruise_speed")]
    pub cruise_speed: f64,

    /// Number of traffic lights
    #[serde(default)]
    pub light_count: u32,

    /// RNG seed (None = entropy)
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_edge_count() -> u32 {
    8
}

fn default_edge_length() -> f64 {
    200.0
}

fn default_lanes_per_edge() -> u32 {
    2
}

fn default_cruise_speed() -> f64 {
    12.0
}

impl Default for MockEngineSettings {
    fn default() -> Self {
        Self {
            edge_count: default_edge_count(),
            edge_length: default_edge_length(),
            lanes_per_edge: default_lanes_per_edge(),
            cruise_speed: default_cruise_speed(),
            light_count: 0,
            seed: None,
        }
    }
}

/// Datastore connection settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct StoreConfig {
    #[serde(default = "default_store_host")]
    #[validate(length(min = 1))]
    pub host: String,

    #[serde(default = "default_store_port")]
    #[validate(range(min = 1))]
    pub port: u16,

    /// TCP connect timeout (ms)
    #[serde(default = "default_connect_timeout_ms")]
    #[validate(range(min = 1))]
    pub connect_timeout_ms: u64,

    /// Read/write timeout per command (ms)
    #[serde(default = "default_command_timeout_ms")]
    #[validate(range(min = 1))]
    pub command_timeout_ms: u64,

    /// Reconnect attempts
    #[serde(default = "default_retry_count")]
    #[validate(range(min = 1, max = 32))]
    pub retry_count: u32,

    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: f64,

    /// Heartbeat skips connectors used this recently
    #[serde(default = "default_heartbeat_skip_within_secs")]
    pub heartbeat_skip_within_secs: f64,

    /// Idle time after which a command is preceded by a ping
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: f64,

    /// Redirect target remap (advertised host -> reachable host)
    #[serde(default)]
    pub ip_map: HashMap<String, String>,
}

fn default_store_host() -> String {
    "127.0.0.1".to_string()
}

fn default_store_port() -> u16 {
    6379
}

fn default_connect_timeout_ms() -> u64 {
    100
}

fn default_command_timeout_ms() -> u64 {
    1000
}

fn default_retry_count() -> u32 {
    5
}

fn default_heartbeat_interval_secs() -> f64 {
    30.0
}

fn default_heartbeat_skip_within_secs() -> f64 {
    10.0
}

fn default_stale_after_secs() -> f64 {
    30.0
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: default_store_host(),
            port: default_store_port(),
            connect_timeout_ms: default_connect_timeout_ms(),
            command_timeout_ms: default_command_timeout_ms(),
            retry_count: default_retry_count(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            heartbeat_skip_within_secs: default_heartbeat_skip_within_secs(),
            stale_after_secs: default_stale_after_secs(),
            ip_map: HashMap::new(),
        }
    }
}

impl StoreConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs_f64(self.heartbeat_interval_secs.max(0.0))
    }

    pub fn heartbeat_skip_within(&self) -> Duration {
        Duration::from_secs_f64(self.heartbeat_skip_within_secs.max(0.0))
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs_f64(self.stale_after_secs.max(0.0))
    }

    /// Reachable address for an advertised host (identity when unmapped)
    pub fn mapped_host<'a>(&'a self, host: &'a str) -> &'a str {
        self.ip_map.get(host).map(String::as_str).unwrap_or(host)
    }
}

/// Connection pool settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PoolConfig {
    /// Idle connectors unused longer than this are closed
    #[serde(default = "default_idle_ttl_secs")]
    pub idle_ttl_secs: f64,

    /// Janitor sweep period (ms)
    #[serde(default = "default_sweep_interval_ms")]
    #[validate(range(min = 1))]
    pub sweep_interval_ms: u64,
}

fn default_idle_ttl_secs() -> f64 {
    30.0
}

fn default_sweep_interval_ms() -> u64 {
    1000
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            idle_ttl_secs: default_idle_ttl_secs(),
            sweep_interval_ms: default_sweep_interval_ms(),
        }
    }
}

impl PoolConfig {
    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs_f64(self.idle_ttl_secs.max(0.0))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}
