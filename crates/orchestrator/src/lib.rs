//! # Orchestrator
//!
//! 单个仿真实例的任务编排。
//!
//! 负责：
//! - 仿真任务：按帧步进引擎、补充车辆、执行命令队列
//! - 数据采集任务：每帧计算车辆增删改并发布 `TrafficFlow` / `TrafficLight`
//! - 控制子循环：主车导航、危险区停车规划、近距离制动、导航结束清理
//! - 地图服务：应答 `NavigationReqList`
//!
//! 除仿真线程外，所有任务只读引擎，修改一律通过命令队列。
//!
//! ## 使用示例
//!
//! ```ignore
//! use orchestrator::{mock_context, spawn_instance, RunOptions};
//!
//! let pool = Arc::new(ConnectionPool::new(config.store.clone(), config.pool.clone())?);
//! let ctx = Arc::new(mock_context(instance, RunOptions { max_frames: Some(300) }, pool));
//! let handle = spawn_instance(ctx)?;
//! let report = handle.join()?;
//! println!("{}", report.simulation.timing);
//! ```

mod context;
mod error;
mod gate;
mod hazard;
mod instance;
mod mailbox;
mod stop_plan;
pub mod tasks;

#[cfg(test)]
mod fixtures;

pub use context::{InstanceContext, InstanceStats, RunOptions, StatsSnapshot};
pub use error::{OrchestratorError, Result};
pub use gate::EventGate;
pub use hazard::{
    hazard_sites, proximity, BrakeLedger, HazardBook, HazardSite, Proximity, ProximityAction,
    MAX_BRAKES, SAFETY_GAP,
};
pub use instance::{mock_context, spawn_instance, InstanceHandle, InstanceReport, ReportRecord};
pub use mailbox::RouteMailbox;
pub use stop_plan::{
    apply_stop_plan, plan_stop, safety_gap, StopOutcome, StopPlan, BASE_SAFETY_GAP,
    LANE_CHANGE_DISTANCE, MIN_STOP_DISTANCE, STOP_DURATION,
};
pub use tasks::SimulationSummary;
