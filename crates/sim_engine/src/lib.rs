//! # Sim Engine
//!
//! 微观交通仿真引擎适配层。
//!
//! 负责：
//! - `SimulationEngine` trait：步进、车辆/信号灯枚举、车辆控制、停车点、投影、路由
//! - `MockEngine`：直线路网上的进程内引擎，支持注入失败
//! - `VehicleManager`：随机投放背景车辆、主车注册与停车点
//! - `RoutePlanner`：起终点到边序列的路径规划
//!
//! ## 使用示例
//!
//! ```ignore
//! use sim_engine::{MockEngine, Simulation, VehicleManager, VehicleTypes};
//!
//! let engine = MockEngine::new(&instance.mock);
//! let mut sim = Simulation::new(engine, VehicleManager::new(Some(7), VehicleTypes::default()));
//! sim.populate(instance.max_vehicles, instance.add_max);
//! sim.step(instance.step_length)?;
//! let snapshots = sim.engine.vehicles();
//! ```

mod engine;
mod error;
mod mock;
mod network;
mod routing;
mod simulation;
mod vehicles;

pub use engine::{SimulationEngine, VehicleSpawn, VehicleState};
pub use error::{EngineError, Result};
pub use mock::{MockEngine, MockFailures};
pub use network::{StraightNetwork, LANE_WIDTH};
pub use routing::{route_id_for, MockRoutePlanner, RoutePlanner};
pub use simulation::Simulation;
pub use vehicles::{
    ego_id, entity_of_ego, spawn_quota, VehicleClass, VehicleManager, VehicleTypes, EGO_CLASS,
};
