//! Task bodies, one thread each

pub mod collector;
pub mod controller;
pub mod map_service;
pub mod simulation;

pub use collector::{light_document, run_collector, vehicle_document};
pub use controller::{
    hazard_once, nav_stop_once, navigate_once, proximity_once, run_hazard, run_nav_stop,
    run_navigate, run_proximity, ProximitySweep,
};
pub use map_service::{map_service_once, run_map_service};
pub use simulation::{run_simulation, SimulationSummary};
