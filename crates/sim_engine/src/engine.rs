//! Simulation engine abstraction
//!
//! Every call the bridge makes into the microsimulation goes through
//! [`SimulationEngine`]. The engine is shared as `Arc<Mutex<E>>`: mutating
//! calls only ever run on the simulation thread (directly or from the command
//! queue), other threads lock it for reads.

use contracts::{EntitySnapshot, LightSnapshot, RoadCoord, StopPoint, Vector3};

use crate::error::Result;

/// Kinematic and routing state of one vehicle
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleState {
    pub id: String,
    pub position: Vector3,
    /// Speed in m/s
    pub speed: f64,
    pub edge_id: String,
    pub lane_id: String,
    pub lane_index: u32,
    /// Longitudinal position on the current lane (m)
    pub lane_pos: f64,
    /// Full route, including edges already driven
    pub route: Vec<String>,
    /// Index of the current edge in `route`
    pub route_index: usize,
}

impl VehicleState {
    /// Edges from the current one to the end of the route
    pub fn remaining_route(&self) -> &[String] {
        self.route.get(self.route_index..).unwrap_or(&[])
    }
}

/// Parameters for inserting a vehicle
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleSpawn {
    pub id: String,
    pub route_id: String,
    /// Engine vehicle type (asset name)
    pub type_tag: String,
    pub lane_index: u32,
    /// Position on the first edge (m)
    pub depart_pos: f64,
    pub depart_speed: f64,
}

/// Microsimulation engine
///
/// Per-vehicle calls fail with [`EngineError::VehicleNotFound`](crate::EngineError)
/// once the vehicle has left the network, which happens between any two
/// steps; callers log and skip.
pub trait SimulationEngine: Send {
    /// Advance simulated time by `step_length` seconds
    fn step(&mut self, step_length: f64) -> Result<()>;

    /// Current simulated time (s)
    fn simulation_time(&self) -> f64;

    // ===== Enumeration =====

    fn vehicle_ids(&self) -> Vec<String>;

    fn vehicle_count(&self) -> usize {
        self.vehicle_ids().len()
    }

    /// Snapshot of every vehicle
    fn vehicles(&self) -> Vec<EntitySnapshot>;

    /// Snapshot of every traffic light with its signal state
    fn lights(&self) -> Vec<LightSnapshot>;

    fn vehicle_state(&self, vehicle_id: &str) -> Result<VehicleState>;

    // ===== Vehicle Control =====

    fn add_vehicle(&mut self, spawn: &VehicleSpawn) -> Result<()>;

    fn remove_vehicle(&mut self, vehicle_id: &str) -> Result<()>;

    /// Pin the vehicle's speed (m/s)
    fn set_speed(&mut self, vehicle_id: &str, speed: f64) -> Result<()>;

    /// Hold an acceleration (m/s²) for `duration` seconds
    fn set_acceleration(&mut self, vehicle_id: &str, acceleration: f64, duration: f64)
        -> Result<()>;

    /// Teleport onto a lane of the vehicle's route
    fn move_to(&mut self, vehicle_id: &str, lane_id: &str, lane_pos: f64) -> Result<()>;

    /// Pending stops, nearest first
    fn next_stops(&self, vehicle_id: &str) -> Result<Vec<StopPoint>>;

    fn insert_stop(&mut self, vehicle_id: &str, stop: &StopPoint) -> Result<()>;

    /// True while the vehicle is halted at a stop
    fn is_stopped(&self, vehicle_id: &str) -> Result<bool>;

    /// Release a vehicle halted at a stop
    fn resume(&mut self, vehicle_id: &str) -> Result<()>;

    // ===== Network =====

    fn route_ids(&self) -> Vec<String>;

    fn route_edges(&self, route_id: &str) -> Result<Vec<String>>;

    fn add_route(&mut self, route_id: &str, edges: &[String]) -> Result<()>;

    fn edge_lane_count(&self, edge_id: &str) -> Result<u32>;

    /// Length of an edge (m)
    fn edge_length(&self, edge_id: &str) -> Result<f64>;

    fn lane_length(&self, lane_id: &str) -> Result<f64>;

    /// Nearest lane position for a world coordinate
    fn project(&self, position: &Vector3) -> Result<RoadCoord>;

    /// Routing cost of an edge used by [`reroute`](Self::reroute)
    fn set_edge_effort(&mut self, edge_id: &str, effort: f64) -> Result<()>;

    /// Recompute the vehicle's route against current edge efforts
    fn reroute(&mut self, vehicle_id: &str) -> Result<()>;
}
