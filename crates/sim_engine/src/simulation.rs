//! Engine plus vehicle bookkeeping, the unit shared behind the engine mutex

use crate::engine::SimulationEngine;
use crate::error::Result;
use crate::vehicles::{spawn_quota, VehicleManager};

/// Everything the simulation thread mutates in one frame
///
/// Fields are public so commands can borrow the engine and the manager at
/// the same time.
#[derive(Debug)]
pub struct Simulation<E> {
    pub engine: E,
    pub vehicles: VehicleManager,
}

impl<E: SimulationEngine> Simulation<E> {
    pub fn new(engine: E, vehicles: VehicleManager) -> Self {
        Self { engine, vehicles }
    }

    pub fn step(&mut self, step_length: f64) -> Result<()> {
        self.engine.step(step_length)
    }

    /// Top the population up by at most `add_max` vehicles; returns how many were added
    pub fn populate(&mut self, max_vehicles: u32, add_max: u32) -> u32 {
        let quota = spawn_quota(self.engine.vehicle_count(), max_vehicles, add_max);
        self.vehicles.add_random_vehicles(&mut self.engine, quota)
    }

    pub fn register_ego(&mut self, entity_id: &str, route_id: &str) -> Result<String> {
        self.vehicles
            .register_ego(&mut self.engine, entity_id, route_id)
    }

    pub fn remove_ego(&mut self, ego_id: &str) -> bool {
        self.vehicles.remove_ego(&mut self.engine, ego_id)
    }
}
