//! In-process engine over a [`StraightNetwork`]
//!
//! Vehicles accelerate toward a cruise speed, follow their route edge by edge,
//! halt at inserted stops and leave the network at the end of their route.
//! Lights cycle through a fixed four-phase program. Failures can be injected
//! through [`MockFailures`].

use std::collections::{BTreeMap, HashMap};
use std::thread;
use std::time::Duration;

use contracts::{
    EntitySnapshot, LightPhaseState, LightSnapshot, MockEngineSettings, RoadCoord, StopPoint,
    Vector3,
};
use tracing::{debug, instrument};

use crate::engine::{SimulationEngine, VehicleSpawn, VehicleState};
use crate::error::{EngineError, Result};
use crate::network::StraightNetwork;

/// Acceleration toward cruise speed (m/s²)
const CRUISE_ACCEL: f64 = 2.6;

/// Heading of every vehicle (degrees, engine convention: 90 = +x)
const HEADING: f64 = 90.0;

/// Signal program: (state, duration s)
const PHASES: [(&str, f64); 4] = [("GGrr", 30.0), ("yyrr", 3.0), ("rrGG", 30.0), ("rryy", 3.0)];

/// Failure injection for tests
#[derive(Debug, Default, Clone)]
pub struct MockFailures {
    /// Vehicle IDs whose per-vehicle calls fail
    pub fail_vehicles: Vec<String>,
    /// Every step returns an error
    pub fail_step: bool,
    /// Each step sleeps this long before doing anything
    pub step_delay: Option<Duration>,
    /// Every projection fails
    pub fail_projection: bool,
}

#[derive(Debug, Clone)]
struct MockVehicle {
    type_tag: String,
    route: Vec<String>,
    route_index: usize,
    lane_index: u32,
    lane_pos: f64,
    speed: f64,
    speed_override: Option<f64>,
    /// (acceleration, until)
    hold: Option<(f64, f64)>,
    stops: Vec<StopPoint>,
    stopped_until: Option<f64>,
}

impl MockVehicle {
    fn current_edge(&self) -> &str {
        self.route
            .get(self.route_index)
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// Move by one step; returns true once the vehicle has left its route
    fn advance(&mut self, dt: f64, now: f64, cruise: f64, edge_length: f64) -> bool {
        if let Some(until) = self.stopped_until {
            if now < until {
                self.speed = 0.0;
                return false;
            }
            self.stopped_until = None;
        }

        self.speed = match (self.speed_override, self.hold) {
            (Some(pinned), _) => pinned,
            (None, Some((accel, until))) if now < until => (self.speed + accel * dt).max(0.0),
            _ => (self.speed + CRUISE_ACCEL * dt).min(cruise),
        };

        let travel = self.speed * dt;
        if let Some(stop) = self.stops.first() {
            if stop.edge_id == self.current_edge()
                && self.lane_pos <= stop.pos
                && self.lane_pos + travel >= stop.pos
            {
                self.lane_pos = stop.pos;
                self.lane_index = stop.lane_index;
                self.speed = 0.0;
                self.stopped_until = Some(now + stop.duration);
                self.stops.remove(0);
                return false;
            }
        }

        self.lane_pos += travel;
        while self.lane_pos >= edge_length {
            self.lane_pos -= edge_length;
            self.route_index += 1;
            if self.route_index >= self.route.len() {
                return true;
            }
        }
        false
    }
}

/// Deterministic in-process engine
#[derive(Debug)]
pub struct MockEngine {
    network: StraightNetwork,
    cruise_speed: f64,
    light_count: u32,
    time: f64,
    steps: u64,
    reroutes: u64,
    vehicles: BTreeMap<String, MockVehicle>,
    routes: BTreeMap<String, Vec<String>>,
    efforts: HashMap<String, f64>,
    failures: MockFailures,
}

impl MockEngine {
    /// Engine with one route `r{i}` per edge, running to the network end
    pub fn new(settings: &MockEngineSettings) -> Self {
        Self::with_failures(settings, MockFailures::default())
    }

    pub fn with_failures(settings: &MockEngineSettings, failures: MockFailures) -> Self {
        let network = StraightNetwork::from_settings(settings);
        let last = network.edge_count() - 1;
        let routes = (0..network.edge_count())
            .map(|i| (format!("r{i}"), network.edges_between(i, last)))
            .collect();
        Self {
            light_count: settings.light_count.min(network.edge_count()),
            cruise_speed: settings.cruise_speed.max(0.0),
            network,
            time: 0.0,
            steps: 0,
            reroutes: 0,
            vehicles: BTreeMap::new(),
            routes,
            efforts: HashMap::new(),
            failures,
        }
    }

    pub fn network(&self) -> &StraightNetwork {
        &self.network
    }

    pub fn failures_mut(&mut self) -> &mut MockFailures {
        &mut self.failures
    }

    /// Steps performed so far
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Reroute calls accepted so far
    pub fn reroutes(&self) -> u64 {
        self.reroutes
    }

    pub fn edge_effort(&self, edge_id: &str) -> Option<f64> {
        self.efforts.get(edge_id).copied()
    }

    /// Speed pinned by `set_speed`, if any
    pub fn pinned_speed(&self, vehicle_id: &str) -> Option<f64> {
        self.vehicles.get(vehicle_id).and_then(|v| v.speed_override)
    }

    fn check(&self, call: &str, vehicle_id: &str) -> Result<()> {
        if self.failures.fail_vehicles.iter().any(|id| id == vehicle_id) {
            return Err(EngineError::call(call, vehicle_id, "injected failure"));
        }
        Ok(())
    }

    fn vehicle(&self, call: &str, vehicle_id: &str) -> Result<&MockVehicle> {
        self.check(call, vehicle_id)?;
        self.vehicles
            .get(vehicle_id)
            .ok_or_else(|| EngineError::vehicle_not_found(vehicle_id))
    }

    fn vehicle_mut(&mut self, call: &str, vehicle_id: &str) -> Result<&mut MockVehicle> {
        self.check(call, vehicle_id)?;
        self.vehicles
            .get_mut(vehicle_id)
            .ok_or_else(|| EngineError::vehicle_not_found(vehicle_id))
    }

    fn world_position(&self, vehicle: &MockVehicle) -> Vector3 {
        let edge_index = self
            .network
            .edge_index(vehicle.current_edge())
            .unwrap_or_default();
        self.network
            .position(edge_index, vehicle.lane_index, vehicle.lane_pos)
    }

    fn light_state(&self) -> LightPhaseState {
        let cycle: f64 = PHASES.iter().map(|(_, d)| d).sum();
        let mut offset = self.time % cycle;
        for (index, (state, duration)) in PHASES.iter().enumerate() {
            if offset < *duration {
                return LightPhaseState {
                    current_phase_state: (*state).to_string(),
                    current_phase_index: index as i32,
                    current_phase_elapsed: offset,
                    current_phase_duration: *duration,
                    next_switch_time: self.time + (duration - offset),
                    program_id: "0".to_string(),
                    is_active: true,
                };
            }
            offset -= duration;
        }
        LightPhaseState::default()
    }
}

impl SimulationEngine for MockEngine {
    #[instrument(name = "mock_engine_step", skip(self), fields(time = self.time))]
    fn step(&mut self, step_length: f64) -> Result<()> {
        if let Some(delay) = self.failures.step_delay {
            thread::sleep(delay);
        }
        if self.failures.fail_step {
            return Err(EngineError::call("step", "", "injected failure"));
        }

        self.time += step_length;
        let (now, cruise, edge_length) = (self.time, self.cruise_speed, self.network.edge_length());
        let arrived: Vec<String> = self
            .vehicles
            .iter_mut()
            .filter_map(|(id, v)| v.advance(step_length, now, cruise, edge_length).then(|| id.clone()))
            .collect();
        for id in arrived {
            self.vehicles.remove(&id);
            debug!(vehicle = %id, "Vehicle reached end of route");
        }
        self.steps += 1;
        Ok(())
    }

    fn simulation_time(&self) -> f64 {
        self.time
    }

    fn vehicle_ids(&self) -> Vec<String> {
        self.vehicles.keys().cloned().collect()
    }

    fn vehicle_count(&self) -> usize {
        self.vehicles.len()
    }

    fn vehicles(&self) -> Vec<EntitySnapshot> {
        self.vehicles
            .iter()
            .map(|(id, v)| {
                EntitySnapshot::vehicle(id.clone(), self.world_position(v), HEADING, v.speed, v.type_tag.clone())
            })
            .collect()
    }

    fn lights(&self) -> Vec<LightSnapshot> {
        let state = self.light_state();
        (0..self.light_count)
            .map(|j| {
                let edge_id = StraightNetwork::edge_id(j);
                let position = Vector3::new(f64::from(j + 1) * self.network.edge_length(), 0.0, 0.0);
                LightSnapshot {
                    entity: EntitySnapshot::light(format!("tl{j}"), position),
                    state: state.clone(),
                    controlled_lanes: (0..self.network.lanes_per_edge())
                        .map(|k| StraightNetwork::lane_id(&edge_id, k))
                        .collect(),
                }
            })
            .collect()
    }

    fn vehicle_state(&self, vehicle_id: &str) -> Result<VehicleState> {
        let v = self.vehicle("vehicle_state", vehicle_id)?;
        let edge_id = v.current_edge().to_string();
        Ok(VehicleState {
            id: vehicle_id.to_string(),
            position: self.world_position(v),
            speed: v.speed,
            lane_id: StraightNetwork::lane_id(&edge_id, v.lane_index),
            edge_id,
            lane_index: v.lane_index,
            lane_pos: v.lane_pos,
            route: v.route.clone(),
            route_index: v.route_index,
        })
    }

    fn add_vehicle(&mut self, spawn: &VehicleSpawn) -> Result<()> {
        self.check("add_vehicle", &spawn.id)?;
        if self.vehicles.contains_key(&spawn.id) {
            return Err(EngineError::DuplicateVehicle {
                vehicle_id: spawn.id.clone(),
            });
        }
        let route = self
            .routes
            .get(&spawn.route_id)
            .cloned()
            .ok_or_else(|| EngineError::RouteNotFound {
                route_id: spawn.route_id.clone(),
            })?;
        if spawn.lane_index >= self.network.lanes_per_edge() {
            return Err(EngineError::call(
                "add_vehicle",
                &spawn.id,
                format!("lane index {} out of range", spawn.lane_index),
            ));
        }

        self.vehicles.insert(
            spawn.id.clone(),
            MockVehicle {
                type_tag: spawn.type_tag.clone(),
                route,
                route_index: 0,
                lane_index: spawn.lane_index,
                lane_pos: spawn.depart_pos.clamp(0.0, self.network.edge_length()),
                speed: spawn.depart_speed.max(0.0),
                speed_override: None,
                hold: None,
                stops: Vec::new(),
                stopped_until: None,
            },
        );
        Ok(())
    }

    fn remove_vehicle(&mut self, vehicle_id: &str) -> Result<()> {
        self.check("remove_vehicle", vehicle_id)?;
        self.vehicles
            .remove(vehicle_id)
            .map(|_| ())
            .ok_or_else(|| EngineError::vehicle_not_found(vehicle_id))
    }

    fn set_speed(&mut self, vehicle_id: &str, speed: f64) -> Result<()> {
        let v = self.vehicle_mut("set_speed", vehicle_id)?;
        let speed = speed.max(0.0);
        v.speed_override = Some(speed);
        v.speed = speed;
        Ok(())
    }

    fn set_acceleration(
        &mut self,
        vehicle_id: &str,
        acceleration: f64,
        duration: f64,
    ) -> Result<()> {
        let now = self.time;
        let v = self.vehicle_mut("set_acceleration", vehicle_id)?;
        v.hold = Some((acceleration, now + duration.max(0.0)));
        Ok(())
    }

    fn move_to(&mut self, vehicle_id: &str, lane_id: &str, lane_pos: f64) -> Result<()> {
        let (edge_index, lane_index) = self.network.parse_lane(lane_id)?;
        let edge_id = StraightNetwork::edge_id(edge_index);
        let edge_length = self.network.edge_length();
        let v = self.vehicle_mut("move_to", vehicle_id)?;
        let route_index = v
            .route
            .iter()
            .position(|e| *e == edge_id)
            .ok_or_else(|| EngineError::call("move_to", vehicle_id, format!("{edge_id} not on route")))?;
        v.route_index = route_index;
        v.lane_index = lane_index;
        v.lane_pos = lane_pos.clamp(0.0, edge_length);
        Ok(())
    }

    fn next_stops(&self, vehicle_id: &str) -> Result<Vec<StopPoint>> {
        Ok(self.vehicle("next_stops", vehicle_id)?.stops.clone())
    }

    fn insert_stop(&mut self, vehicle_id: &str, stop: &StopPoint) -> Result<()> {
        let lanes = self.network.lanes_per_edge();
        let edge_length = self.network.edge_length();
        self.network.edge_index(&stop.edge_id)?;
        let v = self.vehicle_mut("insert_stop", vehicle_id)?;

        if stop.lane_index >= lanes || !(0.0..=edge_length).contains(&stop.pos) {
            return Err(EngineError::call(
                "insert_stop",
                vehicle_id,
                format!("invalid stop {}@{:.1} lane {}", stop.edge_id, stop.pos, stop.lane_index),
            ));
        }
        let offset = v.route[v.route_index..]
            .iter()
            .position(|e| *e == stop.edge_id)
            .ok_or_else(|| {
                EngineError::call("insert_stop", vehicle_id, format!("{} not ahead on route", stop.edge_id))
            })?;
        if offset == 0 && stop.pos < v.lane_pos {
            return Err(EngineError::call(
                "insert_stop",
                vehicle_id,
                format!("stop position {:.1} already passed", stop.pos),
            ));
        }

        // Keep stops ordered along the route
        let order = |s: &StopPoint, route: &[String]| {
            let idx = route.iter().position(|e| *e == s.edge_id).unwrap_or(usize::MAX);
            (idx, s.pos)
        };
        let key = order(stop, &v.route[v.route_index..]);
        let at = v
            .stops
            .iter()
            .position(|s| order(s, &v.route[v.route_index..]) > key)
            .unwrap_or(v.stops.len());
        v.stops.insert(at, stop.clone());
        Ok(())
    }

    fn is_stopped(&self, vehicle_id: &str) -> Result<bool> {
        Ok(self.vehicle("is_stopped", vehicle_id)?.stopped_until.is_some())
    }

    fn resume(&mut self, vehicle_id: &str) -> Result<()> {
        let v = self.vehicle_mut("resume", vehicle_id)?;
        if v.stopped_until.take().is_none() {
            return Err(EngineError::call("resume", vehicle_id, "vehicle is not stopped"));
        }
        Ok(())
    }

    fn route_ids(&self) -> Vec<String> {
        self.routes.keys().cloned().collect()
    }

    fn route_edges(&self, route_id: &str) -> Result<Vec<String>> {
        self.routes
            .get(route_id)
            .cloned()
            .ok_or_else(|| EngineError::RouteNotFound {
                route_id: route_id.to_string(),
            })
    }

    fn add_route(&mut self, route_id: &str, edges: &[String]) -> Result<()> {
        if edges.is_empty() {
            return Err(EngineError::call("add_route", route_id, "empty route"));
        }
        for edge in edges {
            self.network.edge_index(edge)?;
        }
        if self.routes.contains_key(route_id) {
            return Err(EngineError::call("add_route", route_id, "route already exists"));
        }
        self.routes.insert(route_id.to_string(), edges.to_vec());
        Ok(())
    }

    fn edge_lane_count(&self, edge_id: &str) -> Result<u32> {
        self.network.edge_index(edge_id)?;
        Ok(self.network.lanes_per_edge())
    }

    fn edge_length(&self, edge_id: &str) -> Result<f64> {
        self.network.edge_index(edge_id)?;
        Ok(self.network.edge_length())
    }

    fn lane_length(&self, lane_id: &str) -> Result<f64> {
        self.network.lane_length(lane_id)
    }

    fn project(&self, position: &Vector3) -> Result<RoadCoord> {
        if self.failures.fail_projection {
            return Err(EngineError::Projection {
                x: position.x,
                y: position.y,
                message: "injected failure".into(),
            });
        }
        self.network.project(position)
    }

    fn set_edge_effort(&mut self, edge_id: &str, effort: f64) -> Result<()> {
        self.network.edge_index(edge_id)?;
        self.efforts.insert(edge_id.to_string(), effort);
        Ok(())
    }

    fn reroute(&mut self, vehicle_id: &str) -> Result<()> {
        let last = self.network.edge_count() - 1;
        let from = {
            let v = self.vehicle("reroute", vehicle_id)?;
            self.network.edge_index(v.current_edge())?
        };
        // A straight network has exactly one path to the end
        let route = self.network.edges_between(from, last);
        let v = self.vehicle_mut("reroute", vehicle_id)?;
        v.route = route;
        v.route_index = 0;
        self.reroutes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> MockEngineSettings {
        MockEngineSettings {
            edge_count: 3,
            edge_length: 100.0,
            lanes_per_edge: 2,
            cruise_speed: 10.0,
            light_count: 2,
            seed: Some(1),
        }
    }

    fn spawn(id: &str, route: &str) -> VehicleSpawn {
        VehicleSpawn {
            id: id.into(),
            route_id: route.into(),
            type_tag: "001-AcuraRL".into(),
            lane_index: 0,
            depart_pos: 0.0,
            depart_speed: 10.0,
        }
    }

    #[test]
    fn test_default_routes() {
        let engine = MockEngine::new(&settings());
        assert_eq!(engine.route_ids(), vec!["r0", "r1", "r2"]);
        assert_eq!(engine.route_edges("r1").unwrap(), vec!["e1", "e2"]);
    }

    #[test]
    fn test_vehicle_moves_and_leaves_network() {
        let mut engine = MockEngine::new(&settings());
        engine.add_vehicle(&spawn("v1", "r2")).unwrap();

        engine.step(1.0).unwrap();
        let state = engine.vehicle_state("v1").unwrap();
        assert_eq!(state.edge_id, "e2");
        assert!((state.lane_pos - 10.0).abs() < 1e-9);
        assert!((state.position.x - 210.0).abs() < 1e-9);

        for _ in 0..10 {
            engine.step(1.0).unwrap();
        }
        assert_eq!(engine.vehicle_count(), 0);
        assert!(matches!(
            engine.vehicle_state("v1"),
            Err(EngineError::VehicleNotFound { .. })
        ));
    }

    #[test]
    fn test_duplicate_and_unknown_route() {
        let mut engine = MockEngine::new(&settings());
        engine.add_vehicle(&spawn("v1", "r0")).unwrap();
        assert!(matches!(
            engine.add_vehicle(&spawn("v1", "r0")),
            Err(EngineError::DuplicateVehicle { .. })
        ));
        assert!(matches!(
            engine.add_vehicle(&spawn("v2", "nope")),
            Err(EngineError::RouteNotFound { .. })
        ));
    }

    #[test]
    fn test_vehicle_halts_at_stop_then_resumes() {
        let mut engine = MockEngine::new(&settings());
        engine.add_vehicle(&spawn("v1", "r0")).unwrap();
        let stop = StopPoint {
            edge_id: "e1".into(),
            pos: 30.0,
            lane_index: 1,
            duration: 3600.0,
        };
        engine.insert_stop("v1", &stop).unwrap();
        assert_eq!(engine.next_stops("v1").unwrap(), vec![stop]);

        for _ in 0..20 {
            engine.step(1.0).unwrap();
        }
        let state = engine.vehicle_state("v1").unwrap();
        assert_eq!(state.lane_id, "e1_1");
        assert!((state.lane_pos - 30.0).abs() < 1e-9);
        assert!(engine.is_stopped("v1").unwrap());
        assert!(engine.next_stops("v1").unwrap().is_empty());

        engine.resume("v1").unwrap();
        engine.step(1.0).unwrap();
        assert!(engine.vehicle_state("v1").unwrap().lane_pos > 30.0);
    }

    #[test]
    fn test_insert_stop_rejects_passed_positions() {
        let mut engine = MockEngine::new(&settings());
        engine.add_vehicle(&spawn("v1", "r1")).unwrap();
        engine.step(5.0).unwrap();

        let behind = StopPoint {
            edge_id: "e1".into(),
            pos: 10.0,
            lane_index: 0,
            duration: 10.0,
        };
        assert!(engine.insert_stop("v1", &behind).is_err());

        let off_route = StopPoint {
            edge_id: "e0".into(),
            ..behind
        };
        assert!(engine.insert_stop("v1", &off_route).is_err());
    }

    #[test]
    fn test_set_speed_pins_vehicle() {
        let mut engine = MockEngine::new(&settings());
        engine.add_vehicle(&spawn("v1", "r0")).unwrap();
        engine.set_speed("v1", 0.0).unwrap();
        engine.set_acceleration("v1", 0.0, 3600.0).unwrap();
        engine.step(1.0).unwrap();
        let state = engine.vehicle_state("v1").unwrap();
        assert_eq!(state.speed, 0.0);
        assert_eq!(state.lane_pos, 0.0);
        assert_eq!(engine.pinned_speed("v1"), Some(0.0));
    }

    #[test]
    fn test_lights_cycle() {
        let mut engine = MockEngine::new(&settings());
        let lights = engine.lights();
        assert_eq!(lights.len(), 2);
        assert_eq!(lights[0].state.current_phase_state, "GGrr");
        assert_eq!(lights[0].controlled_lanes, vec!["e0_0", "e0_1"]);

        engine.step(31.0).unwrap();
        let lights = engine.lights();
        assert_eq!(lights[1].state.current_phase_index, 1);
        assert!((lights[1].state.current_phase_elapsed - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_injected_failures() {
        let failures = MockFailures {
            fail_vehicles: vec!["v1".into()],
            fail_step: true,
            ..Default::default()
        };
        let mut engine = MockEngine::with_failures(&settings(), failures);
        assert!(engine.step(0.1).is_err());
        assert!(matches!(
            engine.add_vehicle(&spawn("v1", "r0")),
            Err(EngineError::Call { .. })
        ));

        engine.failures_mut().fail_step = false;
        assert!(engine.step(0.1).is_ok());
    }

    #[test]
    fn test_reroute_and_effort() {
        let mut engine = MockEngine::new(&settings());
        engine.add_vehicle(&spawn("v1", "r0")).unwrap();
        engine.set_edge_effort("e1", 999_999.0).unwrap();
        assert_eq!(engine.edge_effort("e1"), Some(999_999.0));
        assert!(engine.set_edge_effort("e7", 1.0).is_err());

        engine.reroute("v1").unwrap();
        assert_eq!(engine.reroutes(), 1);
        let state = engine.vehicle_state("v1").unwrap();
        assert_eq!(state.remaining_route().to_vec(), vec!["e0", "e1", "e2"]);
    }

    #[test]
    fn test_move_to_lane_on_route() {
        let mut engine = MockEngine::new(&settings());
        engine.add_vehicle(&spawn("v1", "r0")).unwrap();
        engine.move_to("v1", "e2_1", 40.0).unwrap();
        let state = engine.vehicle_state("v1").unwrap();
        assert_eq!(state.route_index, 2);
        assert_eq!(state.lane_id, "e2_1");

        engine.add_vehicle(&spawn("v2", "r2")).unwrap();
        assert!(engine.move_to("v2", "e0_0", 1.0).is_err());
    }
}
