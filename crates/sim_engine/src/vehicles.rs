//! Vehicle population and ego bookkeeping
//!
//! 负责：
//! - 在路线目录上随机投放背景车辆（按类型密度加权）
//! - 主车注册：ID 为 `p%{generation}_{entity}`，同一实体重新注册时移除所有旧代
//! - 主车停车点与 entity → ego 映射

use std::collections::HashMap;

use contracts::EGO_ID_PREFIX;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use crate::engine::{SimulationEngine, VehicleSpawn};
use crate::error::Result;

/// Departure speed of ego vehicles (m/s)
const EGO_DEPART_SPEED: f64 = 10.0;

/// Vehicle class used for ego vehicles
pub const EGO_CLASS: &str = "Military";

/// One vehicle class with weighted variants
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleClass {
    pub name: String,
    /// Relative spawn weight among classes
    pub density: f64,
    /// `(type tag, weight)`
    pub variants: Vec<(String, f64)>,
}

impl VehicleClass {
    pub fn new(name: &str, density: f64, variants: &[(&str, f64)]) -> Self {
        Self {
            name: name.to_string(),
            density,
            variants: variants
                .iter()
                .map(|(tag, weight)| ((*tag).to_string(), *weight))
                .collect(),
        }
    }
}

/// Weighted vehicle type catalogue
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleTypes {
    classes: Vec<VehicleClass>,
}

impl Default for VehicleTypes {
    fn default() -> Self {
        Self::new(vec![
            VehicleClass::new("Car", 0.6, &[("001-AcuraRL", 0.5), ("050-MPV01", 0.5)]),
            VehicleClass::new("Bus", 0.1, &[("048-MotorCoach01", 1.0)]),
            VehicleClass::new(
                "Truck",
                0.2,
                &[("053-Truck04", 0.5), ("039-MixerTruck01", 0.5)],
            ),
            VehicleClass::new("Van", 0.1, &[("055-Van02", 1.0)]),
            VehicleClass::new(EGO_CLASS, 0.0, &[("060-MilitaryTruck01", 1.0)]),
        ])
    }
}

impl VehicleTypes {
    pub fn new(classes: Vec<VehicleClass>) -> Self {
        Self { classes }
    }

    pub fn class(&self, name: &str) -> Option<&VehicleClass> {
        self.classes.iter().find(|c| c.name == name)
    }

    /// Weighted class, then weighted variant
    fn pick<R: Rng>(&self, rng: &mut R) -> Option<&str> {
        let class = pick_weighted(rng, &self.classes, |c| c.density)?;
        Self::pick_variant(class, rng)
    }

    fn pick_variant<'a, R: Rng>(class: &'a VehicleClass, rng: &mut R) -> Option<&'a str> {
        pick_weighted(rng, &class.variants, |(_, w)| *w).map(|(tag, _)| tag.as_str())
    }
}

/// Cumulative-weight pick; falls back to the last item
fn pick_weighted<'a, T, R: Rng>(rng: &mut R, items: &'a [T], weight: impl Fn(&T) -> f64) -> Option<&'a T> {
    let last = items.last()?;
    let total: f64 = items.iter().map(|i| weight(i).max(0.0)).sum();
    if total <= 0.0 {
        return Some(last);
    }
    let target = rng.random_range(0.0..total);
    let mut cumulative = 0.0;
    for item in items {
        cumulative += weight(item).max(0.0);
        if target < cumulative {
            return Some(item);
        }
    }
    Some(last)
}

/// Vehicles to add this frame: `min(max - current, add_max)`, never negative
pub fn spawn_quota(current: usize, max_vehicles: u32, add_max: u32) -> u32 {
    let current = u32::try_from(current).unwrap_or(u32::MAX);
    max_vehicles.saturating_sub(current).min(add_max)
}

/// Ego ID for the given generation
pub fn ego_id(generation: u32, entity_id: &str) -> String {
    format!("{EGO_ID_PREFIX}{generation}_{entity_id}")
}

/// Entity ID of an ego ID (`p%3_tank7` -> `tank7`)
pub fn entity_of_ego(ego_id: &str) -> Option<&str> {
    ego_id
        .strip_prefix(EGO_ID_PREFIX)
        .and_then(|rest| rest.split_once('_'))
        .map(|(_, entity)| entity)
}

/// Random flow spawning and ego registration
#[derive(Debug)]
pub struct VehicleManager {
    rng: StdRng,
    types: VehicleTypes,
    next_actor_id: u64,
    ego_ids: Vec<String>,
    entity_to_ego: HashMap<String, String>,
    generations: HashMap<String, u32>,
    stop_points: HashMap<String, (String, f64)>,
}

impl VehicleManager {
    /// `seed = None` draws from OS entropy
    pub fn new(seed: Option<u64>, types: VehicleTypes) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            rng,
            types,
            next_actor_id: 1,
            ego_ids: Vec::new(),
            entity_to_ego: HashMap::new(),
            generations: HashMap::new(),
            stop_points: HashMap::new(),
        }
    }

    /// Add up to `count` vehicles on random routes; returns how many were added
    pub fn add_random_vehicles<E: SimulationEngine>(&mut self, engine: &mut E, count: u32) -> u32 {
        if count == 0 {
            return 0;
        }
        let routes = engine.route_ids();
        if routes.is_empty() {
            warn!("No routes available in the network");
            return 0;
        }

        let mut added = 0;
        for _ in 0..count {
            let id = format!("v{}", self.next_actor_id);
            self.next_actor_id += 1;

            let route_id = routes[self.rng.random_range(0..routes.len())].clone();
            let lanes = engine
                .route_edges(&route_id)
                .ok()
                .and_then(|edges| edges.first().cloned())
                .and_then(|edge| engine.edge_lane_count(&edge).ok())
                .unwrap_or(1)
                .max(1);
            let Some(type_tag) = self.types.pick(&mut self.rng).map(str::to_string) else {
                warn!("No vehicle types configured");
                return added;
            };

            let spawn = VehicleSpawn {
                id,
                route_id,
                type_tag,
                lane_index: self.rng.random_range(0..lanes),
                depart_pos: 0.0,
                depart_speed: 0.0,
            };
            match engine.add_vehicle(&spawn) {
                Ok(()) => added += 1,
                Err(e) => warn!(vehicle = %spawn.id, error = %e, "Failed to add vehicle"),
            }
        }
        added
    }

    /// Register an ego vehicle for `entity_id` on `route_id`.
    ///
    /// Re-registering an entity removes every older generation first.
    pub fn register_ego<E: SimulationEngine>(
        &mut self,
        engine: &mut E,
        entity_id: &str,
        route_id: &str,
    ) -> Result<String> {
        let generation = match self.generations.get(entity_id).copied() {
            Some(current) => {
                for g in 0..=current {
                    self.remove_ego(engine, &ego_id(g, entity_id));
                }
                current + 1
            }
            None => 0,
        };
        self.generations.insert(entity_id.to_string(), generation);

        let id = ego_id(generation, entity_id);
        let type_tag = self
            .types
            .class(EGO_CLASS)
            .and_then(|class| VehicleTypes::pick_variant(class, &mut self.rng))
            .unwrap_or(EGO_CLASS)
            .to_string();

        engine.add_vehicle(&VehicleSpawn {
            id: id.clone(),
            route_id: route_id.to_string(),
            type_tag,
            lane_index: 0,
            depart_pos: 0.0,
            depart_speed: EGO_DEPART_SPEED,
        })?;

        self.ego_ids.push(id.clone());
        self.entity_to_ego
            .insert(entity_id.to_string(), id.clone());
        info!(ego = %id, route = %route_id, generation, "Ego vehicle added");
        Ok(id)
    }

    /// Remove an ego from the engine and from every index.
    ///
    /// Returns true if the ego was tracked.
    pub fn remove_ego<E: SimulationEngine>(&mut self, engine: &mut E, ego_id: &str) -> bool {
        if let Err(e) = engine.remove_vehicle(ego_id) {
            debug!(ego = %ego_id, error = %e, "Ego already gone from engine");
        }

        let tracked = match self.ego_ids.iter().position(|id| id == ego_id) {
            Some(index) => {
                self.ego_ids.remove(index);
                true
            }
            None => false,
        };
        self.stop_points.remove(ego_id);
        if let Some(entity) = entity_of_ego(ego_id) {
            if self.entity_to_ego.get(entity).map(String::as_str) == Some(ego_id) {
                self.entity_to_ego.remove(entity);
            }
        }
        if tracked {
            info!(ego = %ego_id, "Ego vehicle removed");
        }
        tracked
    }

    pub fn ego_ids(&self) -> &[String] {
        &self.ego_ids
    }

    pub fn is_ego_empty(&self) -> bool {
        self.ego_ids.is_empty()
    }

    pub fn is_tracked_ego(&self, ego_id: &str) -> bool {
        self.ego_ids.iter().any(|id| id == ego_id)
    }

    /// Current ego of an external entity
    pub fn ego_for_entity(&self, entity_id: &str) -> Option<&str> {
        self.entity_to_ego.get(entity_id).map(String::as_str)
    }

    /// Record where an ego should stop (lane, lane position)
    pub fn set_ego_stop_point(&mut self, ego_id: &str, lane_id: impl Into<String>, lane_pos: f64) {
        self.stop_points
            .insert(ego_id.to_string(), (lane_id.into(), lane_pos));
    }

    pub fn ego_stop_point(&self, ego_id: &str) -> Option<(&str, f64)> {
        self.stop_points
            .get(ego_id)
            .map(|(lane, pos)| (lane.as_str(), *pos))
    }
}
