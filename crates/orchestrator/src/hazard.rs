//! Hazard bookkeeping: event parsing, the shared hazard list and the
//! proximity rules applied to moving vehicles.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use contracts::{parse_location_cm, BombEvent, Hazard, Vector3};
use tracing::warn;

/// Extra distance around a danger zone where moving vehicles react (m)
pub const SAFETY_GAP: f64 = 2.0;
/// Brakes tolerated before a vehicle is removed instead
pub const MAX_BRAKES: u32 = 5;

/// A hazard location before projection onto the road network
#[derive(Debug, Clone, PartialEq)]
pub struct HazardSite {
    /// Engine coordinates
    pub location: Vector3,
    pub radius: f64,
}

/// Road hits of a `BombEvent`, converted to engine coordinates minus the map offset
pub fn hazard_sites(event: &BombEvent, offset_x: f64, offset_y: f64) -> Vec<HazardSite> {
    event
        .data
        .iter()
        .filter(|item| item.targets_road())
        .filter_map(|item| match parse_location_cm(&item.location) {
            Ok(location) => Some(HazardSite {
                location: location.offset(-offset_x, -offset_y),
                radius: item.max_damage_radius,
            }),
            Err(e) => {
                warn!(location = %item.location, error = %e, "Skipping hazard with bad location");
                None
            }
        })
        .collect()
}

/// Hazard list shared by the hazard and proximity loops
#[derive(Debug, Default)]
pub struct HazardBook {
    hazards: RwLock<Vec<Hazard>>,
}

impl HazardBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current list
    pub fn snapshot(&self) -> Vec<Hazard> {
        self.hazards
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn extend(&self, hazards: impl IntoIterator<Item = Hazard>) {
        self.hazards
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(hazards);
    }

    /// Drop repeated zones, keeping the first; returns how many were dropped
    pub fn dedup(&self) -> usize {
        let mut hazards = self.hazards.write().unwrap_or_else(PoisonError::into_inner);
        let before = hazards.len();
        let mut kept: Vec<Hazard> = Vec::with_capacity(before);
        for hazard in hazards.drain(..) {
            if !kept.iter().any(|k| k.same_zone(&hazard)) {
                kept.push(hazard);
            }
        }
        *hazards = kept;
        before - hazards.len()
    }

    pub fn len(&self) -> usize {
        self.hazards.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// How close a moving vehicle is to a danger zone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Proximity {
    /// Inside the damage radius
    Inside,
    /// Within half the safety gap of the radius
    Braking,
}

/// Proximity of a vehicle to the first hazard that concerns it.
///
/// Stationary vehicles are never concerned.
pub fn proximity(position: &Vector3, speed: f64, hazards: &[Hazard]) -> Option<Proximity> {
    if speed <= 0.0 {
        return None;
    }
    for hazard in hazards {
        let distance = position.distance(hazard.center());
        if distance > hazard.radius + SAFETY_GAP {
            continue;
        }
        if distance < hazard.radius {
            return Some(Proximity::Inside);
        }
        if distance <= hazard.radius + SAFETY_GAP / 2.0 {
            return Some(Proximity::Braking);
        }
    }
    None
}

/// Action taken on a vehicle near a hazard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProximityAction {
    Remove,
    /// Speed 0 and zero acceleration held for an hour
    Brake,
}

/// Per-vehicle brake counts
#[derive(Debug, Default)]
pub struct BrakeLedger {
    counts: HashMap<String, u32>,
}

impl BrakeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide the action for `proximity`, counting brakes
    pub fn action(&mut self, vehicle_id: &str, proximity: Proximity) -> ProximityAction {
        if proximity == Proximity::Inside {
            return ProximityAction::Remove;
        }
        let count = self.counts.entry(vehicle_id.to_string()).or_insert(0);
        let previous = *count;
        *count += 1;
        if previous > MAX_BRAKES {
            self.counts.remove(vehicle_id);
            ProximityAction::Remove
        } else {
            ProximityAction::Brake
        }
    }

    pub fn count(&self, vehicle_id: &str) -> u32 {
        self.counts.get(vehicle_id).copied().unwrap_or_default()
    }
}
