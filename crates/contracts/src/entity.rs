//! EntitySnapshot - per-frame engine state
//!
//! Snapshots are captured once per frame by the data-collection task and moved
//! into change-tracking windows afterwards.

use serde::{Deserialize, Serialize};

/// Prefix shared by every ego vehicle ID (`p%{generation}_{entity}`).
pub const EGO_ID_PREFIX: &str = "p%";

/// 3D vector (meters)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Euclidean distance
    pub fn distance(&self, other: &Vector3) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2) + (self.z - other.z).powi(2))
            .sqrt()
    }

    /// Distance on the x/y plane only
    pub fn planar_distance(&self, other: &Vector3) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    /// Shift on the x/y plane (map offset)
    pub fn offset(&self, dx: f64, dy: f64) -> Vector3 {
        Vector3::new(self.x + dx, self.y + dy, self.z)
    }
}

/// Rotation in degrees
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rotation {
    pub pitch: f64,
    pub roll: f64,
    pub yaw: f64,
}

/// Kind of tracked entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Vehicle,
    Light,
}

/// Immutable per-frame view of one engine entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub id: String,
    pub kind: EntityKind,
    pub position: Vector3,
    pub rotation: Rotation,
    /// Speed in m/s
    pub speed: f64,
    /// Engine type tag (asset name)
    pub type_tag: String,
    /// `EGO` or `FLOW` for vehicles, empty for lights
    pub category: String,
}

impl EntitySnapshot {
    /// Vehicle snapshot, category derived from the ID convention
    pub fn vehicle(
        id: impl Into<String>,
        position: Vector3,
        yaw: f64,
        speed: f64,
        type_tag: impl Into<String>,
    ) -> Self {
        let id = id.into();
        let category = if is_ego_id(&id) { "EGO" } else { "FLOW" };
        Self {
            id,
            kind: EntityKind::Vehicle,
            position,
            rotation: Rotation {
                pitch: 0.0,
                roll: 0.0,
                yaw,
            },
            speed,
            type_tag: type_tag.into(),
            category: category.to_string(),
        }
    }

    /// Traffic light snapshot
    pub fn light(id: impl Into<String>, position: Vector3) -> Self {
        Self {
            id: id.into(),
            kind: EntityKind::Light,
            position,
            rotation: Rotation::default(),
            speed: 0.0,
            type_tag: String::new(),
            category: String::new(),
        }
    }
}

/// True for IDs produced by ego registration
pub fn is_ego_id(id: &str) -> bool {
    id.starts_with(EGO_ID_PREFIX)
}

/// Per-frame diff between two snapshot sets
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    /// In the previous frame, absent from the current one
    pub disappeared: Vec<EntitySnapshot>,
    /// In the current frame, absent from the previous one
    pub appeared: Vec<EntitySnapshot>,
    /// In both frames (current values, height-smoothed)
    pub updated: Vec<EntitySnapshot>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.disappeared.is_empty() && self.appeared.is_empty() && self.updated.is_empty()
    }
}

/// Signal phase state of a traffic light
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LightPhaseState {
    pub current_phase_state: String,
    pub current_phase_index: i32,
    pub current_phase_elapsed: f64,
    pub current_phase_duration: f64,
    pub next_switch_time: f64,
    #[serde(rename = "programID")]
    pub program_id: String,
    pub is_active: bool,
}

/// Traffic light snapshot with signal state
#[derive(Debug, Clone, PartialEq)]
pub struct LightSnapshot {
    pub entity: EntitySnapshot,
    pub state: LightPhaseState,
    pub controlled_lanes: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vehicle_category_from_id() {
        let ego = EntitySnapshot::vehicle("p%0_actor7", Vector3::default(), 0.0, 0.0, "M1");
        let flow = EntitySnapshot::vehicle("v12", Vector3::default(), 0.0, 0.0, "001-AcuraRL");
        assert_eq!(ego.category, "EGO");
        assert_eq!(flow.category, "FLOW");
    }

    #[test]
    fn test_planar_distance_ignores_height() {
        let a = Vector3::new(0.0, 0.0, 0.0);
        let b = Vector3::new(3.0, 4.0, 100.0);
        assert!((a.planar_distance(&b) - 5.0).abs() < 1e-9);
        assert!(a.distance(&b) > 100.0);
    }

    #[test]
    fn test_light_phase_state_field_names() {
        let json = serde_json::to_value(LightPhaseState::default()).unwrap();
        assert!(json.get("currentPhaseState").is_some());
        assert!(json.get("programID").is_some());
        assert!(json.get("isActive").is_some());
    }
}
