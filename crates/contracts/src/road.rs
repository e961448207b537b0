//! Road network coordinates shared by the engine adapter and the controller.

use serde::{Deserialize, Serialize};

use crate::{ContractError, Vector3};

/// A world position projected onto the road network
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoadCoord {
    /// Projected position (engine coordinates)
    pub position: Vector3,
    pub lane_id: String,
    pub edge_id: String,
    pub lane_index: u32,
    /// Longitudinal position along the lane (m)
    pub lane_pos: f64,
}

/// A recorded danger zone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hazard {
    pub road: RoadCoord,
    /// Damage radius (m)
    pub radius: f64,
}

impl Hazard {
    /// Center of the danger zone
    pub fn center(&self) -> &Vector3 {
        &self.road.position
    }

    /// Two hazards are the same zone when lane, lane position and radius agree.
    pub fn same_zone(&self, other: &Hazard) -> bool {
        const EPS: f64 = 1e-6;
        self.road.lane_id == other.road.lane_id
            && self.road.edge_id == other.road.edge_id
            && (self.road.lane_pos - other.road.lane_pos).abs() < EPS
            && (self.radius - other.radius).abs() < EPS
            && self.road.position.distance(&other.road.position) < EPS
    }
}

/// Stop point on an edge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopPoint {
    pub edge_id: String,
    /// Position along the edge (m)
    pub pos: f64,
    pub lane_index: u32,
    /// Stop duration (s)
    pub duration: f64,
}

/// Parse an `X=.. Y=.. Z=..` location string in centimetres (left-handed)
/// into engine meters.
pub fn parse_location_cm(text: &str) -> Result<Vector3, ContractError> {
    let mut axes = [None; 3];
    for token in text.split_whitespace() {
        let Some((axis, value)) = token.split_once('=') else {
            continue;
        };
        let slot = match axis.trim() {
            "X" | "x" => 0,
            "Y" | "y" => 1,
            "Z" | "z" => 2,
            _ => continue,
        };
        let parsed: f64 = value.trim().parse().map_err(|_| {
            ContractError::document_decode("BombLocation", format!("bad {axis} value '{value}'"))
        })?;
        axes[slot] = Some(parsed);
    }

    match axes {
        [Some(x), Some(y), Some(z)] => Ok(Vector3::new(x / 100.0, y / -100.0, z / 100.0)),
        _ => Err(ContractError::document_decode(
            "BombLocation",
            format!("expected 'X=.. Y=.. Z=..', got '{text}'"),
        )),
    }
}
