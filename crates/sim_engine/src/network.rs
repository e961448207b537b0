//! Straight synthetic road network
//!
//! `edge_count` edges laid end to end along +x, each `edge_length` long, with
//! `lanes_per_edge` parallel lanes below the x axis. Edge `i` is named `e{i}`
//! and its lanes `e{i}_{k}`.

use contracts::{MockEngineSettings, RoadCoord, Vector3};

use crate::error::{EngineError, Result};

/// Lateral distance between lane centers (m)
pub const LANE_WIDTH: f64 = 3.2;

/// Projections farther than this from any lane are rejected (m)
const MAX_PROJECTION_DISTANCE: f64 = 50.0;

#[derive(Debug, Clone, PartialEq)]
pub struct StraightNetwork {
    edge_count: u32,
    edge_length: f64,
    lanes_per_edge: u32,
}

impl StraightNetwork {
    pub fn new(edge_count: u32, edge_length: f64, lanes_per_edge: u32) -> Self {
        Self {
            edge_count: edge_count.max(1),
            edge_length: edge_length.max(1.0),
            lanes_per_edge: lanes_per_edge.max(1),
        }
    }

    pub fn from_settings(settings: &MockEngineSettings) -> Self {
        Self::new(
            settings.edge_count,
            settings.edge_length,
            settings.lanes_per_edge,
        )
    }

    pub fn edge_count(&self) -> u32 {
        self.edge_count
    }

    pub fn edge_length(&self) -> f64 {
        self.edge_length
    }

    pub fn lanes_per_edge(&self) -> u32 {
        self.lanes_per_edge
    }

    /// Total length along x
    pub fn length(&self) -> f64 {
        f64::from(self.edge_count) * self.edge_length
    }

    pub fn edge_id(index: u32) -> String {
        format!("e{index}")
    }

    pub fn lane_id(edge_id: &str, lane_index: u32) -> String {
        format!("{edge_id}_{lane_index}")
    }

    pub fn edge_ids(&self) -> Vec<String> {
        (0..self.edge_count).map(Self::edge_id).collect()
    }

    /// Index of `e{i}`
    pub fn edge_index(&self, edge_id: &str) -> Result<u32> {
        edge_id
            .strip_prefix('e')
            .and_then(|n| n.parse::<u32>().ok())
            .filter(|i| *i < self.edge_count)
            .ok_or_else(|| EngineError::unknown_road(edge_id))
    }

    /// `(edge index, lane index)` of `e{i}_{k}`
    pub fn parse_lane(&self, lane_id: &str) -> Result<(u32, u32)> {
        let (edge, lane) = lane_id
            .rsplit_once('_')
            .ok_or_else(|| EngineError::unknown_road(lane_id))?;
        let edge_index = self
            .edge_index(edge)
            .map_err(|_| EngineError::unknown_road(lane_id))?;
        let lane_index = lane
            .parse::<u32>()
            .ok()
            .filter(|k| *k < self.lanes_per_edge)
            .ok_or_else(|| EngineError::unknown_road(lane_id))?;
        Ok((edge_index, lane_index))
    }

    pub fn lane_length(&self, lane_id: &str) -> Result<f64> {
        self.parse_lane(lane_id)?;
        Ok(self.edge_length)
    }

    /// World position of a lane position
    pub fn position(&self, edge_index: u32, lane_index: u32, lane_pos: f64) -> Vector3 {
        Vector3::new(
            f64::from(edge_index) * self.edge_length + lane_pos,
            -(f64::from(lane_index) + 0.5) * LANE_WIDTH,
            0.0,
        )
    }

    /// Nearest lane position for a world coordinate
    pub fn project(&self, position: &Vector3) -> Result<RoadCoord> {
        let x = position.x.clamp(0.0, self.length());
        let edge_index = ((x / self.edge_length).floor() as u32).min(self.edge_count - 1);
        let lane_pos = x - f64::from(edge_index) * self.edge_length;
        let lane_index = ((-position.y / LANE_WIDTH).floor().max(0.0) as u32)
            .min(self.lanes_per_edge - 1);

        let projected = self.position(edge_index, lane_index, lane_pos);
        let distance = projected.planar_distance(position);
        if distance > MAX_PROJECTION_DISTANCE {
            return Err(EngineError::Projection {
                x: position.x,
                y: position.y,
                message: format!("nearest lane is {distance:.1} m away"),
            });
        }

        let edge_id = Self::edge_id(edge_index);
        Ok(RoadCoord {
            position: projected,
            lane_id: Self::lane_id(&edge_id, lane_index),
            edge_id,
            lane_index,
            lane_pos,
        })
    }

    /// Edges `from..=to`
    pub fn edges_between(&self, from: u32, to: u32) -> Vec<String> {
        (from..=to.min(self.edge_count - 1))
            .map(Self::edge_id)
            .collect()
    }
}
