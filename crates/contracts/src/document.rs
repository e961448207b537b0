//! Datastore documents
//!
//! Published documents (vehicle and light updates) and the event documents the
//! controller polls. Field names follow the datastore wire contract, so most
//! structs carry explicit serde renames.

use serde::{Deserialize, Serialize};

use crate::{EntitySnapshot, LightPhaseState, LightSnapshot, Vector3};

/// Datastore keys (namespaced by instance at write time)
pub mod keys {
    /// Vehicle update document
    pub const TRAFFIC_FLOW: &str = "TrafficFlow";
    /// Light update document
    pub const TRAFFIC_LIGHT: &str = "TrafficLight";
    /// Instance readiness flag
    pub const STATUS: &str = "status";
    /// Hazard events
    pub const BOMB_EVENT: &str = "BombEvent";
    /// External navigation cancel events
    pub const CONTROL_EVENT: &str = "ControllEvent";
    /// Route planning requests
    pub const NAVIGATION_REQUEST: &str = "NavigationReqList";
    /// Route planning responses
    pub const NAVIGATION_RESPONSE: &str = "NavigationRsp";
}

/// Position as published
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionRecord {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Rotation as published
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RotationRecord {
    pub pitch: f64,
    pub roll: f64,
    pub yaw: f64,
}

/// One vehicle in a vehicle update document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorRecord {
    #[serde(rename = "actorID")]
    pub actor_id: String,
    pub category: String,
    #[serde(rename = "assetName")]
    pub asset_name: String,
    #[serde(rename = "currentSpeed")]
    pub current_speed: f64,
    pub position: PositionRecord,
    pub rotation: RotationRecord,
}

impl ActorRecord {
    /// Build a record, shifting x/y by the map offset
    pub fn from_snapshot(snapshot: &EntitySnapshot, offset_x: f64, offset_y: f64) -> Self {
        let p = snapshot.position.offset(offset_x, offset_y);
        Self {
            actor_id: snapshot.id.clone(),
            category: snapshot.category.clone(),
            asset_name: snapshot.type_tag.clone(),
            current_speed: snapshot.speed,
            position: PositionRecord {
                x: p.x,
                y: p.y,
                z: p.z,
            },
            rotation: RotationRecord {
                pitch: snapshot.rotation.pitch,
                roll: snapshot.rotation.roll,
                yaw: snapshot.rotation.yaw,
            },
        }
    }
}

/// Vehicle update document (`TrafficFlow`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VehicleDocument {
    #[serde(rename = "removedActors")]
    pub removed_actors: Vec<ActorRecord>,
    #[serde(rename = "addActors")]
    pub add_actors: Vec<ActorRecord>,
    #[serde(rename = "updateActors")]
    pub update_actors: Vec<ActorRecord>,
    pub vehicle_count: usize,
}

/// One light in a light update document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightRecord {
    #[serde(rename = "actorID")]
    pub actor_id: String,
    pub position: PositionRecord,
    pub state: LightPhaseState,
    #[serde(rename = "controlledLanes")]
    pub controlled_lanes: Vec<String>,
}

impl LightRecord {
    pub fn from_snapshot(light: &LightSnapshot, offset_x: f64, offset_y: f64) -> Self {
        let p = light.entity.position.offset(offset_x, offset_y);
        Self {
            actor_id: light.entity.id.clone(),
            position: PositionRecord {
                x: p.x,
                y: p.y,
                z: p.z,
            },
            state: light.state.clone(),
            controlled_lanes: light.controlled_lanes.clone(),
        }
    }
}

/// Light update document (`TrafficLight`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LightDocument {
    #[serde(rename = "Actors")]
    pub actors: Vec<LightRecord>,
    pub light_count: usize,
    /// Simulation time (s)
    pub timestamp: f64,
    /// Wall clock at collection (ns since epoch)
    pub collection_time: i64,
}

/// Hazard event (`BombEvent`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BombEvent {
    #[serde(rename = "TimeStamp")]
    pub time_stamp: String,
    #[serde(rename = "DataArray", default)]
    pub data: Vec<BombItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BombItem {
    #[serde(rename = "EntityType")]
    pub entity_type: String,
    /// `X=.. Y=.. Z=..` in centimetres
    #[serde(rename = "BombLocation")]
    pub location: String,
    #[serde(rename = "MaxDamageRadius")]
    pub max_damage_radius: f64,
}

impl BombItem {
    /// Only road hits affect traffic
    pub fn targets_road(&self) -> bool {
        self.entity_type.contains("Road")
    }
}

/// External navigation cancel event (`ControllEvent`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlEvent {
    #[serde(rename = "TimeStamp")]
    pub time_stamp: String,
    #[serde(rename = "Actors", default)]
    pub actors: Vec<String>,
}

/// Route planning request list (`NavigationReqList`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationRequest {
    pub id: String,
    #[serde(rename = "NavigationList", default)]
    pub items: Vec<NavigationItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationItem {
    #[serde(rename = "actorID")]
    pub actor_id: String,
    pub src: Vec<f64>,
    #[serde(alias = "dist")]
    pub dst: Vec<f64>,
}

impl NavigationItem {
    /// Origin as a vector (z defaults to 0 for 2D input)
    pub fn origin(&self) -> Option<Vector3> {
        coords_to_vector(&self.src)
    }

    pub fn destination(&self) -> Option<Vector3> {
        coords_to_vector(&self.dst)
    }
}

fn coords_to_vector(coords: &[f64]) -> Option<Vector3> {
    match coords {
        [x, y] => Some(Vector3::new(*x, *y, 0.0)),
        [x, y, z, ..] => Some(Vector3::new(*x, *y, *z)),
        _ => None,
    }
}

/// Route planning response (`NavigationRsp`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationResponse {
    pub id: String,
    pub time: String,
    /// One entry per request item: `successful` or an error text
    pub info: Vec<String>,
}

/// A planned route ready for ego registration
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedRoute {
    /// External entity ID
    pub actor_id: String,
    pub origin: Vector3,
    pub destination: Vector3,
    /// Ordered edge IDs
    pub edges: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vehicle_document_field_names() {
        let snap = EntitySnapshot::vehicle("v1", Vector3::new(1.0, 2.0, 3.0), 90.0, 4.5, "MPV01");
        let doc = VehicleDocument {
            removed_actors: vec![],
            add_actors: vec![ActorRecord::from_snapshot(&snap, 10.0, 20.0)],
            update_actors: vec![],
            vehicle_count: 1,
        };
        let json = serde_json::to_value(&doc).unwrap();
        let actor = &json["addActors"][0];
        assert_eq!(actor["actorID"], "v1");
        assert_eq!(actor["assetName"], "MPV01");
        assert_eq!(actor["category"], "FLOW");
        assert_eq!(actor["currentSpeed"], 4.5);
        assert_eq!(actor["position"]["x"], 11.0);
        assert_eq!(actor["position"]["y"], 22.0);
        assert_eq!(actor["position"]["z"], 3.0);
        assert_eq!(actor["rotation"]["yaw"], 90.0);
        assert_eq!(json["vehicle_count"], 1);
        assert!(json["removedActors"].as_array().unwrap().is_empty());
        assert!(json["updateActors"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_light_document_field_names() {
        let doc = LightDocument {
            actors: vec![],
            light_count: 0,
            timestamp: 12.5,
            collection_time: 7,
        };
        let json = serde_json::to_value(&doc).unwrap();
        assert!(json.get("Actors").is_some());
        assert_eq!(json["light_count"], 0);
        assert_eq!(json["timestamp"], 12.5);
        assert_eq!(json["collection_time"], 7);
    }

    #[test]
    fn test_bomb_event_decode() {
        let raw = r#"{
            "TimeStamp": "2025-01-01 10:00:00",
            "DataArray": [
                {"EntityType": "RoadSegment", "BombLocation": "X=100 Y=-200 Z=0", "MaxDamageRadius": 15.0},
                {"EntityType": "Building", "BombLocation": "X=0 Y=0 Z=0", "MaxDamageRadius": 5.0}
            ]
        }"#;
        let event: BombEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.data.len(), 2);
        assert!(event.data[0].targets_road());
        assert!(!event.data[1].targets_road());
    }

    #[test]
    fn test_navigation_item_accepts_dist_alias() {
        let raw = r#"{"id": "req-1", "NavigationList": [
            {"actorID": "a1", "src": [1.0, 2.0], "dist": [3.0, 4.0, 5.0]}
        ]}"#;
        let req: NavigationRequest = serde_json::from_str(raw).unwrap();
        let item = &req.items[0];
        assert_eq!(item.origin(), Some(Vector3::new(1.0, 2.0, 0.0)));
        assert_eq!(item.destination(), Some(Vector3::new(3.0, 4.0, 5.0)));
    }

    #[test]
    fn test_navigation_item_rejects_short_coords() {
        let item = NavigationItem {
            actor_id: "a".into(),
            src: vec![1.0],
            dst: vec![],
        };
        assert!(item.origin().is_none());
        assert!(item.destination().is_none());
    }
}
