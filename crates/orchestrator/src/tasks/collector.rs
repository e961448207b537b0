//! Data-collection task
//!
//! Waits for init, then once per completed frame: snapshot vehicles and
//! lights, diff against the previous frame, publish `TrafficFlow` and
//! (when enabled) `TrafficLight`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use contracts::{
    keys, ActorRecord, ChangeSet, LightDocument, LightRecord, LightSnapshot, VehicleDocument,
};
use sim_engine::SimulationEngine;
use tracing::{debug, info, instrument, warn};

use crate::context::InstanceContext;
use crate::error::Result;

/// Pause after each published frame
const COLLECT_PAUSE: Duration = Duration::from_millis(5);
/// Bound on one wait for the step latch, so shutdown is noticed
const STEP_WAIT: Duration = Duration::from_millis(100);

/// Vehicle update document
///
/// `published` is the tracker's publishing view of the frame (see
/// `ChangeTracker::published`); `vehicle_count` is the frame's vehicle total.
pub fn vehicle_document(
    published: &ChangeSet,
    vehicle_count: usize,
    offset_x: f64,
    offset_y: f64,
) -> VehicleDocument {
    let records = |entities: &[contracts::EntitySnapshot]| -> Vec<ActorRecord> {
        entities
            .iter()
            .map(|e| ActorRecord::from_snapshot(e, offset_x, offset_y))
            .collect()
    };
    VehicleDocument {
        removed_actors: records(&published.disappeared),
        add_actors: records(&published.appeared),
        update_actors: records(&published.updated),
        vehicle_count,
    }
}

/// Light update document
pub fn light_document(
    lights: &[LightSnapshot],
    timestamp: f64,
    collection_time: i64,
    offset_x: f64,
    offset_y: f64,
) -> LightDocument {
    LightDocument {
        actors: lights
            .iter()
            .map(|l| LightRecord::from_snapshot(l, offset_x, offset_y))
            .collect(),
        light_count: lights.len(),
        timestamp,
        collection_time,
    }
}

#[instrument(name = "collector_task", skip(ctx), fields(instance = %ctx.instance_id()))]
pub fn run_collector<E>(ctx: Arc<InstanceContext<E>>) -> Result<u64>
where
    E: SimulationEngine + 'static,
{
    ctx.coordinator().wait_for_init();
    info!(instance = %ctx.instance_id(), "Data collection started");

    let mut last_frame = 0;
    let mut collected = 0;
    while ctx.is_running() {
        if !ctx.coordinator().wait_for_step_timeout(STEP_WAIT) {
            continue;
        }
        let frame = ctx.coordinator().frame_id();
        if frame == last_frame {
            // 同一帧只发布一次
            ctx.sleep_while_running(COLLECT_PAUSE);
            continue;
        }
        last_frame = frame;

        collect_frame(&ctx, frame);
        collected += 1;
        ctx.sleep_while_running(COLLECT_PAUSE);
    }

    info!(instance = %ctx.instance_id(), frames = collected, "Data collection finished");
    Ok(collected)
}

fn collect_frame<E: SimulationEngine + 'static>(ctx: &InstanceContext<E>, frame: u64) {
    let config = ctx.config();
    let (vehicles, lights, sim_time) = {
        let sim = ctx.lock_sim();
        let lights = if config.traffic_signals {
            sim.engine.lights()
        } else {
            Vec::new()
        };
        (sim.engine.vehicles(), lights, sim.engine.simulation_time())
    };

    let vehicle_count = vehicles.len();
    let (changes, published) = {
        let mut tracker = ctx.tracker();
        let changes = tracker.track(vehicles);
        let published = tracker.published(&changes);
        (changes, published)
    };
    observability::record_change_set(ctx.instance_id(), &changes);

    let doc = vehicle_document(&published, vehicle_count, config.offset_x, config.offset_y);
    if !ctx.write_document(keys::TRAFFIC_FLOW, &doc) {
        warn!(instance = %ctx.instance_id(), frame, "Failed to publish vehicle update");
    }

    if config.traffic_signals {
        let collected_at = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let light_doc =
            light_document(&lights, sim_time, collected_at, config.offset_x, config.offset_y);
        if !ctx.write_document(keys::TRAFFIC_LIGHT, &light_doc) {
            warn!(instance = %ctx.instance_id(), frame, "Failed to publish light update");
        }
    }

    debug!(
        instance = %ctx.instance_id(),
        frame,
        vehicles = doc.vehicle_count,
        "Frame published"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{EntitySnapshot, LightPhaseState, Vector3};

    fn vehicle(id: &str, x: f64) -> EntitySnapshot {
        EntitySnapshot::vehicle(id, Vector3::new(x, 0.0, 0.0), 90.0, 5.0, "050-MPV01")
    }

    #[test]
    fn test_vehicle_document_from_changes() {
        let changes = ChangeSet {
            disappeared: vec![vehicle("a", 1.0)],
            appeared: vec![vehicle("d", 4.0)],
            updated: vec![vehicle("b", 2.0), vehicle("c", 3.0)],
        };
        let doc = vehicle_document(&changes, 3, 100.0, -50.0);

        assert_eq!(doc.vehicle_count, 3);
        assert_eq!(doc.removed_actors[0].actor_id, "a");
        assert_eq!(doc.add_actors[0].actor_id, "d");
        assert_eq!(doc.update_actors.len(), 2);
        assert_eq!(doc.add_actors[0].position.x, 104.0);
        assert_eq!(doc.add_actors[0].position.y, -50.0);
    }

    #[test]
    fn test_removed_vehicle_reported_while_in_window() {
        use crate::fixtures::{context, instance_config};
        use sim_engine::VehicleSpawn;
        use store::MockStoreServer;

        let server = MockStoreServer::start().unwrap();
        let mut config = instance_config("flicker");
        config.sliding_window_size = 3;
        let ctx = context(&server, config);
        for (id, pos) in [("a", 10.0), ("b", 50.0)] {
            ctx.lock_sim()
                .engine
                .add_vehicle(&VehicleSpawn {
                    id: id.into(),
                    route_id: "r0".into(),
                    type_tag: "050-MPV01".into(),
                    lane_index: 0,
                    depart_pos: pos,
                    depart_speed: 0.0,
                })
                .unwrap();
        }

        let published = |frame| -> VehicleDocument {
            collect_frame(&ctx, frame);
            serde_json::from_str(&server.value("flicker:TrafficFlow").unwrap()).unwrap()
        };
        let removed = |doc: &VehicleDocument| -> Vec<String> {
            doc.removed_actors.iter().map(|a| a.actor_id.clone()).collect()
        };

        assert_eq!(published(1).add_actors.len(), 2);
        ctx.lock_sim().engine.remove_vehicle("a").unwrap();

        let doc = published(2);
        assert_eq!(removed(&doc), vec!["a"]);
        assert_eq!(doc.vehicle_count, 1);
        // a 已不在当前帧，但仍在消失窗口内
        let doc = published(3);
        assert_eq!(removed(&doc), vec!["a"]);
        assert_eq!(doc.update_actors.len(), 1);
        assert_eq!(doc.update_actors[0].actor_id, "b");
        assert_eq!(removed(&published(4)), vec!["a"]);

        // 窗口容量 3：第 2 帧的批次已被淘汰
        assert!(removed(&published(5)).is_empty());
    }

    #[test]
    fn test_light_document() {
        let lights = vec![LightSnapshot {
            entity: EntitySnapshot::light("tl0", Vector3::new(200.0, 0.0, 0.0)),
            state: LightPhaseState {
                current_phase_state: "GGrr".into(),
                ..Default::default()
            },
            controlled_lanes: vec!["e0_0".into()],
        }];
        let doc = light_document(&lights, 12.5, 42, 1.0, 2.0);

        assert_eq!(doc.light_count, 1);
        assert_eq!(doc.timestamp, 12.5);
        assert_eq!(doc.collection_time, 42);
        assert_eq!(doc.actors[0].position.x, 201.0);
        assert_eq!(doc.actors[0].state.current_phase_state, "GGrr");
    }
}
