//! Controller sub-loops
//!
//! 四个周期性子循环，各占一个线程：
//! - navigate：取出已规划路线，注册主车、移动到起点并在终点插入停车点
//! - hazard：读取 `BombEvent`，记录危险区，提高边成本并为车辆规划停车点
//! - proximity：危险区附近的移动车辆制动或移除
//! - nav stop：移除已消失、已到达或被外部取消的主车
//!
//! 所有引擎修改都经由命令队列在仿真线程执行。数据存储未连接时跳过本轮。

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use contracts::{keys, BombEvent, ControlEvent, Hazard, StopPoint};
use sim_engine::{route_id_for, SimulationEngine};
use tracing::{debug, info, instrument, warn};

use crate::context::{InstanceContext, InstanceStats};
use crate::gate::EventGate;
use crate::hazard::{hazard_sites, proximity, BrakeLedger, ProximityAction};
use crate::stop_plan::{apply_stop_plan, plan_stop, StopPlan, STOP_DURATION};

/// Routing effort put on edges inside a danger zone
pub const HAZARD_EFFORT: f64 = 999_999.0;
/// Vehicles per proximity batch
pub const PROXIMITY_BATCH: usize = 500;
/// An ego this close to its stop position has arrived (m)
pub const ARRIVAL_TOLERANCE: f64 = 3.5;
/// Braking holds zero acceleration this long (s)
const BRAKE_HOLD: f64 = 3600.0;

const BATCH_PAUSE: Duration = Duration::from_millis(10);
/// Spacing between egos sharing a start edge
const SHARED_START_PAUSE: Duration = Duration::from_secs(2);

/// Vehicles acted on by one proximity sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProximitySweep {
    pub removed: usize,
    pub braked: usize,
}

fn run_periodic<E, F>(ctx: &InstanceContext<E>, name: &str, interval: Duration, mut tick: F)
where
    E: SimulationEngine + 'static,
    F: FnMut(&InstanceContext<E>),
{
    ctx.coordinator().wait_for_init();
    info!(instance = %ctx.instance_id(), task = name, interval_ms = interval.as_millis() as u64, "Controller loop started");
    while ctx.is_running() {
        if ctx.store_ready() {
            tick(ctx);
        } else {
            debug!(instance = %ctx.instance_id(), task = name, "Store not connected, skipping");
        }
        if !ctx.sleep_while_running(interval) {
            break;
        }
    }
    info!(instance = %ctx.instance_id(), task = name, "Controller loop finished");
}

fn interval(secs: f64) -> Duration {
    Duration::from_secs_f64(secs.max(0.01))
}

// ===== Navigate =====

#[instrument(name = "navigate_task", skip(ctx), fields(instance = %ctx.instance_id()))]
pub fn run_navigate<E: SimulationEngine + 'static>(ctx: Arc<InstanceContext<E>>) {
    let every = interval(ctx.config().controller.navigate_interval_secs);
    run_periodic(&ctx, "navigate", every, |ctx| {
        navigate_once(ctx);
    });
}

/// Queue ego registration for every planned route waiting in the mailbox.
///
/// Returns how many egos were queued.
pub fn navigate_once<E: SimulationEngine + 'static>(ctx: &InstanceContext<E>) -> usize {
    let Some(routes) = ctx.routes().take() else {
        return 0;
    };
    let (offset_x, offset_y) = (ctx.config().offset_x, ctx.config().offset_y);

    let mut starts = HashSet::new();
    let mut queued = 0;
    for route in routes {
        if !ctx.is_running() {
            break;
        }
        let Some(first_edge) = route.edges.first().cloned() else {
            continue;
        };

        let origin = route.origin.offset(-offset_x, -offset_y);
        let destination = route.destination.offset(-offset_x, -offset_y);
        let projected = {
            let sim = ctx.lock_sim();
            sim.engine
                .project(&origin)
                .and_then(|start| sim.engine.project(&destination).map(|end| (start, end)))
        };
        let (start, end) = match projected {
            Ok(pair) => pair,
            Err(e) => {
                warn!(actor = %route.actor_id, error = %e, "Cannot place navigation route");
                continue;
            }
        };

        let route_id = route_id_for(&route.edges);
        let actor_id = route.actor_id.clone();
        let edges = route.edges.clone();
        ctx.enqueue(move |sim| {
            if !sim.engine.route_ids().contains(&route_id) {
                if let Err(e) = sim.engine.add_route(&route_id, &edges) {
                    warn!(route = %route_id, error = %e, "Failed to add route");
                    return;
                }
            }
            let ego = match sim.register_ego(&actor_id, &route_id) {
                Ok(ego) => ego,
                Err(e) => {
                    warn!(actor = %actor_id, route = %route_id, error = %e, "Failed to add ego vehicle");
                    return;
                }
            };
            if let Err(e) = sim.engine.move_to(&ego, &start.lane_id, start.lane_pos) {
                warn!(ego = %ego, lane = %start.lane_id, error = %e, "Failed to move ego to its start");
            }
            sim.vehicles
                .set_ego_stop_point(&ego, end.lane_id.clone(), end.lane_pos);
            let stop = StopPoint {
                edge_id: end.edge_id.clone(),
                pos: end.lane_pos,
                lane_index: end.lane_index,
                duration: STOP_DURATION,
            };
            if let Err(e) = sim.engine.insert_stop(&ego, &stop) {
                warn!(ego = %ego, edge = %stop.edge_id, error = %e, "Failed to insert destination stop");
            }
        });
        queued += 1;
        info!(actor = %route.actor_id, route = %route_id_for(&route.edges), "Ego registration queued");

        if !starts.insert(first_edge) {
            ctx.sleep_while_running(SHARED_START_PAUSE);
        }
    }

    InstanceStats::add(&ctx.stats().egos_registered, queued as u64);
    queued
}

// ===== Hazard =====

#[instrument(name = "hazard_task", skip(ctx), fields(instance = %ctx.instance_id()))]
pub fn run_hazard<E: SimulationEngine + 'static>(ctx: Arc<InstanceContext<E>>) {
    let every = interval(ctx.config().controller.hazard_interval_secs);
    let mut gate = EventGate::new();
    run_periodic(&ctx, "hazard", every, |ctx| {
        hazard_once(ctx, &mut gate);
    });
}

/// One hazard pass; returns how many new hazards were recorded
pub fn hazard_once<E: SimulationEngine + 'static>(
    ctx: &InstanceContext<E>,
    gate: &mut EventGate,
) -> usize {
    // 无危险区时也要消费新增队列
    let appeared = take_appeared(ctx);
    let known = ctx.hazards().snapshot();
    if !known.is_empty() {
        reroute_appeared(ctx, appeared, known);
    }

    let Some(event) = ctx.read_document::<BombEvent>(keys::BOMB_EVENT) else {
        return 0;
    };
    if !gate.admit(&event.time_stamp) {
        return 0;
    }

    let config = ctx.config();
    let sites = hazard_sites(&event, config.offset_x, config.offset_y);
    let projected: Vec<Hazard> = {
        let sim = ctx.lock_sim();
        sites
            .into_iter()
            .filter_map(|site| match sim.engine.project(&site.location) {
                Ok(road) => {
                    info!(
                        x = site.location.x,
                        y = site.location.y,
                        radius = site.radius,
                        lane = %road.lane_id,
                        lane_pos = road.lane_pos,
                        "Hazard projected onto lane"
                    );
                    Some(Hazard {
                        road,
                        radius: site.radius,
                    })
                }
                Err(e) => {
                    warn!(x = site.location.x, y = site.location.y, error = %e, "Hazard projection failed");
                    None
                }
            })
            .collect()
    };
    if projected.is_empty() {
        warn!(instance = %ctx.instance_id(), time_stamp = %event.time_stamp, "No lane within any hazard");
        return 0;
    }

    ctx.hazards().extend(projected.iter().cloned());
    InstanceStats::add(&ctx.stats().hazards_recorded, projected.len() as u64);

    let mut edges: Vec<String> = projected.iter().map(|h| h.road.edge_id.clone()).collect();
    edges.sort();
    edges.dedup();
    ctx.enqueue(move |sim| {
        for edge in &edges {
            if let Err(e) = sim.engine.set_edge_effort(edge, HAZARD_EFFORT) {
                warn!(edge = %edge, error = %e, "Failed to set edge effort");
            }
        }
    });

    plan_stops_for_all(ctx, &projected);
    projected.len()
}

/// Reroute and stop-plan the vehicles that appeared since the last pass
/// IDs in the added queue, which is flagged drained
fn take_appeared<E: SimulationEngine + 'static>(ctx: &InstanceContext<E>) -> Vec<String> {
    let mut tracker = ctx.tracker();
    let queue = tracker.added();
    let ids: Vec<String> = queue.iter().map(|e| e.id.clone()).collect();
    queue.mark_drained();
    ids
}

fn reroute_appeared<E: SimulationEngine + 'static>(
    ctx: &InstanceContext<E>,
    appeared: Vec<String>,
    hazards: Vec<Hazard>,
) {
    if appeared.is_empty() {
        return;
    }

    debug!(instance = %ctx.instance_id(), vehicles = appeared.len(), "Rerouting appeared vehicles");
    // 需要在重新路由之后规划，整体放到仿真线程执行
    ctx.enqueue(move |sim| {
        for id in &appeared {
            if let Err(e) = sim.engine.reroute(id) {
                debug!(vehicle = %id, error = %e, "Reroute skipped");
                continue;
            }
            let outcome = plan_stop(&sim.engine, id, &hazards)
                .and_then(|plan| apply_stop_plan(&mut sim.engine, id, plan));
            if let Err(e) = outcome {
                debug!(vehicle = %id, error = %e, "Stop planning skipped");
            }
        }
    });
}

fn plan_stops_for_all<E: SimulationEngine + 'static>(ctx: &InstanceContext<E>, hazards: &[Hazard]) {
    let plans: Vec<(String, StopPlan)> = {
        let sim = ctx.lock_sim();
        sim.engine
            .vehicle_ids()
            .into_iter()
            .filter_map(|id| match plan_stop(&sim.engine, &id, hazards) {
                Ok(StopPlan::Keep) => None,
                Ok(plan) => Some((id, plan)),
                Err(e) => {
                    debug!(vehicle = %id, error = %e, "Stop planning skipped");
                    None
                }
            })
            .collect()
    };
    if plans.is_empty() {
        return;
    }

    info!(instance = %ctx.instance_id(), vehicles = plans.len(), "Stops planned");
    InstanceStats::add(&ctx.stats().stops_planned, plans.len() as u64);
    ctx.enqueue(move |sim| {
        for (id, plan) in plans {
            match apply_stop_plan(&mut sim.engine, &id, plan) {
                Ok(outcome) => debug!(vehicle = %id, outcome = ?outcome, "Stop plan applied"),
                Err(e) => debug!(vehicle = %id, error = %e, "Stop plan dropped"),
            }
        }
    });
}

// ===== Proximity =====

#[instrument(name = "proximity_task", skip(ctx), fields(instance = %ctx.instance_id()))]
pub fn run_proximity<E: SimulationEngine + 'static>(ctx: Arc<InstanceContext<E>>) {
    let every = interval(ctx.config().controller.proximity_interval_secs);
    let mut ledger = BrakeLedger::new();
    run_periodic(&ctx, "proximity", every, |ctx| {
        proximity_once(ctx, &mut ledger);
    });
}

/// Brake or remove moving vehicles near a hazard, in batches
pub fn proximity_once<E: SimulationEngine + 'static>(
    ctx: &InstanceContext<E>,
    ledger: &mut BrakeLedger,
) -> ProximitySweep {
    let hazards = ctx.hazards().snapshot();
    if hazards.is_empty() {
        return ProximitySweep::default();
    }

    let ids = ctx.lock_sim().engine.vehicle_ids();
    let mut sweep = ProximitySweep::default();
    let batches = ids.len().div_ceil(PROXIMITY_BATCH);
    for (index, batch) in ids.chunks(PROXIMITY_BATCH).enumerate() {
        if !ctx.is_running() {
            break;
        }
        let states: Vec<_> = {
            let sim = ctx.lock_sim();
            batch
                .iter()
                .filter_map(|id| sim.engine.vehicle_state(id).ok())
                .collect()
        };

        let actions: Vec<(String, ProximityAction)> = states
            .into_iter()
            .filter_map(|state| {
                proximity(&state.position, state.speed, &hazards)
                    .map(|p| (state.id.clone(), ledger.action(&state.id, p)))
            })
            .collect();
        for (id, action) in &actions {
            match action {
                ProximityAction::Remove => {
                    sweep.removed += 1;
                    info!(vehicle = %id, "Emergency removal near hazard");
                }
                ProximityAction::Brake => {
                    sweep.braked += 1;
                    info!(vehicle = %id, brakes = ledger.count(id), "Emergency brake near hazard");
                }
            }
        }
        if !actions.is_empty() {
            ctx.enqueue(move |sim| {
                for (id, action) in actions {
                    let result = match action {
                        ProximityAction::Remove => sim.engine.remove_vehicle(&id),
                        ProximityAction::Brake => sim
                            .engine
                            .set_speed(&id, 0.0)
                            .and_then(|()| sim.engine.set_acceleration(&id, 0.0, BRAKE_HOLD)),
                    };
                    if let Err(e) = result {
                        debug!(vehicle = %id, error = %e, "Proximity action skipped");
                    }
                }
            });
        }

        if index + 1 < batches {
            ctx.sleep_while_running(BATCH_PAUSE);
        }
    }

    let dropped = ctx.hazards().dedup();
    if dropped > 0 {
        debug!(instance = %ctx.instance_id(), dropped, "Duplicate hazards dropped");
    }
    InstanceStats::add(&ctx.stats().vehicles_removed, sweep.removed as u64);
    InstanceStats::add(&ctx.stats().vehicles_braked, sweep.braked as u64);
    sweep
}

// ===== Navigation Completion =====

#[instrument(name = "nav_stop_task", skip(ctx), fields(instance = %ctx.instance_id()))]
pub fn run_nav_stop<E: SimulationEngine + 'static>(ctx: Arc<InstanceContext<E>>) {
    let every = interval(ctx.config().controller.nav_stop_interval_secs);
    let mut gate = EventGate::new();
    run_periodic(&ctx, "nav_stop", every, |ctx| {
        nav_stop_once(ctx, &mut gate);
    });
}

/// Queue removal of finished egos; returns the egos queued
pub fn nav_stop_once<E: SimulationEngine + 'static>(
    ctx: &InstanceContext<E>,
    gate: &mut EventGate,
) -> Vec<String> {
    let gone: Vec<String> = {
        let mut tracker = ctx.tracker();
        let queue = tracker.removed();
        let ids: Vec<String> = queue.iter().map(|e| e.id.clone()).collect();
        queue.mark_drained();
        ids
    };
    let event = ctx
        .read_document::<ControlEvent>(keys::CONTROL_EVENT)
        .filter(|event| gate.admit(&event.time_stamp));

    let mut finished: Vec<String> = Vec::new();
    {
        let sim = ctx.lock_sim();
        for id in gone {
            if sim.vehicles.is_tracked_ego(&id) {
                finished.push(id);
            }
        }

        for ego in sim.vehicles.ego_ids() {
            let Some((lane_id, lane_pos)) = sim.vehicles.ego_stop_point(ego) else {
                continue;
            };
            let Ok(state) = sim.engine.vehicle_state(ego) else {
                continue;
            };
            if state.lane_id == lane_id && (state.lane_pos - lane_pos).abs() <= ARRIVAL_TOLERANCE {
                info!(ego = %ego, lane = %lane_id, "Ego reached its destination");
                finished.push(ego.clone());
            }
        }

        if let Some(event) = &event {
            for entity in &event.actors {
                if let Some(ego) = sim.vehicles.ego_for_entity(entity) {
                    info!(ego = %ego, entity = %entity, "Navigation cancelled");
                    finished.push(ego.to_string());
                }
            }
        }
    }

    let mut seen = HashSet::new();
    finished.retain(|ego| seen.insert(ego.clone()));
    if finished.is_empty() {
        return finished;
    }

    InstanceStats::add(&ctx.stats().egos_removed, finished.len() as u64);
    let queued = finished.clone();
    ctx.enqueue(move |sim| {
        for ego in &queued {
            sim.remove_ego(ego);
        }
    });
    finished
}
