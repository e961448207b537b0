//! Stop planning in front of hazards
//!
//! Planning only reads the engine and runs on the controller thread; the
//! resulting [`StopPlan`] is applied later by a queued command on the
//! simulation thread, where the engine may reject a stop the vehicle has
//! since passed.

use contracts::{Hazard, StopPoint};
use sim_engine::{Result, SimulationEngine, VehicleState};
use tracing::debug;

/// Stop duration (s)
pub const STOP_DURATION: f64 = 3600.0;
/// Minimum distance kept between a stop and a hazard edge (m)
pub const BASE_SAFETY_GAP: f64 = 80.0;
/// Closest a stop may be placed ahead of the vehicle (m)
pub const MIN_STOP_DISTANCE: f64 = 20.0;
/// Room for a lane change before the stop (m)
pub const LANE_CHANGE_DISTANCE: f64 = 100.0;

const REACTION_TIME: f64 = 2.0;
const DECELERATION: f64 = 2.0;
/// Stops are kept this far from the end of a lane (m)
const LANE_END_MARGIN: f64 = 5.0;
/// A stop this close ahead counts as already passed (m)
const PASSED_TOLERANCE: f64 = 1.0;

/// `max(80, v·2 + v²/4 + 100)`
pub fn safety_gap(speed: f64) -> f64 {
    let braking = speed * REACTION_TIME + speed * speed / (2.0 * DECELERATION);
    BASE_SAFETY_GAP.max(braking + LANE_CHANGE_DISTANCE)
}

/// What to do with one vehicle given the current hazards
#[derive(Debug, Clone, PartialEq)]
pub enum StopPlan {
    /// No hazard ahead, or an equivalent stop is already set
    Keep,
    /// Inside a danger zone, or the stop would be behind the vehicle
    Remove,
    /// Nothing usable: halt where it is
    Halt,
    /// Resume if halted, slow to `speed`, insert the first accepted candidate
    Stop {
        candidates: Vec<StopPoint>,
        speed: f64,
        resume: bool,
    },
}

/// Result of applying a [`StopPlan`]
#[derive(Debug, Clone, PartialEq)]
pub enum StopOutcome {
    Unchanged,
    Removed,
    Halted,
    Stopped(StopPoint),
}

/// Plan a stop for `vehicle_id` in front of the nearest hazards on its route
pub fn plan_stop<E: SimulationEngine>(
    engine: &E,
    vehicle_id: &str,
    hazards: &[Hazard],
) -> Result<StopPlan> {
    let state = engine.vehicle_state(vehicle_id)?;
    if hazards
        .iter()
        .any(|h| state.position.distance(h.center()) <= h.radius)
    {
        return Ok(StopPlan::Remove);
    }

    let gap = safety_gap(state.speed);
    let route = state.remaining_route();
    let mut candidates: Vec<(StopPoint, f64)> = Vec::new();

    for hazard in hazards {
        let Some(offset) = route.iter().position(|e| *e == hazard.road.edge_id) else {
            continue;
        };
        let target = if offset == 0 {
            if hazard.road.lane_pos <= state.lane_pos {
                // 危险点已在车后
                return Ok(StopPlan::Keep);
            }
            same_edge_target(engine, &state, route, hazard, gap)?
        } else {
            later_edge_target(engine, route, offset, hazard, gap)?
        };
        let Some((edge_id, pos)) = target else {
            continue;
        };

        for lane_index in 0..engine.edge_lane_count(&edge_id)? {
            candidates.push((
                StopPoint {
                    edge_id: edge_id.clone(),
                    pos,
                    lane_index,
                    duration: STOP_DURATION,
                },
                hazard.radius + gap,
            ));
        }
    }

    if candidates.is_empty() {
        return Ok(StopPlan::Keep);
    }

    let existing = engine.next_stops(vehicle_id)?;
    let mut usable = Vec::new();
    for (stop, tolerance) in candidates {
        let Some(offset) = route.iter().position(|e| *e == stop.edge_id) else {
            continue;
        };
        if offset == 0 && stop.pos <= state.lane_pos + PASSED_TOLERANCE {
            if usable.is_empty() {
                return Ok(StopPlan::Remove);
            }
            break;
        }
        let already_set = existing
            .iter()
            .any(|s| s.edge_id == stop.edge_id && (s.pos - stop.pos).abs() <= tolerance);
        if already_set {
            if usable.is_empty() {
                return Ok(StopPlan::Keep);
            }
            break;
        }
        usable.push(stop);
    }

    if usable.is_empty() {
        return Ok(StopPlan::Halt);
    }
    Ok(StopPlan::Stop {
        candidates: usable,
        speed: state.speed * 0.5,
        resume: engine.is_stopped(vehicle_id)?,
    })
}

/// Hazard on the current edge: stop short of it but at least
/// [`MIN_STOP_DISTANCE`] ahead, spilling onto the next edge near the lane end
fn same_edge_target<E: SimulationEngine>(
    engine: &E,
    state: &VehicleState,
    route: &[String],
    hazard: &Hazard,
    gap: f64,
) -> Result<Option<(String, f64)>> {
    let pos = hazard.road.lane_pos - hazard.radius - gap;
    if pos > state.lane_pos + MIN_STOP_DISTANCE {
        return Ok(Some((state.edge_id.clone(), pos)));
    }

    let pos = state.lane_pos + MIN_STOP_DISTANCE;
    let lane_length = engine.lane_length(&state.lane_id)?;
    if pos < lane_length - LANE_END_MARGIN {
        return Ok(Some((state.edge_id.clone(), pos)));
    }
    match route.get(1) {
        Some(next) => {
            let next_length = engine.edge_length(next)?;
            Ok(Some((next.clone(), (next_length - gap).max(0.0))))
        }
        None => Ok(None),
    }
}

/// Hazard further along the route: stop on its edge, or on the edge before
/// when the gap does not fit
fn later_edge_target<E: SimulationEngine>(
    engine: &E,
    route: &[String],
    offset: usize,
    hazard: &Hazard,
    gap: f64,
) -> Result<Option<(String, f64)>> {
    let pos = hazard.road.lane_pos - hazard.radius - gap;
    if pos < 0.0 {
        let previous = &route[offset - 1];
        let previous_length = engine.edge_length(previous)?;
        return Ok(Some((
            previous.clone(),
            (previous_length + pos).max(MIN_STOP_DISTANCE),
        )));
    }

    let edge_length = engine.edge_length(&hazard.road.edge_id)?;
    let pos = pos.min(edge_length - LANE_END_MARGIN);
    if pos < MIN_STOP_DISTANCE {
        return Ok(None);
    }
    Ok(Some((hazard.road.edge_id.clone(), pos)))
}

/// Apply a plan on the simulation thread
pub fn apply_stop_plan<E: SimulationEngine>(
    engine: &mut E,
    vehicle_id: &str,
    plan: StopPlan,
) -> Result<StopOutcome> {
    match plan {
        StopPlan::Keep => Ok(StopOutcome::Unchanged),
        StopPlan::Remove => {
            engine.remove_vehicle(vehicle_id)?;
            Ok(StopOutcome::Removed)
        }
        StopPlan::Halt => {
            engine.set_speed(vehicle_id, 0.0)?;
            Ok(StopOutcome::Halted)
        }
        StopPlan::Stop {
            candidates,
            speed,
            resume,
        } => {
            if resume {
                if let Err(e) = engine.resume(vehicle_id) {
                    debug!(vehicle = vehicle_id, error = %e, "Resume before restop failed");
                }
            }
            engine.set_speed(vehicle_id, speed)?;
            for stop in candidates {
                match engine.insert_stop(vehicle_id, &stop) {
                    Ok(()) => return Ok(StopOutcome::Stopped(stop)),
                    Err(e) => debug!(
                        vehicle = vehicle_id,
                        edge = %stop.edge_id,
                        pos = stop.pos,
                        lane = stop.lane_index,
                        error = %e,
                        "Stop candidate rejected"
                    ),
                }
            }
            engine.set_speed(vehicle_id, 0.0)?;
            Ok(StopOutcome::Halted)
        }
    }
}
