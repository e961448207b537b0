//! Simulation task
//!
//! 初始化车辆并发布 `status`，随后按帧推进：
//! 每帧带超时地步进引擎并补充车辆，再执行命令队列，最后睡眠补足帧间隔。

use std::sync::{Arc, TryLockError};

use contracts::keys;
use frame_sync::{FrameClock, StepAccumulator, StepError, TimedStepper};
use observability::TimingSummary;
use sim_engine::{Simulation, SimulationEngine};
use tracing::{error, info, instrument, warn};

use crate::context::InstanceContext;
use crate::error::Result;

/// What the simulation task reports when it ends
#[derive(Debug, Clone, Default)]
pub struct SimulationSummary {
    pub frames: u64,
    pub timing: TimingSummary,
    /// Final population, if the engine was not left locked by a hung step
    pub vehicle_count: Option<usize>,
    pub simulation_time: Option<f64>,
}

#[instrument(name = "simulation_task", skip(ctx), fields(instance = %ctx.instance_id()))]
pub fn run_simulation<E>(ctx: Arc<InstanceContext<E>>) -> Result<SimulationSummary>
where
    E: SimulationEngine + 'static,
{
    let config = ctx.config().clone();
    let instance_id = config.instance_id.clone();

    let initial = ctx
        .lock_sim()
        .populate(config.max_vehicles, config.max_vehicles);
    if !ctx.write_raw(keys::STATUS, "true") {
        warn!(instance = %instance_id, "Failed to publish instance status");
    }
    ctx.coordinator().set_init(true);
    info!(instance = %instance_id, vehicles = initial, "Simulation initialized");

    let step_length = config.step_length;
    let frame_dt = config.frame_interval().as_secs_f64();
    let (max_vehicles, add_max) = (config.max_vehicles, config.add_max);
    let mut accumulator = StepAccumulator::new(step_length);
    let mut stepper = TimedStepper::spawn(
        format!("{instance_id}-step"),
        ctx.sim().clone(),
        move |sim: &mut Simulation<E>| -> std::result::Result<(), StepError> {
            for _ in 0..accumulator.advance(frame_dt) {
                sim.step(step_length)?;
            }
            sim.populate(max_vehicles, add_max);
            Ok(())
        },
    )?;

    let mut clock = FrameClock::new(instance_id.clone(), config.frame_rate);
    let mut frames = 0;
    let result = loop {
        if !ctx.is_running() {
            break Ok(());
        }
        match ctx
            .coordinator()
            .run_frame(ctx.sim(), &mut stepper, config.step_timeout())
        {
            Ok(outcome) => {
                frames = outcome.frame_id;
                clock.finish_frame(&outcome);
                if ctx
                    .options()
                    .max_frames
                    .is_some_and(|max| outcome.frame_id >= max)
                {
                    info!(instance = %instance_id, frames, "Frame limit reached");
                    break Ok(());
                }
            }
            Err(e) => {
                error!(instance = %instance_id, error = %e, "Simulation task stopping");
                break Err(e);
            }
        }
    };

    ctx.stop();
    drop(stepper);

    let (vehicle_count, simulation_time) = match ctx.sim().try_lock() {
        Ok(sim) => (Some(sim.engine.vehicle_count()), Some(sim.engine.simulation_time())),
        Err(TryLockError::Poisoned(poisoned)) => {
            let sim = poisoned.into_inner();
            (Some(sim.engine.vehicle_count()), Some(sim.engine.simulation_time()))
        }
        Err(TryLockError::WouldBlock) => (None, None),
    };
    let summary = SimulationSummary {
        frames,
        timing: clock.timing().summary(),
        vehicle_count,
        simulation_time,
    };
    info!(
        instance = %instance_id,
        frames,
        step_timeouts = summary.timing.step_timeouts,
        "Simulation finished"
    );

    result?;
    Ok(summary)
}
