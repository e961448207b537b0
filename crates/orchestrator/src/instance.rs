//! Instance lifecycle: spawn the task threads, stop them, collect a report

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use contracts::InstanceConfig;
use serde::Serialize;
use sim_engine::{
    MockEngine, MockRoutePlanner, Simulation, SimulationEngine, VehicleManager, VehicleTypes,
};
use store::ConnectionPool;
use tracing::{error, info, instrument};

use crate::context::{InstanceContext, RunOptions, StatsSnapshot};
use crate::error::{OrchestratorError, Result};
use crate::tasks::{self, SimulationSummary};

/// Context over the in-process engine, seeded from the instance's mock settings
pub fn mock_context(
    config: InstanceConfig,
    options: RunOptions,
    pool: Arc<ConnectionPool>,
) -> InstanceContext<MockEngine> {
    let engine = MockEngine::new(&config.mock);
    let planner = Arc::new(MockRoutePlanner::new(engine.network().clone()));
    let vehicles = VehicleManager::new(config.mock.seed, VehicleTypes::default());
    InstanceContext::new(config, options, Simulation::new(engine, vehicles), pool, planner)
}

/// What an instance reports once every task has ended
#[derive(Debug, Clone)]
pub struct InstanceReport {
    pub instance_id: String,
    pub simulation: SimulationSummary,
    pub frames_collected: u64,
    pub stats: StatsSnapshot,
}

/// Flat form of [`InstanceReport`] for JSON output
#[derive(Debug, Clone, Serialize)]
pub struct ReportRecord {
    pub instance_id: String,
    pub frames: u64,
    pub frames_collected: u64,
    pub step_timeouts: u64,
    pub commands_executed: u64,
    pub mean_frame_ms: f64,
    pub vehicle_count: Option<usize>,
    pub simulation_time: Option<f64>,
    pub stats: StatsSnapshot,
}

impl From<&InstanceReport> for ReportRecord {
    fn from(report: &InstanceReport) -> Self {
        let timing = &report.simulation.timing;
        Self {
            instance_id: report.instance_id.clone(),
            frames: report.simulation.frames,
            frames_collected: report.frames_collected,
            step_timeouts: timing.step_timeouts,
            commands_executed: timing.commands_executed,
            mean_frame_ms: timing.frame_time_ms.mean,
            vehicle_count: report.simulation.vehicle_count,
            simulation_time: report.simulation.simulation_time,
            stats: report.stats.clone(),
        }
    }
}

type TaskBody<E> = fn(Arc<InstanceContext<E>>);

/// Running instance
///
/// Dropping the handle without [`InstanceHandle::join`] leaves the threads
/// running until [`InstanceHandle::stop`] or the frame limit ends them.
pub struct InstanceHandle<E> {
    ctx: Arc<InstanceContext<E>>,
    simulation: JoinHandle<Result<SimulationSummary>>,
    collector: JoinHandle<Result<u64>>,
    controllers: Vec<(String, JoinHandle<()>)>,
}

impl<E> std::fmt::Debug for InstanceHandle<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceHandle")
            .field("ctx", &self.ctx)
            .field("controllers", &self.controllers.len())
            .finish()
    }
}

/// Start every task of one instance on its own named thread.
///
/// The simulation, collector, navigate, hazard, proximity and nav-stop tasks
/// always run; the map service only with `run_hdmap`.
#[instrument(name = "instance_spawn", skip(ctx), fields(instance = %ctx.instance_id()))]
pub fn spawn_instance<E>(ctx: Arc<InstanceContext<E>>) -> Result<InstanceHandle<E>>
where
    E: SimulationEngine + 'static,
{
    let simulation = spawn_task(&ctx, "simulation", |ctx| {
        // 仿真线程无论如何结束都要让其它任务退出
        let _stop = StopOnExit(ctx.clone());
        tasks::run_simulation(ctx)
    })?;
    let collector = spawn_task(&ctx, "collector", tasks::run_collector)?;

    let mut bodies: Vec<(&str, TaskBody<E>)> = vec![
        ("navigate", tasks::run_navigate as TaskBody<E>),
        ("hazard", tasks::run_hazard as TaskBody<E>),
        ("proximity", tasks::run_proximity as TaskBody<E>),
        ("nav-stop", tasks::run_nav_stop as TaskBody<E>),
    ];
    if ctx.config().run_hdmap {
        bodies.push(("map-service", tasks::run_map_service as TaskBody<E>));
    }
    let mut controllers = Vec::with_capacity(bodies.len());
    for (task, body) in bodies {
        let handle = spawn_task(&ctx, task, body)?;
        controllers.push((task.to_string(), handle));
    }

    info!(
        instance = %ctx.instance_id(),
        tasks = controllers.len() + 2,
        "Instance started"
    );
    Ok(InstanceHandle {
        ctx,
        simulation,
        collector,
        controllers,
    })
}

fn spawn_task<E, T, F>(ctx: &Arc<InstanceContext<E>>, task: &str, body: F) -> Result<JoinHandle<T>>
where
    E: SimulationEngine + 'static,
    T: Send + 'static,
    F: FnOnce(Arc<InstanceContext<E>>) -> T + Send + 'static,
{
    let name = format!("{}-{task}", ctx.instance_id());
    let task_ctx = Arc::clone(ctx);
    thread::Builder::new()
        .name(name.clone())
        .spawn(move || body(task_ctx))
        .map_err(|source| {
            // 已启动的任务自行退出
            ctx.stop();
            OrchestratorError::Spawn { name, source }
        })
}

struct StopOnExit<E: Send + 'static>(Arc<InstanceContext<E>>);

impl<E: Send + 'static> Drop for StopOnExit<E> {
    fn drop(&mut self) {
        self.0.stop();
    }
}

impl<E: SimulationEngine + 'static> InstanceHandle<E> {
    pub fn context(&self) -> &Arc<InstanceContext<E>> {
        &self.ctx
    }

    pub fn instance_id(&self) -> &str {
        self.ctx.instance_id()
    }

    /// Ask every task to finish; [`InstanceHandle::join`] waits for them
    pub fn stop(&self) {
        self.ctx.stop();
    }

    /// True once the simulation task has ended
    pub fn is_finished(&self) -> bool {
        self.simulation.is_finished()
    }

    /// Wait for every task and release the instance's store connector.
    ///
    /// A simulation failure is returned after the other tasks were joined.
    #[instrument(name = "instance_join", skip(self), fields(instance = %self.ctx.instance_id()))]
    pub fn join(self) -> Result<InstanceReport> {
        let Self {
            ctx,
            simulation,
            collector,
            controllers,
        } = self;
        let instance_id = ctx.instance_id().to_string();

        let simulation = join_task(&instance_id, "simulation", simulation);
        ctx.stop();
        let collected = join_task(&instance_id, "collector", collector);

        let mut panicked = None;
        for (task, handle) in controllers {
            if handle.join().is_err() {
                error!(instance = %instance_id, task = %task, "Controller task panicked");
                panicked.get_or_insert(format!("{instance_id}-{task}"));
            }
        }
        ctx.pool().release(&instance_id);

        let simulation = simulation?;
        let frames_collected = collected?;
        if let Some(name) = panicked {
            return Err(OrchestratorError::TaskPanicked { name });
        }

        let report = InstanceReport {
            instance_id,
            simulation,
            frames_collected,
            stats: StatsSnapshot::from(ctx.stats()),
        };
        info!(
            instance = %report.instance_id,
            frames = report.simulation.frames,
            collected = report.frames_collected,
            "Instance finished"
        );
        Ok(report)
    }
}

fn join_task<T>(instance_id: &str, task: &str, handle: JoinHandle<Result<T>>) -> Result<T> {
    handle.join().map_err(|_| {
        error!(instance = %instance_id, task = task, "Task panicked");
        OrchestratorError::TaskPanicked {
            name: format!("{instance_id}-{task}"),
        }
    })?
}
