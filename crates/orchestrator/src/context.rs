//! State shared by the tasks of one instance

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use change_tracker::ChangeTracker;
use contracts::InstanceConfig;
use frame_sync::{lock_unpoisoned, FrameCoordinator};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sim_engine::{RoutePlanner, Simulation};
use store::{ConnectionPool, ConnectorState};
use tracing::{debug, warn};

use crate::hazard::HazardBook;
use crate::mailbox::RouteMailbox;

/// Longest uninterrupted sleep; bounds how late a task notices shutdown
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Run limits
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Stop the instance after this many frames
    pub max_frames: Option<u64>,
}

/// Per-instance counters
#[derive(Debug, Default)]
pub struct InstanceStats {
    pub documents_written: AtomicU64,
    pub write_failures: AtomicU64,
    pub vehicles_removed: AtomicU64,
    pub vehicles_braked: AtomicU64,
    pub stops_planned: AtomicU64,
    pub egos_registered: AtomicU64,
    pub egos_removed: AtomicU64,
    pub hazards_recorded: AtomicU64,
    pub routes_planned: AtomicU64,
}

impl InstanceStats {
    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }
}

/// Plain copy of [`InstanceStats`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub documents_written: u64,
    pub write_failures: u64,
    pub vehicles_removed: u64,
    pub vehicles_braked: u64,
    pub stops_planned: u64,
    pub egos_registered: u64,
    pub egos_removed: u64,
    pub hazards_recorded: u64,
    pub routes_planned: u64,
}

impl From<&InstanceStats> for StatsSnapshot {
    fn from(stats: &InstanceStats) -> Self {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        Self {
            documents_written: get(&stats.documents_written),
            write_failures: get(&stats.write_failures),
            vehicles_removed: get(&stats.vehicles_removed),
            vehicles_braked: get(&stats.vehicles_braked),
            stops_planned: get(&stats.stops_planned),
            egos_registered: get(&stats.egos_registered),
            egos_removed: get(&stats.egos_removed),
            hazards_recorded: get(&stats.hazards_recorded),
            routes_planned: get(&stats.routes_planned),
        }
    }
}

/// Everything the four tasks of an instance share
///
/// The simulation is only mutated on the simulation thread: other tasks
/// lock it for reads and push changes through [`InstanceContext::enqueue`].
pub struct InstanceContext<E> {
    config: InstanceConfig,
    options: RunOptions,
    sim: Arc<Mutex<Simulation<E>>>,
    coordinator: FrameCoordinator<Simulation<E>>,
    tracker: Mutex<ChangeTracker>,
    pool: Arc<ConnectionPool>,
    planner: Arc<dyn RoutePlanner>,
    hazards: HazardBook,
    routes: RouteMailbox,
    running: AtomicBool,
    stats: InstanceStats,
}

impl<E> std::fmt::Debug for InstanceContext<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceContext")
            .field("instance_id", &self.config.instance_id)
            .field("coordinator", &self.coordinator)
            .field("running", &self.running.load(Ordering::Acquire))
            .finish()
    }
}

impl<E: Send + 'static> InstanceContext<E> {
    pub fn new(
        config: InstanceConfig,
        options: RunOptions,
        sim: Simulation<E>,
        pool: Arc<ConnectionPool>,
        planner: Arc<dyn RoutePlanner>,
    ) -> Self {
        Self {
            coordinator: FrameCoordinator::new(config.instance_id.clone(), config.max_step_timeouts),
            tracker: Mutex::new(ChangeTracker::new(config.sliding_window_size)),
            config,
            options,
            sim: Arc::new(Mutex::new(sim)),
            pool,
            planner,
            hazards: HazardBook::new(),
            routes: RouteMailbox::new(),
            running: AtomicBool::new(true),
            stats: InstanceStats::default(),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.config.instance_id
    }

    pub fn config(&self) -> &InstanceConfig {
        &self.config
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    pub fn sim(&self) -> &Arc<Mutex<Simulation<E>>> {
        &self.sim
    }

    /// Lock the simulation (reads only outside the simulation thread)
    pub fn lock_sim(&self) -> MutexGuard<'_, Simulation<E>> {
        lock_unpoisoned(&self.sim)
    }

    pub fn coordinator(&self) -> &FrameCoordinator<Simulation<E>> {
        &self.coordinator
    }

    pub fn tracker(&self) -> MutexGuard<'_, ChangeTracker> {
        lock_unpoisoned(&self.tracker)
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn planner(&self) -> &dyn RoutePlanner {
        self.planner.as_ref()
    }

    pub fn hazards(&self) -> &HazardBook {
        &self.hazards
    }

    pub fn routes(&self) -> &RouteMailbox {
        &self.routes
    }

    pub fn stats(&self) -> &InstanceStats {
        &self.stats
    }

    /// Defer a simulation mutation to the next frame
    pub fn enqueue<F>(&self, command: F)
    where
        F: FnOnce(&mut Simulation<E>) + Send + 'static,
    {
        self.coordinator.enqueue(command);
    }

    // ===== Lifecycle =====

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Ask every task to wind down; wakes tasks blocked on the init latch
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            debug!(instance = %self.config.instance_id, "Stop requested");
        }
        self.coordinator.set_init(true);
    }

    /// Sleep `duration` in short slices; returns false once stopped
    pub fn sleep_while_running(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        while self.is_running() {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return true;
            }
            thread::sleep(left.min(SLEEP_SLICE));
        }
        false
    }

    // ===== Store =====

    /// True when the instance's connector is connected
    pub fn store_ready(&self) -> bool {
        self.pool
            .get_connector(&self.config.instance_id)
            .is_some_and(|c| c.state() == ConnectorState::Connected)
    }

    /// Read and decode a JSON document; `None` when absent or malformed
    pub fn read_document<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let text = self.pool.read_from_store(&self.config.instance_id, key)?;
        if text.is_empty() {
            return None;
        }
        match serde_json::from_str(&text) {
            Ok(doc) => Some(doc),
            Err(e) => {
                warn!(instance = %self.config.instance_id, key = key, error = %e, "Malformed document");
                None
            }
        }
    }

    /// Encode and write a JSON document
    pub fn write_document<T: Serialize>(&self, key: &str, doc: &T) -> bool {
        match serde_json::to_string(doc) {
            Ok(text) => self.write_raw(key, &text),
            Err(e) => {
                warn!(instance = %self.config.instance_id, key = key, error = %e, "Failed to encode document");
                false
            }
        }
    }

    pub fn write_raw(&self, key: &str, value: &str) -> bool {
        let ok = self
            .pool
            .write_to_store(&self.config.instance_id, key, value);
        let counter = if ok {
            &self.stats.documents_written
        } else {
            &self.stats.write_failures
        };
        InstanceStats::add(counter, 1);
        ok
    }
}
