//! ConnectionPool - per-instance connector lifecycle
//!
//! A connector lives either in the active map (at most one per instance
//! ID) or in the idle list, never both; every transfer happens under the
//! pool lock. Liveness pings and connects run outside the lock.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use contracts::{PoolConfig, StoreConfig};
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use tracing::{debug, info, instrument, warn};

use crate::backoff::{Sleeper, ThreadSleeper};
use crate::{lock, RedirectLog, Result, StoreConnector, StoreError};

#[derive(Debug, Default)]
struct PoolState {
    active: HashMap<String, Arc<StoreConnector>>,
    idle: VecDeque<Arc<StoreConnector>>,
}

impl PoolState {
    fn report(&self) {
        observability::record_pool_connectors(self.active.len(), self.idle.len());
    }
}

/// Sizes of the two pool sides
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub active: usize,
    pub idle: usize,
}

#[derive(Debug)]
struct Janitor {
    shutdown: Sender<()>,
    handle: JoinHandle<()>,
}

/// Active/idle pool of store connectors keyed by instance ID
pub struct ConnectionPool {
    store: Arc<StoreConfig>,
    config: PoolConfig,
    state: Arc<Mutex<PoolState>>,
    redirects: Arc<RedirectLog>,
    sleeper: Arc<dyn Sleeper>,
    janitor: Mutex<Option<Janitor>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("store", &format_args!("{}:{}", self.store.host, self.store.port))
            .field("stats", &self.stats())
            .finish()
    }
}

impl ConnectionPool {
    /// Create the pool and start its janitor thread
    pub fn new(store: StoreConfig, config: PoolConfig) -> Result<Self> {
        Self::with_sleeper(store, config, Arc::new(ThreadSleeper))
    }

    /// Same as [`ConnectionPool::new`] with a custom reconnect sleeper
    pub fn with_sleeper(
        store: StoreConfig,
        config: PoolConfig,
        sleeper: Arc<dyn Sleeper>,
    ) -> Result<Self> {
        let state = Arc::new(Mutex::new(PoolState::default()));
        let janitor = spawn_janitor(state.clone(), config.idle_ttl(), config.sweep_interval())?;
        info!(
            host = %store.host,
            port = store.port,
            idle_ttl_secs = config.idle_ttl_secs,
            "Connection pool started"
        );
        Ok(Self {
            store: Arc::new(store),
            config,
            state,
            redirects: Arc::new(RedirectLog::new()),
            sleeper,
            janitor: Mutex::new(Some(janitor)),
            closed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Connector for `id`: the active one, else a live idle one promoted,
    /// else a freshly connected one. `None` when nothing can reach the store.
    #[instrument(name = "pool_get_connector", skip(self))]
    pub fn get_connector(&self, id: &str) -> Option<Arc<StoreConnector>> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        if let Some(active) = lock(&self.state).active.get(id) {
            return Some(active.clone());
        }

        loop {
            let candidate = lock(&self.state).idle.pop_front();
            let Some(candidate) = candidate else {
                break;
            };
            if candidate.ping() {
                debug!(instance = id, "Promoting idle connector");
                return Some(self.promote(id, candidate));
            }
            debug!(instance = id, "Idle connector failed ping, closing");
            candidate.close();
        }

        let connector = Arc::new(StoreConnector::new(
            id,
            self.store.clone(),
            self.redirects.clone(),
            self.sleeper.clone(),
        ));
        if !connector.connect() {
            warn!(instance = id, "No store connection available, skipping");
            return None;
        }
        if let Err(e) = connector.start_heartbeat() {
            warn!(instance = id, error = %e, "Heartbeat not started");
        }
        Some(self.promote(id, connector))
    }

    /// Insert under the lock; a connector that lost the race goes idle
    fn promote(&self, id: &str, connector: Arc<StoreConnector>) -> Arc<StoreConnector> {
        let mut state = lock(&self.state);
        let chosen = match state.active.get(id) {
            Some(existing) => {
                let existing = existing.clone();
                state.idle.push_back(connector);
                existing
            }
            None => {
                state.active.insert(id.to_string(), connector.clone());
                connector
            }
        };
        state.report();
        chosen
    }

    /// Move the active connector for `id` to the idle list (no-op if absent)
    pub fn release(&self, id: &str) {
        let mut state = lock(&self.state);
        if let Some(connector) = state.active.remove(id) {
            state.idle.push_back(connector);
            state.report();
            debug!(instance = id, "Connector released to idle list");
        }
    }

    /// `SET "{id}:{key}"`; `false` when no connector is available
    pub fn write_to_store(&self, id: &str, key: &str, value: &str) -> bool {
        let full_key = namespaced_key(id, key);
        match self.get_connector(id) {
            Some(connector) => connector.set(&full_key, value),
            None => false,
        }
    }

    /// `GET "{id}:{key}"`
    pub fn read_from_store(&self, id: &str, key: &str) -> Option<String> {
        let full_key = namespaced_key(id, key);
        self.get_connector(id)?.get(&full_key)
    }

    pub fn stats(&self) -> PoolStats {
        let state = lock(&self.state);
        PoolStats {
            active: state.active.len(),
            idle: state.idle.len(),
        }
    }

    /// Close idle connectors unused longer than the TTL
    pub fn sweep_idle(&self) -> usize {
        sweep(&self.state, self.config.idle_ttl())
    }

    /// Stop the janitor, then close every connector
    #[instrument(name = "pool_shutdown", skip(self))]
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(janitor) = lock(&self.janitor).take() {
            drop(janitor.shutdown);
            let _ = janitor.handle.join();
        }

        let connectors: Vec<Arc<StoreConnector>> = {
            let mut state = lock(&self.state);
            let mut all: Vec<_> = state.active.drain().map(|(_, c)| c).collect();
            all.extend(state.idle.drain(..));
            state.report();
            all
        };
        let count = connectors.len();
        for connector in connectors {
            connector.close();
        }
        info!(closed = count, "Connection pool shut down");
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// `"{id}:{key}"`, or `key` alone for an empty id
pub fn namespaced_key(id: &str, key: &str) -> String {
    if id.is_empty() {
        key.to_string()
    } else {
        format!("{id}:{key}")
    }
}

fn sweep(state: &Mutex<PoolState>, ttl: Duration) -> usize {
    let expired: Vec<Arc<StoreConnector>> = {
        let mut state = lock(state);
        let (expired, kept): (Vec<_>, Vec<_>) = state
            .idle
            .drain(..)
            .partition(|c| c.idle_for() > ttl);
        state.idle = kept.into();
        if !expired.is_empty() {
            state.report();
        }
        expired
    };
    let count = expired.len();
    for connector in expired {
        debug!(connector = %connector.name(), "Closing expired idle connector");
        connector.close();
    }
    count
}

fn spawn_janitor(
    state: Arc<Mutex<PoolState>>,
    ttl: Duration,
    period: Duration,
) -> Result<Janitor> {
    let (tx, rx) = bounded::<()>(1);
    let handle = thread::Builder::new()
        .name("store-pool-janitor".into())
        .spawn(move || loop {
            match rx.recv_timeout(period) {
                Err(RecvTimeoutError::Timeout) => {
                    sweep(&state, ttl);
                }
                _ => break,
            }
        })
        .map_err(|source| StoreError::Spawn {
            name: "store-pool-janitor".into(),
            source,
        })?;
    Ok(Janitor {
        shutdown: tx,
        handle,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ConnectorState, MockStoreServer, RecordingSleeper};

    fn pool_for(server: &MockStoreServer, pool: PoolConfig) -> ConnectionPool {
        let store = StoreConfig {
            host: "127.0.0.1".into(),
            port: server.port(),
            retry_count: 2,
            ..StoreConfig::default()
        };
        ConnectionPool::with_sleeper(store, pool, Arc::new(RecordingSleeper::new())).unwrap()
    }

    #[test]
    fn test_namespaced_key() {
        assert_eq!(namespaced_key("XD", "TrafficFlow"), "XD:TrafficFlow");
        assert_eq!(namespaced_key("", "TrafficFlow"), "TrafficFlow");
    }

    #[test]
    fn test_get_connector_reuses_active() {
        let server = MockStoreServer::start().unwrap();
        let pool = pool_for(&server, PoolConfig::default());
        let a = pool.get_connector("XD").unwrap();
        let b = pool.get_connector("XD").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(pool.stats(), PoolStats { active: 1, idle: 0 });
    }

    #[test]
    fn test_release_and_promote_idle() {
        let server = MockStoreServer::start().unwrap();
        let pool = pool_for(&server, PoolConfig::default());
        let first = pool.get_connector("A").unwrap();
        pool.release("A");
        assert_eq!(pool.stats(), PoolStats { active: 0, idle: 1 });

        // 另一个实例复用空闲连接
        let second = pool.get_connector("B").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(pool.stats(), PoolStats { active: 1, idle: 0 });
    }

    #[test]
    fn test_release_absent_is_noop() {
        let server = MockStoreServer::start().unwrap();
        let pool = pool_for(&server, PoolConfig::default());
        pool.release("nobody");
        assert_eq!(pool.stats(), PoolStats::default());
    }

    #[test]
    fn test_unreachable_store_returns_none() {
        let server = MockStoreServer::start().unwrap();
        server.set_refuse(true);
        let pool = pool_for(&server, PoolConfig::default());
        assert!(pool.get_connector("XD").is_none());
        assert!(!pool.write_to_store("XD", "status", "true"));
        assert_eq!(pool.stats(), PoolStats::default());
    }

    #[test]
    fn test_write_and_read_namespaced() {
        let server = MockStoreServer::start().unwrap();
        let pool = pool_for(&server, PoolConfig::default());
        assert!(pool.write_to_store("XD", "status", "true"));
        assert_eq!(server.value("XD:status").as_deref(), Some("true"));
        assert_eq!(pool.read_from_store("XD", "status").as_deref(), Some("true"));
    }

    #[test]
    fn test_janitor_evicts_expired_idle() {
        let server = MockStoreServer::start().unwrap();
        let pool = pool_for(
            &server,
            PoolConfig {
                idle_ttl_secs: 0.05,
                sweep_interval_ms: 10,
            },
        );
        let connector = pool.get_connector("XD").unwrap();
        pool.release("XD");

        thread::sleep(Duration::from_millis(300));
        assert_eq!(pool.stats(), PoolStats::default());
        assert_eq!(connector.state(), ConnectorState::Disconnected);
    }

    #[test]
    fn test_shutdown_closes_everything() {
        let server = MockStoreServer::start().unwrap();
        let pool = pool_for(&server, PoolConfig::default());
        let a = pool.get_connector("A").unwrap();
        let b = pool.get_connector("B").unwrap();
        pool.release("B");

        pool.shutdown();
        assert_eq!(pool.stats(), PoolStats::default());
        assert_eq!(a.state(), ConnectorState::Disconnected);
        assert_eq!(b.state(), ConnectorState::Disconnected);
        assert!(pool.get_connector("A").is_none());
    }
}
