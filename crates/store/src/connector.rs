//! StoreConnector - one resilient logical connection
//!
//! - `set` / `get` ping a stale connection before use
//! - `MOVED` replies are remapped through `ip_map`, followed, and the
//!   command is retried once
//! - `reconnect` is single-flight; losers return `false` immediately
//! - exhausted retries restore the pre-redirect endpoint and leave the
//!   connector `Disconnected`

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use contracts::StoreConfig;
use tracing::{debug, error, info, instrument, warn};

use crate::backoff::{backoff_delay, Sleeper};
use crate::heartbeat::Heartbeat;
use crate::resp::RespValue;
use crate::{lock, Endpoint, Redirect, RedirectLog, RespConnection, Result, StoreError};

/// Connector lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectorState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Reconnecting = 3,
}

impl ConnectorState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Reconnecting,
            _ => Self::Disconnected,
        }
    }
}

/// Counters kept per connector
#[derive(Debug, Default)]
pub struct ConnectorStats {
    pub heartbeat_failures: AtomicU64,
    pub reconnect_successes: AtomicU64,
    pub reconnect_failures: AtomicU64,
    pub redirects: AtomicU64,
}

/// Point-in-time copy of [`ConnectorStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectorStatsSnapshot {
    pub heartbeat_failures: u64,
    pub reconnect_successes: u64,
    pub reconnect_failures: u64,
    pub redirects: u64,
}

impl ConnectorStats {
    pub fn snapshot(&self) -> ConnectorStatsSnapshot {
        ConnectorStatsSnapshot {
            heartbeat_failures: self.heartbeat_failures.load(Ordering::Relaxed),
            reconnect_successes: self.reconnect_successes.load(Ordering::Relaxed),
            reconnect_failures: self.reconnect_failures.load(Ordering::Relaxed),
            redirects: self.redirects.load(Ordering::Relaxed),
        }
    }
}

/// Resilient datastore connection
pub struct StoreConnector {
    name: String,
    config: Arc<StoreConfig>,
    original: Endpoint,
    target: Mutex<Endpoint>,
    stream: Mutex<Option<RespConnection>>,
    state: AtomicU8,
    reconnecting: AtomicBool,
    last_used: Mutex<Instant>,
    redirects: Arc<RedirectLog>,
    sleeper: Arc<dyn Sleeper>,
    heartbeat: Mutex<Option<Heartbeat>>,
    stats: ConnectorStats,
}

impl std::fmt::Debug for StoreConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConnector")
            .field("name", &self.name)
            .field("target", &self.target())
            .field("state", &self.state())
            .finish()
    }
}

impl StoreConnector {
    /// Create a disconnected connector for `config.host:config.port`
    pub fn new(
        name: impl Into<String>,
        config: Arc<StoreConfig>,
        redirects: Arc<RedirectLog>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        let original = Endpoint::new(config.host.clone(), config.port);
        Self {
            name: name.into(),
            target: Mutex::new(original.clone()),
            original,
            config,
            stream: Mutex::new(None),
            state: AtomicU8::new(ConnectorState::Disconnected as u8),
            reconnecting: AtomicBool::new(false),
            last_used: Mutex::new(Instant::now()),
            redirects,
            sleeper,
            heartbeat: Mutex::new(None),
            stats: ConnectorStats::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ConnectorState {
        ConnectorState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ConnectorState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Current target endpoint (differs from the configured one after a redirect)
    pub fn target(&self) -> Endpoint {
        lock(&self.target).clone()
    }

    pub fn stats(&self) -> &ConnectorStats {
        &self.stats
    }

    /// Time since the last successful command
    pub fn idle_for(&self) -> Duration {
        lock(&self.last_used).elapsed()
    }

    fn touch(&self) {
        *lock(&self.last_used) = Instant::now();
    }

    /// Open the first connection and confirm it with `PING`
    #[instrument(name = "store_connect", skip(self), fields(connector = %self.name))]
    pub fn connect(&self) -> bool {
        self.set_state(ConnectorState::Connecting);
        let target = self.target();
        match self.open_verified(&target) {
            Ok(conn) => {
                *lock(&self.stream) = Some(conn);
                self.set_state(ConnectorState::Connected);
                self.touch();
                info!(connector = %self.name, endpoint = %target, "Store connected");
                true
            }
            Err(e) => {
                self.set_state(ConnectorState::Disconnected);
                warn!(connector = %self.name, endpoint = %target, error = %e, "Store connect failed");
                false
            }
        }
    }

    /// Liveness ping on the current stream.
    ///
    /// A failed ping drops the stream and marks the connector `Disconnected`.
    pub fn ping(&self) -> bool {
        let result = {
            let mut guard = lock(&self.stream);
            match guard.as_mut() {
                Some(conn) => conn.ping(),
                None => Err(StoreError::not_connected(self.target().to_string())),
            }
        };
        observability::record_store_op("ping", result.is_ok());
        match result {
            Ok(()) => {
                if self.state() != ConnectorState::Reconnecting {
                    self.set_state(ConnectorState::Connected);
                }
                true
            }
            Err(e) => {
                debug!(connector = %self.name, error = %e, "Liveness ping failed");
                self.mark_disconnected();
                false
            }
        }
    }

    fn mark_disconnected(&self) {
        *lock(&self.stream) = None;
        if self.state() != ConnectorState::Reconnecting {
            self.set_state(ConnectorState::Disconnected);
        }
    }

    /// `SET key value`; `false` on any unrecovered failure
    #[instrument(name = "store_set", skip(self, value), fields(connector = %self.name))]
    pub fn set(&self, key: &str, value: &str) -> bool {
        self.ensure_fresh();
        let ok = match self.execute(&["SET", key, value]) {
            Some(reply) if reply.is_ok() => true,
            Some(reply) => {
                warn!(connector = %self.name, key = key, reply = ?reply, "Unexpected SET reply");
                false
            }
            None => false,
        };
        observability::record_store_op("set", ok);
        ok
    }

    /// `GET key`, whitespace-trimmed; `None` when absent or on failure
    #[instrument(name = "store_get", skip(self), fields(connector = %self.name))]
    pub fn get(&self, key: &str) -> Option<String> {
        self.ensure_fresh();
        let reply = self.execute(&["GET", key]);
        observability::record_store_op("get", reply.is_some());
        match reply? {
            RespValue::Bulk(None) => None,
            RespValue::Error(message) => {
                warn!(connector = %self.name, key = key, error = %message, "GET rejected");
                None
            }
            value => value.as_text().map(|text| text.trim().to_string()),
        }
    }

    /// Ping before use when the connection has been idle too long
    fn ensure_fresh(&self) {
        if self.idle_for() < self.config.stale_after() {
            return;
        }
        debug!(connector = %self.name, idle_ms = self.idle_for().as_millis() as u64, "Stale connection, probing");
        if !self.ping() {
            self.reconnect();
        }
    }

    /// Issue a command, following one redirect or recovering one I/O failure
    fn execute(&self, args: &[&str]) -> Option<RespValue> {
        let command = args.first().copied().unwrap_or_default();
        for attempt in 0..2 {
            let retry_allowed = attempt == 0;
            match self.send(args) {
                Ok(RespValue::Error(message)) => match Redirect::parse(&message) {
                    Some(redirect) if retry_allowed => {
                        if !self.follow_redirect(redirect) {
                            return None;
                        }
                    }
                    Some(_) => {
                        warn!(connector = %self.name, command = command, reply = %message, "Redirected again after retry");
                        return None;
                    }
                    None => {
                        self.touch();
                        return Some(RespValue::Error(message));
                    }
                },
                Ok(reply) => {
                    self.touch();
                    return Some(reply);
                }
                Err(e) if retry_allowed => {
                    warn!(connector = %self.name, command = command, error = %e, "Store command failed, reconnecting");
                    self.mark_disconnected();
                    if !self.reconnect() {
                        return None;
                    }
                }
                Err(e) => {
                    error!(connector = %self.name, command = command, error = %e, "Store command failed after retry");
                    self.mark_disconnected();
                    return None;
                }
            }
        }
        None
    }

    /// Holds the stream lock only for the round trip
    fn send(&self, args: &[&str]) -> Result<RespValue> {
        let mut guard = lock(&self.stream);
        match guard.as_mut() {
            Some(conn) => conn.command(args),
            None => Err(StoreError::not_connected(self.target().to_string())),
        }
    }

    fn follow_redirect(&self, redirect: Redirect) -> bool {
        let host = self.config.mapped_host(&redirect.target.host).to_string();
        let target = Endpoint::new(host, redirect.target.port);

        self.stats.redirects.fetch_add(1, Ordering::Relaxed);
        observability::record_store_redirect();
        if self.redirects.first_seen(&target) {
            info!(
                connector = %self.name,
                slot = redirect.slot,
                advertised = %redirect.target,
                target = %target,
                "Store redirect"
            );
        }

        *lock(&self.target) = target;
        *lock(&self.stream) = None;
        self.reconnect()
    }

    /// Re-establish the stream to the current target.
    ///
    /// Single-flight: returns `false` at once when another thread is
    /// already reconnecting.
    #[instrument(name = "store_reconnect", skip(self), fields(connector = %self.name))]
    pub fn reconnect(&self) -> bool {
        if self
            .reconnecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(connector = %self.name, "Reconnect already in progress");
            return false;
        }

        self.set_state(ConnectorState::Reconnecting);
        let target = self.target();
        let attempts = self.config.retry_count.max(1);
        let mut connected = None;

        for attempt in 0..attempts {
            let delay = backoff_delay(attempt);
            if !delay.is_zero() {
                self.sleeper.sleep(delay);
            }
            match self.open_verified(&target) {
                Ok(conn) => {
                    connected = Some(conn);
                    break;
                }
                Err(e) => {
                    warn!(
                        connector = %self.name,
                        endpoint = %target,
                        attempt = attempt + 1,
                        max_attempts = attempts,
                        error = %e,
                        "Reconnect attempt failed"
                    );
                }
            }
        }

        let ok = match connected {
            Some(conn) => {
                *lock(&self.stream) = Some(conn);
                self.touch();
                self.set_state(ConnectorState::Connected);
                self.stats.reconnect_successes.fetch_add(1, Ordering::Relaxed);
                info!(connector = %self.name, endpoint = %target, "Store reconnected");
                true
            }
            None => {
                *lock(&self.stream) = None;
                *lock(&self.target) = self.original.clone();
                self.set_state(ConnectorState::Disconnected);
                self.stats.reconnect_failures.fetch_add(1, Ordering::Relaxed);
                error!(
                    connector = %self.name,
                    endpoint = %target,
                    restored = %self.original,
                    attempts = attempts,
                    "Reconnect attempts exhausted"
                );
                false
            }
        };
        observability::record_store_reconnect(ok);
        self.reconnecting.store(false, Ordering::Release);
        ok
    }

    fn open_verified(&self, target: &Endpoint) -> Result<RespConnection> {
        let mut conn = RespConnection::open(
            target,
            self.config.connect_timeout(),
            self.config.command_timeout(),
        )?;
        conn.ping()?;
        Ok(conn)
    }

    /// Start the liveness heartbeat (idempotent)
    pub fn start_heartbeat(self: &Arc<Self>) -> Result<()> {
        let mut slot = lock(&self.heartbeat);
        if slot.is_none() {
            *slot = Some(Heartbeat::spawn(
                Arc::downgrade(self),
                self.config.heartbeat_interval(),
                self.config.heartbeat_skip_within(),
            )?);
        }
        Ok(())
    }

    /// Record a failed heartbeat ping
    pub(crate) fn note_heartbeat_failure(&self) {
        self.stats.heartbeat_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Stop the heartbeat and drop the stream
    pub fn close(&self) {
        if let Some(heartbeat) = lock(&self.heartbeat).take() {
            heartbeat.stop();
        }
        *lock(&self.stream) = None;
        self.set_state(ConnectorState::Disconnected);
        debug!(connector = %self.name, "Store connector closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MockStoreServer, RecordingSleeper};

    fn config_for(server: &MockStoreServer) -> StoreConfig {
        StoreConfig {
            host: "127.0.0.1".into(),
            port: server.port(),
            retry_count: 3,
            ..StoreConfig::default()
        }
    }

    fn connector(config: StoreConfig) -> (StoreConnector, Arc<RecordingSleeper>) {
        let sleeper = Arc::new(RecordingSleeper::new());
        let c = StoreConnector::new(
            "test",
            Arc::new(config),
            Arc::new(RedirectLog::new()),
            sleeper.clone(),
        );
        (c, sleeper)
    }

    #[test]
    fn test_set_get_trims() {
        let server = MockStoreServer::start().unwrap();
        let (c, _) = connector(config_for(&server));
        assert!(c.connect());
        assert_eq!(c.state(), ConnectorState::Connected);

        assert!(c.set("XD:status", "  true \n"));
        assert_eq!(c.get("XD:status").as_deref(), Some("true"));
        assert_eq!(c.get("missing"), None);
    }

    #[test]
    fn test_connect_failure_leaves_disconnected() {
        let server = MockStoreServer::start().unwrap();
        server.set_refuse(true);
        let (c, _) = connector(config_for(&server));
        assert!(!c.connect());
        assert_eq!(c.state(), ConnectorState::Disconnected);
        assert!(!c.set("k", "v"));
    }

    #[test]
    fn test_reconnect_backoff_and_restore() {
        let server = MockStoreServer::start().unwrap();
        let (c, sleeper) = connector(config_for(&server));
        assert!(c.connect());

        server.set_refuse(true);
        assert!(!c.reconnect());
        assert_eq!(c.state(), ConnectorState::Disconnected);
        assert_eq!(
            sleeper.waits(),
            vec![Duration::from_secs(2), Duration::from_secs(4)]
        );
        assert_eq!(c.stats().snapshot().reconnect_failures, 1);

        server.set_refuse(false);
        assert!(c.reconnect());
        assert_eq!(c.state(), ConnectorState::Connected);
        assert_eq!(c.stats().snapshot().reconnect_successes, 1);
    }

    #[test]
    fn test_reconnect_single_flight() {
        let server = MockStoreServer::start().unwrap();
        let (c, _) = connector(config_for(&server));
        c.reconnecting.store(true, Ordering::SeqCst);
        assert!(!c.reconnect());
        c.reconnecting.store(false, Ordering::SeqCst);
        assert!(c.reconnect());
    }

    #[test]
    fn test_redirect_is_remapped_and_retried() {
        let origin = MockStoreServer::start().unwrap();
        let shard = MockStoreServer::start().unwrap();
        origin.set_moved_to(Some(format!("10.99.0.7:{}", shard.port())));

        let mut config = config_for(&origin);
        config
            .ip_map
            .insert("10.99.0.7".into(), "127.0.0.1".into());
        let (c, _) = connector(config);
        assert!(c.connect());

        assert!(c.set("XD:TrafficFlow", "{}"));
        assert_eq!(c.target(), Endpoint::new("127.0.0.1", shard.port()));
        assert_eq!(shard.value("XD:TrafficFlow").as_deref(), Some("{}"));
        assert_eq!(origin.value("XD:TrafficFlow"), None);
        assert_eq!(c.stats().snapshot().redirects, 1);
    }

    #[test]
    fn test_failed_redirect_restores_original() {
        let origin = MockStoreServer::start().unwrap();
        // 重定向到一个不可达端口
        let dead_port = {
            let scratch = MockStoreServer::start().unwrap();
            let port = scratch.port();
            drop(scratch);
            port
        };
        origin.set_moved_to(Some(format!("127.0.0.1:{dead_port}")));

        let (c, _) = connector(config_for(&origin));
        assert!(c.connect());
        assert!(!c.set("k", "v"));
        assert_eq!(c.state(), ConnectorState::Disconnected);
        assert_eq!(c.target(), Endpoint::new("127.0.0.1", origin.port()));
    }

    #[test]
    fn test_stale_connection_pinged_and_recovered() {
        let server = MockStoreServer::start().unwrap();
        let mut config = config_for(&server);
        config.stale_after_secs = 0.0;
        let (c, _) = connector(config);
        assert!(c.connect());

        // 陈旧连接的探测失败后重连，再执行命令
        server.fail_next_pings(1);
        assert!(c.set("k", "v"));
        assert_eq!(c.state(), ConnectorState::Connected);
        assert_eq!(c.stats().snapshot().reconnect_successes, 1);
    }
}
