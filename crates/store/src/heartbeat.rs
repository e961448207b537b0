//! Connector liveness heartbeat
//!
//! Every `interval` the connector is pinged unless it was used within
//! `skip_within`. A failed ping leaves it `Disconnected` and hands the
//! reconnect to a separate thread so the heartbeat keeps its cadence.

use std::sync::Weak;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use tracing::{debug, error, warn};

use crate::{Result, StoreConnector, StoreError};

/// Handle to a running heartbeat thread
#[derive(Debug)]
pub struct Heartbeat {
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Heartbeat {
    pub(crate) fn spawn(
        connector: Weak<StoreConnector>,
        interval: Duration,
        skip_within: Duration,
    ) -> Result<Self> {
        let (tx, rx) = bounded::<()>(1);
        let name = connector
            .upgrade()
            .map(|c| format!("{}-heartbeat", c.name()))
            .unwrap_or_else(|| "store-heartbeat".to_string());

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || loop {
                match rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    _ => break,
                }
                let Some(connector) = connector.upgrade() else {
                    break;
                };
                beat(&connector, skip_within);
            })
            .map_err(|source| StoreError::Spawn { name, source })?;

        Ok(Self {
            shutdown: Some(tx),
            handle: Some(handle),
        })
    }

    /// Signal the thread and wait for it to exit
    pub fn stop(mut self) {
        self.shutdown.take();
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        // Disconnecting the channel wakes the thread; it exits on its own
        self.shutdown.take();
    }
}

fn beat(connector: &std::sync::Arc<StoreConnector>, skip_within: Duration) {
    let idle = connector.idle_for();
    if idle < skip_within {
        debug!(connector = %connector.name(), idle_ms = idle.as_millis() as u64, "Heartbeat skipped, recently used");
        return;
    }
    if connector.ping() {
        debug!(connector = %connector.name(), "Heartbeat ok");
        return;
    }

    connector.note_heartbeat_failure();
    warn!(connector = %connector.name(), "Heartbeat ping failed, reconnecting in background");

    let reconnecting = connector.clone();
    let spawned = thread::Builder::new()
        .name(format!("{}-reconnect", connector.name()))
        .spawn(move || {
            reconnecting.reconnect();
        });
    if let Err(e) = spawned {
        error!(connector = %connector.name(), error = %e, "Failed to spawn reconnect thread");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ConnectorState, MockStoreServer, RedirectLog, ThreadSleeper};
    use contracts::StoreConfig;
    use std::sync::Arc;
    use std::time::Instant;

    fn connector(server: &MockStoreServer, skip_within_secs: f64) -> Arc<StoreConnector> {
        let config = StoreConfig {
            host: "127.0.0.1".into(),
            port: server.port(),
            heartbeat_interval_secs: 0.05,
            heartbeat_skip_within_secs: skip_within_secs,
            ..StoreConfig::default()
        };
        Arc::new(StoreConnector::new(
            "hb",
            Arc::new(config),
            Arc::new(RedirectLog::new()),
            Arc::new(ThreadSleeper),
        ))
    }

    fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
        let started = Instant::now();
        while started.elapsed() < deadline {
            if check() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        check()
    }

    #[test]
    fn test_failed_ping_triggers_background_reconnect() {
        let server = MockStoreServer::start().unwrap();
        let c = connector(&server, 0.0);
        assert!(c.connect());
        c.start_heartbeat().unwrap();

        server.fail_next_pings(1);
        assert!(wait_until(Duration::from_secs(3), || {
            let stats = c.stats().snapshot();
            stats.heartbeat_failures >= 1
                && stats.reconnect_successes >= 1
                && c.state() == ConnectorState::Connected
        }));

        // 心跳在重连后继续运行
        let pings = server.pings();
        assert!(wait_until(Duration::from_secs(2), || server.pings() > pings + 1));
        c.close();
    }

    #[test]
    fn test_recently_used_connector_is_skipped() {
        let server = MockStoreServer::start().unwrap();
        let c = connector(&server, 10.0);
        assert!(c.connect());
        let pings = server.pings();
        c.start_heartbeat().unwrap();

        thread::sleep(Duration::from_millis(250));
        assert_eq!(server.pings(), pings);
        c.close();
    }

    #[test]
    fn test_stop_joins_thread() {
        let server = MockStoreServer::start().unwrap();
        let c = connector(&server, 0.0);
        assert!(c.connect());
        c.start_heartbeat().unwrap();
        let started = Instant::now();
        c.close();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(c.state(), ConnectorState::Disconnected);
    }
}
