//! # Store
//!
//! 数据存储客户端（RESP 协议，仅 SET/GET/PING）。
//!
//! 负责：
//! - `StoreConnector`: 单条弹性连接，处理集群重定向、指数退避重连、心跳
//! - `ConnectionPool`: 按实例 ID 管理活跃/空闲连接，空闲超时回收
//! - `MockStoreServer`: 进程内 RESP 服务器，用于测试与演示
//!
//! ## 使用示例
//!
//! ```ignore
//! use store::ConnectionPool;
//!
//! let pool = ConnectionPool::new(config.store.clone(), config.pool.clone())?;
//! pool.write_to_store("XD_DEFAULT", "status", "true");
//! let doc = pool.read_from_store("XD_DEFAULT", "BombEvent");
//! pool.shutdown();
//! ```

mod backoff;
mod connection;
mod connector;
mod error;
mod heartbeat;
mod mock_server;
mod pool;
mod redirect;
pub mod resp;

pub use backoff::{backoff_delay, RecordingSleeper, Sleeper, ThreadSleeper, MAX_BACKOFF};
pub use connection::RespConnection;
pub use connector::{ConnectorState, ConnectorStats, ConnectorStatsSnapshot, StoreConnector};
pub use error::{Result, StoreError};
pub use heartbeat::Heartbeat;
pub use mock_server::MockStoreServer;
pub use pool::{namespaced_key, ConnectionPool, PoolStats};
pub use redirect::{Endpoint, Redirect, RedirectLog};

use std::sync::{Mutex, MutexGuard, PoisonError};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
