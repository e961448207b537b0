//! Shared test setup: a 4 x 400 m two-lane mock network and a pool on a mock store

use std::sync::Arc;

use contracts::{InstanceConfig, MockEngineSettings, PoolConfig, StoreConfig};
use sim_engine::MockEngine;
use store::{ConnectionPool, MockStoreServer, RecordingSleeper};

use crate::context::{InstanceContext, RunOptions};
use crate::instance::mock_context;

pub fn instance_config(id: &str) -> InstanceConfig {
    let mut config = InstanceConfig::with_id(id);
    config.max_vehicles = 0;
    config.mock = MockEngineSettings {
        edge_count: 4,
        edge_length: 400.0,
        lanes_per_edge: 2,
        cruise_speed: 10.0,
        light_count: 1,
        seed: Some(7),
    };
    config
}

pub fn pool_for(server: &MockStoreServer) -> Arc<ConnectionPool> {
    let store = StoreConfig {
        host: "127.0.0.1".into(),
        port: server.port(),
        retry_count: 1,
        ..StoreConfig::default()
    };
    Arc::new(
        ConnectionPool::with_sleeper(store, PoolConfig::default(), Arc::new(RecordingSleeper::new()))
            .unwrap(),
    )
}

pub fn context(server: &MockStoreServer, config: InstanceConfig) -> Arc<InstanceContext<MockEngine>> {
    Arc::new(mock_context(config, RunOptions::default(), pool_for(server)))
}

/// Run every queued command, as the simulation thread would
pub fn drain(ctx: &InstanceContext<MockEngine>) -> usize {
    let mut sim = ctx.lock_sim();
    ctx.coordinator().commands().drain_into(&mut sim)
}
