//! # Integration Tests
//!
//! 集成测试与端到端测试。
//!
//! 负责：
//! - 变化追踪、连接器心跳、命令队列的场景测试
//! - 基于模拟引擎与模拟存储的完整实例运行（无需外部服务）

#[cfg(test)]
mod support {
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    use contracts::{PoolConfig, StoreConfig};
    use store::{ConnectionPool, MockStoreServer, RecordingSleeper};

    pub fn store_config(server: &MockStoreServer) -> StoreConfig {
        StoreConfig {
            host: "127.0.0.1".into(),
            port: server.port(),
            retry_count: 1,
            ..StoreConfig::default()
        }
    }

    pub fn pool(server: &MockStoreServer) -> Arc<ConnectionPool> {
        Arc::new(
            ConnectionPool::with_sleeper(
                store_config(server),
                PoolConfig::default(),
                Arc::new(RecordingSleeper::new()),
            )
            .unwrap(),
        )
    }

    pub fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
        let started = Instant::now();
        while started.elapsed() < deadline {
            if check() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        check()
    }
}

#[cfg(test)]
mod contract_tests {
    #[test]
    fn test_contracts_compile() {
        // 验证 contracts crate 可编译
        let _ = contracts::ConfigVersion::V1;
        assert_eq!(contracts::keys::TRAFFIC_FLOW, "TrafficFlow");
    }
}

#[cfg(test)]
mod change_tracking_tests {
    use change_tracker::{ChangeTracker, SlidingWindow};
    use contracts::{EntitySnapshot, Vector3};

    fn vehicle(id: &str, frame: u32) -> EntitySnapshot {
        EntitySnapshot::vehicle(id, Vector3::new(frame as f64, 0.0, 0.0), 0.0, frame as f64, "car")
    }

    fn sorted_ids(list: &[EntitySnapshot]) -> Vec<String> {
        let mut ids: Vec<String> = list.iter().map(|e| e.id.clone()).collect();
        ids.sort();
        ids
    }

    /// previous={A,B,C}, current={B,C,D}
    #[test]
    fn test_scenario_a_frame_diff() {
        let mut tracker = ChangeTracker::new(10);
        tracker.track(vec![vehicle("A", 1), vehicle("B", 1), vehicle("C", 1)]);
        assert_eq!(tracker.added().drain_all().len(), 3);
        let changes = tracker.track(vec![vehicle("B", 2), vehicle("C", 2), vehicle("D", 2)]);

        assert_eq!(sorted_ids(&changes.disappeared), vec!["A"]);
        assert_eq!(sorted_ids(&changes.appeared), vec!["D"]);
        assert_eq!(sorted_ids(&changes.updated), vec!["B", "C"]);

        // 已消费的队列在下一帧重新填充
        assert_eq!(sorted_ids(&tracker.removed().drain_all()), vec!["A"]);
        assert_eq!(sorted_ids(&tracker.added().drain_all()), vec!["D"]);
    }

    /// capacity 2, pushes {A} {B} {A}
    #[test]
    fn test_scenario_b_window_eviction() {
        let mut window = SlidingWindow::new(2);
        window.push(vec![vehicle("A", 1)]);
        window.push(vec![vehicle("B", 2)]);
        window.push(vec![vehicle("A", 3)]);
        assert_eq!(window.len(), 2);

        let merged = window.consolidated();
        let view: Vec<(&str, f64)> = merged.iter().map(|e| (e.id.as_str(), e.speed)).collect();
        assert_eq!(view, vec![("A", 3.0), ("B", 2.0)]);
    }

    #[test]
    fn test_tracker_windows_follow_frames() {
        let mut tracker = ChangeTracker::new(2);
        tracker.track(vec![vehicle("A", 1)]);
        tracker.track(vec![vehicle("B", 2)]);
        tracker.track(vec![vehicle("A", 3)]);

        // 窗口容量为 2：第一帧的 A 出现已被淘汰，第三帧的 A 覆盖
        let appearing = tracker.consolidated_appearing();
        assert_eq!(sorted_ids(&appearing), vec!["A", "B"]);
        let a = appearing.iter().find(|e| e.id == "A").unwrap();
        assert_eq!(a.speed, 3.0);

        let disappearing = tracker.consolidated_disappearing();
        assert_eq!(sorted_ids(&disappearing), vec!["A", "B"]);
        assert_eq!(tracker.frames(), 3);
    }
}

#[cfg(test)]
mod store_tests {
    use std::sync::Arc;
    use std::time::Duration;

    use contracts::StoreConfig;
    use store::{ConnectorState, MockStoreServer, RedirectLog, StoreConnector, ThreadSleeper};

    use crate::support::{pool, store_config, wait_until};

    /// Idle connector, failed ping, independent reconnect
    #[test]
    fn test_scenario_c_heartbeat_recovers() {
        let server = MockStoreServer::start().unwrap();
        let config = StoreConfig {
            heartbeat_interval_secs: 0.05,
            // 0 表示连接器始终视为空闲
            heartbeat_skip_within_secs: 0.0,
            ..store_config(&server)
        };
        let connector = Arc::new(StoreConnector::new(
            "scenario-c",
            Arc::new(config),
            Arc::new(RedirectLog::new()),
            Arc::new(ThreadSleeper),
        ));
        assert!(connector.connect());
        assert_eq!(connector.state(), ConnectorState::Connected);
        connector.start_heartbeat().unwrap();

        server.fail_next_pings(1);
        assert!(wait_until(Duration::from_secs(3), || {
            let stats = connector.stats().snapshot();
            stats.heartbeat_failures >= 1 && stats.reconnect_successes >= 1
        }));
        assert!(wait_until(Duration::from_secs(1), || {
            connector.state() == ConnectorState::Connected
        }));

        let pings = server.pings();
        assert!(wait_until(Duration::from_secs(2), || server.pings() > pings + 1));
        assert!(connector.set("k", "v"));
        assert_eq!(server.value("k").as_deref(), Some("v"));
        connector.close();
    }

    #[test]
    fn test_pool_namespaces_instances() {
        let server = MockStoreServer::start().unwrap();
        let pool = pool(&server);

        assert!(pool.write_to_store("XD", "status", "true"));
        assert!(pool.write_to_store("YD", "status", "false"));
        assert_eq!(server.value("XD:status").as_deref(), Some("true"));
        assert_eq!(pool.read_from_store("YD", "status").as_deref(), Some("false"));

        pool.release("XD");
        // 非活跃条目重复释放无副作用
        pool.release("XD");
        pool.release("unknown");
        assert_eq!(pool.read_from_store("XD", "status").as_deref(), Some("true"));
        pool.shutdown();
    }
}

#[cfg(test)]
mod command_queue_tests {
    use std::sync::{Arc, Mutex};

    use contracts::InstanceConfig;
    use orchestrator::{mock_context, RunOptions};
    use sim_engine::SimulationEngine;
    use store::MockStoreServer;

    use crate::support::pool;

    /// Three queued commands run once each, in order
    #[test]
    fn test_scenario_d_commands_run_once_in_order() {
        let server = MockStoreServer::start().unwrap();
        let ctx = mock_context(
            InstanceConfig::with_id("scenario-d"),
            RunOptions::default(),
            pool(&server),
        );

        let log = Arc::new(Mutex::new(Vec::new()));
        for n in 1..=3 {
            let log = log.clone();
            ctx.enqueue(move |sim| {
                log.lock().unwrap().push((n, sim.engine.simulation_time()));
            });
        }
        assert_eq!(ctx.coordinator().commands().len(), 3);

        let executed = {
            let mut sim = ctx.lock_sim();
            ctx.coordinator().commands().drain_into(&mut sim)
        };
        assert_eq!(executed, 3);
        assert!(ctx.coordinator().commands().is_empty());
        let order: Vec<u32> = log.lock().unwrap().iter().map(|(n, _)| *n).collect();
        assert_eq!(order, vec![1, 2, 3]);

        // 第二次 drain 不会重复执行
        let again = {
            let mut sim = ctx.lock_sim();
            ctx.coordinator().commands().drain_into(&mut sim)
        };
        assert_eq!(again, 0);
        assert_eq!(log.lock().unwrap().len(), 3);
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;

    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{keys, NavigationResponse, TrafficConfig, VehicleDocument};
    use orchestrator::{mock_context, spawn_instance, RunOptions};
    use sim_engine::SimulationEngine;
    use store::MockStoreServer;

    use crate::support::{pool, wait_until};

    const CONFIG: &str = r#"
[[instances]]
instance_id = "XD"
max_vehicles = 6
add_max = 2
frame_rate = 100
traffic_signals = true
offset_x = 1000.0

[instances.controller]
navigate_interval_secs = 0.05
hazard_interval_secs = 0.05
proximity_interval_secs = 0.05
nav_stop_interval_secs = 0.05

[instances.mock]
edge_count = 4
edge_length = 400.0
lanes_per_edge = 2
light_count = 2
seed = 11
"#;

    fn config() -> TrafficConfig {
        ConfigLoader::load_from_str(CONFIG, ConfigFormat::Toml).unwrap()
    }

    /// End-to-end: config -> instance threads -> store documents
    #[test]
    fn test_e2e_instance_runs_to_frame_limit() {
        let server = MockStoreServer::start().unwrap();
        let config = config();
        let instance = config.instances[0].clone();
        let options = RunOptions {
            max_frames: Some(40),
        };
        let ctx = Arc::new(mock_context(instance, options, pool(&server)));

        let report = spawn_instance(ctx).unwrap().join().unwrap();

        assert_eq!(report.simulation.frames, 40);
        assert_eq!(report.simulation.timing.total_frames, 40);
        assert_eq!(report.simulation.timing.step_timeouts, 0);
        assert!(report.simulation.vehicle_count.is_some_and(|n| n <= 6));
        assert!(report.frames_collected > 0);

        assert_eq!(server.value("XD:status").as_deref(), Some("true"));
        let flow: VehicleDocument =
            serde_json::from_str(&server.value("XD:TrafficFlow").unwrap()).unwrap();
        assert!(flow.vehicle_count <= 6);
        // 发布坐标带地图偏移
        for actor in flow.update_actors.iter().chain(flow.add_actors.iter()) {
            assert!(actor.position.x >= 1000.0);
            assert_eq!(actor.category, "FLOW");
        }
        assert!(server.value("XD:TrafficLight").is_some());
    }

    /// Navigation request -> map service -> ego registered on the planned route
    #[test]
    fn test_e2e_navigation_registers_ego() {
        let server = MockStoreServer::start().unwrap();
        let mut instance = config().instances[0].clone();
        instance.instance_id = "nav".into();
        instance.max_vehicles = 0;
        instance.run_hdmap = true;
        server.insert(
            "nav:NavigationReqList",
            r#"{"id":"req-1","NavigationList":[{"actorID":"tank1","src":[1450.0,-1.6],"dst":[2000.0,-1.6]}]}"#,
        );

        let ctx = Arc::new(mock_context(instance, RunOptions::default(), pool(&server)));
        let handle = spawn_instance(ctx.clone()).unwrap();

        let answered = wait_until(Duration::from_secs(5), || {
            server.value(&format!("nav:{}", keys::NAVIGATION_RESPONSE)).is_some()
        });
        let registered = wait_until(Duration::from_secs(5), || {
            ctx.stats().egos_registered.load(Ordering::Relaxed) >= 1
        });
        let ego_published = wait_until(Duration::from_secs(5), || {
            ctx.lock_sim()
                .engine
                .vehicle_ids()
                .iter()
                .any(|id| contracts::is_ego_id(id))
        });
        handle.stop();
        let report = handle.join().unwrap();

        assert!(answered);
        assert!(registered);
        assert!(ego_published);
        let response: NavigationResponse =
            serde_json::from_str(&server.value("nav:NavigationRsp").unwrap()).unwrap();
        assert_eq!(response.id, "req-1");
        assert_eq!(response.info, vec!["successful".to_string()]);
        assert_eq!(report.stats.routes_planned, 1);
    }

    #[test]
    fn test_e2e_instances_share_pool() {
        let server = MockStoreServer::start().unwrap();
        let pool = pool(&server);
        let mut handles = Vec::new();
        for id in ["A", "B"] {
            let mut instance = config().instances[0].clone();
            instance.instance_id = id.into();
            let options = RunOptions {
                max_frames: Some(10),
            };
            let ctx = Arc::new(mock_context(instance, options, pool.clone()));
            handles.push(spawn_instance(ctx).unwrap());
        }

        for handle in handles {
            let report = handle.join().unwrap();
            assert_eq!(report.simulation.frames, 10);
        }
        assert_eq!(server.value("A:status").as_deref(), Some("true"));
        assert_eq!(server.value("B:status").as_deref(), Some("true"));
        pool.shutdown();
    }
}
