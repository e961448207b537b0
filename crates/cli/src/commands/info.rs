//! `info` command implementation.

use anyhow::{Context, Result};
use contracts::TrafficConfig;
use serde::Serialize;
use tracing::info;

use crate::cli::InfoArgs;
use crate::error::CliError;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    version: String,
    store: StoreInfo,
    instances: Vec<InstanceInfo>,
}

#[derive(Serialize)]
struct StoreInfo {
    host: String,
    port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<StoreDetails>,
}

#[derive(Serialize)]
struct StoreDetails {
    retry_count: u32,
    connect_timeout_ms: u64,
    command_timeout_ms: u64,
    heartbeat_interval_secs: f64,
    idle_ttl_secs: f64,
    #[serde(skip_serializing_if = "std::collections::HashMap::is_empty")]
    ip_map: std::collections::HashMap<String, String>,
}

#[derive(Serialize)]
struct InstanceInfo {
    id: String,
    max_vehicles: u32,
    add_max: u32,
    frame_rate: u32,
    step_length: f64,
    run_hdmap: bool,
    traffic_signals: bool,
    offset: [f64; 2],
    network: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    controller: Option<ControllerInfo>,
}

#[derive(Serialize)]
struct ControllerInfo {
    navigate_secs: f64,
    hazard_secs: f64,
    proximity_secs: f64,
    nav_stop_secs: f64,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    if !args.config.exists() {
        return Err(CliError::config_not_found(args.config.display().to_string()).into());
    }

    let config = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    if args.json {
        let info = build_config_info(&config, args);
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&config, args);
    }

    Ok(())
}

fn build_config_info(config: &TrafficConfig, args: &InfoArgs) -> ConfigInfo {
    let details = args.store.then(|| StoreDetails {
        retry_count: config.store.retry_count,
        connect_timeout_ms: config.store.connect_timeout_ms,
        command_timeout_ms: config.store.command_timeout_ms,
        heartbeat_interval_secs: config.store.heartbeat_interval_secs,
        idle_ttl_secs: config.pool.idle_ttl_secs,
        ip_map: config.store.ip_map.clone(),
    });

    let instances = config
        .instances
        .iter()
        .map(|i| InstanceInfo {
            id: i.instance_id.clone(),
            max_vehicles: i.max_vehicles,
            add_max: i.add_max,
            frame_rate: i.frame_rate,
            step_length: i.step_length,
            run_hdmap: i.run_hdmap,
            traffic_signals: i.traffic_signals,
            offset: [i.offset_x, i.offset_y],
            network: format!(
                "{} edges x {} m, {} lanes",
                i.mock.edge_count, i.mock.edge_length, i.mock.lanes_per_edge
            ),
            controller: args.controller.then(|| ControllerInfo {
                navigate_secs: i.controller.navigate_interval_secs,
                hazard_secs: i.controller.hazard_interval_secs,
                proximity_secs: i.controller.proximity_interval_secs,
                nav_stop_secs: i.controller.nav_stop_interval_secs,
            }),
        })
        .collect();

    ConfigInfo {
        version: format!("{:?}", config.version),
        store: StoreInfo {
            host: config.store.host.clone(),
            port: config.store.port,
            details,
        },
        instances,
    }
}

fn print_config_info(config: &TrafficConfig, args: &InfoArgs) {
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║               Traffic Bridge Configuration                   ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    println!("🗄️  Store");
    println!("   ├─ Version: {:?}", config.version);
    if args.store {
        println!("   ├─ Endpoint: {}:{}", config.store.host, config.store.port);
        println!("   ├─ Retries: {}", config.store.retry_count);
        println!(
            "   ├─ Timeouts: connect {} ms, command {} ms",
            config.store.connect_timeout_ms, config.store.command_timeout_ms
        );
        println!("   ├─ Heartbeat: {}s", config.store.heartbeat_interval_secs);
        println!("   └─ Idle TTL: {}s", config.pool.idle_ttl_secs);
    } else {
        println!("   └─ Endpoint: {}:{}", config.store.host, config.store.port);
    }

    println!("\n🚦 Instances ({})", config.instances.len());
    for (i, instance) in config.instances.iter().enumerate() {
        let is_last = i == config.instances.len() - 1;
        let prefix = if is_last { "└─" } else { "├─" };
        let child_prefix = if is_last { "   " } else { "│  " };

        println!(
            "   {} {} ({} vehicles, +{}/frame, {} fps)",
            prefix, instance.instance_id, instance.max_vehicles, instance.add_max, instance.frame_rate
        );
        let mut features = Vec::new();
        if instance.run_hdmap {
            features.push("map service");
        }
        if instance.traffic_signals {
            features.push("traffic lights");
        }
        if !features.is_empty() {
            println!("   {}  ├─ Features: {}", child_prefix, features.join(", "));
        }

        if args.controller {
            let c = &instance.controller;
            println!(
                "   {}  ├─ Controller: navigate {}s, hazard {}s, proximity {}s, nav stop {}s",
                child_prefix,
                c.navigate_interval_secs,
                c.hazard_interval_secs,
                c.proximity_interval_secs,
                c.nav_stop_interval_secs
            );
        }
        println!(
            "   {}  └─ Network: {} edges x {} m",
            child_prefix, instance.mock.edge_count, instance.mock.edge_length
        );
    }

    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use config_loader::{ConfigFormat, ConfigLoader};

    #[test]
    fn test_info_detail_flags() {
        let config = ConfigLoader::load_from_str(
            r#"
[store]
host = "10.0.0.9"

[[instances]]
instance_id = "XD"
offset_x = 12.5
"#,
            ConfigFormat::Toml,
        )
        .unwrap();

        let brief = InfoArgs {
            config: "traffic.toml".into(),
            json: true,
            controller: false,
            store: false,
        };
        let info = build_config_info(&config, &brief);
        assert!(info.store.details.is_none());
        assert!(info.instances[0].controller.is_none());
        assert_eq!(info.instances[0].offset, [12.5, 0.0]);

        let full = InfoArgs {
            controller: true,
            store: true,
            ..brief
        };
        let json = serde_json::to_value(build_config_info(&config, &full)).unwrap();
        assert_eq!(json["store"]["host"], "10.0.0.9");
        assert_eq!(json["store"]["details"]["retry_count"], 5);
        assert_eq!(json["instances"][0]["controller"]["hazard_secs"], 10.0);
    }
}
