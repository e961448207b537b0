//! 配置校验模块
//!
//! 校验规则：
//! - 字段范围 (validator derive)
//! - instance_id 唯一且非空
//! - add_max <= max_vehicles (max_vehicles > 0 时)
//! - 心跳周期 > 0，跳过窗口 < 心跳周期
//! - ip_map 键值非空

use std::collections::HashSet;

use contracts::{ContractError, TrafficConfig};
use ::validator::Validate;

/// 校验 TrafficConfig 配置
///
/// 返回第一个遇到的错误，或 Ok(())。
pub fn validate(config: &TrafficConfig) -> Result<(), ContractError> {
    validate_ranges(config)?;
    validate_instance_ids(config)?;
    validate_population(config)?;
    validate_heartbeat(config)?;
    validate_ip_map(config)?;
    Ok(())
}

/// 字段范围校验
fn validate_ranges(config: &TrafficConfig) -> Result<(), ContractError> {
    config.validate().map_err(|errors| {
        let field = errors
            .errors()
            .keys()
            .next()
            .map(|k| k.to_string())
            .unwrap_or_else(|| "config".to_string());
        ContractError::config_validation(field, format!("out of range: {errors}"))
    })
}

/// 校验 instance_id 唯一性
fn validate_instance_ids(config: &TrafficConfig) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for (idx, instance) in config.instances.iter().enumerate() {
        if instance.instance_id.trim().is_empty() {
            return Err(ContractError::config_validation(
                format!("instances[{idx}].instance_id"),
                "instance_id cannot be empty",
            ));
        }
        if !seen.insert(&instance.instance_id) {
            return Err(ContractError::config_validation(
                format!("instances[id={}]", instance.instance_id),
                "duplicate instance_id",
            ));
        }
    }
    Ok(())
}

/// 校验车辆数量配置
fn validate_population(config: &TrafficConfig) -> Result<(), ContractError> {
    for instance in &config.instances {
        if instance.max_vehicles > 0 && instance.add_max > instance.max_vehicles {
            return Err(ContractError::config_validation(
                format!("instances[{}].add_max", instance.instance_id),
                format!(
                    "add_max ({}) must be <= max_vehicles ({})",
                    instance.add_max, instance.max_vehicles
                ),
            ));
        }
    }
    Ok(())
}

/// 校验心跳配置
fn validate_heartbeat(config: &TrafficConfig) -> Result<(), ContractError> {
    let store = &config.store;
    if store.heartbeat_interval_secs <= 0.0 {
        return Err(ContractError::config_validation(
            "store.heartbeat_interval_secs",
            format!(
                "heartbeat_interval_secs must be > 0, got {}",
                store.heartbeat_interval_secs
            ),
        ));
    }
    if store.heartbeat_skip_within_secs >= store.heartbeat_interval_secs {
        return Err(ContractError::config_validation(
            "store.heartbeat_skip_within_secs",
            format!(
                "heartbeat_skip_within_secs ({}) must be < heartbeat_interval_secs ({})",
                store.heartbeat_skip_within_secs, store.heartbeat_interval_secs
            ),
        ));
    }
    Ok(())
}

/// 校验重定向映射表
fn validate_ip_map(config: &TrafficConfig) -> Result<(), ContractError> {
    for (from, to) in &config.store.ip_map {
        if from.trim().is_empty() || to.trim().is_empty() {
            return Err(ContractError::config_validation(
                format!("store.ip_map[{from}]"),
                "ip_map entries cannot be empty",
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{ConfigVersion, InstanceConfig, PoolConfig, StoreConfig};

    fn minimal_config() -> TrafficConfig {
        TrafficConfig {
            version: ConfigVersion::V1,
            instances: vec![InstanceConfig::with_id("XD_DEFAULT")],
            store: StoreConfig::default(),
            pool: PoolConfig::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        let cfg = minimal_config();
        assert!(validate(&cfg).is_ok());
    }

    #[test]
    fn test_duplicate_instance_id() {
        let mut cfg = minimal_config();
        cfg.instances.push(cfg.instances[0].clone());
        let result = validate(&cfg);
        assert!(result.is_err());
        let err = result.unwrap_err().to_string();
        assert!(err.contains("duplicate instance_id"), "got: {err}");
    }

    #[test]
    fn test_empty_instance_list() {
        let mut cfg = minimal_config();
        cfg.instances.clear();
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn test_frame_rate_out_of_range() {
        let mut cfg = minimal_config();
        cfg.instances[0].frame_rate = 0;
        let result = validate(&cfg);
        assert!(result.is_err());
        let err = result.unwrap_err().to_string();
        assert!(err.contains("out of range"), "got: {err}");
    }

    #[test]
    fn test_add_max_exceeds_population() {
        let mut cfg = minimal_config();
        cfg.instances[0].max_vehicles = 5;
        cfg.instances[0].add_max = 10;
        let result = validate(&cfg);
        assert!(result.is_err());
        let err = result.unwrap_err().to_string();
        assert!(err.contains("add_max"), "got: {err}");
    }

    #[test]
    fn test_heartbeat_skip_window_too_large() {
        let mut cfg = minimal_config();
        cfg.store.heartbeat_interval_secs = 5.0;
        cfg.store.heartbeat_skip_within_secs = 10.0;
        let result = validate(&cfg);
        assert!(result.is_err());
        let err = result.unwrap_err().to_string();
        assert!(err.contains("heartbeat_skip_within_secs"), "got: {err}");
    }

    #[test]
    fn test_empty_ip_map_entry() {
        let mut cfg = minimal_config();
        cfg.store.ip_map.insert("10.0.0.1".into(), String::new());
        let result = validate(&cfg);
        assert!(result.is_err());
        let err = result.unwrap_err().to_string();
        assert!(err.contains("cannot be empty"), "got: {err}");
    }
}
