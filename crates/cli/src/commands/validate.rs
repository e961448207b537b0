//! `validate` command implementation.

use anyhow::{Context, Result};
use contracts::TrafficConfig;
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    version: String,
    store: String,
    instance_count: usize,
    instance_ids: Vec<String>,
    map_services: usize,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    if !args.config.exists() {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("File not found: {}", args.config.display())),
            warnings: None,
            summary: None,
        };
    }

    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(config) => {
            let warnings = collect_warnings(&config);
            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: if warnings.is_empty() {
                    None
                } else {
                    Some(warnings)
                },
                summary: Some(ConfigSummary {
                    version: format!("{:?}", config.version),
                    store: format!("{}:{}", config.store.host, config.store.port),
                    instance_count: config.instances.len(),
                    instance_ids: config
                        .instances
                        .iter()
                        .map(|i| i.instance_id.clone())
                        .collect(),
                    map_services: config.instances.iter().filter(|i| i.run_hdmap).count(),
                }),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(config: &TrafficConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    for instance in &config.instances {
        if instance.max_vehicles == 0 {
            warnings.push(format!(
                "Instance '{}' has max_vehicles = 0 - no background traffic",
                instance.instance_id
            ));
        }
        if instance.traffic_signals && instance.mock.light_count == 0 {
            warnings.push(format!(
                "Instance '{}' publishes traffic lights but its network has none",
                instance.instance_id
            ));
        }
        let step_budget = instance.frame_interval().as_secs_f64();
        if instance.step_length > step_budget * 10.0 {
            warnings.push(format!(
                "Instance '{}' step_length {}s is much longer than its frame interval",
                instance.instance_id, instance.step_length
            ));
        }
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Version: {}", summary.version);
            println!("  Store: {}", summary.store);
            println!(
                "  Instances: {} ({})",
                summary.instance_count,
                summary.instance_ids.join(", ")
            );
            println!("  Map services: {}", summary.map_services);
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn args_for(content: &str) -> (tempfile::NamedTempFile, ValidateArgs) {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        let args = ValidateArgs {
            config: file.path().to_path_buf(),
            json: true,
        };
        (file, args)
    }

    #[test]
    fn test_valid_config_with_warnings() {
        let (_file, args) = args_for(
            r#"
[[instances]]
instance_id = "XD"
max_vehicles = 0
run_hdmap = true
traffic_signals = true
"#,
        );
        let result = validate_config(&args);
        assert!(result.valid);
        let summary = result.summary.unwrap();
        assert_eq!(summary.instance_ids, vec!["XD"]);
        assert_eq!(summary.map_services, 1);
        assert_eq!(result.warnings.unwrap().len(), 2);
    }

    #[test]
    fn test_duplicate_ids_are_invalid() {
        let (_file, args) = args_for(
            r#"
[[instances]]
instance_id = "XD"

[[instances]]
instance_id = "XD"
"#,
        );
        let result = validate_config(&args);
        assert!(!result.valid);
        assert!(result.error.unwrap().contains("duplicate"));
    }

    #[test]
    fn test_missing_file() {
        let args = ValidateArgs {
            config: "/nonexistent/traffic.toml".into(),
            json: false,
        };
        assert!(run_validate(&args).is_err());
    }
}
