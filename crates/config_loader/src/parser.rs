//! 配置解析
//!
//! 桥接配置以 TOML 为主，JSON 用于由外部工具生成的实例清单。
//! 解析错误统一折算为 `行:列` 位置，便于定位到具体的 `[[instances]]` 条目。

use contracts::{ContractError, TrafficConfig};

/// 配置文件格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    /// 从文件扩展名推断格式，大小写不敏感
    pub fn from_extension(ext: &str) -> Option<Self> {
        if ext.eq_ignore_ascii_case("toml") {
            Some(Self::Toml)
        } else if ext.eq_ignore_ascii_case("json") {
            Some(Self::Json)
        } else {
            None
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Toml => "TOML",
            Self::Json => "JSON",
        }
    }
}

/// 解析失败的位置，行列均从 1 开始
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Position {
    line: usize,
    column: usize,
}

impl Position {
    /// 字节偏移 -> 行列
    fn at_offset(content: &str, offset: usize) -> Self {
        let head = content.get(..offset.min(content.len())).unwrap_or(content);
        let line = head.matches('\n').count() + 1;
        let column = head.rfind('\n').map_or(head.len(), |nl| head.len() - nl - 1) + 1;
        Self { line, column }
    }
}

/// 按格式解析配置
pub fn parse(content: &str, format: ConfigFormat) -> Result<TrafficConfig, ContractError> {
    match format {
        ConfigFormat::Toml => toml::from_str(content).map_err(|e| {
            let position = e.span().map(|span| Position::at_offset(content, span.start));
            let message = e.message().trim().to_string();
            parse_error(format, position, &message, e)
        }),
        ConfigFormat::Json => serde_json::from_str(content).map_err(|e| {
            // serde_json 在无法定位时返回 line 0
            let position = (e.line() > 0).then(|| Position {
                line: e.line(),
                column: e.column(),
            });
            let message = e.to_string();
            parse_error(format, position, &message, e)
        }),
    }
}

fn parse_error<E>(
    format: ConfigFormat,
    position: Option<Position>,
    message: &str,
    source: E,
) -> ContractError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let message = match position {
        Some(Position { line, column }) => {
            format!("{} config invalid at {line}:{column}: {message}", format.label())
        }
        None => format!("{} config invalid: {message}", format.label()),
    };
    ContractError::ConfigParse {
        message,
        source: Some(Box::new(source)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(err: ContractError) -> String {
        match err {
            ContractError::ConfigParse { message, source } => {
                assert!(source.is_some());
                message
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_toml_instances_keep_defaults() {
        let content = r#"
[store]
host = "10.0.0.1"
port = 7000

[[instances]]
instance_id = "XD_DEFAULT"
max_vehicles = 200

[[instances]]
instance_id = "XD_NORTH"
"#;
        let cfg = parse(content, ConfigFormat::Toml).unwrap();
        assert_eq!(cfg.instances.len(), 2);
        assert_eq!(cfg.instances[0].max_vehicles, 200);
        assert_eq!(cfg.instances[1].instance_id, "XD_NORTH");
        // 未写出的字段取默认值
        assert_eq!(cfg.instances[1].sliding_window_size, 10);
        assert_eq!(cfg.store.retry_count, 5);
        assert_eq!(cfg.pool.sweep_interval_ms, 1000);
    }

    #[test]
    fn test_json_manifest_with_ip_map() {
        let content = r#"{
            "instances": [{ "instance_id": "a", "run_hdmap": true }],
            "store": { "ip_map": { "172.17.0.2": "127.0.0.1" } }
        }"#;
        let cfg = parse(content, ConfigFormat::Json).unwrap();
        assert!(cfg.instances[0].run_hdmap);
        assert_eq!(cfg.store.mapped_host("172.17.0.2"), "127.0.0.1");
    }

    #[test]
    fn test_toml_error_reports_position() {
        let content = "[store]\nport = 7000\n\n[[instances]]\nmax_vehicles = \"many\"\n";
        let msg = message(parse(content, ConfigFormat::Toml).unwrap_err());
        assert!(msg.starts_with("TOML config invalid at 5:"), "{msg}");
    }

    #[test]
    fn test_json_error_reports_position() {
        let content = "{\n  \"instances\": [\n    { \"instance_id\": 7 }\n  ]\n}";
        let msg = message(parse(content, ConfigFormat::Json).unwrap_err());
        assert!(msg.starts_with("JSON config invalid at 3:"), "{msg}");
    }

    #[test]
    fn test_position_from_offset() {
        let content = "ab\ncde\nf";
        assert_eq!(
            Position::at_offset(content, 0),
            Position { line: 1, column: 1 }
        );
        assert_eq!(
            Position::at_offset(content, 5),
            Position { line: 2, column: 3 }
        );
        assert_eq!(
            Position::at_offset(content, 100),
            Position { line: 3, column: 2 }
        );
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(ConfigFormat::from_extension("TOML"), Some(ConfigFormat::Toml));
        assert_eq!(ConfigFormat::from_extension("json"), Some(ConfigFormat::Json));
        assert_eq!(ConfigFormat::from_extension("yaml"), None);
    }
}
