//! 配置解析模块
//!
//! 支持 TOML (主要) 和 JSON (可选) 格式。

use contracts::{ContractError, PublisherBlueprint};

/// 配置文件格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// TOML 格式 (推荐)
    Toml,
    /// JSON 格式
    Json,
}

impl ConfigFormat {
    /// 从文件扩展名推断格式
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "toml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// 解析 TOML 格式配置
pub fn parse_toml(content: &str) -> Result<PublisherBlueprint, ContractError> {
    toml::from_str(content).map_err(|e| ContractError::ConfigParse {
        message: format!("TOML parse error: {e}"),
        source: Some(Box::new(e)),
    })
}

/// 解析 JSON 格式配置
pub fn parse_json(content: &str) -> Result<PublisherBlueprint, ContractError> {
    serde_json::from_str(content).map_err(|e| ContractError::ConfigParse {
        message: format!("JSON parse error: {e}"),
        source: Some(Box::new(e)),
    })
}

/// 根据格式解析配置
pub fn parse(content: &str, format: ConfigFormat) -> Result<PublisherBlueprint, ContractError> {
    match format {
        ConfigFormat::Toml => parse_toml(content),
        ConfigFormat::Json => parse_json(content),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{DropPolicy, SinkSettings};

    #[test]
    fn test_parse_toml_two_destinations() {
        let content = r#"
[[destinations]]
id = "mqtt"
interval_s = 10.0
max_per_interval = 20
[destinations.sink]
type = "mqtt"
hostname = "broker.local"
port = 1883
client_id = "publisher-1"
topic = "iot-2/evt/status/fmt/json"
[destinations.sink.auth]
username = "use-token-auth"
password = "secret"

[[destinations]]
id = "cloudant"
interval_s = 20.0
max_per_interval = 30
[destinations.sink]
type = "couchdb"
url = "https://account.cloudant.com"
database = "test"
username = "account"
password = "secret"
"#;
        let result = parse_toml(content);
        assert!(result.is_ok(), "Failed: {:?}", result.err());
        let bp = result.unwrap();
        assert_eq!(bp.destinations.len(), 2);
        assert_eq!(bp.destinations[0].id, "mqtt");
        assert!(matches!(bp.destinations[0].sink, SinkSettings::Mqtt(_)));
        assert!(matches!(bp.destinations[1].sink, SinkSettings::Couchdb(_)));
        assert_eq!(bp.dispatch.drop_policy, DropPolicy::DropOldest);
        assert!(bp.cache.max_records.is_none());
    }

    #[test]
    fn test_parse_json_minimal() {
        let content = r#"{
            "destinations": [{
                "id": "debug",
                "interval_s": 1.5,
                "max_per_interval": 5,
                "sink": { "type": "log" }
            }],
            "cache": { "max_records": 500, "tick_interval_s": 1.0 },
            "dispatch": { "workers": 4, "drop_policy": "drop_newest" }
        }"#;
        let result = parse_json(content);
        assert!(result.is_ok(), "Failed: {:?}", result.err());
        let bp = result.unwrap();
        assert_eq!(bp.cache.max_records, Some(500));
        assert_eq!(bp.dispatch.workers, 4);
        assert_eq!(bp.dispatch.queue_capacity, 8);
        assert_eq!(bp.dispatch.drop_policy, DropPolicy::DropNewest);
    }

    #[test]
    fn test_missing_interval_is_parse_error() {
        let content = r#"
[[destinations]]
id = "debug"
max_per_interval = 5
[destinations.sink]
type = "log"
"#;
        let err = parse_toml(content).unwrap_err();
        assert!(matches!(err, ContractError::ConfigParse { .. }));
        assert!(err.to_string().contains("interval_s"));
    }

    #[test]
    fn test_parse_toml_syntax_error() {
        let content = "invalid toml [[[";
        let result = parse_toml(content);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(err, ContractError::ConfigParse { .. }));
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(
            ConfigFormat::from_extension("toml"),
            Some(ConfigFormat::Toml)
        );
        assert_eq!(
            ConfigFormat::from_extension("TOML"),
            Some(ConfigFormat::Toml)
        );
        assert_eq!(
            ConfigFormat::from_extension("json"),
            Some(ConfigFormat::Json)
        );
        assert_eq!(ConfigFormat::from_extension("yaml"), None);
    }
}
