//! 配置校验模块
//!
//! 校验规则：
//! - 至少一个目的地，destination id 非空且唯一
//! - interval_s > 0 且有限，max_per_interval > 0
//! - 适配器必填字段齐全 (host/topic/url/database)
//! - MQTT 启用 TLS 时必须给出 ca_certs
//! - 缓存与分发参数 > 0

use std::collections::HashSet;

use contracts::{
    positive_duration, CacheConfig, ContractError, CouchOptions, DestinationConfig,
    DispatchConfig, MqttOptions, PublisherBlueprint, SinkSettings,
};

/// 校验 PublisherBlueprint 配置
///
/// 返回第一个遇到的错误，或 Ok(())。
pub fn validate(blueprint: &PublisherBlueprint) -> Result<(), ContractError> {
    validate_destination_ids(blueprint)?;
    for destination in &blueprint.destinations {
        validate_rate(destination)?;
        validate_sink(destination)?;
    }
    validate_cache(&blueprint.cache)?;
    validate_dispatch(&blueprint.dispatch)?;
    Ok(())
}

/// 校验 destination id 唯一性
fn validate_destination_ids(blueprint: &PublisherBlueprint) -> Result<(), ContractError> {
    if blueprint.destinations.is_empty() {
        return Err(ContractError::config_validation(
            "destinations",
            "at least one destination is required",
        ));
    }

    let mut seen = HashSet::new();
    for (idx, destination) in blueprint.destinations.iter().enumerate() {
        if destination.id.trim().is_empty() {
            return Err(ContractError::config_validation(
                format!("destinations[{}].id", idx),
                "destination id cannot be empty",
            ));
        }
        if !seen.insert(destination.id.as_str()) {
            return Err(ContractError::config_validation(
                format!("destinations[id={}]", destination.id),
                "duplicate destination id",
            ));
        }
    }
    Ok(())
}

/// 校验发布间隔与配额
fn validate_rate(destination: &DestinationConfig) -> Result<(), ContractError> {
    destination.interval()?;
    if destination.max_per_interval == 0 {
        return Err(ContractError::config_validation(
            format!("destinations[id={}].max_per_interval", destination.id),
            "max_per_interval must be > 0",
        ));
    }
    Ok(())
}

fn validate_sink(destination: &DestinationConfig) -> Result<(), ContractError> {
    let prefix = format!("destinations[id={}].sink", destination.id);
    match &destination.sink {
        SinkSettings::Mqtt(opts) => validate_mqtt(&prefix, opts),
        SinkSettings::Couchdb(opts) => validate_couch(&prefix, opts),
        SinkSettings::Log(_) => Ok(()),
    }
}

fn validate_mqtt(prefix: &str, opts: &MqttOptions) -> Result<(), ContractError> {
    require_non_empty(prefix, "hostname", &opts.hostname)?;
    require_non_empty(prefix, "topic", &opts.topic)?;
    if opts.topic.contains(['+', '#']) {
        return Err(ContractError::config_validation(
            format!("{prefix}.topic"),
            "wildcards are not allowed in a publish topic",
        ));
    }
    if opts.port == 0 {
        return Err(ContractError::config_validation(
            format!("{prefix}.port"),
            "port must be > 0",
        ));
    }
    if let Some(auth) = &opts.auth {
        require_non_empty(prefix, "auth.username", &auth.username)?;
    }
    if let Some(tls) = &opts.tls {
        require_non_empty(prefix, "tls.ca_certs", &tls.ca_certs)?;
    }
    require_positive(prefix, "timeout_s", opts.timeout_s)
}

fn validate_couch(prefix: &str, opts: &CouchOptions) -> Result<(), ContractError> {
    require_non_empty(prefix, "url", &opts.url)?;
    if !(opts.url.starts_with("http://") || opts.url.starts_with("https://")) {
        return Err(ContractError::config_validation(
            format!("{prefix}.url"),
            format!("url must start with http:// or https://, got '{}'", opts.url),
        ));
    }
    require_non_empty(prefix, "database", &opts.database)?;
    require_positive(prefix, "timeout_s", opts.timeout_s)
}

/// 校验缓存配置
fn validate_cache(cache: &CacheConfig) -> Result<(), ContractError> {
    if cache.max_records == Some(0) {
        return Err(ContractError::config_validation(
            "cache.max_records",
            "max_records must be > 0 when set",
        ));
    }
    if let Some(tick) = cache.tick_interval_s {
        require_positive("cache", "tick_interval_s", tick)?;
    }
    Ok(())
}

/// 校验分发配置
fn validate_dispatch(dispatch: &DispatchConfig) -> Result<(), ContractError> {
    if dispatch.queue_capacity == 0 {
        return Err(ContractError::config_validation(
            "dispatch.queue_capacity",
            "queue_capacity must be > 0",
        ));
    }
    if dispatch.workers == 0 {
        return Err(ContractError::config_validation(
            "dispatch.workers",
            "workers must be > 0",
        ));
    }
    Ok(())
}

fn require_non_empty(prefix: &str, field: &str, value: &str) -> Result<(), ContractError> {
    if value.trim().is_empty() {
        return Err(ContractError::config_validation(
            format!("{prefix}.{field}"),
            format!("{field} cannot be empty"),
        ));
    }
    Ok(())
}

fn require_positive(prefix: &str, field: &str, value: f64) -> Result<(), ContractError> {
    if positive_duration(value).is_none() {
        return Err(ContractError::config_validation(
            format!("{prefix}.{field}"),
            format!("{field} must be at least 1ns, got {value}"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{ConfigVersion, LogOptions, MqttAuth, TlsOptions};

    fn mqtt_options() -> MqttOptions {
        MqttOptions {
            hostname: "broker.local".into(),
            port: 1883,
            client_id: "pub".into(),
            topic: "records".into(),
            auth: None,
            tls: None,
            keepalive_s: 60,
            timeout_s: 10.0,
        }
    }

    fn couch_options() -> CouchOptions {
        CouchOptions {
            url: "https://account.cloudant.com".into(),
            database: "test".into(),
            username: "account".into(),
            password: "".into(),
            timeout_s: 30.0,
        }
    }

    fn minimal_blueprint() -> PublisherBlueprint {
        PublisherBlueprint {
            version: ConfigVersion::V1,
            destinations: vec![
                DestinationConfig {
                    id: "mqtt".into(),
                    interval_s: 10.0,
                    max_per_interval: 20,
                    sink: SinkSettings::Mqtt(mqtt_options()),
                },
                DestinationConfig {
                    id: "cloudant".into(),
                    interval_s: 20.0,
                    max_per_interval: 30,
                    sink: SinkSettings::Couchdb(couch_options()),
                },
            ],
            cache: CacheConfig::default(),
            dispatch: DispatchConfig::default(),
        }
    }

    fn field_of(err: ContractError) -> String {
        match err {
            ContractError::ConfigValidation { field, .. } => field,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_valid_blueprint() {
        assert!(validate(&minimal_blueprint()).is_ok());
    }

    #[test]
    fn test_no_destinations() {
        let mut bp = minimal_blueprint();
        bp.destinations.clear();
        assert_eq!(field_of(validate(&bp).unwrap_err()), "destinations");
    }

    #[test]
    fn test_duplicate_destination_id() {
        let mut bp = minimal_blueprint();
        bp.destinations[1].id = "mqtt".into();
        let err = validate(&bp).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_empty_destination_id() {
        let mut bp = minimal_blueprint();
        bp.destinations[0].id = " ".into();
        assert_eq!(field_of(validate(&bp).unwrap_err()), "destinations[0].id");
    }

    #[test]
    fn test_non_positive_interval() {
        let mut bp = minimal_blueprint();
        bp.destinations[0].interval_s = 0.0;
        assert_eq!(
            field_of(validate(&bp).unwrap_err()),
            "destinations[id=mqtt].interval_s"
        );
    }

    #[test]
    fn test_zero_max_per_interval() {
        let mut bp = minimal_blueprint();
        bp.destinations[1].max_per_interval = 0;
        assert_eq!(
            field_of(validate(&bp).unwrap_err()),
            "destinations[id=cloudant].max_per_interval"
        );
    }

    #[test]
    fn test_mqtt_tls_requires_ca_certs() {
        let mut bp = minimal_blueprint();
        let mut opts = mqtt_options();
        opts.tls = Some(TlsOptions {
            ca_certs: "/etc/certs.pem".into(),
        });
        bp.destinations[0].sink = SinkSettings::Mqtt(opts.clone());
        assert!(validate(&bp).is_ok());

        opts.tls = Some(TlsOptions {
            ca_certs: "".into(),
        });
        bp.destinations[0].sink = SinkSettings::Mqtt(opts);
        assert_eq!(
            field_of(validate(&bp).unwrap_err()),
            "destinations[id=mqtt].sink.tls.ca_certs"
        );
    }

    #[test]
    fn test_sub_nanosecond_durations_rejected() {
        let mut bp = minimal_blueprint();
        bp.cache.tick_interval_s = Some(1e-10);
        assert_eq!(field_of(validate(&bp).unwrap_err()), "cache.tick_interval_s");

        let mut bp = minimal_blueprint();
        let mut opts = mqtt_options();
        opts.timeout_s = 1e-10;
        bp.destinations[0].sink = SinkSettings::Mqtt(opts);
        assert_eq!(
            field_of(validate(&bp).unwrap_err()),
            "destinations[id=mqtt].sink.timeout_s"
        );

        let mut bp = minimal_blueprint();
        let mut opts = couch_options();
        opts.timeout_s = 1e-10;
        bp.destinations[1].sink = SinkSettings::Couchdb(opts);
        assert_eq!(
            field_of(validate(&bp).unwrap_err()),
            "destinations[id=cloudant].sink.timeout_s"
        );

        let mut bp = minimal_blueprint();
        bp.destinations[0].interval_s = 1e-10;
        assert_eq!(
            field_of(validate(&bp).unwrap_err()),
            "destinations[id=mqtt].interval_s"
        );
    }

    #[test]
    fn test_mqtt_auth_requires_username() {
        let mut bp = minimal_blueprint();
        let mut opts = mqtt_options();
        opts.auth = Some(MqttAuth {
            username: "".into(),
            password: "x".into(),
        });
        bp.destinations[0].sink = SinkSettings::Mqtt(opts);
        assert_eq!(
            field_of(validate(&bp).unwrap_err()),
            "destinations[id=mqtt].sink.auth.username"
        );
    }

    #[test]
    fn test_mqtt_wildcard_topic_rejected() {
        let mut bp = minimal_blueprint();
        let mut opts = mqtt_options();
        opts.topic = "records/#".into();
        bp.destinations[0].sink = SinkSettings::Mqtt(opts);
        assert!(validate(&bp).is_err());
    }

    #[test]
    fn test_couch_url_scheme() {
        let mut bp = minimal_blueprint();
        let mut opts = couch_options();
        opts.url = "ftp://account.cloudant.com".into();
        bp.destinations[1].sink = SinkSettings::Couchdb(opts);
        assert_eq!(
            field_of(validate(&bp).unwrap_err()),
            "destinations[id=cloudant].sink.url"
        );
    }

    #[test]
    fn test_log_sink_needs_nothing() {
        let mut bp = minimal_blueprint();
        bp.destinations[1].sink = SinkSettings::Log(LogOptions::default());
        assert!(validate(&bp).is_ok());
    }

    #[test]
    fn test_cache_and_dispatch_bounds() {
        let mut bp = minimal_blueprint();
        bp.cache.max_records = Some(0);
        assert_eq!(field_of(validate(&bp).unwrap_err()), "cache.max_records");

        let mut bp = minimal_blueprint();
        bp.cache.tick_interval_s = Some(-1.0);
        assert_eq!(field_of(validate(&bp).unwrap_err()), "cache.tick_interval_s");

        let mut bp = minimal_blueprint();
        bp.dispatch.workers = 0;
        assert_eq!(field_of(validate(&bp).unwrap_err()), "dispatch.workers");
    }
}
