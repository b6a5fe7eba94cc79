//! PublisherBlueprint - Config Loader 输出
//!
//! 描述完整的发布配置：目的地、发布间隔与配额、缓存上限、分发工作池。

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{ContractError, DestinationId};

/// Shown in place of a password that is empty
pub const REDACTED_PASS_EMPTY: &str = "<empty>";

/// Shown in place of a password that is set
pub const REDACTED_PASS_SET: &str = "<set but redacted>";

/// 配置版本
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// 完整的发布配置蓝图
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherBlueprint {
    /// 配置版本
    #[serde(default)]
    pub version: ConfigVersion,

    /// 目的地列表 (顺序有意义：间隔相同时取后声明者作为清空依据)
    pub destinations: Vec<DestinationConfig>,

    /// 缓存配置
    #[serde(default)]
    pub cache: CacheConfig,

    /// 分发配置
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

/// 单个目的地配置
///
/// `interval_s`、`max_per_interval` 与连接参数均为必填，没有默认值。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationConfig {
    /// 唯一标识符
    pub id: DestinationId,

    /// 发布间隔 (秒)，必须 > 0
    pub interval_s: f64,

    /// 每个间隔内最多发布的记录数，必须 > 0
    pub max_per_interval: u64,

    /// 适配器参数
    pub sink: SinkSettings,
}

impl DestinationConfig {
    /// Publish interval as a `Duration`
    ///
    /// # Errors
    /// Rejects non-finite, zero and negative values.
    pub fn interval(&self) -> Result<Duration, ContractError> {
        positive_duration(self.interval_s).ok_or_else(|| {
            ContractError::config_validation(
                format!("destinations[id={}].interval_s", self.id),
                format!("interval_s must be a positive number, got {}", self.interval_s),
            )
        })
    }
}

/// 适配器类型及其参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SinkSettings {
    /// MQTT 消息代理
    Mqtt(MqttOptions),
    /// CouchDB / Cloudant 文档库
    Couchdb(CouchOptions),
    /// 日志输出
    Log(LogOptions),
}

impl SinkSettings {
    /// Adapter kind as written in configuration
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Mqtt(_) => "mqtt",
            Self::Couchdb(_) => "couchdb",
            Self::Log(_) => "log",
        }
    }

    /// One-line description with credentials redacted
    pub fn describe(&self) -> String {
        match self {
            Self::Mqtt(opts) => format!(
                "mqtt hostname: {}, port: {}, client_id: {}, topic: {}, username: {}, password: {}, tls: {}",
                opts.hostname,
                opts.port,
                opts.client_id,
                opts.topic,
                opts.auth.as_ref().map_or("<none>", |a| a.username.as_str()),
                redact(opts.auth.as_ref().map_or("", |a| a.password.as_str())),
                opts.tls.as_ref().map_or("off", |t| t.ca_certs.as_str()),
            ),
            Self::Couchdb(opts) => format!(
                "couchdb url: {}, database: {}, username: {}, password: {}",
                opts.url,
                opts.database,
                opts.username,
                redact(&opts.password),
            ),
            Self::Log(opts) => format!("log include_records: {}", opts.include_records),
        }
    }
}

/// MQTT 连接参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttOptions {
    pub hostname: String,

    pub port: u16,

    pub client_id: String,

    /// 所有记录共用的主题
    pub topic: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<MqttAuth>,

    /// TLS 参数 (None = 明文 TCP)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsOptions>,

    #[serde(default = "default_keepalive_s")]
    pub keepalive_s: u16,

    /// 单次发布的整体超时 (秒)
    #[serde(default = "default_mqtt_timeout_s")]
    pub timeout_s: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttAuth {
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// MQTT over TLS
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsOptions {
    /// PEM 格式的 CA 证书文件，用于校验 broker 证书
    pub ca_certs: String,
}

fn default_keepalive_s() -> u16 {
    60
}

fn default_mqtt_timeout_s() -> f64 {
    10.0
}

/// CouchDB / Cloudant 连接参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchOptions {
    /// 服务根地址 (http/https)
    pub url: String,

    pub database: String,

    pub username: String,

    pub password: String,

    /// 单次发布的整体超时 (秒)
    #[serde(default = "default_couch_timeout_s")]
    pub timeout_s: f64,
}

fn default_couch_timeout_s() -> f64 {
    30.0
}

/// 日志输出参数
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogOptions {
    /// 是否逐条记录样本内容 (debug 级别)
    #[serde(default)]
    pub include_records: bool,
}

/// 缓存配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    /// 缓存记录上限 (None = 不限)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_records: Option<usize>,

    /// 定时触发间隔 (秒，None = 仅由写入触发)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tick_interval_s: Option<f64>,
}

impl CacheConfig {
    /// Ticker period, if configured and valid
    pub fn tick_interval(&self) -> Option<Duration> {
        self.tick_interval_s.and_then(positive_duration)
    }
}

/// 分发配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// 每个目的地的待发队列容量
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// 每个目的地的并发发布任务数
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// 队列满时的丢弃策略
    #[serde(default)]
    pub drop_policy: DropPolicy,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            workers: default_workers(),
            drop_policy: DropPolicy::default(),
        }
    }
}

fn default_queue_capacity() -> usize {
    8
}

fn default_workers() -> usize {
    2
}

/// 丢弃策略 (队列满时)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropPolicy {
    /// 丢弃最旧的批次
    #[default]
    DropOldest,
    /// 丢弃最新的批次
    DropNewest,
}

/// Redacted rendering of a secret
pub fn redact(password: &str) -> &'static str {
    if password.is_empty() {
        REDACTED_PASS_EMPTY
    } else {
        REDACTED_PASS_SET
    }
}

/// Seconds as a `Duration`, `None` unless finite and at least one nanosecond
pub fn positive_duration(secs: f64) -> Option<Duration> {
    if secs.is_finite() && secs > 0.0 {
        Duration::try_from_secs_f64(secs)
            .ok()
            .filter(|d| !d.is_zero())
    } else {
        None
    }
}

impl PublisherBlueprint {
    /// Destination with the longest interval; ties go to the later-declared one
    pub fn longest_interval_destination(&self) -> Option<&DestinationConfig> {
        self.destinations.iter().fold(None, |best, dest| match best {
            Some(b) if b.interval_s > dest.interval_s => Some(b),
            _ => Some(dest),
        })
    }
}
