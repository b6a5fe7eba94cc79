//! # Dispatcher
//!
//! 样本分发模块。
//!
//! 负责：
//! - 每个目的地一个有界队列 + 发布 worker 池
//! - 调用目的地适配器 (MQTT / CouchDB / Log)
//! - 隔离慢或失败的目的地，不阻塞写入路径

pub mod dispatcher;
pub mod error;
pub mod handle;
pub mod metrics;
pub mod sinks;

pub use contracts::{PublishBatch, RecordSink, SampleDispatch};
pub use dispatcher::{create_dispatch_handle, create_dry_run_handle, Dispatcher};
pub use error::DispatcherError;
pub use handle::{DispatchHandle, DispatchSender};
pub use metrics::{DispatchMetrics, MetricsSnapshot};
pub use sinks::{bulk_docs_url, CouchSink, LogSink, MqttSink};
