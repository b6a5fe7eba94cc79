//! Destination adapters
//!
//! Contains MqttSink, CouchSink, and LogSink.

mod couch;
mod log;
mod mqtt;

pub use self::couch::{bulk_docs_url, CouchSink};
pub use self::log::LogSink;
pub use self::mqtt::MqttSink;
