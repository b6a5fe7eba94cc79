//! Dispatcher - owns one DispatchHandle per destination

use std::collections::HashMap;

use tracing::{info, instrument};

use contracts::{
    DestinationConfig, DestinationId, DispatchConfig, PublisherBlueprint, SampleDispatch,
    SinkSettings,
};

use crate::error::DispatcherError;
use crate::handle::DispatchHandle;
use crate::metrics::MetricsSnapshot;
use crate::sinks::{CouchSink, LogSink, MqttSink};

/// Create a DispatchHandle from a destination's configuration
///
/// Must be called from within a tokio runtime.
#[instrument(
    name = "dispatcher_create_dispatch_handle",
    skip(destination, dispatch),
    fields(destination = %destination.id, sink_type = destination.sink.kind())
)]
pub fn create_dispatch_handle(
    destination: &DestinationConfig,
    dispatch: &DispatchConfig,
) -> Result<DispatchHandle, DispatcherError> {
    let id = destination.id.clone();
    match &destination.sink {
        SinkSettings::Mqtt(options) => {
            let sink = MqttSink::new(id.as_str(), options.clone())
                .map_err(|e| DispatcherError::sink_creation(id.as_str(), e.to_string()))?;
            Ok(DispatchHandle::spawn(id, sink, dispatch))
        }
        SinkSettings::Couchdb(options) => {
            let sink = CouchSink::new(id.as_str(), options.clone())
                .map_err(|e| DispatcherError::sink_creation(id.as_str(), e.to_string()))?;
            Ok(DispatchHandle::spawn(id, sink, dispatch))
        }
        SinkSettings::Log(options) => {
            let sink = LogSink::new(id.as_str()).with_records(options.include_records);
            Ok(DispatchHandle::spawn(id, sink, dispatch))
        }
    }
}

/// Handle that logs instead of publishing, whatever the configured sink
pub fn create_dry_run_handle(
    destination: &DestinationConfig,
    dispatch: &DispatchConfig,
) -> DispatchHandle {
    let sink = LogSink::new(format!("{} (dry run)", destination.id));
    DispatchHandle::spawn(destination.id.clone(), sink, dispatch)
}

/// All destination handles of one publisher
pub struct Dispatcher {
    handles: Vec<DispatchHandle>,
}

impl Dispatcher {
    /// Build one handle per configured destination
    ///
    /// With `dry_run` every destination gets a [`LogSink`].
    #[instrument(name = "dispatcher_from_blueprint", skip(blueprint), fields(destinations = blueprint.destinations.len()))]
    pub fn from_blueprint(
        blueprint: &PublisherBlueprint,
        dry_run: bool,
    ) -> Result<Self, DispatcherError> {
        let mut handles = Vec::with_capacity(blueprint.destinations.len());
        for destination in &blueprint.destinations {
            let handle = if dry_run {
                create_dry_run_handle(destination, &blueprint.dispatch)
            } else {
                create_dispatch_handle(destination, &blueprint.dispatch)?
            };
            handles.push(handle);
        }
        info!(destinations = handles.len(), dry_run, "Dispatcher ready");
        Self::with_handles(handles)
    }

    /// Create a dispatcher with custom handles (for testing)
    pub fn with_handles(handles: Vec<DispatchHandle>) -> Result<Self, DispatcherError> {
        for (i, handle) in handles.iter().enumerate() {
            if handles[..i]
                .iter()
                .any(|other| other.destination() == handle.destination())
            {
                return Err(DispatcherError::DuplicateDestination(
                    handle.destination().to_string(),
                ));
            }
        }
        Ok(Self { handles })
    }

    /// Enqueue sides keyed by destination, ready for the publisher
    pub fn senders(&self) -> HashMap<DestinationId, Box<dyn SampleDispatch>> {
        self.handles
            .iter()
            .map(|h| {
                let sender: Box<dyn SampleDispatch> = Box::new(h.sender());
                (h.destination().clone(), sender)
            })
            .collect()
    }

    /// Get metrics for all destinations
    pub fn metrics(&self) -> Vec<(DestinationId, MetricsSnapshot)> {
        self.handles
            .iter()
            .map(|h| (h.destination().clone(), h.metrics().snapshot()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Close every queue and wait for in-flight publishes
    #[instrument(name = "dispatcher_shutdown", skip(self))]
    pub async fn shutdown(self) -> Vec<(DestinationId, MetricsSnapshot)> {
        let mut finals = Vec::with_capacity(self.handles.len());
        for handle in self.handles {
            let destination = handle.destination().clone();
            let metrics = std::sync::Arc::clone(handle.metrics());
            handle.shutdown().await;
            finals.push((destination, metrics.snapshot()));
        }
        info!("Dispatcher shutdown complete");
        finals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use contracts::{PublishBatch, Record};
    use serde_json::json;

    fn blueprint() -> PublisherBlueprint {
        serde_json::from_value(json!({
            "destinations": [
                {
                    "id": "mqtt",
                    "interval_s": 10.0,
                    "max_per_interval": 20,
                    "sink": {
                        "type": "mqtt",
                        "hostname": "127.0.0.1",
                        "port": 1,
                        "client_id": "c",
                        "topic": "t"
                    }
                },
                {
                    "id": "audit",
                    "interval_s": 20.0,
                    "max_per_interval": 30,
                    "sink": {"type": "log"}
                }
            ]
        }))
        .unwrap()
    }

    fn batch(destination: &str) -> PublishBatch {
        PublishBatch {
            destination: destination.into(),
            records: vec![Record::try_from_value(json!({"a": 1})).unwrap()],
            keys: Vec::new(),
            triggered_at: Utc::now(),
            backlog: 1,
            dist_factor: 1,
        }
    }

    #[tokio::test]
    async fn test_dry_run_publishes_through_log_sinks() {
        let dispatcher = Dispatcher::from_blueprint(&blueprint(), true).unwrap();
        assert_eq!(dispatcher.len(), 2);

        let senders = dispatcher.senders();
        assert!(senders["mqtt"].dispatch(batch("mqtt")));
        assert!(senders["audit"].dispatch(batch("audit")));

        let finals = dispatcher.shutdown().await;
        for (_, snapshot) in finals {
            assert_eq!(snapshot.batches_published, 1);
            assert_eq!(snapshot.failure_count, 0);
        }
    }

    #[tokio::test]
    async fn test_unreachable_broker_counts_failure() {
        let dispatcher = Dispatcher::from_blueprint(&blueprint(), false).unwrap();
        let senders = dispatcher.senders();
        assert!(senders["mqtt"].dispatch(batch("mqtt")));

        let finals = dispatcher.shutdown().await;
        let (_, mqtt) = finals.iter().find(|(id, _)| id == "mqtt").unwrap();
        assert_eq!(mqtt.failure_count, 1);
        assert_eq!(mqtt.batches_published, 0);
    }

    #[tokio::test]
    async fn test_missing_ca_certs_fails_creation() {
        let mut blueprint = blueprint();
        if let SinkSettings::Mqtt(options) = &mut blueprint.destinations[0].sink {
            options.tls = Some(contracts::TlsOptions {
                ca_certs: "/nonexistent/ca.pem".to_string(),
            });
        }

        let err = Dispatcher::from_blueprint(&blueprint, false).err().unwrap();
        assert!(matches!(err, DispatcherError::SinkCreation { .. }));
    }

    #[tokio::test]
    async fn test_duplicate_handles_rejected() {
        let config = DispatchConfig::default();
        let handles = vec![
            DispatchHandle::spawn("x".into(), LogSink::new("a"), &config),
            DispatchHandle::spawn("x".into(), LogSink::new("b"), &config),
        ];
        assert!(matches!(
            Dispatcher::with_handles(handles),
            Err(DispatcherError::DuplicateDestination(_))
        ));
    }
}
