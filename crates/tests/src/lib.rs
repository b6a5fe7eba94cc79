//! # Integration Tests
//!
//! 集成测试与端到端测试。
//!
//! 负责：
//! - 合约快照测试
//! - 配置 -> 缓存 -> 调度 -> 适配器 的端到端测试 (无需外部服务)

#[cfg(test)]
mod contract_tests {
    use contracts::{ConfigVersion, DispatchConfig, DropPolicy, TIMESTAMP_FIELD};

    #[test]
    fn test_contract_defaults() {
        assert_eq!(ConfigVersion::default(), ConfigVersion::V1);
        assert_eq!(TIMESTAMP_FIELD, "ts");

        let dispatch = DispatchConfig::default();
        assert_eq!(dispatch.queue_capacity, 8);
        assert_eq!(dispatch.workers, 2);
        assert_eq!(dispatch.drop_policy, DropPolicy::DropOldest);
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use cache_engine::{CachePublisher, Clock, ManualClock};
    use chrono::{TimeZone, Utc};
    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{ContractError, DestinationId, PublisherBlueprint, Record, RecordSink};
    use dispatcher::{DispatchHandle, Dispatcher};
    use serde_json::json;

    const CONFIG: &str = r#"
[[destinations]]
id = "mqtt"
interval_s = 10.0
max_per_interval = 20

[destinations.sink]
type = "log"

[[destinations]]
id = "couchdb"
interval_s = 20.0
max_per_interval = 30

[destinations.sink]
type = "log"

[dispatch]
queue_capacity = 4
workers = 1
"#;

    /// Adapter double that stores every sample it is asked to publish
    #[derive(Clone)]
    struct RecordingSink {
        name: String,
        samples: Arc<Mutex<Vec<Vec<Record>>>>,
        fail: bool,
    }

    impl RecordingSink {
        fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                samples: Arc::new(Mutex::new(Vec::new())),
                fail: false,
            }
        }

        fn samples(&self) -> Vec<Vec<Record>> {
            self.samples.lock().unwrap().clone()
        }
    }

    impl RecordSink for RecordingSink {
        fn name(&self) -> &str {
            &self.name
        }

        async fn publish(&self, records: &[Record]) -> Result<(), ContractError> {
            self.samples.lock().unwrap().push(records.to_vec());
            if self.fail {
                Err(ContractError::destination(&self.name, "remote unavailable"))
            } else {
                Ok(())
            }
        }
    }

    struct Harness {
        clock: ManualClock,
        publisher: CachePublisher,
        dispatcher: Dispatcher,
        sinks: HashMap<DestinationId, RecordingSink>,
    }

    fn harness(blueprint: &PublisherBlueprint, failing: &[&str]) -> Harness {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2018, 6, 1, 12, 0, 0).unwrap());

        let mut sinks = HashMap::new();
        let mut handles = Vec::new();
        for destination in &blueprint.destinations {
            let mut sink = RecordingSink::new(&destination.id);
            sink.fail = failing.contains(&destination.id.as_str());
            sinks.insert(destination.id.clone(), sink.clone());
            handles.push(DispatchHandle::spawn(
                destination.id.clone(),
                sink,
                &blueprint.dispatch,
            ));
        }
        let dispatcher = Dispatcher::with_handles(handles).unwrap();

        let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());
        let publisher =
            CachePublisher::from_blueprint(blueprint, dispatcher.senders(), shared_clock).unwrap();

        Harness {
            clock,
            publisher,
            dispatcher,
            sinks,
        }
    }

    fn load() -> PublisherBlueprint {
        ConfigLoader::load_from_str(CONFIG, ConfigFormat::Toml).unwrap()
    }

    /// Two destinations (10 s / 20 and 20 s / 30), records every 0.5 s
    #[tokio::test]
    async fn test_e2e_two_destination_schedule() {
        let blueprint = load();
        let mut h = harness(&blueprint, &[]);

        // 19 records over 9 s: nothing is due yet
        for i in 0..19 {
            let report = h.publisher.append(json!({"f": i, "g": 2})).unwrap();
            assert!(report.triggers.is_empty());
            h.clock.advance(Duration::from_millis(500));
        }

        // Keep writing through 21 s
        let mut clears = 0;
        for i in 19..43 {
            let report = h.publisher.append(json!({"f": i})).unwrap();
            if report.cleared.is_some() {
                clears += 1;
            }
            h.clock.advance(Duration::from_millis(500));
        }
        assert_eq!(clears, 1);

        let finals = h.dispatcher.shutdown().await;
        assert!(finals.iter().all(|(_, m)| m.failure_count == 0));

        let mqtt = h.sinks["mqtt"].samples();
        let couch = h.sinks["couchdb"].samples();

        // mqtt fired at ~10 s and ~20 s, couchdb once at ~20 s
        assert_eq!(mqtt.len(), 2);
        assert_eq!(couch.len(), 1);

        // At 10.5 s: 22 buffered, budget 21, so every 2nd record from the oldest
        let first: Vec<i64> = mqtt[0]
            .iter()
            .map(|r| r.get("f").and_then(|v| v.as_i64()).unwrap())
            .collect();
        assert_eq!(first, (0..22).step_by(2).collect::<Vec<_>>());

        // couchdb sees the whole window, within its budget
        assert!(couch[0].len() <= 30);
        assert!(couch[0].len() > 20);

        // Every forwarded record carries its ingestion timestamp
        for record in mqtt.iter().chain(couch.iter()).flatten() {
            let ts = record.timestamp().unwrap();
            assert_eq!(ts.len(), "2018-06-01T12:00:00.000000".len());
            assert!(ts.starts_with("2018-06-01T12:00:"));
        }
    }

    /// A flood of records is thinned to roughly the per-interval budget
    #[tokio::test]
    async fn test_e2e_rate_limit_under_flood() {
        let blueprint = load();
        let mut h = harness(&blueprint, &[]);

        // 1000 records spread over 10 s
        for i in 0..1000 {
            h.publisher.append(json!({"seq": i})).unwrap();
            h.clock.advance(Duration::from_millis(10));
        }
        // The 1001st write lands at 10.5 s and fires mqtt with a budget of 21
        h.clock.advance(Duration::from_millis(500));
        let report = h.publisher.append(json!({"seq": 1000})).unwrap();
        assert_eq!(report.triggers.len(), 1);
        let plan = report.triggers[0].plan;
        assert_eq!(plan.backlog, 1001);
        assert_eq!(plan.dist_factor, 48);
        assert_eq!(plan.sample_size, 21);

        h.dispatcher.shutdown().await;
        let mqtt = h.sinks["mqtt"].samples();
        assert_eq!(mqtt.len(), 1);

        // Evenly strided, starting at the oldest record
        let seqs: Vec<i64> = mqtt[0]
            .iter()
            .map(|r| r.get("seq").and_then(|v| v.as_i64()).unwrap())
            .collect();
        assert_eq!(seqs.len(), 21);
        assert_eq!(seqs[0], 0);
        assert_eq!(seqs[1], 48);
        assert_eq!(*seqs.last().unwrap(), 960);
    }

    /// Failing adapters never block appends nor stop the full clear
    #[tokio::test]
    async fn test_e2e_failing_destination_is_isolated() {
        let blueprint = load();
        let mut h = harness(&blueprint, &["mqtt", "couchdb"]);

        let mut cleared = false;
        for i in 0..45 {
            let report = h.publisher.append(json!({"i": i})).unwrap();
            cleared |= report.cleared.is_some();
            h.clock.advance(Duration::from_millis(500));
        }
        assert!(cleared);

        let finals = h.dispatcher.shutdown().await;
        let failures: u64 = finals.iter().map(|(_, m)| m.failure_count).sum();
        assert_eq!(failures, 3);

        // Each failed sample was attempted exactly once
        assert_eq!(h.sinks["mqtt"].samples().len(), 2);
        assert_eq!(h.sinks["couchdb"].samples().len(), 1);
    }

    /// Records already offered to a destination are never offered again
    #[tokio::test]
    async fn test_e2e_no_record_sent_twice_to_one_destination() {
        let blueprint = load();
        let mut h = harness(&blueprint, &[]);

        // 30 s of writes: mqtt fires at 10.5 s and 21 s
        for i in 0..60 {
            h.publisher.append(json!({"i": i})).unwrap();
            h.clock.advance(Duration::from_millis(500));
        }

        h.dispatcher.shutdown().await;
        let mqtt = h.sinks["mqtt"].samples();
        assert_eq!(mqtt.len(), 2);
        let mut seen: Vec<String> = mqtt
            .iter()
            .flatten()
            .map(|r| r.timestamp().unwrap().to_string())
            .collect();
        let total = seen.len();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), total);
    }
}
