//! LogSink - logs sample summary via tracing

use contracts::{ContractError, Record, RecordSink};
use tracing::{debug, info, instrument};

/// Sink that logs sample summaries, for dry runs and debugging
pub struct LogSink {
    name: String,
    include_records: bool,
}

impl LogSink {
    /// Create a new LogSink with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            include_records: false,
        }
    }

    /// Also log every record at debug level
    pub fn with_records(mut self, include_records: bool) -> Self {
        self.include_records = include_records;
        self
    }

    fn log_sample_summary(&self, records: &[Record]) {
        let first = records.first().and_then(Record::timestamp).unwrap_or("-");
        let last = records.last().and_then(Record::timestamp).unwrap_or("-");

        info!(
            sink = %self.name,
            records = records.len(),
            first_ts = first,
            last_ts = last,
            "Sample received"
        );

        if self.include_records {
            for record in records {
                let rendered = serde_json::to_string(record).unwrap_or_default();
                debug!(sink = %self.name, record = %rendered, "Sample record");
            }
        }
    }
}

impl RecordSink for LogSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "log_sink_publish",
        skip(self, records),
        fields(sink = %self.name, records = records.len())
    )]
    async fn publish(&self, records: &[Record]) -> Result<(), ContractError> {
        self.log_sample_summary(records);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_log_sink_publish() {
        let sink = LogSink::new("test_log").with_records(true);
        let records = vec![
            Record::try_from_value(json!({"a": 1, "ts": "2018-06-01T12:00:00.000000"})).unwrap(),
            Record::try_from_value(json!({"a": 2})).unwrap(),
        ];

        assert!(sink.publish(&records).await.is_ok());
        assert!(sink.publish(&[]).await.is_ok());
    }

    #[test]
    fn test_log_sink_name() {
        let sink = LogSink::new("my_logger");
        assert_eq!(sink.name(), "my_logger");
    }
}
