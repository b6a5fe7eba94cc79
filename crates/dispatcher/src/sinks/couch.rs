//! CouchSink - CouchDB / Cloudant `_bulk_docs` writer

use std::time::Duration;

use contracts::{positive_duration, ContractError, CouchOptions, Record, RecordSink};
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

/// Sink that stores a sample as documents in one database
pub struct CouchSink {
    name: String,
    options: CouchOptions,
    endpoint: String,
    timeout: Duration,
}

impl CouchSink {
    /// # Errors
    /// [`ContractError::Destination`] if the timeout is not a positive
    /// number of seconds.
    pub fn new(name: impl Into<String>, options: CouchOptions) -> Result<Self, ContractError> {
        let name = name.into();
        let timeout = positive_duration(options.timeout_s).ok_or_else(|| {
            ContractError::destination(&name, format!("invalid timeout_s {}", options.timeout_s))
        })?;
        let endpoint = bulk_docs_url(&options.url, &options.database);

        Ok(Self {
            name,
            options,
            endpoint,
            timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn err(&self, message: impl Into<String>) -> ContractError {
        ContractError::destination(&self.name, message)
    }

    /// Per-document results: rejected documents are logged, not failed
    fn report_rejections(&self, results: &Value) -> usize {
        let Some(results) = results.as_array() else {
            return 0;
        };
        let mut rejected = 0;
        for result in results.iter().filter(|r| r.get("error").is_some()) {
            rejected += 1;
            warn!(
                sink = %self.name,
                id = %result.get("id").and_then(serde_json::Value::as_str).unwrap_or("-"),
                error = %result.get("error").and_then(serde_json::Value::as_str).unwrap_or("-"),
                reason = %result.get("reason").and_then(serde_json::Value::as_str).unwrap_or("-"),
                "Document rejected by database"
            );
        }
        rejected
    }
}

/// `{url}/{database}/_bulk_docs`, with `/` in the database name escaped
pub fn bulk_docs_url(url: &str, database: &str) -> String {
    format!(
        "{}/{}/_bulk_docs",
        url.trim_end_matches('/'),
        database.replace('/', "%2F")
    )
}

impl RecordSink for CouchSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "couch_sink_publish",
        skip(self, records),
        fields(sink = %self.name, database = %self.options.database, records = records.len())
    )]
    async fn publish(&self, records: &[Record]) -> Result<(), ContractError> {
        if records.is_empty() {
            return Ok(());
        }

        // Fresh client per call; nothing is pooled between samples
        let client = Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| self.err(format!("http client setup failed: {e}")))?;

        debug!(url = %self.endpoint, records = records.len(), "Posting bulk documents");

        let response = client
            .post(&self.endpoint)
            .basic_auth(&self.options.username, Some(&self.options.password))
            .json(&json!({ "docs": records }))
            .send()
            .await
            .map_err(|e| self.err(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.err(format!("HTTP {status}: {body}")));
        }

        let rejected = match response.json::<Value>().await {
            Ok(results) => self.report_rejections(&results),
            Err(e) => {
                debug!(sink = %self.name, error = %e, "Unparseable bulk_docs response body");
                0
            }
        };

        info!(
            sink = %self.name,
            records = records.len(),
            rejected,
            "Sent records to document store"
        );
        Ok(())
    }
}
