//! PublishBatch and SampleDispatch - scheduler to dispatcher hand-off

use chrono::{DateTime, Utc};

use crate::{DestinationId, Record, RecordKey};

/// A sample selected for one destination.
///
/// Owns deep copies of the records; nothing in it refers back to the cache.
#[derive(Debug, Clone)]
pub struct PublishBatch {
    /// Destination the sample was selected for
    pub destination: DestinationId,

    /// Selected records, in ingestion order
    pub records: Vec<Record>,

    /// Cache keys of the selected records
    pub keys: Vec<RecordKey>,

    /// Instant the trigger fired
    pub triggered_at: DateTime<Utc>,

    /// Unattempted backlog the sample was drawn from
    pub backlog: usize,

    /// Sampling stride used
    pub dist_factor: usize,
}

impl PublishBatch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Non-blocking hand-off of a batch to an isolated publisher.
///
/// Returns whether the batch was accepted. Rejection is final: the records
/// stay marked as attempted.
pub trait SampleDispatch: Send + Sync {
    fn dispatch(&self, batch: PublishBatch) -> bool;
}
