//! RecordSink trait - destination adapter interface
//!
//! Defines the abstract interface for the downstream sinks.

use crate::{ContractError, Record};

/// Destination adapter trait
///
/// Every call owns its connection lifecycle: connect, send, tear down.
/// Implementations bound their own latency; the dispatcher imposes no timeout.
#[trait_variant::make(RecordSink: Send)]
pub trait LocalRecordSink {
    /// Sink name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Publish one sample
    ///
    /// # Errors
    /// Returns [`ContractError::Destination`] on any transport or remote failure.
    async fn publish(&self, records: &[Record]) -> Result<(), ContractError>;
}
