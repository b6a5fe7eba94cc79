//! # Contracts
//!
//! Frozen interface contracts, defining inter-module data structures and traits.
//! All business crates can only depend on this crate, reverse dependencies are prohibited.
//!
//! ## Time Model
//! - Records are keyed by ingestion time in UTC microseconds ([`RecordKey`])
//! - Publish intervals are wall-clock seconds

mod blueprint;
mod destination_id;
mod dispatch;
mod error;
mod record;
mod sink;

pub use blueprint::*;
pub use destination_id::DestinationId;
pub use dispatch::{PublishBatch, SampleDispatch};
pub use error::*;
pub use record::{Record, RecordKey, TIMESTAMP_FIELD};
pub use sink::*;
