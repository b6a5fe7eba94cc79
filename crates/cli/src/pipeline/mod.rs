//! Run pipeline: input reader, publisher and dispatch lifecycle.

mod orchestrator;
mod stats;

pub use orchestrator::{Pipeline, PipelineConfig};
pub use stats::RunStats;
