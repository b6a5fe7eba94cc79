//! Run statistics.

use std::time::Duration;

use contracts::DestinationId;
use dispatcher::MetricsSnapshot;
use observability::PublishMetricsAggregator;

/// Statistics from a publisher run
#[derive(Debug, Clone, Default)]
pub struct RunStats {
    /// Input lines read (blank lines excluded)
    pub lines_read: u64,

    /// Lines that were not a JSON object
    pub invalid_lines: u64,

    /// Records still buffered when the run ended
    pub cache_size_at_exit: usize,

    /// Total duration of the run
    pub duration: Duration,

    /// Cache and trigger aggregates
    pub publish_metrics: PublishMetricsAggregator,

    /// Final per-destination dispatch counters
    pub dispatch: Vec<(DestinationId, MetricsSnapshot)>,
}

impl RunStats {
    /// Records appended per second
    pub fn append_rate(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.publish_metrics.total_appended as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Print detailed summary
    pub fn print_summary(&self) {
        println!("\n=== Run Statistics ===\n");
        println!("Duration: {:.2}s", self.duration.as_secs_f64());
        println!("Lines read: {}", self.lines_read);
        println!("Invalid lines: {}", self.invalid_lines);
        println!("Append rate: {:.2}/s", self.append_rate());
        println!("Records buffered at exit: {}", self.cache_size_at_exit);

        println!("\n{}", self.publish_metrics.summary());

        if !self.dispatch.is_empty() {
            println!("Dispatch:");
            for (destination, snapshot) in &self.dispatch {
                println!("  {destination}: {snapshot}");
            }
        }

        println!();
    }
}
