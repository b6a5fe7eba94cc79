//! Pipeline orchestrator - wires input, publisher, ticker and dispatch.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use cache_engine::{AppendReport, CachePublisher, SharedPublisher, SystemClock};
use contracts::{ContractError, PublisherBlueprint};
use dispatcher::Dispatcher;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, warn};

use super::RunStats;
use crate::error::CliError;

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Validated publisher configuration
    pub blueprint: PublisherBlueprint,

    /// Ticker period (None = write-driven only)
    pub tick_interval: Option<Duration>,

    /// Swap every sink for a log sink
    pub dry_run: bool,

    /// Metrics server port (None = disabled)
    pub metrics_port: Option<u16>,
}

/// Main pipeline orchestrator
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    /// Create a new pipeline with the given configuration
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Append every line of `input` until EOF or `shutdown` resolves, then
    /// drain dispatch
    pub async fn run<R, F>(self, input: R, shutdown: F) -> Result<RunStats>
    where
        R: AsyncBufRead + Unpin,
        F: Future<Output = ()>,
    {
        let start_time = Instant::now();
        let blueprint = &self.config.blueprint;

        if let Some(port) = self.config.metrics_port {
            observability::init_metrics_only(port)?;
            info!("Metrics endpoint available on port {}", port);
        }

        let dispatcher = Dispatcher::from_blueprint(blueprint, self.config.dry_run)
            .context("Failed to start destination dispatchers")?;
        let publisher =
            CachePublisher::from_blueprint(blueprint, dispatcher.senders(), Arc::new(SystemClock))
                .context("Failed to build cache publisher")?;
        let shared = SharedPublisher::new(publisher);

        let ticker = self
            .config
            .tick_interval
            .map(|period| shared.spawn_ticker(period));

        info!(
            destinations = dispatcher.len(),
            dry_run = self.config.dry_run,
            tick_interval = ?self.config.tick_interval,
            "Pipeline started, reading records"
        );

        let mut stats = RunStats::default();
        let outcome = consume_input(input, &shared, &mut stats, shutdown).await;

        // Teardown runs whether or not the input loop failed
        if let Some(ticker) = ticker {
            ticker.shutdown().await;
        }
        stats.cache_size_at_exit = shared.with(|p| p.cache().len()).unwrap_or_default();
        stats.dispatch = dispatcher.shutdown().await;
        stats.duration = start_time.elapsed();

        outcome?;

        info!(
            lines = stats.lines_read,
            invalid = stats.invalid_lines,
            buffered = stats.cache_size_at_exit,
            duration_secs = stats.duration.as_secs_f64(),
            "Pipeline finished"
        );
        Ok(stats)
    }
}

async fn consume_input<R, F>(
    input: R,
    shared: &SharedPublisher,
    stats: &mut RunStats,
    shutdown: F,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    F: Future<Output = ()>,
{
    let mut lines = input.lines();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                warn!("Received shutdown signal, stopping input");
                return Ok(());
            }
            line = lines.next_line() => {
                match line.map_err(CliError::from)? {
                    Some(line) => ingest_line(&line, shared, stats)?,
                    None => {
                        info!("Input exhausted");
                        return Ok(());
                    }
                }
            }
        }
    }
}

fn ingest_line(line: &str, shared: &SharedPublisher, stats: &mut RunStats) -> Result<()> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(());
    }
    stats.lines_read += 1;

    let value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(e) => {
            stats.invalid_lines += 1;
            stats.publish_metrics.on_invalid_input();
            warn!(line = stats.lines_read, error = %e, "Skipping line that is not valid JSON");
            return Ok(());
        }
    };

    match shared.append(value) {
        Ok(report) => {
            record_report(&report, stats);
            Ok(())
        }
        Err(ContractError::InvalidInput { found }) => {
            stats.invalid_lines += 1;
            stats.publish_metrics.on_invalid_input();
            warn!(line = stats.lines_read, found = %found, "Skipping line that is not a JSON object");
            Ok(())
        }
        Err(e) => Err(e).context("Cache publisher failed"),
    }
}

fn record_report(report: &AppendReport, stats: &mut RunStats) {
    let aggregate = &mut stats.publish_metrics;
    aggregate.on_append();
    if report.evicted > 0 {
        aggregate.on_evicted(report.evicted);
    }
    for trigger in &report.triggers {
        aggregate.on_trigger(
            &trigger.destination,
            trigger.plan.backlog,
            trigger.plan.dist_factor,
            trigger.plan.sample_size,
            trigger.accepted,
        );
    }
    if let Some(dropped) = report.cleared {
        aggregate.on_cleared(dropped);
    }
    debug!(key = %report.key, cache_size = report.cache_size, "Line appended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::BufReader;

    fn blueprint() -> PublisherBlueprint {
        serde_json::from_value(json!({
            "destinations": [
                {"id": "fast", "interval_s": 0.05, "max_per_interval": 5, "sink": {"type": "log"}},
                {"id": "slow", "interval_s": 3600.0, "max_per_interval": 5, "sink": {"type": "log"}}
            ]
        }))
        .unwrap()
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            blueprint: blueprint(),
            tick_interval: None,
            dry_run: true,
            metrics_port: None,
        }
    }

    #[tokio::test]
    async fn reads_until_eof_and_skips_bad_lines() {
        let input: &[u8] = b"{\"a\": 1}\n\nnot json\n[1, 2]\n{\"a\": 2}\n";

        let stats = Pipeline::new(config())
            .run(input, std::future::pending())
            .await
            .unwrap();

        assert_eq!(stats.lines_read, 4);
        assert_eq!(stats.invalid_lines, 2);
        assert_eq!(stats.publish_metrics.total_appended, 2);
        assert_eq!(stats.publish_metrics.total_rejected_inputs, 2);
        assert_eq!(stats.cache_size_at_exit, 2);
        assert_eq!(stats.dispatch.len(), 2);
    }

    #[tokio::test]
    async fn shutdown_signal_stops_an_open_input() {
        let (_writer, reader) = tokio::io::duplex(64);

        let stats = Pipeline::new(config())
            .run(
                BufReader::new(reader),
                tokio::time::sleep(Duration::from_millis(50)),
            )
            .await
            .unwrap();

        assert_eq!(stats.lines_read, 0);
    }

    #[tokio::test]
    async fn ticker_flushes_while_input_is_idle() {
        let (mut writer, reader) = tokio::io::duplex(256);
        let mut config = config();
        config.tick_interval = Some(Duration::from_millis(20));

        let run = tokio::spawn(async move {
            Pipeline::new(config)
                .run(
                    BufReader::new(reader),
                    tokio::time::sleep(Duration::from_millis(300)),
                )
                .await
        });

        use tokio::io::AsyncWriteExt;
        writer.write_all(b"{\"a\": 1}\n{\"a\": 2}\n").await.unwrap();

        let stats = run.await.unwrap().unwrap();
        let (_, fast) = stats
            .dispatch
            .iter()
            .find(|(id, _)| id == "fast")
            .unwrap();
        assert!(fast.records_published >= 2);
    }
}
