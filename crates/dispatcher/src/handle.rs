//! DispatchHandle - isolated publish queue and worker pool for one destination

use std::sync::Arc;
use std::time::Instant;

use async_channel::{Receiver, Sender, TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use contracts::{DestinationId, DispatchConfig, DropPolicy, PublishBatch, RecordSink, SampleDispatch};

use crate::metrics::DispatchMetrics;

/// Cheap-to-clone enqueue side of a [`DispatchHandle`]
#[derive(Clone)]
pub struct DispatchSender {
    destination: DestinationId,
    tx: Sender<PublishBatch>,
    /// Kept so `DropOldest` can discard the head of a full queue
    rx: Receiver<PublishBatch>,
    drop_policy: DropPolicy,
    metrics: Arc<DispatchMetrics>,
}

impl DispatchSender {
    pub fn destination(&self) -> &DestinationId {
        &self.destination
    }

    pub fn metrics(&self) -> &Arc<DispatchMetrics> {
        &self.metrics
    }

    /// Enqueue a batch without waiting
    ///
    /// Returns true if the batch is queued. A full queue follows the drop
    /// policy; a closed queue rejects.
    pub fn try_send(&self, batch: PublishBatch) -> bool {
        let mut batch = batch;
        // One retry per discarded head is enough unless another sender refills
        // the slot in between.
        for _ in 0..3 {
            match self.tx.try_send(batch) {
                Ok(()) => {
                    self.metrics.set_queue_len(self.tx.len());
                    observability::record_queue_depth(&self.destination, self.tx.len());
                    return true;
                }
                Err(TrySendError::Full(rejected)) => match self.drop_policy {
                    DropPolicy::DropNewest => {
                        self.record_drop(&rejected, "Queue full, newest sample dropped");
                        return false;
                    }
                    DropPolicy::DropOldest => {
                        if let Ok(oldest) = self.rx.try_recv() {
                            self.record_drop(&oldest, "Queue full, oldest sample dropped");
                        }
                        batch = rejected;
                    }
                },
                Err(TrySendError::Closed(rejected)) => {
                    self.metrics.inc_rejected_count();
                    error!(
                        destination = %self.destination,
                        records = rejected.len(),
                        "Dispatch queue closed, sample rejected"
                    );
                    return false;
                }
            }
        }

        self.record_drop(&batch, "Queue contended, sample dropped");
        false
    }

    fn record_drop(&self, batch: &PublishBatch, message: &'static str) {
        self.metrics.inc_dropped_count();
        observability::record_queue_drop(&self.destination, batch.len());
        warn!(
            destination = %self.destination,
            records = batch.len(),
            triggered_at = %batch.triggered_at,
            "{message}"
        );
    }

    fn close(&self) -> bool {
        self.tx.close()
    }
}

impl SampleDispatch for DispatchSender {
    fn dispatch(&self, batch: PublishBatch) -> bool {
        self.try_send(batch)
    }
}

/// Handle to a running destination worker pool
pub struct DispatchHandle {
    sender: DispatchSender,
    /// Adapter name
    sink_name: String,
    workers: Vec<JoinHandle<()>>,
}

impl DispatchHandle {
    /// Create the queue and spawn `config.workers` worker tasks
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<S>(destination: DestinationId, sink: S, config: &DispatchConfig) -> Self
    where
        S: RecordSink + Sync + 'static,
    {
        let sink_name = sink.name().to_string();
        let (tx, rx) = async_channel::bounded(config.queue_capacity.max(1));
        let metrics = Arc::new(DispatchMetrics::new());
        let sink = Arc::new(sink);

        let workers = (0..config.workers.max(1))
            .map(|worker_id| {
                let sink = Arc::clone(&sink);
                let rx = rx.clone();
                let metrics = Arc::clone(&metrics);
                let destination = destination.clone();
                tokio::spawn(async move {
                    publish_worker(sink, rx, metrics, destination, worker_id).await;
                })
            })
            .collect();

        info!(
            destination = %destination,
            sink = %sink_name,
            queue_capacity = config.queue_capacity,
            workers = config.workers,
            drop_policy = ?config.drop_policy,
            "Dispatch handle started"
        );

        Self {
            sender: DispatchSender {
                destination,
                tx,
                rx,
                drop_policy: config.drop_policy,
                metrics,
            },
            sink_name,
            workers,
        }
    }

    pub fn destination(&self) -> &DestinationId {
        &self.sender.destination
    }

    pub fn sink_name(&self) -> &str {
        &self.sink_name
    }

    pub fn metrics(&self) -> &Arc<DispatchMetrics> {
        &self.sender.metrics
    }

    /// Enqueue side, to hand to the publisher
    pub fn sender(&self) -> DispatchSender {
        self.sender.clone()
    }

    /// Close the queue, drain what is left and join the workers
    #[instrument(name = "dispatch_handle_shutdown", skip(self), fields(destination = %self.sender.destination))]
    pub async fn shutdown(self) {
        self.sender.close();
        for worker in self.workers {
            if let Err(e) = worker.await {
                error!(destination = %self.sender.destination, error = ?e, "Worker task panicked");
            }
        }
        self.sender.metrics.set_queue_len(0);
        debug!(destination = %self.sender.destination, "DispatchHandle shutdown complete");
    }
}

/// Worker task that consumes batches and publishes them through the adapter
#[instrument(
    name = "dispatch_worker_loop",
    skip(sink, rx, metrics),
    fields(destination = %destination)
)]
async fn publish_worker<S>(
    sink: Arc<S>,
    rx: Receiver<PublishBatch>,
    metrics: Arc<DispatchMetrics>,
    destination: DestinationId,
    worker_id: usize,
) where
    S: RecordSink + Sync + 'static,
{
    debug!(destination = %destination, worker_id, "Dispatch worker started");

    while let Ok(batch) = rx.recv().await {
        metrics.set_queue_len(rx.len());
        observability::record_queue_depth(&destination, rx.len());

        let records = batch.len();
        let started = Instant::now();

        // A panicking adapter takes down only this attempt
        let attempt_sink = Arc::clone(&sink);
        let outcome =
            tokio::spawn(async move { attempt_sink.publish(&batch.records).await }).await;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        match outcome {
            Ok(Ok(())) => {
                metrics.inc_published(records);
                observability::record_batch_published(&destination, records, true);
                observability::record_publish_latency_ms(&destination, latency_ms);
                info!(
                    destination = %destination,
                    records,
                    latency_ms,
                    "Sample published"
                );
            }
            Ok(Err(e)) => {
                metrics.inc_failure_count();
                observability::record_batch_published(&destination, records, false);
                error!(
                    destination = %destination,
                    records,
                    error = %e,
                    "Publish failed, sample abandoned"
                );
            }
            Err(e) => {
                metrics.inc_failure_count();
                observability::record_batch_published(&destination, records, false);
                error!(
                    destination = %destination,
                    records,
                    error = ?e,
                    "Publish task panicked, sample abandoned"
                );
            }
        }
    }

    debug!(destination = %destination, worker_id, "Dispatch worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use contracts::{ContractError, Record};
    use serde_json::json;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;
    use tokio::time::{sleep, Duration};

    /// Mock sink for testing
    struct MockSink {
        published: Arc<AtomicU64>,
        seen: Arc<Mutex<Vec<usize>>>,
        should_fail: bool,
        should_panic: bool,
        delay_ms: u64,
    }

    impl MockSink {
        fn new() -> Self {
            Self {
                published: Arc::new(AtomicU64::new(0)),
                seen: Arc::new(Mutex::new(Vec::new())),
                should_fail: false,
                should_panic: false,
                delay_ms: 0,
            }
        }
    }

    impl RecordSink for MockSink {
        fn name(&self) -> &str {
            "mock"
        }

        async fn publish(&self, records: &[Record]) -> Result<(), ContractError> {
            if self.delay_ms > 0 {
                sleep(Duration::from_millis(self.delay_ms)).await;
            }
            if self.should_panic {
                panic!("adapter bug");
            }
            if self.should_fail {
                return Err(ContractError::destination("mock", "mock failure"));
            }
            self.seen.lock().unwrap().push(records.len());
            self.published.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    fn batch(n: usize) -> PublishBatch {
        let records: Vec<Record> = (0..n)
            .map(|i| Record::try_from_value(json!({ "i": i })).unwrap())
            .collect();
        PublishBatch {
            destination: "mock".into(),
            keys: Vec::new(),
            triggered_at: Utc::now(),
            backlog: n,
            dist_factor: 1,
            records,
        }
    }

    fn config(queue_capacity: usize, workers: usize, drop_policy: DropPolicy) -> DispatchConfig {
        DispatchConfig {
            queue_capacity,
            workers,
            drop_policy,
        }
    }

    #[tokio::test]
    async fn test_dispatch_handle_basic() {
        let sink = MockSink::new();
        let published = Arc::clone(&sink.published);
        let handle = DispatchHandle::spawn("mock".into(), sink, &DispatchConfig::default());
        let sender = handle.sender();

        for i in 1..=5 {
            assert!(sender.dispatch(batch(i)));
        }

        handle.shutdown().await;
        assert_eq!(published.load(Ordering::Relaxed), 5);
    }

    #[tokio::test]
    async fn test_shutdown_drains_queue() {
        let mut sink = MockSink::new();
        sink.delay_ms = 20;
        let seen = Arc::clone(&sink.seen);
        let handle = DispatchHandle::spawn(
            "mock".into(),
            sink,
            &config(4, 1, DropPolicy::DropNewest),
        );
        let sender = handle.sender();
        for i in 1..=4 {
            assert!(sender.dispatch(batch(i)));
        }

        let metrics = Arc::clone(handle.metrics());
        handle.shutdown().await;
        assert_eq!(metrics.batches_published(), 4);
        assert_eq!(metrics.records_published(), 10);
        assert_eq!(seen.lock().unwrap().len(), 4);

        // Queue is closed now
        assert!(!sender.dispatch(batch(1)));
        assert_eq!(metrics.rejected_count(), 1);
    }

    #[tokio::test]
    async fn test_drop_newest_when_full() {
        let mut sink = MockSink::new();
        sink.delay_ms = 200;
        let handle = DispatchHandle::spawn(
            "slow".into(),
            sink,
            &config(1, 1, DropPolicy::DropNewest),
        );
        let sender = handle.sender();

        assert!(sender.dispatch(batch(1)));
        // Let the worker take the first batch off the queue
        sleep(Duration::from_millis(50)).await;
        assert!(sender.dispatch(batch(2)));
        assert!(!sender.dispatch(batch(3)));
        assert_eq!(handle.metrics().dropped_count(), 1);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_drop_oldest_keeps_latest() {
        let mut sink = MockSink::new();
        sink.delay_ms = 100;
        let seen = Arc::clone(&sink.seen);
        let handle = DispatchHandle::spawn(
            "slow".into(),
            sink,
            &config(1, 1, DropPolicy::DropOldest),
        );
        let sender = handle.sender();

        assert!(sender.dispatch(batch(1)));
        sleep(Duration::from_millis(30)).await;
        // Worker busy with batch(1); queue holds one slot
        assert!(sender.dispatch(batch(2)));
        assert!(sender.dispatch(batch(3)));
        assert!(sender.dispatch(batch(4)));
        assert_eq!(handle.metrics().dropped_count(), 2);

        handle.shutdown().await;
        assert_eq!(*seen.lock().unwrap(), vec![1, 4]);
    }

    #[tokio::test]
    async fn test_failure_isolation() {
        let mut sink = MockSink::new();
        sink.should_fail = true;
        let handle = DispatchHandle::spawn("failing".into(), sink, &DispatchConfig::default());
        let sender = handle.sender();

        for i in 1..=3 {
            sender.dispatch(batch(i));
        }

        let metrics = Arc::clone(handle.metrics());
        handle.shutdown().await;
        assert_eq!(metrics.failure_count(), 3);
        assert_eq!(metrics.batches_published(), 0);
    }

    #[tokio::test]
    async fn test_panicking_adapter_does_not_kill_worker() {
        let mut sink = MockSink::new();
        sink.should_panic = true;
        let handle = DispatchHandle::spawn(
            "panicky".into(),
            sink,
            &config(8, 1, DropPolicy::DropOldest),
        );
        let sender = handle.sender();

        assert!(sender.dispatch(batch(1)));
        assert!(sender.dispatch(batch(2)));

        let metrics = Arc::clone(handle.metrics());
        handle.shutdown().await;
        // Both attempts reached the adapter on the same worker
        assert_eq!(metrics.failure_count(), 2);
    }

    #[tokio::test]
    async fn test_dispatch_does_not_wait_for_slow_sink() {
        let mut sink = MockSink::new();
        sink.delay_ms = 500;
        let handle = DispatchHandle::spawn("slow".into(), sink, &DispatchConfig::default());
        let sender = handle.sender();

        let started = Instant::now();
        for i in 1..=4 {
            sender.dispatch(batch(i));
        }
        assert!(started.elapsed() < Duration::from_millis(100));

        handle.shutdown().await;
    }
}
