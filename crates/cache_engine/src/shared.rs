//! Thread-safe wrapper around [`CachePublisher`] plus the optional ticker.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use contracts::{ContractError, Record};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::publisher::{AppendReport, CachePublisher, TickReport};

/// Shortest period the ticker runs at
pub const MIN_TICK_PERIOD: Duration = Duration::from_millis(1);

/// Cloneable handle that serializes every append and tick through one lock
#[derive(Clone)]
pub struct SharedPublisher {
    inner: Arc<Mutex<CachePublisher>>,
}

impl SharedPublisher {
    pub fn new(publisher: CachePublisher) -> Self {
        Self {
            inner: Arc::new(Mutex::new(publisher)),
        }
    }

    pub fn append(&self, value: Value) -> Result<AppendReport, ContractError> {
        self.with(|publisher| publisher.append(value))?
    }

    pub fn append_record(&self, record: Record) -> Result<AppendReport, ContractError> {
        self.with(|publisher| publisher.append_record(record))
    }

    pub fn tick(&self) -> Result<TickReport, ContractError> {
        self.with(CachePublisher::tick)
    }

    /// Run `f` with exclusive access to the publisher
    pub fn with<R>(&self, f: impl FnOnce(&mut CachePublisher) -> R) -> Result<R, ContractError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| ContractError::Other("cache publisher lock poisoned".to_string()))?;
        Ok(f(&mut guard))
    }

    /// Periodically run the triggers so destinations still publish while the
    /// producer is silent. The first tick fires one `period` after spawning.
    /// Periods below [`MIN_TICK_PERIOD`] are raised to it.
    pub fn spawn_ticker(&self, period: Duration) -> TickerHandle {
        if period < MIN_TICK_PERIOD {
            warn!(
                requested_ns = period.as_nanos() as u64,
                "Tick period too short, using the minimum"
            );
        }
        let period = period.max(MIN_TICK_PERIOD);
        let (stop_tx, mut stop_rx) = oneshot::channel();
        let shared = self.clone();

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await;

            info!(period_ms = period.as_millis() as u64, "Ticker started");
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = interval.tick() => {
                        match shared.tick() {
                            Ok(report) if !report.triggers.is_empty() => {
                                debug!(
                                    triggers = report.triggers.len(),
                                    cache_size = report.cache_size,
                                    "Tick fired triggers"
                                );
                            }
                            Ok(_) => {}
                            Err(e) => {
                                warn!(error = %e, "Tick failed, ticker stopping");
                                break;
                            }
                        }
                    }
                }
            }
            info!("Ticker stopped");
        });

        TickerHandle {
            stop: Some(stop_tx),
            task,
        }
    }
}

/// Owner of a running ticker task
pub struct TickerHandle {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl TickerHandle {
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Err(e) = self.task.await {
            warn!(error = %e, "Ticker task join failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::publisher::tests::{t0, two_destination_publisher};
    use contracts::CacheConfig;
    use serde_json::json;

    #[test]
    fn clones_share_one_cache() {
        let clock = ManualClock::new(t0());
        let (publisher, _, _) = two_destination_publisher(&clock, CacheConfig::default());
        let shared = SharedPublisher::new(publisher);
        let other = shared.clone();

        shared.append(json!({"a": 1})).unwrap();
        other.append(json!({"a": 2})).unwrap();

        assert_eq!(shared.with(|p| p.cache().len()).unwrap(), 2);
    }

    #[test]
    fn invalid_payload_surfaces_through_the_handle() {
        let clock = ManualClock::new(t0());
        let (publisher, _, _) = two_destination_publisher(&clock, CacheConfig::default());
        let shared = SharedPublisher::new(publisher);

        let err = shared.append(json!([1, 2, 3])).unwrap_err();
        assert!(matches!(err, ContractError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn ticker_publishes_while_producer_is_silent() {
        let clock = ManualClock::new(t0());
        let (publisher, mqtt, couch) = two_destination_publisher(&clock, CacheConfig::default());
        let shared = SharedPublisher::new(publisher);
        shared.append(json!({"a": 1})).unwrap();

        let ticker = shared.spawn_ticker(Duration::from_millis(10));
        clock.advance(Duration::from_secs(25));
        tokio::time::sleep(Duration::from_millis(100)).await;
        ticker.shutdown().await;

        assert_eq!(mqtt.sizes(), vec![1]);
        assert_eq!(couch.sizes(), vec![1]);
        assert_eq!(shared.with(|p| p.cache().len()).unwrap(), 0);
    }

    #[tokio::test]
    async fn zero_period_ticker_still_runs() {
        let clock = ManualClock::new(t0());
        let (publisher, mqtt, _) = two_destination_publisher(&clock, CacheConfig::default());
        let shared = SharedPublisher::new(publisher);
        shared.append(json!({"a": 1})).unwrap();

        let ticker = shared.spawn_ticker(Duration::ZERO);
        clock.advance(Duration::from_secs(25));
        tokio::time::sleep(Duration::from_millis(100)).await;
        ticker.shutdown().await;

        assert_eq!(mqtt.sizes(), vec![1]);
    }
}
