//! CachePublisher - the producer-facing entry point.
//!
//! Every append stamps and buffers the record, then runs the scheduler on the
//! caller's thread. Samples leave through [`SampleDispatch`] without waiting
//! on any network I/O.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use contracts::{
    CacheConfig, ContractError, DestinationId, PublisherBlueprint, Record, RecordKey,
    SampleDispatch,
};
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::cache::RecordCache;
use crate::clock::Clock;
use crate::distributor::DistributionPlan;
use crate::scheduler::{DestinationState, Evaluation, Scheduler};

/// Everything needed to schedule one destination
pub struct DestinationSpec {
    pub id: DestinationId,
    pub interval: Duration,
    pub max_per_interval: u64,
    pub dispatch: Box<dyn SampleDispatch>,
}

/// What a fired trigger did
#[derive(Debug, Clone)]
pub struct TriggerReport {
    pub destination: DestinationId,
    pub elapsed: Duration,
    pub plan: DistributionPlan,
    /// `None` if the sample was empty, otherwise whether dispatch took it
    pub accepted: Option<bool>,
}

/// Outcome of one `append`
#[derive(Debug, Clone)]
pub struct AppendReport {
    /// Key the record was stored under
    pub key: RecordKey,
    /// Cache size after evictions, triggers and clear
    pub cache_size: usize,
    pub triggers: Vec<TriggerReport>,
    /// Entries dropped by the full clear, if it fired
    pub cleared: Option<usize>,
    /// Entries evicted by the size limit
    pub evicted: usize,
}

/// Outcome of one timer-driven `tick`
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub cache_size: usize,
    pub triggers: Vec<TriggerReport>,
    pub cleared: Option<usize>,
}

/// Buffers records and forwards rate-limited samples to each destination
pub struct CachePublisher {
    cache: RecordCache,
    scheduler: Scheduler,
    dispatchers: HashMap<DestinationId, Box<dyn SampleDispatch>>,
    destination_ids: Vec<DestinationId>,
    clock: Arc<dyn Clock>,
}

impl CachePublisher {
    /// # Errors
    /// [`ContractError::ConfigValidation`] for an empty or duplicated
    /// destination set, zero intervals or zero budgets.
    pub fn new(
        destinations: Vec<DestinationSpec>,
        cache: &CacheConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ContractError> {
        let now = clock.now();
        let mut states = Vec::with_capacity(destinations.len());
        let mut dispatchers = HashMap::with_capacity(destinations.len());
        let mut destination_ids = Vec::with_capacity(destinations.len());

        for spec in destinations {
            states.push(DestinationState::new(
                spec.id.clone(),
                spec.interval,
                spec.max_per_interval,
                now,
            ));
            destination_ids.push(spec.id.clone());
            dispatchers.insert(spec.id, spec.dispatch);
        }

        let scheduler = Scheduler::new(states)?;
        if cache.max_records == Some(0) {
            return Err(ContractError::config_validation(
                "cache.max_records",
                "max_records must be > 0 when set",
            ));
        }

        info!(
            destinations = ?destination_ids,
            clears_with = %scheduler.clear_destination().id(),
            max_records = ?cache.max_records,
            "CachePublisher initialized"
        );

        Ok(Self {
            cache: RecordCache::with_limit(cache.max_records),
            scheduler,
            dispatchers,
            destination_ids,
            clock,
        })
    }

    /// Build from a loaded configuration, pairing each destination with its
    /// dispatcher by id
    pub fn from_blueprint(
        blueprint: &PublisherBlueprint,
        mut dispatchers: HashMap<DestinationId, Box<dyn SampleDispatch>>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ContractError> {
        let mut specs = Vec::with_capacity(blueprint.destinations.len());
        for destination in &blueprint.destinations {
            let interval = destination.interval()?;
            let dispatch = dispatchers.remove(destination.id.as_str()).ok_or_else(|| {
                ContractError::config_validation(
                    format!("destinations[id={}]", destination.id),
                    "no dispatcher registered for destination",
                )
            })?;

            info!(
                destination = %destination.id,
                interval_s = destination.interval_s,
                max_per_interval = destination.max_per_interval,
                sink = %destination.sink.describe(),
                "Destination configured"
            );

            specs.push(DestinationSpec {
                id: destination.id.clone(),
                interval,
                max_per_interval: destination.max_per_interval,
                dispatch,
            });
        }

        Self::new(specs, &blueprint.cache, clock)
    }

    /// Buffer one producer payload and run the triggers
    ///
    /// # Errors
    /// [`ContractError::InvalidInput`] if `value` is not a JSON object. The
    /// cache and every trigger are left untouched.
    pub fn append(&mut self, value: Value) -> Result<AppendReport, ContractError> {
        let record = Record::try_from_value(value)?;
        Ok(self.append_record(record))
    }

    /// Buffer an already-validated record and run the triggers
    #[instrument(level = "trace", name = "cache_publisher_append", skip_all)]
    pub fn append_record(&mut self, record: Record) -> AppendReport {
        let now = self.clock.now();
        let key = self.cache.insert(record, now);
        observability::record_append(self.cache.len());

        let evicted = self.cache.evict_to_limit(&self.destination_ids).len();
        if evicted > 0 {
            observability::record_evictions(evicted);
            warn!(
                evicted,
                max_records = ?self.cache.max_records(),
                "Cache limit reached, evicted oldest records"
            );
        }

        let (triggers, cleared) = self.run_scheduler(now);

        AppendReport {
            key,
            cache_size: self.cache.len(),
            triggers,
            cleared,
            evicted,
        }
    }

    /// Run the triggers without a new record
    pub fn tick(&mut self) -> TickReport {
        let now = self.clock.now();
        let (triggers, cleared) = self.run_scheduler(now);
        TickReport {
            cache_size: self.cache.len(),
            triggers,
            cleared,
        }
    }

    fn run_scheduler(&mut self, now: DateTime<Utc>) -> (Vec<TriggerReport>, Option<usize>) {
        let Evaluation { triggers, cleared } = self.scheduler.evaluate(now, &mut self.cache);

        if let Some(dropped) = cleared {
            observability::record_cache_cleared(dropped);
        }

        let reports = triggers
            .into_iter()
            .map(|trigger| {
                observability::record_trigger(
                    &trigger.destination,
                    trigger.plan.backlog,
                    trigger.plan.dist_factor,
                    trigger.plan.sample_size,
                );

                let accepted = trigger.batch.map(|batch| self.dispatch(batch));
                TriggerReport {
                    destination: trigger.destination,
                    elapsed: trigger.elapsed,
                    plan: trigger.plan,
                    accepted,
                }
            })
            .collect();

        (reports, cleared)
    }

    fn dispatch(&self, batch: contracts::PublishBatch) -> bool {
        let destination = batch.destination.clone();
        let Some(dispatcher) = self.dispatchers.get(&destination) else {
            // Unreachable by construction: every scheduled id has a dispatcher
            warn!(destination = %destination, "No dispatcher for destination, sample dropped");
            return false;
        };

        let records = batch.len();
        let accepted = dispatcher.dispatch(batch);
        if accepted {
            info!(destination = %destination, records, "Sample handed to publisher");
        } else {
            observability::record_batch_rejected(&destination);
            warn!(destination = %destination, records, "Dispatcher rejected sample");
        }
        accepted
    }

    pub fn cache(&self) -> &RecordCache {
        &self.cache
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Destination ids in declaration order
    pub fn destinations(&self) -> &[DestinationId] {
        &self.destination_ids
    }
}
