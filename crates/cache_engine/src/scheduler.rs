//! Per-destination publish triggers and the full-cache clear.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use contracts::{ContractError, DestinationId, PublishBatch, Record, RecordKey};
use tracing::{debug, info};

use crate::cache::RecordCache;
use crate::distributor::DistributionPlan;

/// Publish bookkeeping for one destination
#[derive(Debug, Clone)]
pub struct DestinationState {
    id: DestinationId,
    interval: Duration,
    max_per_interval: u64,
    /// Updated only when a trigger fires
    last_publish: DateTime<Utc>,
}

impl DestinationState {
    pub fn new(
        id: DestinationId,
        interval: Duration,
        max_per_interval: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            interval,
            max_per_interval,
            last_publish: now,
        }
    }

    /// Time since the last trigger; a clock that stepped backwards reads as zero
    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_publish).to_std().unwrap_or(Duration::ZERO)
    }

    /// Strictly more than one interval has passed
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.elapsed(now) > self.interval
    }

    pub fn id(&self) -> &DestinationId {
        &self.id
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn max_per_interval(&self) -> u64 {
        self.max_per_interval
    }

    pub fn last_publish(&self) -> DateTime<Utc> {
        self.last_publish
    }
}

/// A fired trigger
#[derive(Debug)]
pub struct Trigger {
    pub destination: DestinationId,
    pub elapsed: Duration,
    pub plan: DistributionPlan,
    /// None when there was nothing unattempted to send
    pub batch: Option<PublishBatch>,
}

/// Result of one scheduler pass
#[derive(Debug, Default)]
pub struct Evaluation {
    pub triggers: Vec<Trigger>,
    /// Entries dropped by the full clear, if it fired
    pub cleared: Option<usize>,
}

/// Write-driven publish scheduler
#[derive(Debug)]
pub struct Scheduler {
    destinations: Vec<DestinationState>,
    /// Destination whose interval governs the full clear
    clear_index: usize,
}

impl Scheduler {
    /// # Errors
    /// Rejects an empty destination list, duplicate ids, zero intervals and
    /// zero budgets.
    pub fn new(destinations: Vec<DestinationState>) -> Result<Self, ContractError> {
        if destinations.is_empty() {
            return Err(ContractError::config_validation(
                "destinations",
                "at least one destination is required",
            ));
        }

        let mut seen = HashSet::new();
        for state in &destinations {
            if !seen.insert(state.id.clone()) {
                return Err(ContractError::config_validation(
                    format!("destinations[id={}]", state.id),
                    "duplicate destination id",
                ));
            }
            if state.interval.is_zero() {
                return Err(ContractError::config_validation(
                    format!("destinations[id={}].interval_s", state.id),
                    "interval must be > 0",
                ));
            }
            if state.max_per_interval == 0 {
                return Err(ContractError::config_validation(
                    format!("destinations[id={}].max_per_interval", state.id),
                    "max_per_interval must be > 0",
                ));
            }
        }

        // Longest interval wins; on a tie the later-declared destination does
        let clear_index = destinations
            .iter()
            .enumerate()
            .max_by_key(|(_, state)| state.interval)
            .map(|(idx, _)| idx)
            .unwrap_or(0);

        Ok(Self {
            destinations,
            clear_index,
        })
    }

    pub fn destinations(&self) -> &[DestinationState] {
        &self.destinations
    }

    /// Destination whose interval governs the full clear
    pub fn clear_destination(&self) -> &DestinationState {
        &self.destinations[self.clear_index]
    }

    /// Evaluate every destination, then the full clear.
    ///
    /// Whether the clear is due is decided from the clearing destination's
    /// `last_publish` as it stood before this pass.
    pub fn evaluate(&mut self, now: DateTime<Utc>, cache: &mut RecordCache) -> Evaluation {
        let clear_due = self.clear_destination().is_due(now);

        let triggers = self
            .destinations
            .iter_mut()
            .filter_map(|state| Self::evaluate_destination(state, now, cache))
            .collect();

        let cleared = clear_due.then(|| {
            let dropped = cache.clear();
            info!(
                destination = %self.destinations[self.clear_index].id,
                dropped,
                "Longest publish interval elapsed, cache cleared"
            );
            dropped
        });

        Evaluation { triggers, cleared }
    }

    fn evaluate_destination(
        state: &mut DestinationState,
        now: DateTime<Utc>,
        cache: &mut RecordCache,
    ) -> Option<Trigger> {
        let elapsed = state.elapsed(now);
        if elapsed <= state.interval {
            return None;
        }

        let (plan, batch) = {
            let backlog: Vec<(RecordKey, &Record)> = cache.unattempted_for(&state.id).collect();
            let plan = DistributionPlan::compute(
                backlog.len(),
                elapsed,
                state.interval,
                state.max_per_interval,
            );
            debug!(
                destination = %state.id,
                backlog = plan.backlog,
                elapsed_s = elapsed.as_secs_f64(),
                dist_factor = plan.dist_factor,
                "Distribution calculated"
            );

            let batch = (!plan.is_empty()).then(|| {
                let (keys, records): (Vec<RecordKey>, Vec<Record>) = plan
                    .select(&backlog)
                    .map(|(key, record)| (*key, Record::clone(record)))
                    .unzip();
                PublishBatch {
                    destination: state.id.clone(),
                    records,
                    keys,
                    triggered_at: now,
                    backlog: plan.backlog,
                    dist_factor: plan.dist_factor,
                }
            });
            (plan, batch)
        };

        match &batch {
            Some(batch) => {
                cache.mark_attempted(&batch.keys, &state.id);
                info!(
                    destination = %state.id,
                    sample = batch.len(),
                    backlog = plan.backlog,
                    cache_size = cache.len(),
                    "Publish interval reached, sample selected"
                );
            }
            None => {
                info!(destination = %state.id, "No data to publish, skipping dispatch");
            }
        }

        state.last_publish = now;

        Some(Trigger {
            destination: state.id.clone(),
            elapsed,
            plan,
            batch,
        })
    }
}
