//! Subsampling of a backlog under a per-interval budget.
//!
//! `dist_factor = ceil(N / (M * (E / I)))`, floored at 1, then every
//! `dist_factor`-th unattempted record is taken starting at index 0.
//! Scaling by `E / I` keeps long-run throughput near `M` per `I` even though
//! triggers fire at irregular, write-driven instants.

use std::time::Duration;

/// Outcome of the distribution calculation for one trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DistributionPlan {
    /// Unattempted records available
    pub backlog: usize,
    /// Sampling stride (>= 1)
    pub dist_factor: usize,
    /// `ceil(backlog / dist_factor)`
    pub sample_size: usize,
}

impl DistributionPlan {
    pub fn compute(
        backlog: usize,
        elapsed: Duration,
        interval: Duration,
        max_per_interval: u64,
    ) -> Self {
        let dist_factor = dist_factor(backlog, elapsed, interval, max_per_interval);
        let sample_size = if backlog == 0 {
            0
        } else {
            backlog.div_ceil(dist_factor)
        };
        Self {
            backlog,
            dist_factor,
            sample_size,
        }
    }

    /// Selected indices into the unattempted backlog
    pub fn indices(&self) -> impl Iterator<Item = usize> {
        (0..self.backlog).step_by(self.dist_factor.max(1))
    }

    /// Pick the sample out of the backlog, preserving order
    pub fn select<'a, T>(&self, backlog: &'a [T]) -> impl Iterator<Item = &'a T> + 'a {
        backlog.iter().step_by(self.dist_factor.max(1))
    }

    pub fn is_empty(&self) -> bool {
        self.sample_size == 0
    }
}

/// Sampling stride for a backlog of `backlog` records.
///
/// A zero elapsed time means no budget has accrued yet, so only the first
/// record is taken. A zero interval means the budget is unbounded.
pub fn dist_factor(
    backlog: usize,
    elapsed: Duration,
    interval: Duration,
    max_per_interval: u64,
) -> usize {
    if backlog == 0 {
        return 1;
    }
    if interval.is_zero() {
        return 1;
    }

    let budget = max_per_interval as f64 * (elapsed.as_secs_f64() / interval.as_secs_f64());
    if budget <= 0.0 {
        return backlog;
    }

    let factor = (backlog as f64 / budget).ceil();
    if factor >= backlog as f64 {
        backlog
    } else {
        (factor as usize).max(1)
    }
}
