//! 缓存发布器指标收集模块
//!
//! 写入、触发、清空、驱逐以及各目的地的发布结果。

use std::collections::BTreeMap;

use metrics::{counter, gauge, histogram};

/// 记录一次写入
pub fn record_append(cache_size: usize) {
    counter!("cache_publisher_records_appended_total").increment(1);
    gauge!("cache_publisher_cache_size").set(cache_size as f64);
}

/// 记录一次目的地触发
///
/// # Example
///
/// ```ignore
/// for trigger in evaluation.triggers {
///     record_trigger(&trigger.destination, plan.backlog, plan.dist_factor, plan.sample_size);
/// }
/// ```
pub fn record_trigger(destination: &str, backlog: usize, dist_factor: usize, sample_size: usize) {
    counter!(
        "cache_publisher_triggers_total",
        "destination" => destination.to_string()
    )
    .increment(1);

    gauge!(
        "cache_publisher_backlog",
        "destination" => destination.to_string()
    )
    .set(backlog as f64);

    histogram!(
        "cache_publisher_dist_factor",
        "destination" => destination.to_string()
    )
    .record(dist_factor as f64);

    counter!(
        "cache_publisher_records_sampled_total",
        "destination" => destination.to_string()
    )
    .increment(sample_size as u64);
}

/// 记录整表清空
pub fn record_cache_cleared(dropped: usize) {
    counter!("cache_publisher_cache_clears_total").increment(1);
    counter!("cache_publisher_records_cleared_total").increment(dropped as u64);
    gauge!("cache_publisher_cache_size").set(0.0);
}

/// 记录容量上限导致的驱逐
pub fn record_evictions(count: usize) {
    counter!("cache_publisher_records_evicted_total").increment(count as u64);
}

/// 记录调度端被拒绝的批次 (队列已满或已关闭)
pub fn record_batch_rejected(destination: &str) {
    counter!(
        "cache_publisher_batches_rejected_total",
        "destination" => destination.to_string()
    )
    .increment(1);
}

/// 记录队列满时被丢弃的旧批次
pub fn record_queue_drop(destination: &str, records: usize) {
    counter!(
        "cache_publisher_batches_dropped_total",
        "destination" => destination.to_string()
    )
    .increment(1);
    counter!(
        "cache_publisher_records_dropped_total",
        "destination" => destination.to_string()
    )
    .increment(records as u64);
}

/// 记录发布队列深度
pub fn record_queue_depth(destination: &str, depth: usize) {
    gauge!(
        "cache_publisher_queue_depth",
        "destination" => destination.to_string()
    )
    .set(depth as f64);
}

/// 记录一次发布结果
pub fn record_batch_published(destination: &str, records: usize, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "cache_publisher_batches_published_total",
        "destination" => destination.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    if success {
        counter!(
            "cache_publisher_records_published_total",
            "destination" => destination.to_string()
        )
        .increment(records as u64);
    }
}

/// 记录发布耗时
pub fn record_publish_latency_ms(destination: &str, latency_ms: f64) {
    histogram!(
        "cache_publisher_publish_latency_ms",
        "destination" => destination.to_string()
    )
    .record(latency_ms);
}

/// 发布指标聚合器
///
/// 在内存中聚合指标，便于在退出时输出摘要。
#[derive(Debug, Clone, Default)]
pub struct PublishMetricsAggregator {
    /// 写入总数
    pub total_appended: u64,

    /// 非法输入总数
    pub total_rejected_inputs: u64,

    /// 清空次数
    pub clears: u64,

    /// 被清空的记录数
    pub records_cleared: u64,

    /// 被驱逐的记录数
    pub records_evicted: u64,

    /// 各目的地统计
    pub destinations: BTreeMap<String, DestinationAggregate>,
}

/// 单个目的地的累计值
#[derive(Debug, Clone, Default)]
pub struct DestinationAggregate {
    pub triggers: u64,
    pub records_sampled: u64,
    pub batches_rejected: u64,
    pub backlog: RunningStats,
    pub dist_factor: RunningStats,
}

impl PublishMetricsAggregator {
    /// 创建新的聚合器
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_append(&mut self) {
        self.total_appended += 1;
    }

    pub fn on_invalid_input(&mut self) {
        self.total_rejected_inputs += 1;
    }

    pub fn on_evicted(&mut self, count: usize) {
        self.records_evicted += count as u64;
    }

    pub fn on_cleared(&mut self, dropped: usize) {
        self.clears += 1;
        self.records_cleared += dropped as u64;
    }

    /// `accepted` 为 `None` 表示样本为空, 未交给调度端
    pub fn on_trigger(
        &mut self,
        destination: &str,
        backlog: usize,
        dist_factor: usize,
        sample_size: usize,
        accepted: Option<bool>,
    ) {
        let entry = self.destinations.entry(destination.to_string()).or_default();
        entry.triggers += 1;
        entry.records_sampled += sample_size as u64;
        if accepted == Some(false) {
            entry.batches_rejected += 1;
        }
        entry.backlog.push(backlog as f64);
        entry.dist_factor.push(dist_factor as f64);
    }

    /// 生成摘要报告
    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            total_appended: self.total_appended,
            total_rejected_inputs: self.total_rejected_inputs,
            clears: self.clears,
            records_cleared: self.records_cleared,
            records_evicted: self.records_evicted,
            destinations: self
                .destinations
                .iter()
                .map(|(id, agg)| {
                    (
                        id.clone(),
                        DestinationSummary {
                            triggers: agg.triggers,
                            records_sampled: agg.records_sampled,
                            batches_rejected: agg.batches_rejected,
                            backlog: StatsSummary::from(&agg.backlog),
                            dist_factor: StatsSummary::from(&agg.dist_factor),
                        },
                    )
                })
                .collect(),
        }
    }

    /// 重置统计
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// 指标摘要
#[derive(Debug, Clone, Default)]
pub struct MetricsSummary {
    pub total_appended: u64,
    pub total_rejected_inputs: u64,
    pub clears: u64,
    pub records_cleared: u64,
    pub records_evicted: u64,
    pub destinations: BTreeMap<String, DestinationSummary>,
}

/// 单个目的地摘要
#[derive(Debug, Clone, Default)]
pub struct DestinationSummary {
    pub triggers: u64,
    pub records_sampled: u64,
    pub batches_rejected: u64,
    pub backlog: StatsSummary,
    pub dist_factor: StatsSummary,
}

impl std::fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Cache Publisher Summary ===")?;
        writeln!(f, "Records appended: {}", self.total_appended)?;
        writeln!(f, "Rejected inputs: {}", self.total_rejected_inputs)?;
        writeln!(
            f,
            "Cache clears: {} ({} records dropped)",
            self.clears, self.records_cleared
        )?;
        writeln!(f, "Records evicted: {}", self.records_evicted)?;

        for (id, dest) in &self.destinations {
            writeln!(f, "Destination {id}:")?;
            writeln!(
                f,
                "  triggers={}, sampled={}, rejected={}",
                dest.triggers, dest.records_sampled, dest.batches_rejected
            )?;
            writeln!(f, "  backlog: {}", dest.backlog)?;
            writeln!(f, "  dist_factor: {}", dest.dist_factor)?;
        }

        Ok(())
    }
}

/// 统计摘要
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// 在线统计计算器 (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    /// 添加新值
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            self.m2 += delta * (value - self.mean);
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// 样本方差
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}
