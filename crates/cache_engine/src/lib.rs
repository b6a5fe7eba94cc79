//! cache_engine: 记录缓存 + 按目的地限速采样
//!
//! - [`RecordCache`]: 按插入顺序保存记录, 并跟踪每条记录被哪些目的地尝试过
//! - [`DistributionPlan`]: 根据 backlog 与预算计算采样步长
//! - [`Scheduler`]: 写入驱动的触发判断, 最长间隔目的地触发时清空缓存
//! - [`CachePublisher`] / [`SharedPublisher`]: 面向生产者的入口

pub mod cache;
pub mod clock;
pub mod distributor;
pub mod publisher;
pub mod scheduler;
pub mod shared;

pub use cache::{CacheEntry, RecordCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use distributor::{dist_factor, DistributionPlan};
pub use publisher::{AppendReport, CachePublisher, DestinationSpec, TickReport, TriggerReport};
pub use scheduler::{DestinationState, Evaluation, Scheduler, Trigger};
pub use shared::{SharedPublisher, TickerHandle, MIN_TICK_PERIOD};
