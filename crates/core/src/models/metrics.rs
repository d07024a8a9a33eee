use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 队列指标快照
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueMetrics {
    pub node: String,
    pub enqueued_total: u64,
    pub processed_total: u64,
    pub failed_total: u64,
    pub active_workers: u64,
    pub queue_length: u64,
    pub last_process_time: Option<DateTime<Utc>>,
}
