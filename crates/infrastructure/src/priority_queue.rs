//! 优先级任务队列
//!
//! 在 [`JobStore`] 之上维护五条命名列表：
//!
//! ```text
//! {prefix}:high   ┐
//! {prefix}:normal ├─ 活跃队列，工作者按 high → normal → low 顺序竞争弹出
//! {prefix}:low    ┘
//! {prefix}:retry     等待退避窗口的任务，由后台定时器搬回原队列
//! {prefix}:failed    重试耗尽的任务，只写不读，供人工检查
//! ```
//!
//! 队列本身只关心序列化后的 [`QueuedJob`]，不关心任务内容。

use chrono::{DateTime, Utc};
use scheduler_core::models::{Job, Lane, Priority, QueueMetrics, QueuedJob};
use scheduler_core::traits::JobStore;
use scheduler_core::{SchedulerError, SchedulerResult};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_KEY_PREFIX: &str = "dodevops:task_queue";

/// 各队列长度
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LaneLengths {
    pub high: u64,
    pub normal: u64,
    pub low: u64,
    pub retry: u64,
    pub failed: u64,
}

impl LaneLengths {
    pub fn active(&self) -> u64 {
        self.high + self.normal + self.low
    }
}

/// 一次重试队列搬运的结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryDrain {
    /// 退避窗口已过，重新进入原优先级队列
    pub moved: usize,
    /// 仍在退避中，原样放回
    pub kept: usize,
}

pub struct PriorityQueue {
    store: Arc<dyn JobStore>,
    prefix: String,
    max_retries: u32,
    running: AtomicBool,
    enqueued: AtomicU64,
}

impl PriorityQueue {
    pub fn new(store: Arc<dyn JobStore>, prefix: impl Into<String>, max_retries: u32) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            max_retries,
            running: AtomicBool::new(false),
            enqueued: AtomicU64::new(0),
        }
    }

    pub fn start(&self) {
        if !self.running.swap(true, Ordering::SeqCst) {
            info!("任务队列已启动: prefix={}", self.prefix);
        }
    }

    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("任务队列已停止: prefix={}", self.prefix);
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// 本进程累计入队数
    pub fn enqueued_total(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn lane_key(&self, lane: Lane) -> String {
        lane.key(&self.prefix)
    }

    pub fn metrics_key(&self) -> String {
        format!("{}:metrics", self.prefix)
    }

    pub fn store(&self) -> Arc<dyn JobStore> {
        self.store.clone()
    }

    /// 入队；队列未运行时拒绝
    pub async fn enqueue(
        &self,
        job: Job,
        priority: Priority,
        metadata: Option<HashMap<String, Value>>,
    ) -> SchedulerResult<QueuedJob> {
        if !self.is_running() {
            return Err(SchedulerError::QueueNotRunning);
        }
        let mut item = QueuedJob::new(job, priority, self.max_retries);
        if let Some(metadata) = metadata {
            item = item.with_metadata(metadata);
        }
        self.store
            .push(&self.lane_key(priority.lane()), item.encode()?)
            .await?;
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("devops_scheduler_jobs_enqueued_total", "priority" => priority.as_str())
            .increment(1);
        debug!(
            "任务已入队: record_id={}, priority={}",
            item.job.record_id, priority
        );
        Ok(item)
    }

    /// 按 high → normal → low 顺序弹出一个任务，超时返回 `None`
    pub async fn dequeue(&self, timeout: Duration) -> SchedulerResult<Option<QueuedJob>> {
        let lanes: Vec<String> = Lane::ACTIVE.iter().map(|l| self.lane_key(*l)).collect();
        let Some((lane, raw)) = self.store.pop(&lanes, timeout).await? else {
            return Ok(None);
        };
        match QueuedJob::decode(&raw) {
            Ok(item) => Ok(Some(item)),
            Err(e) => {
                warn!("丢弃无法解析的队列任务: lane={}, error={}", lane, e);
                Ok(None)
            }
        }
    }

    /// 放回原优先级队列，不检查运行状态
    pub async fn requeue(&self, item: &QueuedJob) -> SchedulerResult<()> {
        self.store
            .push(&self.lane_key(item.priority.lane()), item.encode()?)
            .await
    }

    pub async fn push_retry(&self, item: &QueuedJob) -> SchedulerResult<()> {
        self.store
            .push(&self.lane_key(Lane::Retry), item.encode()?)
            .await
    }

    pub async fn push_failed(&self, item: &QueuedJob) -> SchedulerResult<()> {
        warn!(
            "任务重试耗尽，进入失败队列: record_id={}, retry_count={}",
            item.job.record_id, item.retry_count
        );
        self.store
            .push(&self.lane_key(Lane::Failed), item.encode()?)
            .await
    }

    /// 搬运重试队列：只处理调用时已存在的条目
    pub async fn drain_retry_lane(&self, now: DateTime<Utc>) -> SchedulerResult<RetryDrain> {
        let retry_key = self.lane_key(Lane::Retry);
        let pending = self.store.len(&retry_key).await?;
        let mut drain = RetryDrain::default();

        for _ in 0..pending {
            let Some(raw) = self.store.try_pop(&retry_key).await? else {
                break;
            };
            let item = match QueuedJob::decode(&raw) {
                Ok(item) => item,
                Err(e) => {
                    warn!("丢弃无法解析的重试任务: {}", e);
                    continue;
                }
            };
            if item.is_ready(now) {
                self.requeue(&item).await?;
                drain.moved += 1;
            } else {
                self.store.push(&retry_key, raw).await?;
                drain.kept += 1;
            }
        }

        if drain.moved > 0 {
            debug!(
                "重试队列搬运完成: moved={}, kept={}",
                drain.moved, drain.kept
            );
        }
        Ok(drain)
    }

    pub async fn lane_lengths(&self) -> SchedulerResult<LaneLengths> {
        Ok(LaneLengths {
            high: self.store.len(&self.lane_key(Lane::High)).await?,
            normal: self.store.len(&self.lane_key(Lane::Normal)).await?,
            low: self.store.len(&self.lane_key(Lane::Low)).await?,
            retry: self.store.len(&self.lane_key(Lane::Retry)).await?,
            failed: self.store.len(&self.lane_key(Lane::Failed)).await?,
        })
    }

    /// 三个活跃队列的长度之和
    pub async fn queue_length(&self) -> SchedulerResult<u64> {
        let mut total = 0;
        for lane in Lane::ACTIVE {
            total += self.store.len(&self.lane_key(lane)).await?;
        }
        Ok(total)
    }

    pub async fn failed_jobs(&self) -> SchedulerResult<Vec<QueuedJob>> {
        self.store
            .range(&self.lane_key(Lane::Failed))
            .await?
            .iter()
            .map(|raw| QueuedJob::decode(raw))
            .collect()
    }

    pub async fn save_metrics(&self, metrics: &QueueMetrics) -> SchedulerResult<()> {
        self.store
            .set(&self.metrics_key(), serde_json::to_string(metrics)?)
            .await
    }

    pub async fn load_metrics(&self) -> SchedulerResult<Option<QueueMetrics>> {
        match self.store.get(&self.metrics_key()).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryJobStore;
    use scheduler_core::models::JobPayload;

    fn queue() -> PriorityQueue {
        let q = PriorityQueue::new(Arc::new(InMemoryJobStore::new()), "test", 3);
        q.start();
        q
    }

    fn job(id: i64) -> Job {
        Job::new(
            id,
            1,
            JobPayload::Command {
                host_id: 1,
                template_id: 1,
            },
        )
    }

    #[tokio::test]
    async fn test_enqueue_rejected_when_stopped() {
        let q = queue();
        q.stop();
        let err = q.enqueue(job(1), Priority::High, None).await.unwrap_err();
        assert!(matches!(err, SchedulerError::QueueNotRunning));
    }

    #[tokio::test]
    async fn test_dequeue_prefers_high_lane() {
        let q = queue();
        q.enqueue(job(1), Priority::High, None).await.unwrap();
        q.enqueue(job(2), Priority::Low, None).await.unwrap();
        q.enqueue(job(3), Priority::High, None).await.unwrap();
        assert_eq!(q.enqueued_total(), 3);

        let timeout = Duration::from_millis(10);
        let order: Vec<i64> = vec![
            q.dequeue(timeout).await.unwrap().unwrap().job.record_id,
            q.dequeue(timeout).await.unwrap().unwrap().job.record_id,
            q.dequeue(timeout).await.unwrap().unwrap().job.record_id,
        ];
        assert_eq!(order, vec![1, 3, 2]);
        assert!(q.dequeue(timeout).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_drain_retry_lane_respects_backoff() {
        let q = queue();
        let now = Utc::now();

        let mut ready = QueuedJob::new(job(1), Priority::Normal, 3);
        ready.set_retry_at(now - chrono::Duration::seconds(1));
        let mut waiting = QueuedJob::new(job(2), Priority::Low, 3);
        waiting.set_retry_at(now + chrono::Duration::seconds(60));

        q.push_retry(&ready).await.unwrap();
        q.push_retry(&waiting).await.unwrap();

        let drain = q.drain_retry_lane(now).await.unwrap();
        assert_eq!(drain, RetryDrain { moved: 1, kept: 1 });

        let lengths = q.lane_lengths().await.unwrap();
        assert_eq!(lengths.normal, 1);
        assert_eq!(lengths.retry, 1);
        assert_eq!(lengths.low, 0);
    }

    #[tokio::test]
    async fn test_failed_lane_and_metrics() {
        let q = queue();
        let item = QueuedJob::new(job(9), Priority::High, 3);
        q.push_failed(&item).await.unwrap();

        let failed = q.failed_jobs().await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].job.record_id, 9);
        assert_eq!(q.queue_length().await.unwrap(), 0);

        let metrics = QueueMetrics {
            node: "n1".to_string(),
            processed_total: 4,
            ..Default::default()
        };
        q.save_metrics(&metrics).await.unwrap();
        assert_eq!(q.load_metrics().await.unwrap(), Some(metrics));
    }

    #[test]
    fn test_lane_keys() {
        let q = PriorityQueue::new(Arc::new(InMemoryJobStore::new()), DEFAULT_KEY_PREFIX, 3);
        assert_eq!(q.lane_key(Lane::Retry), "dodevops:task_queue:retry");
        assert_eq!(q.metrics_key(), "dodevops:task_queue:metrics");
    }
}
