//! 工作池
//!
//! 固定数量的工作者从优先级队列竞争弹出任务，经过父任务检查和两级准入控制后
//! 交给远程执行适配器。另有一个后台定时器负责把退避窗口已过的重试任务搬回原队列。

use chrono::{DateTime, Utc};
use scheduler_config::WorkerPoolConfig;
use scheduler_core::models::{QueueMetrics, QueuedJob};
use scheduler_core::{CancelHandle, CancelSignal, SchedulerError, SchedulerResult};
use scheduler_infrastructure::PriorityQueue;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::adapters::AdapterRegistry;
use crate::components::{AdmissionController, GateDecision, JobLifecycleManager};

/// 工作池内的滚动计数
#[derive(Debug, Default)]
struct PoolCounters {
    processed: AtomicU64,
    failed: AtomicU64,
    active: AtomicU64,
    /// Unix毫秒，0表示尚未处理过任务
    last_process_ms: AtomicI64,
}

/// 单个任务的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Completed,
    Failed,
    Retried,
    Skipped,
    Requeued,
}

pub struct WorkerPool {
    config: WorkerPoolConfig,
    queue: Arc<PriorityQueue>,
    adapters: Arc<AdapterRegistry>,
    lifecycle: Arc<JobLifecycleManager>,
    admission: AdmissionController,
    counters: PoolCounters,
    node: String,
    cancel: CancelHandle,
    handles: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
}

impl WorkerPool {
    pub fn new(
        config: WorkerPoolConfig,
        queue: Arc<PriorityQueue>,
        adapters: Arc<AdapterRegistry>,
        lifecycle: Arc<JobLifecycleManager>,
    ) -> Self {
        let admission =
            AdmissionController::new(config.max_concurrency, config.per_target_concurrency);
        let node = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());
        Self {
            config,
            queue,
            adapters,
            lifecycle,
            admission,
            counters: PoolCounters::default(),
            node,
            cancel: CancelHandle::new(),
            handles: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn adapters(&self) -> Arc<AdapterRegistry> {
        self.adapters.clone()
    }

    /// 启动工作者与重试队列定时器；重复调用无效果
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let workers = self.config.worker_count();
        let mut spawned = Vec::with_capacity(workers + 1);
        for worker_id in 0..workers {
            let pool = Arc::clone(self);
            spawned.push(tokio::spawn(async move {
                pool.worker_loop(worker_id).await;
            }));
        }
        let pool = Arc::clone(self);
        spawned.push(tokio::spawn(async move {
            pool.retry_loop().await;
        }));

        if let Ok(mut handles) = self.handles.lock() {
            handles.extend(spawned);
        }
        info!(
            "工作池已启动: node={}, workers={}, max_concurrency={}, per_target={}",
            self.node, workers, self.config.max_concurrency, self.config.per_target_concurrency
        );
    }

    /// 广播取消并等待所有工作者退出
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        let handles: Vec<JoinHandle<()>> = match self.handles.lock() {
            Ok(mut handles) => handles.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("工作者退出异常: {}", e);
            }
        }
        self.flush_metrics().await;
        info!("工作池已停止: node={}", self.node);
    }

    async fn worker_loop(&self, worker_id: usize) {
        let mut cancel = self.cancel.signal();
        debug!("工作者启动: worker_id={}", worker_id);
        loop {
            let item = tokio::select! {
                result = self.queue.dequeue(self.config.poll_timeout()) => result,
                _ = cancel.cancelled() => break,
            };
            match item {
                Ok(Some(item)) => {
                    self.process(item, cancel.clone()).await;
                }
                Ok(None) => {}
                Err(e) => {
                    error!("从队列获取任务失败: worker_id={}, error={}", worker_id, e);
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.poll_timeout()) => {}
                        _ = cancel.cancelled() => break,
                    }
                }
            }
        }
        debug!("工作者退出: worker_id={}", worker_id);
    }

    async fn retry_loop(&self) {
        let mut cancel = self.cancel.signal();
        let mut ticker = tokio::time::interval(self.config.retry_drain_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = cancel.cancelled() => break,
            }
            match self.queue.drain_retry_lane(Utc::now()).await {
                Ok(drain) if drain.moved > 0 => {
                    debug!("重试任务已回到队列: moved={}, kept={}", drain.moved, drain.kept)
                }
                Ok(_) => {}
                Err(e) => warn!("搬运重试队列失败: {}", e),
            }
            self.flush_metrics().await;
        }
    }

    /// 处理单个任务；任何分支都不会把错误抛给工作者循环
    async fn process(&self, mut item: QueuedJob, cancel: CancelSignal) {
        let disposition = match self.run_job(&mut item, cancel).await {
            Ok(disposition) => disposition,
            Err(e) => {
                warn!(
                    "任务处理失败，进入重试流程: record_id={}, error={}",
                    item.job.record_id, e
                );
                self.retry_or_fail(&mut item, None, &e.to_string()).await
            }
        };

        match disposition {
            Disposition::Completed => {
                self.counters.processed.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("devops_scheduler_jobs_processed_total").increment(1);
            }
            Disposition::Failed => {
                self.counters.processed.fetch_add(1, Ordering::Relaxed);
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("devops_scheduler_jobs_processed_total").increment(1);
                metrics::counter!("devops_scheduler_jobs_failed_total").increment(1);
            }
            Disposition::Retried | Disposition::Skipped | Disposition::Requeued => {}
        }
        self.counters
            .last_process_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    async fn run_job(
        &self,
        item: &mut QueuedJob,
        mut cancel: CancelSignal,
    ) -> SchedulerResult<Disposition> {
        let job = item.job.clone();

        let permit = match self.admission.acquire(&job.target_key(), &mut cancel).await {
            Ok(permit) => permit,
            Err(SchedulerError::Shutdown) => {
                // 关闭期间未执行的任务放回原队列
                if let Err(e) = self.queue.requeue(item).await {
                    error!("关闭时放回任务失败: record_id={}, error={}", job.record_id, e);
                }
                return Ok(Disposition::Requeued);
            }
            Err(e) => return Err(e),
        };

        // 等待准入期间父任务可能已被停止或暂停，拿到令牌后再检查
        match self.lifecycle.gate(&job).await? {
            GateDecision::Proceed => {}
            GateDecision::ParentFailed => {
                drop(permit);
                self.lifecycle
                    .fail(&job, None, "父任务已失败，取消执行")
                    .await?;
                return Ok(Disposition::Failed);
            }
            GateDecision::ParentPaused => {
                drop(permit);
                info!("父任务已暂停，跳过执行: record_id={}", job.record_id);
                self.lifecycle.reset_pending(&job, None).await?;
                return Ok(Disposition::Skipped);
            }
            GateDecision::AlreadyResolved | GateDecision::Missing => {
                debug!("子任务无需执行，丢弃: record_id={}", job.record_id);
                return Ok(Disposition::Skipped);
            }
        }

        let Some(adapter) = self.adapters.resolve(&job.payload) else {
            drop(permit);
            self.lifecycle
                .fail(
                    &job,
                    None,
                    &format!("没有可用的执行适配器: {}", job.payload.kind()),
                )
                .await?;
            return Ok(Disposition::Failed);
        };

        let Some(started) = self.lifecycle.mark_running(&job).await? else {
            return Ok(Disposition::Skipped);
        };
        self.counters.active.fetch_add(1, Ordering::Relaxed);
        metrics::gauge!("devops_scheduler_active_workers").increment(1.0);

        let result = adapter.execute(&job, cancel).await;

        self.counters.active.fetch_sub(1, Ordering::Relaxed);
        metrics::gauge!("devops_scheduler_active_workers").decrement(1.0);
        drop(permit);

        match result {
            Ok(outcome) => {
                self.lifecycle.complete(&job, started, &outcome).await?;
                Ok(if outcome.success {
                    Disposition::Completed
                } else {
                    Disposition::Failed
                })
            }
            Err(e) if e.is_connectivity() => {
                // 适配器内部已经重试过，直接进入失败队列
                self.lifecycle.fail(&job, Some(started), &e.to_string()).await?;
                if let Err(push_err) = self.queue.push_failed(item).await {
                    error!(
                        "写入失败队列失败: record_id={}, error={}",
                        job.record_id, push_err
                    );
                }
                Ok(Disposition::Failed)
            }
            Err(SchedulerError::Shutdown) => {
                self.lifecycle
                    .fail(&job, Some(started), "工作池关闭，任务执行被中断")
                    .await?;
                Ok(Disposition::Failed)
            }
            Err(e) => {
                warn!(
                    "适配器执行出错，进入重试流程: record_id={}, error={}",
                    job.record_id, e
                );
                Ok(self
                    .retry_or_fail(item, Some(started), &e.to_string())
                    .await)
            }
        }
    }

    /// 计数加一；达到上限进入失败队列，否则写入重试时间后进入重试队列
    async fn retry_or_fail(
        &self,
        item: &mut QueuedJob,
        started: Option<DateTime<Utc>>,
        cause: &str,
    ) -> Disposition {
        let job = item.job.clone();
        if item.bump_retry() {
            if let Err(e) = self.queue.push_failed(item).await {
                error!("写入失败队列失败: record_id={}, error={}", job.record_id, e);
            }
            let cause = format!("重试{}次后仍然失败: {}", item.retry_count, cause);
            if let Err(e) = self.lifecycle.fail(&job, started, &cause).await {
                error!("更新任务状态失败: record_id={}, error={}", job.record_id, e);
            }
            return Disposition::Failed;
        }

        let retry_at = Utc::now()
            + chrono::Duration::from_std(self.config.retry_delay())
                .unwrap_or_else(|_| chrono::Duration::seconds(5));
        item.set_retry_at(retry_at);
        if let Err(e) = self.lifecycle.note_retry(&job, cause).await {
            warn!("记录重试原因失败: record_id={}, error={}", job.record_id, e);
        }
        if let Err(e) = self.queue.push_retry(item).await {
            error!("写入重试队列失败: record_id={}, error={}", job.record_id, e);
        }
        info!(
            "任务进入重试队列: record_id={}, retry_count={}/{}, retry_at={}",
            job.record_id,
            item.retry_count,
            item.max_retries,
            retry_at.to_rfc3339()
        );
        Disposition::Retried
    }

    /// 当前指标快照
    pub async fn metrics(&self) -> QueueMetrics {
        let last_ms = self.counters.last_process_ms.load(Ordering::Relaxed);
        let queue_length = match self.queue.queue_length().await {
            Ok(length) => length,
            Err(e) => {
                debug!("读取队列长度失败: {}", e);
                0
            }
        };
        QueueMetrics {
            node: self.node.clone(),
            enqueued_total: self.queue.enqueued_total(),
            processed_total: self.counters.processed.load(Ordering::Relaxed),
            failed_total: self.counters.failed.load(Ordering::Relaxed),
            active_workers: self.counters.active.load(Ordering::Relaxed),
            queue_length,
            last_process_time: (last_ms > 0)
                .then(|| DateTime::<Utc>::from_timestamp_millis(last_ms))
                .flatten(),
        }
    }

    /// 写入任务存储；失败只记录日志
    async fn flush_metrics(&self) {
        if !self.config.metrics_enabled {
            return;
        }
        let snapshot = self.metrics().await;
        metrics::gauge!("devops_scheduler_queue_length").set(snapshot.queue_length as f64);
        if let Err(e) = self.queue.save_metrics(&snapshot).await {
            debug!("保存队列指标失败: {}", e);
        }
    }
}
