use scheduler_core::models::{Job, JobRecord, JobRecordPatch, JobStatus, Priority};
use scheduler_core::traits::TaskRepository;
use scheduler_core::{SchedulerError, SchedulerResult};
use scheduler_infrastructure::PriorityQueue;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::recurring::TriggerCallback;

/// 把子任务记录送入优先级队列
pub struct JobSubmitter {
    repository: Arc<dyn TaskRepository>,
    queue: Arc<PriorityQueue>,
}

impl JobSubmitter {
    pub fn new(repository: Arc<dyn TaskRepository>, queue: Arc<PriorityQueue>) -> Self {
        Self { repository, queue }
    }

    pub fn queue(&self) -> Arc<PriorityQueue> {
        self.queue.clone()
    }

    pub async fn enqueue(&self, record: &JobRecord, priority: Priority) -> SchedulerResult<()> {
        let job = Job::new(record.id, record.task_id, record.payload.clone());
        self.queue.enqueue(job, priority, None).await?;
        Ok(())
    }

    /// 定时触发：重新检查父任务状态后提交所有等待中的子任务，返回提交数量
    ///
    /// 已入队尚未执行的子任务处于运行中，本轮会被跳过。
    pub async fn fire(&self, task_id: i64) -> SchedulerResult<usize> {
        let Some(task) = self.repository.get_task(task_id).await? else {
            return Err(SchedulerError::TaskNotFound { id: task_id });
        };
        if matches!(task.status, JobStatus::Paused | JobStatus::Failed) {
            info!(
                "父任务状态为{}，跳过本次触发: task_id={}",
                task.status.display_name(),
                task_id
            );
            return Ok(0);
        }

        let children = self.repository.get_jobs_by_task(task_id).await?;
        if children.iter().any(|c| c.status == JobStatus::Running) {
            warn!("上一轮执行尚未结束，跳过本次触发: task_id={}", task_id);
            return Ok(0);
        }

        // 入队前先标记运行中，下一次触发不会重复提交
        let priority = task.task_type.priority();
        let submitted = self.submit_pending(&children, priority).await?;
        debug!(
            "定时任务已触发: task_id={}, submitted={}, priority={}",
            task_id, submitted, priority
        );
        Ok(submitted)
    }

    /// 逐个标记运行中后入队，入队失败时回滚为等待中
    pub async fn submit_pending(
        &self,
        records: &[JobRecord],
        priority: Priority,
    ) -> SchedulerResult<usize> {
        let mut submitted = 0;
        for record in records.iter().filter(|r| r.status == JobStatus::Pending) {
            self.repository
                .update_job(record.id, &JobRecordPatch::status(JobStatus::Running))
                .await?;
            if let Err(e) = self.enqueue(record, priority).await {
                error!("子任务入队失败，回滚状态: record_id={}, error={}", record.id, e);
                if let Err(rollback) = self
                    .repository
                    .update_job(record.id, &JobRecordPatch::status(JobStatus::Pending))
                    .await
                {
                    warn!("回滚子任务状态失败: record_id={}, error={}", record.id, rollback);
                }
                continue;
            }
            submitted += 1;
        }
        Ok(submitted)
    }

    /// 供定时调度器使用的回调
    pub fn trigger_callback(self: &Arc<Self>) -> TriggerCallback {
        let submitter = Arc::clone(self);
        Arc::new(move |task_id| {
            let submitter = submitter.clone();
            Box::pin(async move {
                if let Err(e) = submitter.fire(task_id).await {
                    error!("定时任务触发失败: task_id={}, error={}", task_id, e);
                }
            })
        })
    }
}
