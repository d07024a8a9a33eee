//! 子任务生命周期管理
//!
//! 工作者在调用适配器前后通过这里推进子任务记录的状态，
//! 并在所有子任务进入终态后重新聚合父任务。

use chrono::{DateTime, Utc};
use scheduler_core::lifecycle::aggregate_parent;
use scheduler_core::models::{
    Job, JobPayload, JobRecordPatch, JobStatus, ParentTaskPatch, TaskType,
};
use scheduler_core::traits::{ExecutionOutcome, TaskRepository};
use scheduler_core::SchedulerResult;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 由cron表达式计算下一次触发时间
pub type NextRunResolver = Arc<dyn Fn(&str) -> Option<DateTime<Utc>> + Send + Sync>;

/// 执行前的父任务检查结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Proceed,
    /// 父任务已失败，子任务直接标记失败
    ParentFailed,
    /// 父任务已暂停，跳过执行
    ParentPaused,
    /// 子任务已经是终态（例如被手动停止），丢弃
    AlreadyResolved,
    /// 父任务或子任务记录已被删除
    Missing,
}

pub struct JobLifecycleManager {
    repository: Arc<dyn TaskRepository>,
    log_dir: PathBuf,
    next_run: Option<NextRunResolver>,
}

impl JobLifecycleManager {
    pub fn new(repository: Arc<dyn TaskRepository>, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            repository,
            log_dir: log_dir.into(),
            next_run: None,
        }
    }

    pub fn with_next_run_resolver(mut self, resolver: NextRunResolver) -> Self {
        self.next_run = Some(resolver);
        self
    }

    pub fn repository(&self) -> Arc<dyn TaskRepository> {
        self.repository.clone()
    }

    pub async fn gate(&self, job: &Job) -> SchedulerResult<GateDecision> {
        let Some(parent) = self.repository.get_task(job.task_id).await? else {
            return Ok(GateDecision::Missing);
        };
        let Some(record) = self.repository.get_job(job.record_id).await? else {
            return Ok(GateDecision::Missing);
        };

        let decision = match parent.status {
            JobStatus::Failed => GateDecision::ParentFailed,
            JobStatus::Paused => GateDecision::ParentPaused,
            _ if record.is_terminal() => GateDecision::AlreadyResolved,
            _ => GateDecision::Proceed,
        };
        Ok(decision)
    }

    /// 调用适配器前标记运行中，返回开始时间
    ///
    /// 记录已经是终态（例如被手动停止）时不会改写，返回 `None`。
    pub async fn mark_running(&self, job: &Job) -> SchedulerResult<Option<DateTime<Utc>>> {
        let started = Utc::now();
        if !self.repository.claim_job(job.record_id, started).await? {
            debug!("子任务已结束，放弃执行: record_id={}", job.record_id);
            return Ok(None);
        }
        debug!("子任务开始执行: record_id={}", job.record_id);
        Ok(Some(started))
    }

    /// 写入适配器结果并刷新父任务
    pub async fn complete(
        &self,
        job: &Job,
        started: DateTime<Utc>,
        outcome: &ExecutionOutcome,
    ) -> SchedulerResult<()> {
        if self.already_terminal(job).await? {
            debug!(
                "子任务已被外部结束，忽略执行结果: record_id={}",
                job.record_id
            );
            self.refresh_parent_logged(job.task_id).await;
            return Ok(());
        }

        let ended = Utc::now();
        let mut patch = JobRecordPatch {
            status: Some(if outcome.success {
                JobStatus::Succeeded
            } else {
                JobStatus::Failed
            }),
            end_time: Some(ended),
            duration_secs: Some((ended - started).num_seconds().max(0)),
            log: outcome.log.clone(),
            log_path: outcome.log_location.clone(),
            error_message: if outcome.success {
                None
            } else {
                outcome.detail.clone()
            },
            ..Default::default()
        };

        if outcome.success {
            if let (JobPayload::Command { template_id, .. }, Some(log)) =
                (&job.payload, outcome.log.as_deref())
            {
                match self.write_log_file(job.task_id, *template_id, log).await {
                    Ok(path) => patch.log_path = Some(path.to_string_lossy().into_owned()),
                    Err(e) => warn!("写入任务日志文件失败: record_id={}, error={}", job.record_id, e),
                }
            }
        }

        self.repository.update_job(job.record_id, &patch).await?;
        info!(
            "子任务执行完成: record_id={}, success={}, duration={}s",
            job.record_id,
            outcome.success,
            patch.duration_secs.unwrap_or_default()
        );

        self.refresh_parent_logged(job.task_id).await;
        Ok(())
    }

    /// 标记失败；`started` 为空表示任务从未开始执行
    pub async fn fail(
        &self,
        job: &Job,
        started: Option<DateTime<Utc>>,
        cause: &str,
    ) -> SchedulerResult<()> {
        let ended = Utc::now();
        let patch = JobRecordPatch {
            status: Some(JobStatus::Failed),
            end_time: Some(ended),
            duration_secs: started.map(|s| (ended - s).num_seconds().max(0)),
            error_message: Some(cause.to_string()),
            ..Default::default()
        };
        self.repository.update_job(job.record_id, &patch).await?;
        warn!("子任务失败: record_id={}, cause={}", job.record_id, cause);

        self.refresh_parent_logged(job.task_id).await;
        Ok(())
    }

    /// 等待重试期间保持已认领状态，只记录原因
    pub async fn note_retry(&self, job: &Job, cause: &str) -> SchedulerResult<()> {
        let patch = JobRecordPatch {
            error_message: Some(cause.to_string()),
            ..Default::default()
        };
        self.repository.update_job(job.record_id, &patch).await
    }

    /// 跳过时回到等待中
    pub async fn reset_pending(&self, job: &Job, cause: Option<&str>) -> SchedulerResult<()> {
        let mut patch = JobRecordPatch::status(JobStatus::Pending);
        patch.error_message = cause.map(str::to_string);
        self.repository.update_job(job.record_id, &patch).await
    }

    async fn already_terminal(&self, job: &Job) -> SchedulerResult<bool> {
        Ok(self
            .repository
            .get_job(job.record_id)
            .await?
            .map(|record| record.is_terminal())
            .unwrap_or(false))
    }

    async fn refresh_parent_logged(&self, task_id: i64) {
        if let Err(e) = self.refresh_parent(task_id).await {
            warn!("刷新父任务状态失败: task_id={}, error={}", task_id, e);
        }
    }

    /// 全部子任务进入终态后重新聚合父任务
    ///
    /// 返回写入的父任务状态；仍有子任务未结束时返回 `None`。
    pub async fn refresh_parent(&self, task_id: i64) -> SchedulerResult<Option<JobStatus>> {
        let Some(parent) = self.repository.get_task(task_id).await? else {
            return Ok(None);
        };
        let children = self.repository.get_jobs_by_task(task_id).await?;
        let Some(aggregate) = aggregate_parent(parent.task_type, &children) else {
            return Ok(None);
        };

        // 已失败的父任务不会被重新拉起，已暂停的定时任务保持暂停
        let (status, reset_children) = match parent.status {
            JobStatus::Failed => (JobStatus::Failed, false),
            JobStatus::Paused if aggregate.reset_children => (JobStatus::Paused, true),
            _ => (aggregate.status, aggregate.reset_children),
        };

        let patch = ParentTaskPatch {
            status: Some(status),
            duration_secs: Some(aggregate.duration_secs),
            end_time: Some(Utc::now()),
            ..Default::default()
        };
        self.repository.update_task(task_id, &patch).await?;

        if reset_children {
            for child in &children {
                self.repository
                    .update_job(child.id, &JobRecordPatch::status(JobStatus::Pending))
                    .await?;
            }
        }
        info!(
            "父任务聚合完成: task_id={}, status={}, duration={}s",
            task_id,
            status.display_name(),
            aggregate.duration_secs
        );

        if let Err(e) = self.repository.increment_execute_count(task_id).await {
            warn!("更新执行次数失败: task_id={}, error={}", task_id, e);
        }

        if parent.task_type == TaskType::Scheduled {
            if let (Some(expr), Some(resolver)) = (parent.cron(), self.next_run.as_ref()) {
                if let Some(next) = resolver(expr) {
                    let patch = ParentTaskPatch::default().with_next_run_time(next);
                    if let Err(e) = self.repository.update_task(task_id, &patch).await {
                        warn!("更新下次执行时间失败: task_id={}, error={}", task_id, e);
                    }
                }
            }
        }

        Ok(Some(status))
    }

    /// `{log_dir}/task_{task}/task_{task}_template_{template}.log`
    pub fn log_file_path(&self, task_id: i64, template_id: i64) -> PathBuf {
        self.log_dir
            .join(format!("task_{task_id}"))
            .join(format!("task_{task_id}_template_{template_id}.log"))
    }

    async fn write_log_file(
        &self,
        task_id: i64,
        template_id: i64,
        content: &str,
    ) -> std::io::Result<PathBuf> {
        let path = self.log_file_path(task_id, template_id);
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        tokio::fs::write(&path, content).await?;
        Ok(path)
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }
}
