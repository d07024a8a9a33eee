//! 任务提交与控制
//!
//! 创建父任务、启动、手动停止、删除，以及状态/日志/进度查询。
//! 定时父任务的启动交给 [`RecurringScheduler`]，其余类型直接提交到优先级队列。

use chrono::{DateTime, Utc};
use scheduler_core::lifecycle::job_progress;
use scheduler_core::models::{
    Job, JobPayload, JobRecord, JobRecordPatch, JobStatus, NewParentTask, ParentTask,
    ParentTaskPatch, TaskType,
};
use scheduler_core::traits::{TargetResolver, TaskRepository};
use scheduler_core::{SchedulerError, SchedulerResult};
use scheduler_worker::AdapterRegistry;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::cron_utils::CronScheduler;
use crate::recurring::RecurringScheduler;
use crate::submitter::JobSubmitter;

pub const MANUAL_STOP_CAUSE: &str = "任务被手动停止";
const SIBLING_STOP_CAUSE: &str = "父任务已停止，取消执行";

/// 子任务状态查询结果
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct JobStatusView {
    pub record_id: i64,
    pub task_id: i64,
    pub status: JobStatus,
    pub status_text: &'static str,
    pub progress: u8,
    pub error_message: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_secs: i64,
}

/// 父任务进度
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TaskProgress {
    pub task_id: i64,
    pub status: JobStatus,
    pub status_text: &'static str,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub running: usize,
    pub pending: usize,
    /// 子任务进度的平均值
    pub progress: u8,
    pub next_run_time: Option<DateTime<Utc>>,
}

pub struct TaskService {
    repository: Arc<dyn TaskRepository>,
    resolver: Arc<dyn TargetResolver>,
    submitter: Arc<JobSubmitter>,
    scheduler: Arc<RecurringScheduler>,
    adapters: Arc<AdapterRegistry>,
    typical_duration_secs: i64,
}

impl TaskService {
    pub fn new(
        repository: Arc<dyn TaskRepository>,
        resolver: Arc<dyn TargetResolver>,
        submitter: Arc<JobSubmitter>,
        scheduler: Arc<RecurringScheduler>,
        adapters: Arc<AdapterRegistry>,
        typical_duration_secs: i64,
    ) -> Self {
        Self {
            repository,
            resolver,
            submitter,
            scheduler,
            adapters,
            typical_duration_secs,
        }
    }

    pub fn scheduler(&self) -> Arc<RecurringScheduler> {
        self.scheduler.clone()
    }

    /// 校验后原子地创建父任务和全部子任务记录
    #[instrument(skip(self, request), fields(name = %request.name))]
    pub async fn create_task(
        &self,
        request: &NewParentTask,
    ) -> SchedulerResult<(ParentTask, Vec<JobRecord>)> {
        if request.name.trim().is_empty() {
            return Err(SchedulerError::Validation("任务名称不能为空".to_string()));
        }
        if request.jobs.is_empty() {
            return Err(SchedulerError::Validation("至少需要一个子任务".to_string()));
        }
        if request.task_type == TaskType::Scheduled {
            let cron_expr = request
                .cron_expr
                .as_deref()
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .ok_or_else(|| {
                    SchedulerError::Validation("定时任务必须提供cron表达式".to_string())
                })?;
            CronScheduler::validate_cron_expression(cron_expr)?;
        }
        for payload in &request.jobs {
            self.validate_target(payload).await?;
        }

        let (task, jobs) = self.repository.create_task(request).await?;
        info!(
            "任务已创建: task_id={}, type={}, jobs={}",
            task.id,
            task.task_type.display_name(),
            jobs.len()
        );
        Ok((task, jobs))
    }

    async fn validate_target(&self, payload: &JobPayload) -> SchedulerResult<()> {
        match payload {
            JobPayload::Command {
                host_id,
                template_id,
            } => {
                self.resolver.resolve_host(*host_id).await?;
                self.resolver.resolve_template(*template_id).await?;
            }
            JobPayload::Build {
                server_id,
                job_name,
            } => {
                if job_name.trim().is_empty() {
                    return Err(SchedulerError::Validation("构建任务名称不能为空".to_string()));
                }
                self.resolver.resolve_build_server(*server_id).await?;
            }
        }
        Ok(())
    }

    /// 启动父任务，返回立即提交的子任务数量（定时任务为0）
    #[instrument(skip(self))]
    pub async fn start_task(&self, task_id: i64) -> SchedulerResult<usize> {
        let task = self.load_task(task_id).await?;
        match task.task_type {
            TaskType::Scheduled => {
                self.start_recurring(&task).await?;
                Ok(0)
            }
            TaskType::Immediate | TaskType::Batch => self.start_one_shot(&task).await,
        }
    }

    async fn start_recurring(&self, task: &ParentTask) -> SchedulerResult<()> {
        if self.scheduler.contains(task.id).await {
            return Err(SchedulerError::InvalidState(format!(
                "定时任务 {} 已在调度中",
                task.id
            )));
        }
        let cron_expr = task.cron().ok_or_else(|| {
            SchedulerError::Validation(format!("定时任务 {} 缺少cron表达式", task.id))
        })?;
        let schedule = CronScheduler::new(cron_expr)?;
        let now = Utc::now();
        let next = schedule
            .next_execution_time(now)
            .ok_or_else(|| SchedulerError::InvalidCron {
                expr: cron_expr.to_string(),
                message: "没有后续触发时间".to_string(),
            })?;

        self.scheduler
            .add_scheduled_task(task.id, cron_expr, self.submitter.trigger_callback())
            .await?;

        let patch = ParentTaskPatch {
            status: Some(JobStatus::Running),
            start_time: Some(now),
            next_run_time: Some(next),
            ..Default::default()
        };
        if let Err(e) = self.repository.update_task(task.id, &patch).await {
            self.scheduler.remove_scheduled_task(task.id).await;
            return Err(e);
        }
        info!(
            "定时任务已启动: task_id={}, cron={}, next_run_time={}",
            task.id,
            cron_expr,
            next.to_rfc3339()
        );
        Ok(())
    }

    async fn start_one_shot(&self, task: &ParentTask) -> SchedulerResult<usize> {
        let jobs = self.repository.get_jobs_by_task(task.id).await?;
        if jobs.iter().any(|j| j.status == JobStatus::Running) {
            return Err(SchedulerError::InvalidState(format!(
                "任务 {} 正在执行中",
                task.id
            )));
        }

        let submitted = self
            .submitter
            .submit_pending(&jobs, task.task_type.priority())
            .await?;
        if submitted == 0 {
            return Err(SchedulerError::InvalidState(format!(
                "任务 {} 没有可执行的子任务",
                task.id
            )));
        }

        let patch = ParentTaskPatch {
            status: Some(JobStatus::Running),
            start_time: Some(Utc::now()),
            ..Default::default()
        };
        if let Err(e) = self.repository.update_task(task.id, &patch).await {
            warn!("更新父任务状态失败: task_id={}, error={}", task.id, e);
        }
        info!("任务已提交: task_id={}, submitted={}", task.id, submitted);
        Ok(submitted)
    }

    /// 启动时恢复持久化的定时任务
    pub async fn restore_scheduled_tasks(&self) -> SchedulerResult<usize> {
        self.scheduler
            .load_scheduled_tasks(self.submitter.trigger_callback())
            .await
    }

    pub async fn pause_task(&self, task_id: i64) -> SchedulerResult<()> {
        self.scheduler.pause_scheduled_task(task_id).await
    }

    /// 恢复后返回下一次执行时间
    pub async fn resume_task(&self, task_id: i64) -> SchedulerResult<DateTime<Utc>> {
        self.scheduler
            .resume_scheduled_task(task_id, self.submitter.trigger_callback())
            .await
    }

    /// 手动停止运行中的子任务，同时终止同一父任务下的其他子任务
    #[instrument(skip(self))]
    pub async fn stop_job(&self, record_id: i64) -> SchedulerResult<()> {
        let record = self.load_job(record_id).await?;
        if record.status != JobStatus::Running {
            return Err(SchedulerError::InvalidState(format!(
                "只能停止运行中的任务，当前状态: {}",
                record.status.display_name()
            )));
        }
        let task = self.load_task(record.task_id).await?;

        let job = Job::new(record.id, record.task_id, record.payload.clone());
        if let Err(e) = self.adapters.kill(&job).await {
            warn!("终止远程进程失败: record_id={}, error={}", record_id, e);
        }

        let now = Utc::now();
        let patch = JobRecordPatch {
            status: Some(JobStatus::Failed),
            end_time: Some(now),
            duration_secs: record.start_time.map(|s| (now - s).num_seconds().max(0)),
            log: Some(format!("{}于 {}", MANUAL_STOP_CAUSE, now.to_rfc3339())),
            error_message: Some(MANUAL_STOP_CAUSE.to_string()),
            ..Default::default()
        };
        self.repository.update_job(record_id, &patch).await?;

        for sibling in self.repository.find_active_jobs(task.id).await? {
            if sibling.id == record_id {
                continue;
            }
            let patch = JobRecordPatch {
                status: Some(JobStatus::Failed),
                end_time: Some(now),
                error_message: Some(SIBLING_STOP_CAUSE.to_string()),
                ..Default::default()
            };
            self.repository.update_job(sibling.id, &patch).await?;
        }

        let parent = ParentTaskPatch {
            status: Some(JobStatus::Failed),
            end_time: Some(now),
            ..Default::default()
        };
        self.repository.update_task(task.id, &parent).await?;

        if task.is_recurring() {
            self.scheduler.remove_scheduled_task(task.id).await;
        }
        info!("任务已手动停止: record_id={}, task_id={}", record_id, task.id);
        Ok(())
    }

    /// 移除定时注册并级联删除子任务记录
    #[instrument(skip(self))]
    pub async fn delete_task(&self, task_id: i64) -> SchedulerResult<()> {
        self.load_task(task_id).await?;
        self.scheduler.remove_scheduled_task(task_id).await;
        self.repository.delete_task(task_id).await?;
        info!("任务已删除: task_id={}", task_id);
        Ok(())
    }

    pub async fn job_status(&self, record_id: i64) -> SchedulerResult<JobStatusView> {
        let record = self.load_job(record_id).await?;
        Ok(JobStatusView {
            record_id: record.id,
            task_id: record.task_id,
            status: record.status,
            status_text: record.status.display_name(),
            progress: job_progress(
                record.status,
                record.start_time,
                Utc::now(),
                self.typical_duration_secs,
            ),
            error_message: record.error_message,
            start_time: record.start_time,
            end_time: record.end_time,
            duration_secs: record.duration_secs,
        })
    }

    /// 记录中的日志优先，其次读取日志文件
    pub async fn job_log(&self, record_id: i64) -> SchedulerResult<String> {
        let record = self.load_job(record_id).await?;
        if let Some(log) = record.log {
            return Ok(log);
        }
        match record.log_path {
            Some(path) if !path.starts_with("http") => tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| SchedulerError::Internal(format!("读取日志文件失败: {path}: {e}"))),
            _ => Ok(String::new()),
        }
    }

    pub async fn task_progress(&self, task_id: i64) -> SchedulerResult<TaskProgress> {
        let task = self.load_task(task_id).await?;
        let jobs = self.repository.get_jobs_by_task(task_id).await?;
        let now = Utc::now();
        let count = |status: JobStatus| jobs.iter().filter(|j| j.status == status).count();

        let progress = if jobs.is_empty() {
            0
        } else {
            let sum: u32 = jobs
                .iter()
                .map(|j| job_progress(j.status, j.start_time, now, self.typical_duration_secs) as u32)
                .sum();
            (sum / jobs.len() as u32) as u8
        };

        Ok(TaskProgress {
            task_id,
            status: task.status,
            status_text: task.status.display_name(),
            total: jobs.len(),
            succeeded: count(JobStatus::Succeeded),
            failed: count(JobStatus::Failed),
            running: count(JobStatus::Running),
            pending: count(JobStatus::Pending),
            progress,
            next_run_time: task.next_run_time,
        })
    }

    async fn load_task(&self, task_id: i64) -> SchedulerResult<ParentTask> {
        self.repository
            .get_task(task_id)
            .await?
            .ok_or(SchedulerError::TaskNotFound { id: task_id })
    }

    async fn load_job(&self, record_id: i64) -> SchedulerResult<JobRecord> {
        self.repository
            .get_job(record_id)
            .await?
            .ok_or(SchedulerError::JobRecordNotFound { id: record_id })
    }
}
