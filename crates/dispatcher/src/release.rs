//! 快速发布编排
//!
//! 一次发布包含若干按执行顺序排列的构建任务：
//!
//! ```text
//! 并行: 同时派发全部任务，互不等待
//! 串行: 按 execute_order 依次派发，等待前一个进入终态；
//!       某个任务派发失败时，其后所有任务标记为已取消
//! ```
//!
//! 每个成功派发的任务都有一个后台监控，构建结束时写回结果并尝试聚合发布状态。
//! 发布的最终状态只在全部任务进入终态后计算。

use chrono::{DateTime, Utc};
use scheduler_config::ReleaseConfig;
use scheduler_core::lifecycle::{aggregate_release, release_task_progress};
use scheduler_core::models::{
    ExecutionMode, NewRelease, Release, ReleasePatch, ReleaseStatus, ReleaseTask,
    ReleaseTaskPatch, ReleaseTaskStatus,
};
use scheduler_core::traits::{BuildSystem, LogChunk, ReleaseRepository, TargetResolver};
use scheduler_core::{CancelHandle, SchedulerError, SchedulerResult};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

pub const PROTECTED_ENVIRONMENT_MESSAGE: &str = "生产环境禁止快速发布";
pub const DISPATCH_FAILURE_PREFIX: &str = "任务启动失败: ";
pub const SERIAL_CANCEL_REASON: &str = "前置任务失败，取消执行";

/// 发布任务状态查询结果
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReleaseTaskView {
    pub task_id: i64,
    pub release_id: i64,
    pub app_code: String,
    pub status: ReleaseTaskStatus,
    pub status_text: &'static str,
    pub progress: u8,
    pub build_number: Option<i64>,
    pub log_url: Option<String>,
    pub error_message: Option<String>,
}

pub struct ReleaseOrchestrator {
    repository: Arc<dyn ReleaseRepository>,
    builds: Arc<dyn BuildSystem>,
    resolver: Arc<dyn TargetResolver>,
    config: ReleaseConfig,
    cancel: CancelHandle,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ReleaseOrchestrator {
    pub fn new(
        repository: Arc<dyn ReleaseRepository>,
        builds: Arc<dyn BuildSystem>,
        resolver: Arc<dyn TargetResolver>,
        config: ReleaseConfig,
    ) -> Self {
        Self {
            repository,
            builds,
            resolver,
            config,
            cancel: CancelHandle::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// 校验后原子地创建发布及其任务
    #[instrument(skip(self, request), fields(title = %request.title))]
    pub async fn create_release(
        &self,
        request: &NewRelease,
    ) -> SchedulerResult<(Release, Vec<ReleaseTask>)> {
        if request.title.trim().is_empty() {
            return Err(SchedulerError::Validation("发布标题不能为空".to_string()));
        }
        if request.tasks.is_empty() {
            return Err(SchedulerError::Validation("至少需要一个应用".to_string()));
        }
        for item in &request.tasks {
            if self.config.is_protected(&item.environment) {
                return Err(SchedulerError::Validation(
                    PROTECTED_ENVIRONMENT_MESSAGE.to_string(),
                ));
            }
            if item.job_name.trim().is_empty() {
                return Err(SchedulerError::Validation(format!(
                    "应用 {} 缺少构建任务名称",
                    item.app_code
                )));
            }
            self.resolver.resolve_build_server(item.server_id).await?;
        }

        let (release, tasks) = self.repository.create_release(request).await?;
        info!(
            "发布已创建: release_id={}, tasks={}",
            release.id,
            tasks.len()
        );
        Ok((release, tasks))
    }

    /// 标记进行中并在后台开始执行
    #[instrument(skip(self))]
    pub async fn execute_release(
        self: &Arc<Self>,
        release_id: i64,
        mode: ExecutionMode,
    ) -> SchedulerResult<()> {
        let release = self.load_release(release_id).await?;
        if release.status != ReleaseStatus::NotDeployed {
            return Err(SchedulerError::InvalidState(format!(
                "发布 {} 不是未部署状态",
                release_id
            )));
        }
        let mut tasks = self.repository.get_release_tasks(release_id).await?;
        if tasks.is_empty() {
            return Err(SchedulerError::Validation(format!(
                "发布 {release_id} 没有任务"
            )));
        }
        tasks.sort_by_key(|t| t.execute_order);

        let patch = ReleasePatch {
            status: Some(ReleaseStatus::InProgress),
            execution_mode: Some(mode),
            start_time: Some(Utc::now()),
            ..Default::default()
        };
        self.repository.update_release(release_id, &patch).await?;
        info!(
            "发布开始执行: release_id={}, mode={:?}, tasks={}",
            release_id,
            mode,
            tasks.len()
        );

        match mode {
            ExecutionMode::Parallel => {
                for task in tasks {
                    let orchestrator = Arc::clone(self);
                    self.track(tokio::spawn(async move {
                        orchestrator.dispatch(task).await;
                    }));
                }
            }
            ExecutionMode::Serial => {
                let orchestrator = Arc::clone(self);
                self.track(tokio::spawn(async move {
                    orchestrator.run_serial(release_id, tasks).await;
                }));
            }
        }
        Ok(())
    }

    async fn run_serial(self: Arc<Self>, release_id: i64, tasks: Vec<ReleaseTask>) {
        let mut signal = self.cancel.signal();
        for (index, task) in tasks.iter().enumerate() {
            if signal.is_cancelled() {
                return;
            }
            if !self.dispatch(task.clone()).await {
                self.cancel_remaining(release_id, &tasks[index + 1..]).await;
                return;
            }
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.serial_poll_interval()) => {}
                    _ = signal.cancelled() => return,
                }
                match self.repository.get_release_task(task.id).await {
                    Ok(Some(current)) if current.status.is_terminal() => break,
                    Ok(Some(_)) => {}
                    Ok(None) => {
                        warn!("发布任务已被删除，停止串行执行: task_id={}", task.id);
                        return;
                    }
                    Err(e) => warn!("查询发布任务状态失败: task_id={}, error={}", task.id, e),
                }
            }
            debug!(
                "串行发布任务结束: release_id={}, order={}",
                release_id, task.execute_order
            );
        }
    }

    async fn cancel_remaining(&self, release_id: i64, remaining: &[ReleaseTask]) {
        for task in remaining {
            let patch = ReleaseTaskPatch {
                status: Some(ReleaseTaskStatus::Cancelled),
                error_message: Some(SERIAL_CANCEL_REASON.to_string()),
                end_time: Some(Utc::now()),
                ..Default::default()
            };
            if let Err(e) = self.repository.update_release_task(task.id, &patch).await {
                error!("取消发布任务失败: task_id={}, error={}", task.id, e);
            }
        }
        if !remaining.is_empty() {
            info!(
                "串行发布中止: release_id={}, cancelled={}",
                release_id,
                remaining.len()
            );
        }
        self.aggregate_logged(release_id).await;
    }

    /// 派发单个任务；返回是否成功触发构建
    async fn dispatch(self: &Arc<Self>, task: ReleaseTask) -> bool {
        let started = Utc::now();
        let patch = ReleaseTaskPatch {
            status: Some(ReleaseTaskStatus::Deploying),
            start_time: Some(started),
            ..Default::default()
        };
        if let Err(e) = self.repository.update_release_task(task.id, &patch).await {
            error!("更新发布任务状态失败: task_id={}, error={}", task.id, e);
        }

        let triggered = match self.resolver.resolve_build_server(task.server_id).await {
            Ok(server) => self
                .builds
                .trigger(&server, &task.job_name)
                .await
                .map(|build| (server, build)),
            Err(e) => Err(e),
        };

        match triggered {
            Ok((server, build)) => {
                let patch = ReleaseTaskPatch {
                    build_number: Some(build.build_number),
                    log_url: Some(build.log_url.clone()),
                    ..Default::default()
                };
                if let Err(e) = self.repository.update_release_task(task.id, &patch).await {
                    error!("保存构建号失败: task_id={}, error={}", task.id, e);
                }
                info!(
                    "发布任务已触发: task_id={}, job={}, build_number={}",
                    task.id, task.job_name, build.build_number
                );

                let orchestrator = Arc::clone(self);
                self.track(tokio::spawn(async move {
                    orchestrator
                        .monitor(task, server, build.build_number, started)
                        .await;
                }));
                true
            }
            Err(e) => {
                warn!("发布任务启动失败: task_id={}, error={}", task.id, e);
                self.finish(
                    &task,
                    started,
                    ReleaseTaskStatus::Failed,
                    Some(format!("{DISPATCH_FAILURE_PREFIX}{e}")),
                )
                .await;
                false
            }
        }
    }

    async fn monitor(
        &self,
        task: ReleaseTask,
        server: scheduler_core::models::BuildServer,
        build_number: i64,
        started: DateTime<Utc>,
    ) {
        let result = self
            .builds
            .wait_for_completion(&server, &task.job_name, build_number, self.cancel.signal())
            .await;

        let (status, message) = match result {
            Ok(result) => match result.failure_message() {
                None => (ReleaseTaskStatus::Succeeded, None),
                Some(message) => (ReleaseTaskStatus::Failed, Some(message)),
            },
            Err(SchedulerError::Shutdown) => {
                info!("发布监控被中断: task_id={}", task.id);
                return;
            }
            Err(SchedulerError::Timeout(message)) => (ReleaseTaskStatus::Failed, Some(message)),
            Err(e) => (ReleaseTaskStatus::Failed, Some(e.to_string())),
        };
        self.finish(&task, started, status, message).await;
    }

    /// 写入终态后尝试聚合发布
    async fn finish(
        &self,
        task: &ReleaseTask,
        started: DateTime<Utc>,
        status: ReleaseTaskStatus,
        message: Option<String>,
    ) {
        let ended = Utc::now();
        let patch = ReleaseTaskPatch {
            status: Some(status),
            error_message: message,
            end_time: Some(ended),
            duration_secs: Some((ended - started).num_seconds().max(0)),
            ..Default::default()
        };
        if let Err(e) = self.repository.update_release_task(task.id, &patch).await {
            error!("更新发布任务结果失败: task_id={}, error={}", task.id, e);
        }
        info!(
            "发布任务结束: task_id={}, status={}",
            task.id,
            status.display_name()
        );
        self.aggregate_logged(task.release_id).await;
    }

    async fn aggregate_logged(&self, release_id: i64) {
        if let Err(e) = self.aggregate(release_id).await {
            warn!("聚合发布状态失败: release_id={}, error={}", release_id, e);
        }
    }

    /// 全部任务进入终态时写入发布的最终状态和总耗时
    pub async fn aggregate(&self, release_id: i64) -> SchedulerResult<Option<ReleaseStatus>> {
        let tasks = self.repository.get_release_tasks(release_id).await?;
        let Some((status, duration)) = aggregate_release(&tasks) else {
            return Ok(None);
        };
        let patch = ReleasePatch {
            status: Some(status),
            end_time: Some(Utc::now()),
            duration_secs: Some(duration),
            ..Default::default()
        };
        self.repository.update_release(release_id, &patch).await?;
        info!(
            "发布完成: release_id={}, status={:?}, duration={}s",
            release_id, status, duration
        );
        Ok(Some(status))
    }

    pub async fn release_task_status(&self, task_id: i64) -> SchedulerResult<ReleaseTaskView> {
        let task = self.load_task(task_id).await?;
        Ok(ReleaseTaskView {
            task_id: task.id,
            release_id: task.release_id,
            progress: release_task_progress(
                task.status,
                task.start_time,
                Utc::now(),
                self.config.typical_duration_seconds as i64,
            ),
            app_code: task.app_code,
            status: task.status,
            status_text: task.status.display_name(),
            build_number: task.build_number,
            log_url: task.log_url,
            error_message: task.error_message,
        })
    }

    /// 从 `start` 偏移量开始读取构建日志
    pub async fn release_task_log(&self, task_id: i64, start: u64) -> SchedulerResult<LogChunk> {
        let task = self.load_task(task_id).await?;
        let Some(build_number) = task.build_number else {
            return Err(SchedulerError::InvalidState(format!(
                "发布任务 {task_id} 尚未开始构建"
            )));
        };
        let server = self.resolver.resolve_build_server(task.server_id).await?;
        self.builds
            .fetch_log(&server, &task.job_name, build_number, start)
            .await
    }

    /// 进行中的发布不能删除
    #[instrument(skip(self))]
    pub async fn delete_release(&self, release_id: i64) -> SchedulerResult<()> {
        let release = self.load_release(release_id).await?;
        if release.status == ReleaseStatus::InProgress {
            return Err(SchedulerError::InvalidState(format!(
                "发布 {release_id} 正在进行中，不能删除"
            )));
        }
        self.repository.delete_release(release_id).await?;
        info!("发布已删除: release_id={}", release_id);
        Ok(())
    }

    /// 中断所有监控并等待后台任务退出
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handles: Vec<JoinHandle<()>> = match self.handles.lock() {
            Ok(mut handles) => handles.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("发布后台任务退出异常: {}", e);
            }
        }
        info!("发布编排已停止");
    }

    fn track(&self, handle: JoinHandle<()>) {
        if let Ok(mut handles) = self.handles.lock() {
            handles.retain(|h| !h.is_finished());
            handles.push(handle);
        }
    }

    async fn load_release(&self, release_id: i64) -> SchedulerResult<Release> {
        self.repository
            .get_release(release_id)
            .await?
            .ok_or(SchedulerError::ReleaseNotFound { id: release_id })
    }

    async fn load_task(&self, task_id: i64) -> SchedulerResult<ReleaseTask> {
        self.repository
            .get_release_task(task_id)
            .await?
            .ok_or(SchedulerError::ReleaseTaskNotFound { id: task_id })
    }
}
