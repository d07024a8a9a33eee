//! 定时任务调度器
//!
//! 每个注册的父任务对应一个后台定时器：计算下一次触发时间，睡眠到该时刻后调用触发回调。
//! 注册表由读写锁保护，锁内只做内存操作；持久化写入和等待定时器退出都在锁外完成，
//! 避免与正在执行的回调互相等待。

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use scheduler_core::models::{JobStatus, ParentTask, ParentTaskPatch, TaskType};
use scheduler_core::traits::TaskRepository;
use scheduler_core::{CancelHandle, SchedulerError, SchedulerResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cron_utils::CronScheduler;

/// 触发回调，参数为父任务ID
pub type TriggerCallback = Arc<dyn Fn(i64) -> BoxFuture<'static, ()> + Send + Sync>;

struct Timer {
    cancel: CancelHandle,
    handle: JoinHandle<()>,
}

struct Entry {
    schedule: CronScheduler,
    callback: TriggerCallback,
    timer: Option<Timer>,
}

/// 注册表快照中的一项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub task_id: i64,
    pub cron_expr: String,
    pub next_run_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStats {
    pub running: bool,
    pub entry_count: usize,
}

pub struct RecurringScheduler {
    repository: Arc<dyn TaskRepository>,
    entries: RwLock<HashMap<i64, Entry>>,
    running: AtomicBool,
}

impl RecurringScheduler {
    pub fn new(repository: Arc<dyn TaskRepository>) -> Self {
        Self {
            repository,
            entries: RwLock::new(HashMap::new()),
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// 启动所有已注册条目的定时器
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut entries = self.entries.write().await;
        for (task_id, entry) in entries.iter_mut() {
            if entry.timer.is_none() {
                entry.timer = Some(spawn_timer(*task_id, entry));
            }
        }
        info!("定时任务调度器已启动: entries={}", entries.len());
    }

    /// 停止所有定时器并等待正在执行的回调结束；注册信息保留
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let timers: Vec<Timer> = {
            let mut entries = self.entries.write().await;
            entries.values_mut().filter_map(|e| e.timer.take()).collect()
        };
        for timer in &timers {
            timer.cancel.cancel();
        }
        for timer in timers {
            if let Err(e) = timer.handle.await {
                warn!("定时器退出异常: {}", e);
            }
        }
        info!("定时任务调度器已停止");
    }

    /// 注册定时任务；同一父任务重复注册时替换旧的注册
    pub async fn add_scheduled_task(
        &self,
        task_id: i64,
        cron_expr: &str,
        callback: TriggerCallback,
    ) -> SchedulerResult<()> {
        let schedule = CronScheduler::new(cron_expr)?;
        let mut entry = Entry {
            schedule,
            callback,
            timer: None,
        };

        let replaced = {
            let mut entries = self.entries.write().await;
            if self.is_running() {
                entry.timer = Some(spawn_timer(task_id, &entry));
            }
            entries.insert(task_id, entry)
        };
        if let Some(old) = replaced.and_then(|e| e.timer) {
            old.cancel.cancel();
        }
        info!("定时任务已注册: task_id={}, cron={}", task_id, cron_expr);
        Ok(())
    }

    /// 移除注册；返回是否存在。不等待正在执行的回调，回调内部也可以安全调用
    pub async fn remove_scheduled_task(&self, task_id: i64) -> bool {
        let removed = self.entries.write().await.remove(&task_id);
        match removed {
            Some(entry) => {
                if let Some(timer) = entry.timer {
                    timer.cancel.cancel();
                }
                info!("定时任务已移除: task_id={}", task_id);
                true
            }
            None => false,
        }
    }

    pub async fn update_scheduled_task(
        &self,
        task_id: i64,
        cron_expr: &str,
        callback: TriggerCallback,
    ) -> SchedulerResult<()> {
        // 先校验，避免移除后无法重新注册
        CronScheduler::validate_cron_expression(cron_expr)?;
        self.remove_scheduled_task(task_id).await;
        self.add_scheduled_task(task_id, cron_expr, callback).await
    }

    /// 移除定时器后持久化暂停状态
    pub async fn pause_scheduled_task(&self, task_id: i64) -> SchedulerResult<()> {
        let task = self.load_task(task_id).await?;
        if task.task_type != TaskType::Scheduled {
            return Err(SchedulerError::InvalidState(format!(
                "任务 {task_id} 不是定时任务"
            )));
        }
        self.remove_scheduled_task(task_id).await;
        self.repository
            .update_task(task_id, &ParentTaskPatch::status(JobStatus::Paused))
            .await?;
        info!("定时任务已暂停: task_id={}", task_id);
        Ok(())
    }

    /// 校验暂停状态，写入下一次执行时间和运行状态后重新注册
    pub async fn resume_scheduled_task(
        &self,
        task_id: i64,
        callback: TriggerCallback,
    ) -> SchedulerResult<DateTime<Utc>> {
        let task = self.load_task(task_id).await?;
        if task.task_type != TaskType::Scheduled {
            return Err(SchedulerError::InvalidState(format!(
                "任务 {task_id} 不是定时任务"
            )));
        }
        if task.status != JobStatus::Paused {
            return Err(SchedulerError::InvalidState(format!(
                "任务 {} 未处于暂停状态: {}",
                task_id,
                task.status.display_name()
            )));
        }
        let cron_expr = required_cron(&task)?;
        let next = next_fire(cron_expr)?;

        let patch = ParentTaskPatch::status(JobStatus::Running).with_next_run_time(next);
        self.repository.update_task(task_id, &patch).await?;
        self.add_scheduled_task(task_id, cron_expr, callback).await?;
        info!(
            "定时任务已恢复: task_id={}, next_run_time={}",
            task_id,
            next.to_rfc3339()
        );
        Ok(next)
    }

    /// 启动时恢复数据库中的定时任务，返回注册数量
    pub async fn load_scheduled_tasks(&self, callback: TriggerCallback) -> SchedulerResult<usize> {
        let tasks = self
            .repository
            .list_tasks_by_type(TaskType::Scheduled)
            .await?;
        let mut registered = 0;

        for task in tasks {
            let Some(cron_expr) = task.cron() else {
                warn!("定时任务缺少cron表达式，跳过: task_id={}", task.id);
                continue;
            };
            let next = match task.status {
                JobStatus::Running | JobStatus::Pending => match next_fire(cron_expr) {
                    Ok(next) => next,
                    Err(e) => {
                        warn!("定时任务表达式无效，跳过: task_id={}, error={}", task.id, e);
                        continue;
                    }
                },
                JobStatus::Paused => {
                    debug!("定时任务已暂停，不注册: task_id={}", task.id);
                    continue;
                }
                status => {
                    debug!(
                        "定时任务状态为{}，不注册: task_id={}",
                        status.display_name(),
                        task.id
                    );
                    continue;
                }
            };

            let mut patch = ParentTaskPatch::default().with_next_run_time(next);
            if task.status == JobStatus::Pending {
                patch.status = Some(JobStatus::Running);
            }
            if let Err(e) = self.repository.update_task(task.id, &patch).await {
                error!("更新定时任务失败，跳过: task_id={}, error={}", task.id, e);
                continue;
            }
            self.add_scheduled_task(task.id, cron_expr, callback.clone())
                .await?;
            registered += 1;
        }

        info!("定时任务加载完成: registered={}", registered);
        Ok(registered)
    }

    pub async fn contains(&self, task_id: i64) -> bool {
        self.entries.read().await.contains_key(&task_id)
    }

    /// 按父任务ID排序的注册表快照
    pub async fn entries(&self) -> Vec<ScheduleEntry> {
        let now = Utc::now();
        let entries = self.entries.read().await;
        let mut snapshot: Vec<ScheduleEntry> = entries
            .iter()
            .map(|(task_id, entry)| ScheduleEntry {
                task_id: *task_id,
                cron_expr: entry.schedule.expression().to_string(),
                next_run_time: entry.schedule.next_execution_time(now),
            })
            .collect();
        snapshot.sort_by_key(|e| e.task_id);
        snapshot
    }

    pub async fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            running: self.is_running(),
            entry_count: self.entries.read().await.len(),
        }
    }

    async fn load_task(&self, task_id: i64) -> SchedulerResult<ParentTask> {
        self.repository
            .get_task(task_id)
            .await?
            .ok_or(SchedulerError::TaskNotFound { id: task_id })
    }
}

fn required_cron(task: &ParentTask) -> SchedulerResult<&str> {
    task.cron().ok_or_else(|| {
        SchedulerError::Validation(format!("定时任务 {} 缺少cron表达式", task.id))
    })
}

/// 严格晚于当前时刻的下一次触发时间
fn next_fire(cron_expr: &str) -> SchedulerResult<DateTime<Utc>> {
    CronScheduler::new(cron_expr)?
        .next_execution_time(Utc::now())
        .ok_or_else(|| SchedulerError::InvalidCron {
            expr: cron_expr.to_string(),
            message: "没有后续触发时间".to_string(),
        })
}

fn spawn_timer(task_id: i64, entry: &Entry) -> Timer {
    let cancel = CancelHandle::new();
    let mut signal = cancel.signal();
    let schedule = entry.schedule.clone();
    let callback = entry.callback.clone();

    let handle = tokio::spawn(async move {
        loop {
            let now = Utc::now();
            let Some(next) = schedule.next_execution_time(now) else {
                warn!("没有后续触发时间，定时器退出: task_id={}", task_id);
                break;
            };
            let wait = (next - now).to_std().unwrap_or_default();
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = signal.cancelled() => break,
            }
            if signal.is_cancelled() {
                break;
            }
            debug!("定时任务触发: task_id={}, at={}", task_id, next.to_rfc3339());
            callback(task_id).await;
        }
        debug!("定时器退出: task_id={}", task_id);
    });

    Timer { cancel, handle }
}
