use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::job::{JobPayload, Priority};

/// 任务生命周期状态，父任务与子任务共用
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Paused,
    Cancelled,
}

impl JobStatus {
    pub fn code(&self) -> i64 {
        match self {
            JobStatus::Pending => 1,
            JobStatus::Running => 2,
            JobStatus::Succeeded => 3,
            JobStatus::Failed => 4,
            JobStatus::Paused => 5,
            JobStatus::Cancelled => 6,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(JobStatus::Pending),
            2 => Some(JobStatus::Running),
            3 => Some(JobStatus::Succeeded),
            4 => Some(JobStatus::Failed),
            5 => Some(JobStatus::Paused),
            6 => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            JobStatus::Pending => "等待中",
            JobStatus::Running => "运行中",
            JobStatus::Succeeded => "成功",
            JobStatus::Failed => "异常",
            JobStatus::Paused => "已暂停",
            JobStatus::Cancelled => "已取消",
        }
    }
}

/// 父任务类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskType {
    /// 立即执行
    Immediate,
    /// 定时任务
    Scheduled,
    /// 多主机批量任务
    Batch,
}

impl TaskType {
    pub fn code(&self) -> i64 {
        match self {
            TaskType::Immediate => 1,
            TaskType::Scheduled => 2,
            TaskType::Batch => 3,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(TaskType::Immediate),
            2 => Some(TaskType::Scheduled),
            3 => Some(TaskType::Batch),
            _ => None,
        }
    }

    /// 入队优先级由父任务类型决定
    pub fn priority(&self) -> Priority {
        match self {
            TaskType::Immediate => Priority::High,
            TaskType::Scheduled => Priority::Normal,
            TaskType::Batch => Priority::Low,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            TaskType::Immediate => "立即执行",
            TaskType::Scheduled => "定时任务",
            TaskType::Batch => "批量任务",
        }
    }
}

/// 父任务
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParentTask {
    pub id: i64,
    pub name: String,
    pub task_type: TaskType,
    pub cron_expr: Option<String>,
    pub status: JobStatus,
    /// 子任务耗时之和（秒）
    pub duration_secs: i64,
    pub task_count: i64,
    pub execute_count: i64,
    pub next_run_time: Option<DateTime<Utc>>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub remark: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ParentTask {
    pub fn is_recurring(&self) -> bool {
        self.task_type == TaskType::Scheduled
    }

    /// 有效的cron表达式（去除空白后非空）
    pub fn cron(&self) -> Option<&str> {
        self.cron_expr
            .as_deref()
            .map(str::trim)
            .filter(|expr| !expr.is_empty())
    }
}

/// 子任务记录
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRecord {
    pub id: i64,
    pub task_id: i64,
    pub payload: JobPayload,
    pub status: JobStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_secs: i64,
    pub log: Option<String>,
    pub log_path: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// 创建父任务及其子任务的请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewParentTask {
    pub name: String,
    pub task_type: TaskType,
    pub cron_expr: Option<String>,
    pub remark: Option<String>,
    pub jobs: Vec<JobPayload>,
}

impl NewParentTask {
    /// 模板 × 主机 展开为命令子任务
    pub fn commands(
        name: impl Into<String>,
        task_type: TaskType,
        template_ids: &[i64],
        host_ids: &[i64],
    ) -> Self {
        let jobs = template_ids
            .iter()
            .flat_map(|template_id| {
                host_ids.iter().map(move |host_id| JobPayload::Command {
                    host_id: *host_id,
                    template_id: *template_id,
                })
            })
            .collect();
        Self {
            name: name.into(),
            task_type,
            cron_expr: None,
            remark: None,
            jobs,
        }
    }

    pub fn with_cron(mut self, cron_expr: impl Into<String>) -> Self {
        self.cron_expr = Some(cron_expr.into());
        self
    }
}

/// 父任务部分更新
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParentTaskPatch {
    pub status: Option<JobStatus>,
    pub duration_secs: Option<i64>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub next_run_time: Option<DateTime<Utc>>,
}

impl ParentTaskPatch {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_next_run_time(mut self, next_run_time: DateTime<Utc>) -> Self {
        self.next_run_time = Some(next_run_time);
        self
    }

    pub fn apply(&self, task: &mut ParentTask) {
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(duration) = self.duration_secs {
            task.duration_secs = duration;
        }
        if let Some(start) = self.start_time {
            task.start_time = Some(start);
        }
        if let Some(end) = self.end_time {
            task.end_time = Some(end);
        }
        if let Some(next) = self.next_run_time {
            task.next_run_time = Some(next);
        }
    }
}

/// 子任务部分更新
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobRecordPatch {
    pub status: Option<JobStatus>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_secs: Option<i64>,
    pub log: Option<String>,
    pub log_path: Option<String>,
    pub error_message: Option<String>,
}

impl JobRecordPatch {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn with_log(mut self, log: impl Into<String>) -> Self {
        self.log = Some(log.into());
        self
    }

    pub fn apply(&self, record: &mut JobRecord) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(start) = self.start_time {
            record.start_time = Some(start);
        }
        if let Some(end) = self.end_time {
            record.end_time = Some(end);
        }
        if let Some(duration) = self.duration_secs {
            record.duration_secs = duration;
        }
        if let Some(log) = &self.log {
            record.log = Some(log.clone());
        }
        if let Some(path) = &self.log_path {
            record.log_path = Some(path.clone());
        }
        if let Some(message) = &self.error_message {
            record.error_message = Some(message.clone());
        }
    }
}
