use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 发布状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ReleaseStatus {
    NotDeployed,
    InProgress,
    Succeeded,
    Failed,
}

impl ReleaseStatus {
    pub fn code(&self) -> i64 {
        match self {
            ReleaseStatus::NotDeployed => 1,
            ReleaseStatus::InProgress => 2,
            ReleaseStatus::Succeeded => 3,
            ReleaseStatus::Failed => 4,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(ReleaseStatus::NotDeployed),
            2 => Some(ReleaseStatus::InProgress),
            3 => Some(ReleaseStatus::Succeeded),
            4 => Some(ReleaseStatus::Failed),
            _ => None,
        }
    }
}

/// 发布任务状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ReleaseTaskStatus {
    NotDeployed,
    Deploying,
    Succeeded,
    Failed,
    Cancelled,
}

impl ReleaseTaskStatus {
    pub fn code(&self) -> i64 {
        match self {
            ReleaseTaskStatus::NotDeployed => 1,
            ReleaseTaskStatus::Deploying => 2,
            ReleaseTaskStatus::Succeeded => 3,
            ReleaseTaskStatus::Failed => 4,
            ReleaseTaskStatus::Cancelled => 5,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(ReleaseTaskStatus::NotDeployed),
            2 => Some(ReleaseTaskStatus::Deploying),
            3 => Some(ReleaseTaskStatus::Succeeded),
            4 => Some(ReleaseTaskStatus::Failed),
            5 => Some(ReleaseTaskStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReleaseTaskStatus::Succeeded | ReleaseTaskStatus::Failed | ReleaseTaskStatus::Cancelled
        )
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ReleaseTaskStatus::NotDeployed => "未部署",
            ReleaseTaskStatus::Deploying => "部署中",
            ReleaseTaskStatus::Succeeded => "成功",
            ReleaseTaskStatus::Failed => "异常",
            ReleaseTaskStatus::Cancelled => "已取消",
        }
    }
}

/// 执行模式
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Parallel,
    Serial,
}

impl ExecutionMode {
    pub fn code(&self) -> i64 {
        match self {
            ExecutionMode::Parallel => 1,
            ExecutionMode::Serial => 2,
        }
    }

    /// 未知取值按并行处理
    pub fn from_code(code: i64) -> Self {
        match code {
            2 => ExecutionMode::Serial,
            _ => ExecutionMode::Parallel,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Release {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub status: ReleaseStatus,
    pub task_count: i64,
    pub execution_mode: ExecutionMode,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_secs: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReleaseTask {
    pub id: i64,
    pub release_id: i64,
    pub app_name: String,
    pub app_code: String,
    pub environment: String,
    pub server_id: i64,
    pub job_name: String,
    pub execute_order: i64,
    pub status: ReleaseTaskStatus,
    pub build_number: Option<i64>,
    pub log_url: Option<String>,
    pub error_message: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_secs: i64,
}

/// 发布中的单个应用
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewReleaseTask {
    pub app_name: String,
    pub app_code: String,
    pub environment: String,
    pub server_id: i64,
    pub job_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRelease {
    pub title: String,
    pub description: Option<String>,
    pub tasks: Vec<NewReleaseTask>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReleasePatch {
    pub status: Option<ReleaseStatus>,
    pub execution_mode: Option<ExecutionMode>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_secs: Option<i64>,
}

impl ReleasePatch {
    pub fn apply(&self, release: &mut Release) {
        if let Some(status) = self.status {
            release.status = status;
        }
        if let Some(mode) = self.execution_mode {
            release.execution_mode = mode;
        }
        if let Some(start) = self.start_time {
            release.start_time = Some(start);
        }
        if let Some(end) = self.end_time {
            release.end_time = Some(end);
        }
        if let Some(duration) = self.duration_secs {
            release.duration_secs = duration;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReleaseTaskPatch {
    pub status: Option<ReleaseTaskStatus>,
    pub build_number: Option<i64>,
    pub log_url: Option<String>,
    pub error_message: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_secs: Option<i64>,
}

impl ReleaseTaskPatch {
    pub fn status(status: ReleaseTaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn apply(&self, task: &mut ReleaseTask) {
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(number) = self.build_number {
            task.build_number = Some(number);
        }
        if let Some(url) = &self.log_url {
            task.log_url = Some(url.clone());
        }
        if let Some(message) = &self.error_message {
            task.error_message = Some(message.clone());
        }
        if let Some(start) = self.start_time {
            task.start_time = Some(start);
        }
        if let Some(end) = self.end_time {
            task.end_time = Some(end);
        }
        if let Some(duration) = self.duration_secs {
            task.duration_secs = duration;
        }
    }
}
