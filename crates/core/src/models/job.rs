use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 重试时间元数据键（Unix秒）
pub const RETRY_AT_KEY: &str = "retry_at";

/// 任务优先级
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Normal,
    Low,
}

impl Priority {
    /// 未识别的优先级一律映射为 normal
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "high" => Priority::High,
            "low" => Priority::Low,
            _ => Priority::Normal,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }

    pub fn lane(&self) -> Lane {
        match self {
            Priority::High => Lane::High,
            Priority::Normal => Lane::Normal,
            Priority::Low => Lane::Low,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 队列通道
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lane {
    High,
    Normal,
    Low,
    Retry,
    Failed,
}

impl Lane {
    /// 工作者按此顺序竞争弹出
    pub const ACTIVE: [Lane; 3] = [Lane::High, Lane::Normal, Lane::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            Lane::High => "high",
            Lane::Normal => "normal",
            Lane::Low => "low",
            Lane::Retry => "retry",
            Lane::Failed => "failed",
        }
    }

    /// 存储中的列表名
    pub fn key(&self, prefix: &str) -> String {
        format!("{prefix}:{}", self.as_str())
    }
}

/// 子任务载荷，决定由哪个远程执行适配器处理
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    /// 在主机上执行命令模板
    Command { host_id: i64, template_id: i64 },
    /// 触发外部构建系统的任务
    Build { server_id: i64, job_name: String },
}

impl JobPayload {
    /// 并发控制使用的目标标识
    pub fn target_key(&self) -> String {
        match self {
            JobPayload::Command { host_id, .. } => format!("host:{host_id}"),
            JobPayload::Build { server_id, .. } => format!("build:{server_id}"),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            JobPayload::Command { .. } => "command",
            JobPayload::Build { .. } => "build",
        }
    }
}

/// 入队的执行单元
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Job {
    /// 对应的子任务记录ID
    pub record_id: i64,
    /// 父任务ID
    pub task_id: i64,
    pub payload: JobPayload,
}

impl Job {
    pub fn new(record_id: i64, task_id: i64, payload: JobPayload) -> Self {
        Self {
            record_id,
            task_id,
            payload,
        }
    }

    pub fn target_key(&self) -> String {
        self.payload.target_key()
    }
}

/// 队列中的序列化记录
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueuedJob {
    pub job: Job,
    pub priority: Priority,
    pub retry_count: u32,
    pub max_retries: u32,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl QueuedJob {
    pub fn new(job: Job, priority: Priority, max_retries: u32) -> Self {
        Self {
            job,
            priority,
            retry_count: 0,
            max_retries,
            enqueued_at: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn retry_at(&self) -> Option<DateTime<Utc>> {
        self.metadata
            .get(RETRY_AT_KEY)
            .and_then(|v| v.as_i64())
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
    }

    pub fn set_retry_at(&mut self, at: DateTime<Utc>) {
        self.metadata
            .insert(RETRY_AT_KEY.to_string(), serde_json::json!(at.timestamp()));
    }

    /// 没有重试时间或已到达重试时间
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        match self.retry_at() {
            Some(at) => now.timestamp() >= at.timestamp(),
            None => true,
        }
    }

    /// 计数加一，返回是否已达到上限
    pub fn bump_retry(&mut self) -> bool {
        self.retry_count += 1;
        self.retry_count >= self.max_retries
    }

    pub fn encode(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(raw: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}
