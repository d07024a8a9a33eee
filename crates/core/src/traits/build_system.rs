use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cancel::CancelSignal;
use crate::models::BuildServer;
use crate::Result;

/// 已被构建系统接受的构建
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TriggeredBuild {
    pub build_number: i64,
    pub log_url: String,
}

/// 构建状态接口返回 `{building, result, url}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildStatus {
    pub building: bool,
    pub result: Option<String>,
    pub url: String,
}

impl BuildStatus {
    /// 控制台地址为 `url + "console"`；url 为空时返回 `None`
    pub fn console_url(&self) -> Option<String> {
        if self.url.is_empty() {
            return None;
        }
        let base = self.url.trim_end_matches('/');
        Some(format!("{base}/console"))
    }
}

/// 构建最终结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildResult {
    Success,
    Failure,
    Aborted,
    Unknown(String),
}

impl BuildResult {
    pub fn from_result(result: Option<&str>) -> Self {
        match result.unwrap_or_default() {
            "SUCCESS" => BuildResult::Success,
            "FAILURE" => BuildResult::Failure,
            "ABORTED" => BuildResult::Aborted,
            other => BuildResult::Unknown(other.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, BuildResult::Success)
    }

    /// 失败原因，成功时为 None
    pub fn failure_message(&self) -> Option<String> {
        match self {
            BuildResult::Success => None,
            BuildResult::Failure => Some("Jenkins构建失败".to_string()),
            BuildResult::Aborted => Some("Jenkins构建被中止".to_string()),
            BuildResult::Unknown(raw) => Some(format!("Jenkins构建结果未知: {raw}")),
        }
    }
}

/// 增量日志
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogChunk {
    pub log: String,
    pub has_more: bool,
    pub text_size: u64,
}

/// 外部构建系统协议
#[async_trait]
pub trait BuildSystem: Send + Sync {
    /// 触发构建，并等待最新构建号超过触发前的基准值
    async fn trigger(&self, server: &BuildServer, job_name: &str) -> Result<TriggeredBuild>;

    async fn build_status(
        &self,
        server: &BuildServer,
        job_name: &str,
        build_number: i64,
    ) -> Result<BuildStatus>;

    /// 轮询直到构建结束或超过最大等待时间
    async fn wait_for_completion(
        &self,
        server: &BuildServer,
        job_name: &str,
        build_number: i64,
        cancel: CancelSignal,
    ) -> Result<BuildResult>;

    async fn fetch_log(
        &self,
        server: &BuildServer,
        job_name: &str,
        build_number: i64,
        start: u64,
    ) -> Result<LogChunk>;
}
