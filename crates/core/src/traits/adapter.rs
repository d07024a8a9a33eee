use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cancel::CancelSignal;
use crate::models::{Job, JobPayload};
use crate::Result;

/// 适配器执行结果
///
/// `Ok(outcome)` 且 `success == false` 表示命令或构建本身失败（内容错误，不重试）；
/// `Err` 表示派发或连接层面的错误。
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub success: bool,
    /// 结果说明，失败时为原因
    pub detail: Option<String>,
    /// 完整执行日志
    pub log: Option<String>,
    /// 日志位置（远程URL或本地路径）
    pub log_location: Option<String>,
}

impl ExecutionOutcome {
    pub fn succeeded(log: Option<String>) -> Self {
        Self {
            success: true,
            detail: None,
            log,
            log_location: None,
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            success: false,
            detail: Some(detail.into()),
            log: None,
            log_location: None,
        }
    }

    pub fn with_log(mut self, log: impl Into<String>) -> Self {
        self.log = Some(log.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.log_location = Some(location.into());
        self
    }
}

/// 远程执行适配器
///
/// 把一个子任务从“已派发”推进到终态；所有轮询都有上限，
/// 并在每次轮询间隙检查取消信号。
#[async_trait]
pub trait ExecutionAdapter: Send + Sync {
    fn name(&self) -> &str;

    fn supports(&self, payload: &JobPayload) -> bool;

    async fn execute(&self, job: &Job, cancel: CancelSignal) -> Result<ExecutionOutcome>;

    /// 终止远程进程，不支持时什么都不做
    async fn kill(&self, _job: &Job) -> Result<()> {
        Ok(())
    }
}
