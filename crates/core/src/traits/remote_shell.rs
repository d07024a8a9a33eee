use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::HostConnection;
use crate::Result;

/// 单条远程命令的输出
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// 远程命令通道
///
/// 连接或认证失败必须返回 `Err(SchedulerError::Connectivity)`，
/// 命令本身的非零退出码通过 `CommandOutput::exit_code` 返回。
#[async_trait]
pub trait RemoteShell: Send + Sync {
    async fn run(&self, host: &HostConnection, command: &str) -> Result<CommandOutput>;
}
