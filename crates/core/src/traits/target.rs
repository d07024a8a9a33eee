use async_trait::async_trait;

use crate::models::{BuildServer, CommandTemplate, HostConnection};
use crate::Result;

/// 远程目标解析
///
/// 返回的认证信息已经解密，调用方不得持久化或记录到日志。
#[async_trait]
pub trait TargetResolver: Send + Sync {
    async fn resolve_host(&self, host_id: i64) -> Result<HostConnection>;

    async fn resolve_template(&self, template_id: i64) -> Result<CommandTemplate>;

    async fn resolve_build_server(&self, server_id: i64) -> Result<BuildServer>;
}
