pub mod jenkins;
pub mod ssh;

pub use jenkins::{JenkinsAdapter, JenkinsClient};
pub use ssh::{OpenSshShell, RemotePaths, SshAdapter};

use scheduler_core::models::{Job, JobPayload};
use scheduler_core::traits::ExecutionAdapter;
use scheduler_core::{CancelSignal, SchedulerError, SchedulerResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// 轮询间隔等待，期间收到取消信号返回 `Shutdown`
pub(crate) async fn sleep_or_cancel(
    duration: Duration,
    cancel: &mut CancelSignal,
) -> SchedulerResult<()> {
    tokio::select! {
        _ = tokio::time::sleep(duration) => Ok(()),
        _ = cancel.cancelled() => Err(SchedulerError::Shutdown),
    }
}

/// 远程执行适配器注册表，按载荷类型选择适配器
#[derive(Default, Clone)]
pub struct AdapterRegistry {
    adapters: Vec<Arc<dyn ExecutionAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn ExecutionAdapter>) {
        info!("注册执行适配器: {}", adapter.name());
        self.adapters.push(adapter);
    }

    pub fn with(mut self, adapter: Arc<dyn ExecutionAdapter>) -> Self {
        self.register(adapter);
        self
    }

    /// 第一个支持该载荷的适配器
    pub fn resolve(&self, payload: &JobPayload) -> Option<Arc<dyn ExecutionAdapter>> {
        self.adapters
            .iter()
            .find(|adapter| adapter.supports(payload))
            .cloned()
    }

    /// 终止远程进程；没有对应适配器时忽略
    pub async fn kill(&self, job: &Job) -> SchedulerResult<()> {
        match self.resolve(&job.payload) {
            Some(adapter) => adapter.kill(job).await,
            None => {
                warn!(
                    "没有可用的执行适配器，跳过终止: record_id={}, kind={}",
                    job.record_id,
                    job.payload.kind()
                );
                Ok(())
            }
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.adapters.iter().map(|a| a.name().to_string()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
