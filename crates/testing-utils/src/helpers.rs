//! 测试常用工具

use scheduler_config::{JenkinsConfig, SshConfig, WorkerPoolConfig};
use std::time::Duration;
use tokio::time::sleep;

pub struct TestEnv;

impl TestEnv {
    /// 轮询直到条件成立或超时
    pub async fn wait_for<F, Fut>(mut condition: F, timeout: Duration) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let start = std::time::Instant::now();
        while start.elapsed() < timeout {
            if condition().await {
                return true;
            }
            sleep(Duration::from_millis(20)).await;
        }
        condition().await
    }

    pub fn init_logging() {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter("debug")
            .try_init();
    }
}

/// 毫秒级间隔的配置，测试不需要真实等待
pub struct FastConfig;

impl FastConfig {
    pub fn worker_pool(workers: usize) -> WorkerPoolConfig {
        WorkerPoolConfig {
            workers,
            max_concurrency: 50,
            per_target_concurrency: 5,
            max_retries: 3,
            retry_delay_ms: 10,
            poll_timeout_ms: 20,
            retry_drain_interval_ms: 20,
            metrics_enabled: true,
        }
    }

    pub fn ssh() -> SshConfig {
        SshConfig {
            connect_retry_delay_ms: 5,
            pid_poll_interval_ms: 5,
            liveness_poll_interval_ms: 5,
            max_wait_seconds: 5,
            ..SshConfig::default()
        }
    }

    pub fn jenkins() -> JenkinsConfig {
        JenkinsConfig {
            request_timeout_seconds: 5,
            build_start_wait_ms: 200,
            build_start_poll_ms: 20,
            monitor_wait_ms: 2_000,
            monitor_poll_ms: 20,
        }
    }
}
