//! 集成测试用的容器环境

use anyhow::Result;
use testcontainers::runners::AsyncRunner;
use testcontainers::ContainerAsync;
use testcontainers_modules::redis::Redis;

/// Redis测试容器，离开作用域时自动销毁
pub struct RedisTestContainer {
    #[allow(dead_code)]
    container: ContainerAsync<Redis>,
    pub url: String,
}

impl RedisTestContainer {
    pub async fn new() -> Result<Self> {
        let container = Redis::default().start().await?;
        let port = container.get_host_port_ipv4(6379).await?;
        Ok(Self {
            container,
            url: format!("redis://127.0.0.1:{port}"),
        })
    }
}
