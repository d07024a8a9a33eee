use std::sync::Arc;

use scheduler_config::{JobStoreBackend, JobStoreConfig};
use scheduler_core::{traits::JobStore, SchedulerResult};
use tracing::{debug, info};

use crate::{InMemoryJobStore, RedisJobStore};

pub struct JobStoreFactory;

impl JobStoreFactory {
    pub async fn create(config: &JobStoreConfig) -> SchedulerResult<Arc<dyn JobStore>> {
        debug!("创建任务存储: backend={:?}", config.backend);

        match config.backend {
            JobStoreBackend::Memory => {
                info!("使用内存任务存储");
                Ok(Arc::new(InMemoryJobStore::new()))
            }
            JobStoreBackend::Redis => {
                info!("使用Redis任务存储");
                let store = RedisJobStore::connect(
                    &config.redis_url,
                    std::time::Duration::from_secs(config.connection_timeout_seconds),
                )
                .await?;
                Ok(Arc::new(store))
            }
        }
    }
}
