use crate::validation::{ConfigValidator, ValidationUtils};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobStoreBackend {
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobStoreConfig {
    pub backend: JobStoreBackend,
    pub redis_url: String,
    /// 队列键前缀，实际键为 `{prefix}:{lane}`
    pub key_prefix: String,
    pub connection_timeout_seconds: u64,
}

impl Default for JobStoreConfig {
    fn default() -> Self {
        Self {
            backend: JobStoreBackend::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "dodevops:task_queue".to_string(),
            connection_timeout_seconds: 5,
        }
    }
}

impl ConfigValidator for JobStoreConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_not_empty(&self.key_prefix, "job_store.key_prefix")?;
        if self.backend == JobStoreBackend::Redis {
            ValidationUtils::validate_url_scheme(
                &self.redis_url,
                &["redis://", "rediss://"],
                "job_store.redis_url",
            )?;
        }
        ValidationUtils::validate_timeout_seconds(
            self.connection_timeout_seconds,
            "job_store.connection_timeout_seconds",
        )
    }
}
