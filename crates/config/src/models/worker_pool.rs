use crate::validation::{ConfigValidator, ValidationUtils};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerPoolConfig {
    /// 0 表示按CPU核数的两倍
    pub workers: usize,
    pub max_concurrency: usize,
    pub per_target_concurrency: usize,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub poll_timeout_ms: u64,
    pub retry_drain_interval_ms: u64,
    pub metrics_enabled: bool,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            max_concurrency: 50,
            per_target_concurrency: 5,
            max_retries: 3,
            retry_delay_ms: 5_000,
            poll_timeout_ms: 5_000,
            retry_drain_interval_ms: 10_000,
            metrics_enabled: true,
        }
    }
}

impl WorkerPoolConfig {
    pub fn worker_count(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get() * 2)
            .unwrap_or(2)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn retry_drain_interval(&self) -> Duration {
        Duration::from_millis(self.retry_drain_interval_ms)
    }
}

impl ConfigValidator for WorkerPoolConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        if self.workers > 10000 {
            return Err(crate::ConfigError::Validation(
                "worker_pool.workers must be less than or equal to 10000".to_string(),
            ));
        }
        ValidationUtils::validate_count(self.max_concurrency, "worker_pool.max_concurrency")?;
        ValidationUtils::validate_count(
            self.per_target_concurrency,
            "worker_pool.per_target_concurrency",
        )?;
        if self.per_target_concurrency > self.max_concurrency {
            return Err(crate::ConfigError::Validation(
                "worker_pool.per_target_concurrency must not exceed max_concurrency".to_string(),
            ));
        }
        ValidationUtils::validate_interval_ms(
            self.retry_delay_ms,
            3_600_000,
            "worker_pool.retry_delay_ms",
        )?;
        ValidationUtils::validate_interval_ms(
            self.poll_timeout_ms,
            60_000,
            "worker_pool.poll_timeout_ms",
        )?;
        ValidationUtils::validate_interval_ms(
            self.retry_drain_interval_ms,
            3_600_000,
            "worker_pool.retry_drain_interval_ms",
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_count_defaults_to_cpu_multiple() {
        let config = WorkerPoolConfig::default();
        assert!(config.worker_count() >= 2);
        assert_eq!(config.worker_count() % 2, 0);

        let fixed = WorkerPoolConfig {
            workers: 3,
            ..Default::default()
        };
        assert_eq!(fixed.worker_count(), 3);
    }

    #[test]
    fn test_worker_pool_validation() {
        let config = WorkerPoolConfig::default();
        assert!(config.validate().is_ok());

        let mut invalid = config.clone();
        invalid.max_concurrency = 0;
        assert!(invalid.validate().is_err());

        let mut invalid = config.clone();
        invalid.per_target_concurrency = 60;
        assert!(invalid.validate().is_err());

        let mut invalid = config;
        invalid.poll_timeout_ms = 0;
        assert!(invalid.validate().is_err());
    }
}
