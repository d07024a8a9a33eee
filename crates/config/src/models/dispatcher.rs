use crate::validation::{ConfigValidator, ValidationUtils};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReleaseConfig {
    /// 禁止快速发布的环境
    pub protected_environments: Vec<String>,
    pub serial_poll_interval_ms: u64,
    /// 进度估算使用的典型构建时长
    pub typical_duration_seconds: u64,
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        Self {
            protected_environments: vec!["prod".to_string()],
            serial_poll_interval_ms: 1_000,
            typical_duration_seconds: 300,
        }
    }
}

impl ReleaseConfig {
    pub fn serial_poll_interval(&self) -> Duration {
        Duration::from_millis(self.serial_poll_interval_ms)
    }

    pub fn is_protected(&self, environment: &str) -> bool {
        self.protected_environments
            .iter()
            .any(|env| env.eq_ignore_ascii_case(environment.trim()))
    }
}

impl ConfigValidator for ReleaseConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_interval_ms(
            self.serial_poll_interval_ms,
            60_000,
            "release.serial_poll_interval_ms",
        )?;
        ValidationUtils::validate_interval_ms(
            self.typical_duration_seconds,
            86_400,
            "release.typical_duration_seconds",
        )?;
        for env in &self.protected_environments {
            ValidationUtils::validate_not_empty(env, "release.protected_environments")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// 启动时恢复数据库中的定时任务
    pub load_on_start: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            load_on_start: true,
        }
    }
}

impl ConfigValidator for SchedulerConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        if self.load_on_start && !self.enabled {
            return Err(crate::ConfigError::Validation(
                "scheduler.load_on_start requires scheduler.enabled".to_string(),
            ));
        }
        Ok(())
    }
}
