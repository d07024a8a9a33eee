//! 远程执行适配器配置（SSH命令执行、Jenkins构建触发）

use crate::validation::{ConfigValidator, ValidationUtils};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    /// 连接/认证失败后的额外重试次数
    pub connect_retries: u32,
    pub connect_retry_delay_ms: u64,
    /// 等待pid文件出现的轮询次数
    pub pid_poll_attempts: u32,
    pub pid_poll_interval_ms: u64,
    pub liveness_poll_interval_ms: u64,
    /// 单个命令的最长等待时间
    pub max_wait_seconds: u64,
    pub connect_timeout_seconds: u64,
    pub remote_temp_dir: String,
    pub log_dir: String,
    pub ssh_binary: String,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            connect_retries: 3,
            connect_retry_delay_ms: 5_000,
            pid_poll_attempts: 3,
            pid_poll_interval_ms: 1_000,
            liveness_poll_interval_ms: 1_000,
            max_wait_seconds: 3_600,
            connect_timeout_seconds: 10,
            remote_temp_dir: "/tmp".to_string(),
            log_dir: "logs/tasks".to_string(),
            ssh_binary: "ssh".to_string(),
        }
    }
}

impl SshConfig {
    pub fn connect_retry_delay(&self) -> Duration {
        Duration::from_millis(self.connect_retry_delay_ms)
    }

    pub fn pid_poll_interval(&self) -> Duration {
        Duration::from_millis(self.pid_poll_interval_ms)
    }

    pub fn liveness_poll_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_poll_interval_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_seconds)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }
}

impl ConfigValidator for SshConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        if self.connect_retries > 10 {
            return Err(crate::ConfigError::Validation(
                "ssh.connect_retries must be less than or equal to 10".to_string(),
            ));
        }
        ValidationUtils::validate_count(self.pid_poll_attempts as usize, "ssh.pid_poll_attempts")?;
        ValidationUtils::validate_interval_ms(
            self.pid_poll_interval_ms,
            60_000,
            "ssh.pid_poll_interval_ms",
        )?;
        ValidationUtils::validate_interval_ms(
            self.liveness_poll_interval_ms,
            60_000,
            "ssh.liveness_poll_interval_ms",
        )?;
        ValidationUtils::validate_interval_ms(
            self.max_wait_seconds,
            86_400,
            "ssh.max_wait_seconds",
        )?;
        ValidationUtils::validate_timeout_seconds(
            self.connect_timeout_seconds,
            "ssh.connect_timeout_seconds",
        )?;
        ValidationUtils::validate_not_empty(&self.remote_temp_dir, "ssh.remote_temp_dir")?;
        ValidationUtils::validate_not_empty(&self.log_dir, "ssh.log_dir")?;
        ValidationUtils::validate_not_empty(&self.ssh_binary, "ssh.ssh_binary")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JenkinsConfig {
    pub request_timeout_seconds: u64,
    pub build_start_wait_ms: u64,
    pub build_start_poll_ms: u64,
    pub monitor_wait_ms: u64,
    pub monitor_poll_ms: u64,
}

impl Default for JenkinsConfig {
    fn default() -> Self {
        Self {
            request_timeout_seconds: 30,
            build_start_wait_ms: 60_000,
            build_start_poll_ms: 2_000,
            monitor_wait_ms: 30 * 60 * 1_000,
            monitor_poll_ms: 10_000,
        }
    }
}

impl JenkinsConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn build_start_wait(&self) -> Duration {
        Duration::from_millis(self.build_start_wait_ms)
    }

    pub fn build_start_poll(&self) -> Duration {
        Duration::from_millis(self.build_start_poll_ms)
    }

    pub fn monitor_wait(&self) -> Duration {
        Duration::from_millis(self.monitor_wait_ms)
    }

    pub fn monitor_poll(&self) -> Duration {
        Duration::from_millis(self.monitor_poll_ms)
    }
}

impl ConfigValidator for JenkinsConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_timeout_seconds(
            self.request_timeout_seconds,
            "jenkins.request_timeout_seconds",
        )?;
        ValidationUtils::validate_interval_ms(
            self.build_start_wait_ms,
            3_600_000,
            "jenkins.build_start_wait_ms",
        )?;
        ValidationUtils::validate_interval_ms(
            self.build_start_poll_ms,
            self.build_start_wait_ms,
            "jenkins.build_start_poll_ms",
        )?;
        ValidationUtils::validate_interval_ms(
            self.monitor_wait_ms,
            24 * 3_600_000,
            "jenkins.monitor_wait_ms",
        )?;
        ValidationUtils::validate_interval_ms(
            self.monitor_poll_ms,
            self.monitor_wait_ms,
            "jenkins.monitor_poll_ms",
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssh_defaults() {
        let config = SshConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.connect_retries, 3);
        assert_eq!(config.connect_retry_delay(), Duration::from_secs(5));
        assert_eq!(config.pid_poll_attempts, 3);
    }

    #[test]
    fn test_ssh_validation() {
        let mut config = SshConfig::default();
        config.pid_poll_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = SshConfig::default();
        config.remote_temp_dir = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_jenkins_poll_must_fit_in_wait() {
        let config = JenkinsConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.monitor_wait(), Duration::from_secs(1800));

        let mut invalid = config.clone();
        invalid.build_start_poll_ms = invalid.build_start_wait_ms + 1;
        assert!(invalid.validate().is_err());

        let mut invalid = config;
        invalid.monitor_poll_ms = 0;
        assert!(invalid.validate().is_err());
    }
}
