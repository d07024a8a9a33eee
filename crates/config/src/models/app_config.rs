use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    adapters::{JenkinsConfig, SshConfig},
    database::DatabaseConfig,
    dispatcher::{ReleaseConfig, SchedulerConfig},
    job_store::JobStoreConfig,
    logging::LoggingConfig,
    targets::TargetsConfig,
    worker_pool::WorkerPoolConfig,
};
use crate::validation::ConfigValidator;

/// 默认配置文件搜索路径
pub const DEFAULT_CONFIG_PATHS: [&str; 3] = [
    "config/scheduler.toml",
    "scheduler.toml",
    "/etc/devops-scheduler/config.toml",
];

/// 环境变量前缀，如 `DEVOPS_SCHEDULER_WORKER_POOL__MAX_RETRIES=5`
pub const ENV_PREFIX: &str = "DEVOPS_SCHEDULER";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub job_store: JobStoreConfig,
    pub worker_pool: WorkerPoolConfig,
    pub ssh: SshConfig,
    pub jenkins: JenkinsConfig,
    pub release: ReleaseConfig,
    pub scheduler: SchedulerConfig,
    pub targets: TargetsConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else if let Some(path) = DEFAULT_CONFIG_PATHS
            .iter()
            .find(|path| Path::new(path).exists())
        {
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }
}

impl ConfigValidator for AppConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        self.database.validate()?;
        self.job_store.validate()?;
        self.worker_pool.validate()?;
        self.ssh.validate()?;
        self.jenkins.validate()?;
        self.release.validate()?;
        self.scheduler.validate()?;
        self.targets.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{JobStoreBackend, LogFormat};
    use std::io::Write;

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();
        assert_eq!(config.worker_pool.max_concurrency, 50);
        assert_eq!(config.worker_pool.per_target_concurrency, 5);
        assert_eq!(config.job_store.key_prefix, "dodevops:task_queue");
        assert_eq!(config.release.protected_environments, vec!["prod"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_app_config_from_partial_toml() {
        let toml_str = r#"
[job_store]
backend = "redis"
redis_url = "redis://cache:6379"

[worker_pool]
workers = 4
max_retries = 5

[[targets.hosts]]
id = 1
address = "10.0.0.8"
username = "ops"
password = "pw"

[[targets.build_servers]]
id = 7
base_url = "http://jenkins.local/"
username = "ci"
token = "t"

[logging]
level = "debug"
format = "json"
"#;

        let config = AppConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.job_store.backend, JobStoreBackend::Redis);
        assert_eq!(config.worker_pool.workers, 4);
        assert_eq!(config.worker_pool.max_retries, 5);
        assert_eq!(config.worker_pool.max_concurrency, 50);
        assert_eq!(config.targets.hosts[0].port, 22);
        assert_eq!(config.targets.build_servers[0].id, 7);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_invalid_toml_rejected() {
        let toml_str = r#"
[worker_pool]
max_concurrency = 0
"#;
        assert!(AppConfig::from_toml(toml_str).is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = AppConfig::default();
        let rendered = config.to_toml().unwrap();
        let parsed = AppConfig::from_toml(&rendered).unwrap();
        assert_eq!(parsed.ssh.pid_poll_attempts, config.ssh.pid_poll_attempts);
        assert_eq!(parsed.jenkins.monitor_wait_ms, config.jenkins.monitor_wait_ms);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[release]\nprotected_environments = [\"prod\", \"staging\"]\n"
        )
        .unwrap();

        let config = AppConfig::load(file.path().to_str()).unwrap();
        assert!(config.release.is_protected("staging"));
        assert_eq!(config.database.max_connections, 10);
    }

    #[test]
    fn test_load_missing_file() {
        assert!(AppConfig::load(Some("/nonexistent/devops.toml")).is_err());
    }
}
