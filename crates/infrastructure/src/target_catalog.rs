use async_trait::async_trait;
use scheduler_config::TargetsConfig;
use scheduler_core::models::{BuildServer, CommandTemplate, HostAuth, HostConnection};
use scheduler_core::traits::TargetResolver;
use scheduler_core::{SchedulerError, SchedulerResult};
use std::collections::HashMap;
use tracing::debug;

/// 基于配置文件的静态目标目录
#[derive(Debug, Default, Clone)]
pub struct StaticTargetResolver {
    hosts: HashMap<i64, HostConnection>,
    templates: HashMap<i64, CommandTemplate>,
    build_servers: HashMap<i64, BuildServer>,
}

impl StaticTargetResolver {
    pub fn from_config(config: &TargetsConfig) -> Self {
        let hosts = config
            .hosts
            .iter()
            .map(|h| {
                let auth = match (&h.password, &h.private_key) {
                    (_, Some(key)) => HostAuth::PrivateKey(key.clone()),
                    (Some(password), None) => HostAuth::Password(password.clone()),
                    (None, None) => HostAuth::Agent,
                };
                (
                    h.id,
                    HostConnection {
                        host_id: h.id,
                        address: h.address.clone(),
                        port: h.port,
                        username: h.username.clone(),
                        auth,
                    },
                )
            })
            .collect();

        let templates = config
            .templates
            .iter()
            .map(|t| {
                (
                    t.id,
                    CommandTemplate {
                        id: t.id,
                        name: t.name.clone(),
                        content: t.content.clone(),
                    },
                )
            })
            .collect();

        let build_servers = config
            .build_servers
            .iter()
            .map(|s| {
                (
                    s.id,
                    BuildServer {
                        id: s.id,
                        base_url: s.base_url.clone(),
                        username: s.username.clone(),
                        token: s.token.clone(),
                    },
                )
            })
            .collect();

        let resolver = Self {
            hosts,
            templates,
            build_servers,
        };
        debug!(
            "加载静态目标目录: hosts={}, templates={}, build_servers={}",
            resolver.hosts.len(),
            resolver.templates.len(),
            resolver.build_servers.len()
        );
        resolver
    }
}

#[async_trait]
impl TargetResolver for StaticTargetResolver {
    async fn resolve_host(&self, host_id: i64) -> SchedulerResult<HostConnection> {
        self.hosts
            .get(&host_id)
            .cloned()
            .ok_or(SchedulerError::HostNotFound { id: host_id })
    }

    async fn resolve_template(&self, template_id: i64) -> SchedulerResult<CommandTemplate> {
        self.templates
            .get(&template_id)
            .cloned()
            .ok_or(SchedulerError::TemplateNotFound { id: template_id })
    }

    async fn resolve_build_server(&self, server_id: i64) -> SchedulerResult<BuildServer> {
        self.build_servers
            .get(&server_id)
            .cloned()
            .ok_or(SchedulerError::BuildServerNotFound { id: server_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scheduler_config::{HostEntry, TemplateEntry};

    #[tokio::test]
    async fn test_resolve_from_config() {
        let config = TargetsConfig {
            hosts: vec![
                HostEntry {
                    id: 1,
                    address: "10.0.0.1".to_string(),
                    port: 2222,
                    username: "ops".to_string(),
                    password: Some("pw".to_string()),
                    private_key: None,
                },
                HostEntry {
                    id: 2,
                    address: "10.0.0.2".to_string(),
                    port: 22,
                    username: "ops".to_string(),
                    password: None,
                    private_key: None,
                },
            ],
            templates: vec![TemplateEntry {
                id: 5,
                name: "uptime".to_string(),
                content: "uptime".to_string(),
            }],
            build_servers: vec![],
        };
        let resolver = StaticTargetResolver::from_config(&config);

        let host = resolver.resolve_host(1).await.unwrap();
        assert_eq!(host.port, 2222);
        assert_eq!(host.auth, HostAuth::Password("pw".to_string()));
        assert_eq!(resolver.resolve_host(2).await.unwrap().auth, HostAuth::Agent);
        assert_eq!(resolver.resolve_template(5).await.unwrap().name, "uptime");

        assert!(matches!(
            resolver.resolve_host(3).await,
            Err(SchedulerError::HostNotFound { id: 3 })
        ));
        assert!(matches!(
            resolver.resolve_build_server(1).await,
            Err(SchedulerError::BuildServerNotFound { id: 1 })
        ));
    }
}
