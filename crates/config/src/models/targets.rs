use crate::validation::{ConfigValidator, ValidationUtils};
use serde::{Deserialize, Serialize};

/// 静态主机目录项
#[derive(Clone, Serialize, Deserialize)]
pub struct HostEntry {
    pub id: i64,
    pub address: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub private_key: Option<String>,
}

fn default_ssh_port() -> u16 {
    22
}

impl std::fmt::Debug for HostEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostEntry")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("private_key", &self.private_key.as_ref().map(|_| "***"))
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateEntry {
    pub id: i64,
    pub name: String,
    pub content: String,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct BuildServerEntry {
    pub id: i64,
    pub base_url: String,
    pub username: String,
    pub token: String,
}

impl std::fmt::Debug for BuildServerEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildServerEntry")
            .field("id", &self.id)
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("token", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetsConfig {
    pub hosts: Vec<HostEntry>,
    pub templates: Vec<TemplateEntry>,
    pub build_servers: Vec<BuildServerEntry>,
}

impl ConfigValidator for TargetsConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        let host_ids: Vec<i64> = self.hosts.iter().map(|h| h.id).collect();
        ValidationUtils::validate_unique_ids(&host_ids, "targets.hosts")?;
        for host in &self.hosts {
            ValidationUtils::validate_not_empty(&host.address, "targets.hosts.address")?;
            ValidationUtils::validate_not_empty(&host.username, "targets.hosts.username")?;
            ValidationUtils::validate_port(host.port, "targets.hosts.port")?;
            if host.password.is_some() && host.private_key.is_some() {
                return Err(crate::ConfigError::Validation(format!(
                    "targets.hosts[{}] must set only one of password or private_key",
                    host.id
                )));
            }
        }

        let template_ids: Vec<i64> = self.templates.iter().map(|t| t.id).collect();
        ValidationUtils::validate_unique_ids(&template_ids, "targets.templates")?;
        for template in &self.templates {
            ValidationUtils::validate_not_empty(&template.content, "targets.templates.content")?;
        }

        let server_ids: Vec<i64> = self.build_servers.iter().map(|s| s.id).collect();
        ValidationUtils::validate_unique_ids(&server_ids, "targets.build_servers")?;
        for server in &self.build_servers {
            ValidationUtils::validate_url_scheme(
                &server.base_url,
                &["http://", "https://"],
                "targets.build_servers.base_url",
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(id: i64) -> HostEntry {
        HostEntry {
            id,
            address: "10.0.0.1".to_string(),
            port: 22,
            username: "deploy".to_string(),
            password: Some("secret".to_string()),
            private_key: None,
        }
    }

    #[test]
    fn test_targets_validation() {
        let mut config = TargetsConfig {
            hosts: vec![host(1), host(2)],
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        config.hosts.push(host(2));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_both_credentials_rejected() {
        let mut entry = host(1);
        entry.private_key = Some("KEY".to_string());
        let config = TargetsConfig {
            hosts: vec![entry],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let rendered = format!("{:?}", host(1));
        assert!(!rendered.contains("secret"));

        let server = BuildServerEntry {
            id: 1,
            base_url: "http://jenkins".to_string(),
            username: "ci".to_string(),
            token: "tok-123".to_string(),
        };
        assert!(!format!("{server:?}").contains("tok-123"));
    }
}
