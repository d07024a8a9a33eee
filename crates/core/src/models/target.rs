use std::fmt;

use serde::{Deserialize, Serialize};

/// SSH认证方式
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "secret", rename_all = "snake_case")]
pub enum HostAuth {
    Password(String),
    PrivateKey(String),
    /// 使用本机默认私钥
    Agent,
}

impl fmt::Debug for HostAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostAuth::Password(_) => f.write_str("Password(***)"),
            HostAuth::PrivateKey(_) => f.write_str("PrivateKey(***)"),
            HostAuth::Agent => f.write_str("Agent"),
        }
    }
}

/// 已解析的主机连接参数，密钥已解密
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostConnection {
    pub host_id: i64,
    pub address: String,
    pub port: u16,
    pub username: String,
    pub auth: HostAuth,
}

/// 命令模板
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandTemplate {
    pub id: i64,
    pub name: String,
    pub content: String,
}

/// Jenkins服务器
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildServer {
    pub id: i64,
    pub base_url: String,
    pub username: String,
    pub token: String,
}

impl BuildServer {
    pub fn base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

impl fmt::Debug for BuildServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildServer")
            .field("id", &self.id)
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("token", &"***")
            .finish()
    }
}
