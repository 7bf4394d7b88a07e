//! 目标主机领域模型

use std::fmt;
use std::path::PathBuf;

use crate::config::ConnectionDefaults;

/// 一台待配置的远程主机（连接端点）
///
/// 每次配置尝试时由主机地址和全局连接参数构造
#[derive(Clone, PartialEq)]
pub struct Host {
    /// 主机地址 (IP 或域名)
    pub address: String,
    /// SSH 用户名
    pub username: String,
    /// SSH 端口
    pub port: u16,
    /// 显式指定的私钥文件
    pub identity_file: Option<PathBuf>,
    /// 密码（密钥认证失败后的备选）
    pub password: Option<String>,
}

impl Host {
    /// 从地址和连接默认值构造主机
    pub fn new(address: impl Into<String>, defaults: &ConnectionDefaults) -> Self {
        Self {
            address: address.into(),
            username: defaults.username.clone(),
            port: defaults.port,
            identity_file: defaults.identity_file.clone(),
            password: defaults.password.clone(),
        }
    }

    /// 依次尝试的私钥路径：显式指定的优先，然后是常规位置
    pub fn identity_candidates(&self) -> Vec<PathBuf> {
        let mut candidates = Vec::new();
        if let Some(ref explicit) = self.identity_file {
            candidates.push(explicit.clone());
        }
        if let Some(home) = std::env::var_os("HOME") {
            let ssh_dir = PathBuf::from(home).join(".ssh");
            for name in DEFAULT_KEY_FILES {
                let path = ssh_dir.join(name);
                if !candidates.contains(&path) {
                    candidates.push(path);
                }
            }
        }
        candidates
    }
}

/// 常规私钥文件名，按尝试顺序排列
pub const DEFAULT_KEY_FILES: [&str; 2] = ["id_rsa", "id_ed25519"];

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("address", &self.address)
            .field("username", &self.username)
            .field("port", &self.port)
            .field("identity_file", &self.identity_file)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.username, self.address, self.port)
    }
}
