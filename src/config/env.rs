//! 环境变量配置加载

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use self::constants::{DEFAULT_COMMAND_TIMEOUT_SECS, DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_SSH_PORT};

/// 全局 SSH 连接参数，可被命令行参数覆盖
#[derive(Clone)]
pub struct ConnectionDefaults {
    /// SSH 用户名 (默认 "root")
    pub username: String,
    /// SSH 端口 (默认 22)
    pub port: u16,
    /// 私钥文件路径
    pub identity_file: Option<PathBuf>,
    /// 密码
    pub password: Option<String>,
    /// 建立连接超时
    pub connect_timeout: Duration,
    /// 单条命令默认超时
    pub command_timeout: Duration,
}

impl Default for ConnectionDefaults {
    fn default() -> Self {
        Self {
            username: "root".to_string(),
            port: DEFAULT_SSH_PORT,
            identity_file: None,
            password: None,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            command_timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
        }
    }
}

impl std::fmt::Debug for ConnectionDefaults {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionDefaults")
            .field("username", &self.username)
            .field("port", &self.port)
            .field("identity_file", &self.identity_file)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("connect_timeout", &self.connect_timeout)
            .field("command_timeout", &self.command_timeout)
            .finish()
    }
}

impl ConnectionDefaults {
    /// 从环境变量加载连接参数
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let username = env::var("PROVISION_SSH_USER")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.username);

        let port = match env::var("PROVISION_SSH_PORT") {
            Ok(v) => v.parse().unwrap_or_else(|_| {
                warn!(value = %v, "Ignoring invalid PROVISION_SSH_PORT");
                DEFAULT_SSH_PORT
            }),
            Err(_) => DEFAULT_SSH_PORT,
        };

        let identity_file = env::var("PROVISION_SSH_KEY")
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        let password = env::var("PROVISION_SSH_PASSWORD").ok().filter(|s| !s.is_empty());

        let connect_timeout = env::var("PROVISION_CONNECT_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.connect_timeout);

        let command_timeout = env::var("PROVISION_COMMAND_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.command_timeout);

        Self {
            username,
            port,
            identity_file,
            password,
            connect_timeout,
            command_timeout,
        }
    }
}

/// 常量
pub mod constants {
    /// 默认 SSH 端口
    pub const DEFAULT_SSH_PORT: u16 = 22;

    /// 单条远程命令默认超时（秒）
    pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30;

    /// 建立 SSH 连接超时（秒）
    pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 20;

    /// 本地钩子默认超时（毫秒）
    pub const DEFAULT_HOOK_TIMEOUT_MS: u64 = 30_000;

    /// 默认最大尝试次数
    pub const DEFAULT_MAX_RETRIES: u32 = 3;

    /// 默认重试间隔（秒）
    pub const DEFAULT_RETRY_DELAY_SECS: u64 = 5;

    /// 磁盘使用率上限（百分比）
    pub const MAX_DISK_USAGE_PERCENT: u32 = 85;

    /// 最小内存（GB）
    pub const MIN_MEMORY_GB: u32 = 1;

    /// 最少 CPU 核数
    pub const MIN_CPU_CORES: u32 = 1;

    /// 支持的发行版
    pub const SUPPORTED_OS: [&str; 2] = ["Ubuntu", "Debian"];

    /// 默认钩子目录
    pub const DEFAULT_HOOKS_DIR: &str = ".kamal/hooks";

    /// 版本号
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}
