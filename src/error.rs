//! 统一错误处理
//!
//! 提供 `ProvisionError` 枚举，覆盖传输、命令、主机要求、钩子与配置错误

use std::time::Duration;

use thiserror::Error;

use crate::domain::hook::{HookPoint, HookResult};

/// 编排引擎错误类型
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// 无法建立或维持 SSH 会话（不可达、认证失败）
    #[error("SSH connection to {host} failed: {message}")]
    Connection { host: String, message: String },

    /// 远程命令以非零状态退出
    #[error("Command `{command}` failed with code {exit_code}: {stderr}")]
    Command {
        command: String,
        /// 退出码，通道在未报告状态时关闭则为 -1
        exit_code: i32,
        stderr: String,
    },

    /// 远程命令超时
    #[error("Command `{command}` timed out after {}ms", .timeout.as_millis())]
    Timeout { command: String, timeout: Duration },

    /// 主机不满足前置要求（不重试）
    #[error("Host {host} does not meet requirements: {message}")]
    Requirement { host: String, message: String },

    /// 生命周期钩子执行失败或配置错误
    #[error("Hook {hook} ({point}) failed: {message}")]
    Hook {
        hook: String,
        point: HookPoint,
        message: String,
        result: Box<HookResult>,
    },

    /// 阶段内任务在重试耗尽后失败
    #[error("Provisioning {host} failed at {phase} step \"{step}\" after {retries} retries: {message}")]
    TaskFailed {
        host: String,
        phase: String,
        step: String,
        message: String,
        retries: u32,
    },

    /// 配置无效
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// 运行被取消
    #[error("Provisioning run was cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProvisionError {
    /// 创建连接错误
    pub fn connection(host: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            host: host.into(),
            message: message.into(),
        }
    }

    /// 创建主机要求错误
    pub fn requirement(host: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Requirement {
            host: host.into(),
            message: message.into(),
        }
    }

    /// 创建配置错误
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// 错误分类名称，用于结构化日志
    pub fn kind(&self) -> &'static str {
        match self {
            ProvisionError::Connection { .. } => "connection",
            ProvisionError::Command { .. } => "command",
            ProvisionError::Timeout { .. } => "timeout",
            ProvisionError::Requirement { .. } => "requirement",
            ProvisionError::Hook { .. } => "hook",
            ProvisionError::TaskFailed { .. } => "task_failed",
            ProvisionError::Config(_) => "config",
            ProvisionError::Cancelled => "cancelled",
            ProvisionError::Io(_) => "io",
        }
    }
}

/// 便捷类型别名
pub type Result<T> = std::result::Result<T, ProvisionError>;
