//! 配置任务相关领域模型

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use super::progress::TaskStatus;

/// 一个远程配置步骤
///
/// 无状态值对象：命令、描述和可选的幂等检查命令。
/// 检查命令以零状态退出表示主机已处于目标状态。
#[derive(Clone, Debug, PartialEq)]
pub struct Task {
    pub description: String,
    pub command: String,
    pub check: Option<String>,
    /// 覆盖默认命令超时
    pub timeout: Option<Duration>,
}

impl Task {
    pub fn new(description: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            command: command.into(),
            check: None,
            timeout: None,
        }
    }

    /// 设置幂等检查命令
    pub fn unless(mut self, check: impl Into<String>) -> Self {
        self.check = Some(check.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// 单个任务的执行结果（不可变）
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TaskResult {
    /// 对应任务的描述
    pub description: String,
    /// 是否改变了主机状态
    pub changed: bool,
    /// 是否在重试耗尽后失败
    pub failed: bool,
    /// 命令输出或错误信息
    pub msg: String,
    /// 消耗的失败尝试次数
    pub retries: u32,
}

impl TaskResult {
    /// 检查通过，未执行命令
    pub fn unchanged(description: &str) -> Self {
        Self {
            description: description.to_string(),
            changed: false,
            failed: false,
            msg: "already in desired state".to_string(),
            retries: 0,
        }
    }

    pub fn changed(description: &str, msg: impl Into<String>, retries: u32) -> Self {
        Self {
            description: description.to_string(),
            changed: true,
            failed: false,
            msg: msg.into(),
            retries,
        }
    }

    pub fn failed(description: &str, msg: impl Into<String>, retries: u32) -> Self {
        Self {
            description: description.to_string(),
            changed: false,
            failed: true,
            msg: msg.into(),
            retries,
        }
    }

    /// 对应的终态，供进度展示
    pub fn status(&self) -> TaskStatus {
        if self.failed {
            TaskStatus::Failed
        } else if self.changed {
            TaskStatus::Success
        } else {
            TaskStatus::Skipped
        }
    }
}

/// 主机配置阶段，按执行顺序排列
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    SystemUpdate,
    Packages,
    Firewall,
    ContainerRuntime,
    Users,
    Monitoring,
}

impl Phase {
    pub const ALL: [Phase; 6] = [
        Phase::SystemUpdate,
        Phase::Packages,
        Phase::Firewall,
        Phase::ContainerRuntime,
        Phase::Users,
        Phase::Monitoring,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::SystemUpdate => "system_update",
            Phase::Packages => "packages",
            Phase::Firewall => "firewall",
            Phase::ContainerRuntime => "container_runtime",
            Phase::Users => "users",
            Phase::Monitoring => "monitoring",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Phase::SystemUpdate => "Updating system packages",
            Phase::Packages => "Installing base packages",
            Phase::Firewall => "Setting up firewall",
            Phase::ContainerRuntime => "Installing container runtime",
            Phase::Users => "Setting up users",
            Phase::Monitoring => "Setting up monitoring",
        }
    }

    /// 该阶段对应的主机状态
    pub fn host_state(&self) -> HostState {
        match self {
            Phase::SystemUpdate | Phase::Packages => HostState::UpdatingSystem,
            Phase::Firewall => HostState::ConfiguringFirewall,
            Phase::ContainerRuntime => HostState::InstallingRuntime,
            Phase::Users => HostState::ProvisioningUsers,
            Phase::Monitoring => HostState::InstallingMonitoring,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单台主机的配置状态机
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HostState {
    Connecting,
    Validating,
    UpdatingSystem,
    ConfiguringFirewall,
    InstallingRuntime,
    ProvisioningUsers,
    InstallingMonitoring,
    Disconnected,
    Aborted,
}

impl HostState {
    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, HostState::Disconnected | HostState::Aborted)
    }
}
