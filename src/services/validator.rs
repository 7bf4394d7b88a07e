//! 主机要求校验
//!
//! 在已连接的主机上并发执行只读检查，任一检查不通过即失败

use std::time::Duration;

use tracing::{debug, info};

use crate::config::env::constants::{
    MAX_DISK_USAGE_PERCENT, MIN_CPU_CORES, MIN_MEMORY_GB, SUPPORTED_OS,
};
use crate::error::{ProvisionError, Result};
use crate::infra::{CommandOutput, Transport};

/// 校验阈值
#[derive(Clone, Debug)]
pub struct Thresholds {
    pub max_disk_usage_percent: u32,
    pub min_memory_gb: u32,
    pub min_cpu_cores: u32,
    pub supported_os: Vec<String>,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            max_disk_usage_percent: MAX_DISK_USAGE_PERCENT,
            min_memory_gb: MIN_MEMORY_GB,
            min_cpu_cores: MIN_CPU_CORES,
            supported_os: SUPPORTED_OS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

pub const SUDO_CHECK: &str = "[ \"$(id -u)\" -eq 0 ] || sudo -n true 2>/dev/null";
pub const DISK_CHECK: &str = "df -h / | tail -1 | awk '{print $5}'";
pub const MEMORY_CHECK: &str = "free -g | awk 'NR==2{print $2}'";
pub const CPU_CHECK: &str = "nproc";
pub const OS_CHECK: &str = "cat /etc/os-release";

/// 主机要求校验器
pub struct RequirementsValidator<'a> {
    transport: &'a dyn Transport,
    thresholds: Thresholds,
    timeout: Duration,
}

impl<'a> RequirementsValidator<'a> {
    pub fn new(transport: &'a dyn Transport, timeout: Duration) -> Self {
        Self {
            transport,
            thresholds: Thresholds::default(),
            timeout,
        }
    }

    pub fn with_thresholds(mut self, thresholds: Thresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// 所有检查同时启动，总耗时取决于最慢的一项
    pub async fn validate_system(&self) -> Result<()> {
        info!(host = %self.transport.host(), "Validating server requirements");

        tokio::try_join!(
            self.check_sudo_access(),
            self.check_disk_space(),
            self.check_memory(),
            self.check_cpu(),
            self.check_os(),
        )?;

        info!(host = %self.transport.host(), "Server requirements satisfied");
        Ok(())
    }

    async fn run(&self, command: &str) -> Result<CommandOutput> {
        self.transport.execute_command(command, self.timeout).await
    }

    fn reject(&self, message: impl Into<String>) -> ProvisionError {
        ProvisionError::requirement(self.transport.host(), message)
    }

    fn parse_number(&self, what: &str, raw: &str) -> Result<u32> {
        raw.trim()
            .trim_end_matches('%')
            .parse()
            .map_err(|_| self.reject(format!("Could not determine {} from output {:?}", what, raw.trim())))
    }

    async fn check_sudo_access(&self) -> Result<()> {
        match self.run(SUDO_CHECK).await {
            Ok(_) => Ok(()),
            Err(ProvisionError::Command { .. }) => {
                let user = self
                    .run("whoami")
                    .await
                    .map(|o| o.stdout.trim().to_string())
                    .unwrap_or_else(|_| "unknown".to_string());
                Err(self.reject(format!(
                    "Insufficient privileges: {} doesn't have sudo privileges",
                    user
                )))
            }
            Err(e) => Err(e),
        }
    }

    async fn check_disk_space(&self) -> Result<()> {
        let output = self.run(DISK_CHECK).await?;
        let used = self.parse_number("disk usage", &output.stdout)?;
        debug!(host = %self.transport.host(), used_percent = used, "Disk usage");

        if used > self.thresholds.max_disk_usage_percent {
            return Err(self.reject(format!(
                "Insufficient disk space: {}% used (maximum {}%)",
                used, self.thresholds.max_disk_usage_percent
            )));
        }
        Ok(())
    }

    async fn check_memory(&self) -> Result<()> {
        let output = self.run(MEMORY_CHECK).await?;
        let total_gb = self.parse_number("total memory", &output.stdout)?;
        debug!(host = %self.transport.host(), total_gb, "Total memory");

        if total_gb < self.thresholds.min_memory_gb {
            return Err(self.reject(format!(
                "Insufficient memory: {}GB RAM available (minimum {}GB)",
                total_gb, self.thresholds.min_memory_gb
            )));
        }
        Ok(())
    }

    async fn check_cpu(&self) -> Result<()> {
        let output = self.run(CPU_CHECK).await?;
        let cores = self.parse_number("CPU core count", &output.stdout)?;
        debug!(host = %self.transport.host(), cores, "CPU cores");

        if cores < self.thresholds.min_cpu_cores {
            return Err(self.reject(format!(
                "Insufficient CPU cores: {} cores available (minimum {})",
                cores, self.thresholds.min_cpu_cores
            )));
        }
        Ok(())
    }

    async fn check_os(&self) -> Result<()> {
        let output = self.run(OS_CHECK).await?;
        let supported = self
            .thresholds
            .supported_os
            .iter()
            .any(|os| output.stdout.contains(os.as_str()));

        if !supported {
            return Err(self.reject(format!(
                "Unsupported operating system: {}. Only {} are supported.",
                os_pretty_name(&output.stdout),
                self.thresholds.supported_os.join(" and ")
            )));
        }
        Ok(())
    }
}

/// 从 os-release 中提取 PRETTY_NAME
fn os_pretty_name(os_release: &str) -> String {
    os_release
        .lines()
        .find_map(|line| line.strip_prefix("PRETTY_NAME="))
        .map(|v| v.trim_matches('"').to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
