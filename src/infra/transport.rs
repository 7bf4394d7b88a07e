//! 远程传输抽象
//!
//! 一个 `Transport` 对应一台主机的一个会话：打开、执行命令、关闭。
//! 传输层本身不做重试，重试策略属于任务执行层。

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::Host;
use crate::error::Result;

/// 远程命令输出
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn stdout(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Self::default()
        }
    }
}

/// 到单台主机的远程 shell 会话
///
/// 所有方法都接收 `&self`，同一会话上可以并发执行多条命令。
#[async_trait]
pub trait Transport: Send + Sync {
    /// 主机地址，用于日志和错误信息
    fn host(&self) -> &str;

    /// 建立并认证会话，失败返回 `Connection` 错误
    async fn connect(&self) -> Result<()>;

    /// 在新的执行通道中运行一条命令
    ///
    /// 非零退出返回 `Command` 错误，超时返回 `Timeout` 错误
    async fn execute_command(&self, command: &str, timeout: Duration) -> Result<CommandOutput>;

    /// 关闭会话。未连接或已关闭时调用也是安全的
    async fn disconnect(&self);
}

/// 按主机创建传输实例
pub trait TransportFactory: Send + Sync {
    fn create(&self, host: &Host) -> Box<dyn Transport>;
}
