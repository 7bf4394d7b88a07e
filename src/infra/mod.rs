//! 基础设施模块
//!
//! 封装外部依赖（SSH 会话、本地进程）

pub mod command;
pub mod ssh;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use command::CommandRunner;
pub use ssh::{SshTransport, SshTransportFactory};
pub use transport::{CommandOutput, Transport, TransportFactory};
