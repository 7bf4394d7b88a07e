//! 基于 russh 的 SSH 传输实现

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::{ChannelMsg, Disconnect};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::domain::Host;
use crate::error::{ProvisionError, Result};

use super::transport::{CommandOutput, Transport, TransportFactory};

/// 会话空闲超时
const INACTIVITY_TIMEOUT_SECS: u64 = 600;

/// SSH 扩展数据流中 stderr 的编号
const SSH_EXTENDED_DATA_STDERR: u32 = 1;

/// 客户端回调处理器
struct ClientHandler;

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    // 不校验主机密钥（见 DESIGN.md 的已知限制）
    async fn check_server_key(
        &mut self,
        _server_public_key: &russh_keys::key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        Ok(true)
    }
}

/// SSH 传输
pub struct SshTransport {
    host: Host,
    connect_timeout: Duration,
    session: RwLock<Option<Arc<Handle<ClientHandler>>>>,
}

impl SshTransport {
    pub fn new(host: Host, connect_timeout: Duration) -> Self {
        Self {
            host,
            connect_timeout,
            session: RwLock::new(None),
        }
    }

    fn connection_error(&self, message: impl Into<String>) -> ProvisionError {
        ProvisionError::connection(self.host.address.clone(), message)
    }

    /// 依次尝试私钥，最后尝试密码
    async fn authenticate(&self, handle: &mut Handle<ClientHandler>) -> Result<bool> {
        let username = self.host.username.clone();

        for path in self.host.identity_candidates() {
            if !path.exists() {
                if self.host.identity_file.as_deref() == Some(path.as_path()) {
                    warn!(host = %self.host.address, path = %path.display(), "Identity file not found");
                }
                continue;
            }

            let key = match load_key(&path) {
                Ok(key) => key,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable SSH key");
                    continue;
                }
            };

            let accepted = handle
                .authenticate_publickey(username.clone(), Arc::new(key))
                .await
                .map_err(|e| self.connection_error(e.to_string()))?;
            if accepted {
                debug!(host = %self.host.address, key = %path.display(), "Public key accepted");
                return Ok(true);
            }
            debug!(host = %self.host.address, key = %path.display(), "Public key rejected");
        }

        if let Some(ref password) = self.host.password {
            let accepted = handle
                .authenticate_password(username, password.clone())
                .await
                .map_err(|e| self.connection_error(e.to_string()))?;
            if accepted {
                debug!(host = %self.host.address, "Password accepted");
            }
            return Ok(accepted);
        }

        Ok(false)
    }

    async fn current_session(&self) -> Result<Arc<Handle<ClientHandler>>> {
        self.session
            .read()
            .await
            .clone()
            .ok_or_else(|| self.connection_error("session is not connected"))
    }
}

fn load_key(path: &Path) -> std::result::Result<russh_keys::key::KeyPair, russh_keys::Error> {
    russh_keys::load_secret_key(path, None)
}

/// 收集通道消息直到远程进程退出并关闭通道
async fn collect_output(channel: &mut russh::Channel<client::Msg>) -> (Vec<u8>, Vec<u8>, Option<u32>) {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut exit_status = None;

    while let Some(msg) = channel.wait().await {
        match msg {
            ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
            ChannelMsg::ExtendedData { ref data, ext } if ext == SSH_EXTENDED_DATA_STDERR => {
                stderr.extend_from_slice(data)
            }
            ChannelMsg::ExitStatus { exit_status: code } => exit_status = Some(code),
            _ => {}
        }
    }

    (stdout, stderr, exit_status)
}

/// 把收集到的通道输出映射为命令结果；未收到退出状态按 -1 处理
fn into_output(
    command: &str,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    exit_status: Option<u32>,
) -> Result<CommandOutput> {
    let stdout = String::from_utf8_lossy(&stdout).into_owned();
    let stderr = String::from_utf8_lossy(&stderr).into_owned();
    let exit_code = exit_status.map(|c| c as i32).unwrap_or(-1);

    if exit_code != 0 {
        return Err(ProvisionError::Command {
            command: command.to_string(),
            exit_code,
            stderr: stderr.trim().to_string(),
        });
    }

    Ok(CommandOutput {
        stdout,
        stderr,
        exit_code,
    })
}

#[async_trait]
impl Transport for SshTransport {
    fn host(&self) -> &str {
        &self.host.address
    }

    async fn connect(&self) -> Result<()> {
        info!(host = %self.host.address, port = self.host.port, user = %self.host.username, "Opening SSH session");

        let config = Arc::new(client::Config {
            inactivity_timeout: Some(Duration::from_secs(INACTIVITY_TIMEOUT_SECS)),
            ..Default::default()
        });
        let addr = (self.host.address.as_str(), self.host.port);

        let mut handle = tokio::time::timeout(
            self.connect_timeout,
            client::connect(config, addr, ClientHandler),
        )
        .await
        .map_err(|_| {
            self.connection_error(format!(
                "timed out after {}s",
                self.connect_timeout.as_secs()
            ))
        })?
        .map_err(|e| self.connection_error(e.to_string()))?;

        if !self.authenticate(&mut handle).await? {
            let _ = handle
                .disconnect(Disconnect::ByApplication, "authentication failed", "en")
                .await;
            return Err(self.connection_error(format!(
                "all authentication methods were rejected for user {}",
                self.host.username
            )));
        }

        *self.session.write().await = Some(Arc::new(handle));
        Ok(())
    }

    async fn execute_command(&self, command: &str, timeout: Duration) -> Result<CommandOutput> {
        let session = self.current_session().await?;
        debug!(host = %self.host.address, command = %command, "Executing remote command");

        let mut channel = session
            .channel_open_session()
            .await
            .map_err(|e| self.connection_error(format!("failed to open channel: {}", e)))?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| self.connection_error(format!("failed to execute command: {}", e)))?;

        let collected = tokio::time::timeout(timeout, collect_output(&mut channel)).await;
        let (stdout, stderr, exit_status) = match collected {
            Ok(collected) => collected,
            Err(_) => {
                warn!(host = %self.host.address, command = %command, "Remote command timed out, closing channel");
                let _ = channel.close().await;
                return Err(ProvisionError::Timeout {
                    command: command.to_string(),
                    timeout,
                });
            }
        };

        into_output(command, stdout, stderr, exit_status)
    }

    async fn disconnect(&self) {
        if let Some(session) = self.session.write().await.take() {
            if let Err(e) = session
                .disconnect(Disconnect::ByApplication, "", "en")
                .await
            {
                debug!(host = %self.host.address, error = %e, "Error while closing SSH session");
            }
            info!(host = %self.host.address, "SSH session closed");
        }
    }
}

/// 生产环境使用的 SSH 传输工厂
pub struct SshTransportFactory {
    connect_timeout: Duration,
}

impl SshTransportFactory {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl TransportFactory for SshTransportFactory {
    fn create(&self, host: &Host) -> Box<dyn Transport> {
        Box::new(SshTransport::new(host.clone(), self.connect_timeout))
    }
}
