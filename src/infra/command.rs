//! 本地命令执行器
//!
//! 用于本地钩子脚本：
//! - 超时控制（超时后终止子进程）
//! - stdout/stderr 分离
//! - 超时或失败时保留已捕获的输出

use std::collections::HashMap;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{error, warn};

/// 命令执行器
pub struct CommandRunner;

/// 命令执行错误
#[derive(Debug, Error)]
pub enum CommandError {
    /// 命令启动失败
    #[error("Failed to spawn command: {0}")]
    SpawnFailed(#[source] std::io::Error),
    /// 等待命令完成失败
    #[error("Failed to wait for command: {0}")]
    WaitFailed(#[source] std::io::Error),
}

/// 命令执行结果
#[derive(Debug)]
pub struct CommandResult {
    /// 退出状态（超时被终止时可能为 None）
    pub status: Option<ExitStatus>,
    pub stdout: String,
    pub stderr: String,
    /// 是否因超时而终止
    pub timed_out: bool,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.map_or(false, |s| s.success())
    }

    pub fn exit_code(&self) -> i32 {
        self.status.and_then(|s| s.code()).unwrap_or(-1)
    }

    /// stdout 与 stderr 合并，供诊断
    pub fn combined_output(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr.trim_end()),
            (false, true) => self.stdout.trim_end().to_string(),
            (true, false) => self.stderr.trim_end().to_string(),
            (true, true) => String::new(),
        }
    }
}

/// 子进程退出后等待输出管道关闭的最长时间
///
/// 脚本启动的后台进程可能继续持有管道
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_millis(500);

type OutputBuffer = Arc<Mutex<Vec<u8>>>;

/// 持续读取到共享缓冲区，中途终止时已读部分仍然可用
async fn pump<R: AsyncRead + Unpin>(reader: Option<R>, sink: OutputBuffer) {
    let Some(mut reader) = reader else {
        return;
    };
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if let Ok(mut sink) = sink.lock() {
                    sink.extend_from_slice(&buf[..n]);
                }
            }
        }
    }
}

fn take_string(buffer: &OutputBuffer) -> String {
    buffer
        .lock()
        .map(|b| String::from_utf8_lossy(&b).into_owned())
        .unwrap_or_default()
}

impl CommandRunner {
    /// 使用 `sh -c` 执行脚本
    ///
    /// # Arguments
    /// * `script` - 脚本内容
    /// * `envs` - 追加的环境变量（继承当前进程环境）
    /// * `timeout` - 超时时间
    pub async fn run_shell(
        script: &str,
        envs: &HashMap<String, String>,
        timeout: Duration,
    ) -> Result<CommandResult, CommandError> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(script)
            .envs(envs)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(CommandError::SpawnFailed)?;

        let stdout_buf = OutputBuffer::default();
        let stderr_buf = OutputBuffer::default();
        let mut readers = vec![
            tokio::spawn(pump(child.stdout.take(), stdout_buf.clone())),
            tokio::spawn(pump(child.stderr.take(), stderr_buf.clone())),
        ];

        let (status, timed_out) = tokio::select! {
            status = child.wait() => {
                (Some(status.map_err(CommandError::WaitFailed)?), false)
            }
            _ = tokio::time::sleep(timeout) => {
                error!("Command timed out after {:?}", timeout);
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "Failed to kill timed out process");
                }
                (child.try_wait().ok().flatten(), true)
            }
        };

        let drained = tokio::time::timeout(
            OUTPUT_DRAIN_GRACE,
            futures::future::join_all(readers.iter_mut()),
        )
        .await;
        if drained.is_err() {
            warn!("Output pipes still open after process exit, abandoning readers");
            for reader in &readers {
                reader.abort();
            }
        }

        Ok(CommandResult {
            status,
            stdout: take_string(&stdout_buf),
            stderr: take_string(&stderr_buf),
            timed_out,
        })
    }
}
