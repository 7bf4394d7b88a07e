//! 幂等任务执行与重试

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::RetryPolicy;
use crate::domain::{Task, TaskResult};
use crate::infra::Transport;

/// 按重试策略执行单个任务
///
/// 失败从不以错误形式返回，而是编码在 `TaskResult` 中，由调用方决定是否中止
#[derive(Clone, Debug)]
pub struct TaskExecutor {
    policy: RetryPolicy,
    command_timeout: Duration,
    cancel: CancellationToken,
}

impl TaskExecutor {
    pub fn new(policy: RetryPolicy, command_timeout: Duration) -> Self {
        Self {
            policy,
            command_timeout,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// 检查命令成功则跳过；否则最多尝试 `attempts()` 次，两次尝试之间按策略等待
    pub async fn execute_with_retry(&self, transport: &dyn Transport, task: &Task) -> TaskResult {
        let timeout = task.timeout.unwrap_or(self.command_timeout);

        if let Some(ref check) = task.check {
            match transport.execute_command(check, self.command_timeout).await {
                Ok(_) => {
                    debug!(host = %transport.host(), task = %task.description, "Check passed, skipping");
                    return TaskResult::unchanged(&task.description);
                }
                Err(e) => {
                    debug!(host = %transport.host(), task = %task.description, error = %e, "Check did not pass");
                }
            }
        }

        let attempts = self.policy.attempts();
        let mut failures = 0;

        loop {
            match transport.execute_command(&task.command, timeout).await {
                Ok(output) => {
                    return TaskResult::changed(&task.description, output.stdout.trim(), failures);
                }
                Err(e) => {
                    failures += 1;
                    if failures >= attempts {
                        warn!(
                            host = %transport.host(),
                            task = %task.description,
                            attempts = failures,
                            error = %e,
                            "Task failed, retries exhausted"
                        );
                        return TaskResult::failed(&task.description, e.to_string(), failures);
                    }

                    let delay = self.policy.delay_for(failures);
                    warn!(
                        host = %transport.host(),
                        task = %task.description,
                        attempt = failures,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Task failed, retrying"
                    );

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.cancel.cancelled() => {
                            return TaskResult::failed(
                                &task.description,
                                format!("cancelled while waiting to retry: {}", e),
                                failures,
                            );
                        }
                    }
                }
            }
        }
    }
}
