//! 钩子执行
//!
//! 本地钩子以子进程执行，远程钩子逐台主机通过新的传输会话执行

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::env::constants::DEFAULT_HOOK_TIMEOUT_MS;
use crate::domain::{Hook, HookContext, HookPoint, HookResult, Host};
use crate::error::{ProvisionError, Result};
use crate::infra::{CommandRunner, TransportFactory};

use super::registry::HookRegistry;

/// 调用者标识，如 `deploy@laptop`
fn performer() -> String {
    let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    match hostname::get().ok().and_then(|h| h.into_string().ok()) {
        Some(host) => format!("{}@{}", user, host),
        None => user,
    }
}

fn hook_error(hook: &Hook, message: impl Into<String>, result: HookResult) -> ProvisionError {
    ProvisionError::Hook {
        hook: hook.name.clone(),
        point: hook.point,
        message: message.into(),
        result: Box::new(result),
    }
}

/// 钩子管理器，运行期间唯一执行钩子脚本的组件
pub struct HookManager {
    registry: HookRegistry,
    factory: Arc<dyn TransportFactory>,
    env: HashMap<String, String>,
    run_id: String,
}

impl HookManager {
    pub fn new(registry: HookRegistry, factory: Arc<dyn TransportFactory>) -> Self {
        let run_id = Uuid::new_v4().to_string();
        let mut env = HashMap::new();
        env.insert("PROVISION_RECORDED_AT".to_string(), Utc::now().to_rfc3339());
        env.insert("PROVISION_PERFORMER".to_string(), performer());
        env.insert("PROVISION_RUN_ID".to_string(), run_id.clone());

        Self {
            registry,
            factory,
            env,
            run_id,
        }
    }

    /// 追加传给本地钩子的环境变量，同时参与条件求值
    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// 依次执行挂载点上的所有钩子，第一个失败即中止
    pub async fn execute_hooks(&self, point: HookPoint, hosts: &[Host]) -> Result<Vec<HookResult>> {
        let hooks = self.registry.hooks(point);
        let mut results = Vec::with_capacity(hooks.len());

        for hook in hooks {
            match self.execute_hook(hook, hosts).await {
                Ok(result) => results.push(result),
                Err(e) => {
                    error!(hook = %hook.name, point = %point, error = %e, "Hook failed");
                    return Err(e);
                }
            }
        }

        Ok(results)
    }

    pub async fn execute_hook(&self, hook: &Hook, hosts: &[Host]) -> Result<HookResult> {
        let started = Instant::now();

        if let Some(ref condition) = hook.condition {
            if !condition.evaluate(&self.env) {
                info!(hook = %hook.name, point = %hook.point, condition = %condition, "Skipping hook: condition not met");
                return Ok(HookResult::skipped(started.elapsed()));
            }
        }

        info!(hook = %hook.name, point = %hook.point, context = ?hook.context, "Executing hook");

        let timeout = hook
            .timeout
            .unwrap_or(Duration::from_millis(DEFAULT_HOOK_TIMEOUT_MS));

        match hook.context {
            HookContext::Local => self.execute_local(hook, hosts, timeout, started).await,
            HookContext::Remote => self.execute_remote(hook, hosts, timeout, started).await,
        }
    }

    async fn execute_local(
        &self,
        hook: &Hook,
        hosts: &[Host],
        timeout: Duration,
        started: Instant,
    ) -> Result<HookResult> {
        let mut env = self.env.clone();
        env.insert("PROVISION_HOOK".to_string(), hook.point.as_str().to_string());
        env.insert(
            "PROVISION_HOSTS".to_string(),
            hosts
                .iter()
                .map(|h| h.address.as_str())
                .collect::<Vec<_>>()
                .join(","),
        );

        let result = match CommandRunner::run_shell(&hook.script, &env, timeout).await {
            Ok(result) => result,
            Err(e) => {
                let message = format!("Local execution failed: {}", e);
                return Err(hook_error(
                    hook,
                    message.clone(),
                    HookResult::failed("", message, started.elapsed()),
                ));
            }
        };

        let output = result.combined_output();
        if result.success() {
            return Ok(HookResult::succeeded(result.stdout.trim_end(), started.elapsed()));
        }

        let message = if result.timed_out {
            format!("Local execution timed out after {}ms", timeout.as_millis())
        } else {
            format!("Local execution failed with exit code {}", result.exit_code())
        };
        Err(hook_error(
            hook,
            message.clone(),
            HookResult::failed(output, message, started.elapsed()),
        ))
    }

    /// 逐台主机执行，每台主机使用独立会话并且总是断开
    async fn execute_remote(
        &self,
        hook: &Hook,
        hosts: &[Host],
        timeout: Duration,
        started: Instant,
    ) -> Result<HookResult> {
        if hosts.is_empty() {
            let message = "No hosts provided for remote hook execution";
            return Err(hook_error(
                hook,
                message,
                HookResult::failed("", message, started.elapsed()),
            ));
        }

        let mut outputs = Vec::with_capacity(hosts.len());

        for host in hosts {
            let transport = self.factory.create(host);
            let outcome = match transport.connect().await {
                Ok(()) => transport.execute_command(&hook.script, timeout).await,
                Err(e) => Err(e),
            };
            transport.disconnect().await;

            match outcome {
                Ok(output) => outputs.push(format!("[{}] {}", host.address, output.stdout.trim_end())),
                Err(e) => {
                    let message = format!("Remote execution on {} failed: {}", host.address, e);
                    return Err(hook_error(
                        hook,
                        message.clone(),
                        HookResult::failed(outputs.join("\n"), message, started.elapsed()),
                    ));
                }
            }
        }

        Ok(HookResult::succeeded(outputs.join("\n"), started.elapsed()))
    }
}
