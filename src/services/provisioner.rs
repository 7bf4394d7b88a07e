//! 配置编排器
//!
//! 运行级流程：pre-provision 钩子 → 按配置顺序逐个环境、逐台主机执行状态机
//! → post-provision 钩子（传入本次涉及的全部主机）。
//!
//! 任意主机失败都会中止整个运行，后续主机和环境不再尝试。

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{ConnectionDefaults, Environment, ProvisionConfig, RetryPolicy};
use crate::domain::{HookPoint, Host, HostState, Phase};
use crate::error::{ProvisionError, Result};
use crate::infra::{SshTransportFactory, Transport, TransportFactory};
use crate::state::ResultLedger;

use super::executor::TaskExecutor;
use super::hooks::{HookManager, HookRegistry};
use super::progress::{ConsoleReporter, NullReporter, ProgressReporter};
use super::setup::HostSetup;
use super::validator::RequirementsValidator;

/// 环境内主机的调度方式
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Schedule {
    /// 逐台执行
    #[default]
    Sequential,
    /// 有界并发，任一主机失败后其余主机在下一个阶段边界停止
    Parallel { max_hosts: usize },
}

/// 一次配置运行的上下文与执行者
pub struct Provisioner {
    config: ProvisionConfig,
    defaults: ConnectionDefaults,
    factory: Arc<dyn TransportFactory>,
    hooks: HookManager,
    reporter: Arc<dyn ProgressReporter>,
    retry: RetryPolicy,
    schedule: Schedule,
    cancel: CancellationToken,
    ledger: Arc<ResultLedger>,
}

impl Provisioner {
    pub fn new(
        config: ProvisionConfig,
        defaults: ConnectionDefaults,
        factory: Arc<dyn TransportFactory>,
        hooks: HookManager,
    ) -> Self {
        Self {
            config,
            defaults,
            factory,
            hooks,
            reporter: Arc::new(NullReporter),
            retry: RetryPolicy::default(),
            schedule: Schedule::default(),
            cancel: CancellationToken::new(),
            ledger: Arc::new(ResultLedger::new()),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = schedule;
        self
    }

    /// 外部取消信号，在每台主机和每个阶段开始前检查
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// 运行结束后仍可读取的结果账本
    pub fn ledger(&self) -> Arc<ResultLedger> {
        self.ledger.clone()
    }

    pub async fn provision(&self) -> Result<()> {
        self.config.validate()?;
        if self.cancel.is_cancelled() {
            return Err(ProvisionError::Cancelled);
        }

        let targeted = self.config.targeted_hosts(&self.defaults);
        info!(
            run_id = %self.hooks.run_id(),
            environments = self.config.environments.len(),
            hosts = targeted.len(),
            "Starting provisioning run"
        );

        self.hooks
            .execute_hooks(HookPoint::PreProvision, &targeted)
            .await?;

        for environment in &self.config.environments {
            if self.cancel.is_cancelled() {
                return Err(ProvisionError::Cancelled);
            }
            self.provision_environment(environment).await?;
        }

        self.hooks
            .execute_hooks(HookPoint::PostProvision, &targeted)
            .await?;

        info!(run_id = %self.hooks.run_id(), hosts = targeted.len(), "Provisioning completed");
        Ok(())
    }

    async fn provision_environment(&self, environment: &Environment) -> Result<()> {
        let hosts: Vec<Host> = environment
            .host_addresses()
            .map(|address| Host::new(address, &self.defaults))
            .collect();

        info!(
            environment = %environment.name,
            hosts = hosts.len(),
            schedule = ?self.schedule,
            "Provisioning environment"
        );

        match self.schedule {
            Schedule::Sequential => {
                for host in &hosts {
                    self.provision_host(&environment.name, host, &self.cancel)
                        .await?;
                }
                Ok(())
            }
            Schedule::Parallel { max_hosts } => {
                self.provision_parallel(&environment.name, &hosts, max_hosts)
                    .await
            }
        }
    }

    /// 有界并发执行；第一个失败取消本环境的令牌，返回第一个非取消错误
    async fn provision_parallel(&self, environment: &str, hosts: &[Host], max_hosts: usize) -> Result<()> {
        let env_cancel = self.cancel.child_token();

        let mut outcomes = stream::iter(hosts.iter().map(|host| {
            let env_cancel = env_cancel.clone();
            async move {
                let outcome = self.provision_host(environment, host, &env_cancel).await;
                if outcome.is_err() {
                    env_cancel.cancel();
                }
                outcome
            }
        }))
        .buffer_unordered(max_hosts.max(1));

        let mut first_error: Option<ProvisionError> = None;
        while let Some(outcome) = outcomes.next().await {
            let Err(e) = outcome else {
                continue;
            };
            let replace = match first_error {
                None => true,
                Some(ProvisionError::Cancelled) => !matches!(e, ProvisionError::Cancelled),
                Some(_) => false,
            };
            if replace {
                first_error = Some(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// 单台主机的完整状态机，任何退出路径都会断开会话
    async fn provision_host(
        &self,
        environment: &str,
        host: &Host,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(ProvisionError::Cancelled);
        }

        let address = host.address.as_str();
        info!(environment = %environment, host = %address, "Provisioning host");
        self.ledger
            .transition(environment, address, HostState::Connecting)
            .await;

        let outcome = match self
            .hooks
            .execute_hooks(HookPoint::PreConnect, std::slice::from_ref(host))
            .await
        {
            Ok(_) => {
                let transport = self.factory.create(host);
                let outcome = self
                    .run_host(environment, host, transport.as_ref(), cancel)
                    .await;
                transport.disconnect().await;
                outcome
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => {
                self.ledger
                    .transition(environment, address, HostState::Disconnected)
                    .await;
                info!(environment = %environment, host = %address, "Host provisioned");
                Ok(())
            }
            Err(e) => {
                self.ledger
                    .transition(environment, address, HostState::Aborted)
                    .await;
                match e {
                    ProvisionError::Cancelled => {
                        warn!(environment = %environment, host = %address, "Host provisioning cancelled")
                    }
                    ref e => error!(
                        environment = %environment,
                        host = %address,
                        kind = e.kind(),
                        error = %e,
                        "Host provisioning failed"
                    ),
                }
                Err(e)
            }
        }
    }

    async fn run_host(
        &self,
        environment: &str,
        host: &Host,
        transport: &dyn Transport,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let address = host.address.as_str();

        transport.connect().await?;

        if cancel.is_cancelled() {
            return Err(ProvisionError::Cancelled);
        }
        self.ledger
            .transition(environment, address, HostState::Validating)
            .await;
        RequirementsValidator::new(transport, self.defaults.command_timeout)
            .validate_system()
            .await?;

        let executor = TaskExecutor::new(self.retry.clone(), self.defaults.command_timeout)
            .with_cancellation(cancel.clone());
        let setup = HostSetup::new(transport, &executor, self.reporter.as_ref(), host.port);

        for phase in Phase::ALL {
            if cancel.is_cancelled() {
                return Err(ProvisionError::Cancelled);
            }
            self.ledger
                .transition(environment, address, phase.host_state())
                .await;

            let results = match phase {
                Phase::SystemUpdate => setup.update_system().await,
                Phase::Packages => setup.install_packages().await,
                Phase::Firewall => setup.setup_firewall().await,
                Phase::ContainerRuntime => setup.setup_docker().await,
                Phase::Users => setup.setup_users(&self.config.users).await,
                Phase::Monitoring => setup.setup_monitoring().await,
            };
            self.ledger
                .record(environment, address, phase, &results)
                .await;

            if let Some(failed) = results.iter().find(|r| r.failed) {
                if cancel.is_cancelled() {
                    return Err(ProvisionError::Cancelled);
                }
                return Err(ProvisionError::TaskFailed {
                    host: address.to_string(),
                    phase: phase.as_str().to_string(),
                    step: failed.description.clone(),
                    message: failed.msg.clone(),
                    retries: failed.retries,
                });
            }

            if phase == Phase::ContainerRuntime {
                self.hooks
                    .execute_hooks(HookPoint::DockerSetup, std::slice::from_ref(host))
                    .await?;
            }
        }

        Ok(())
    }
}

/// 使用 SSH 传输、默认钩子目录和终端进度的完整运行
pub async fn provision(config: ProvisionConfig, defaults: ConnectionDefaults) -> Result<()> {
    let registry = HookRegistry::load(&config.hooks, None)?;
    let factory: Arc<dyn TransportFactory> =
        Arc::new(SshTransportFactory::new(defaults.connect_timeout));
    let hooks = HookManager::new(registry, factory.clone());

    Provisioner::new(config, defaults, factory, hooks)
        .with_reporter(Arc::new(ConsoleReporter::new()))
        .provision()
        .await
}
