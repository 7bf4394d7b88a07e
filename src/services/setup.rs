//! 主机配置阶段
//!
//! 每个阶段是一组有序、带幂等检查的任务。阶段内遇到第一个失败任务即停止，
//! 是否继续下一阶段由编排器决定。

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::User;
use crate::domain::{Phase, ProgressEvent, Task, TaskResult};
use crate::infra::Transport;

use super::executor::TaskExecutor;
use super::progress::ProgressReporter;

/// 基础软件包
pub const BASE_PACKAGES: [&str; 8] = ["curl", "wget", "git", "vim", "htop", "net-tools", "unzip", "ufw"];

const APT_UPDATE_TIMEOUT: Duration = Duration::from_secs(300);
const APT_UPGRADE_TIMEOUT: Duration = Duration::from_secs(1800);
const APT_INSTALL_TIMEOUT: Duration = Duration::from_secs(600);
const DOCKER_INSTALL_TIMEOUT: Duration = Duration::from_secs(900);

/// 单引号转义，用于拼接到远程 shell 命令中
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// 单台主机的配置执行器
pub struct HostSetup<'a> {
    transport: &'a dyn Transport,
    executor: &'a TaskExecutor,
    reporter: &'a dyn ProgressReporter,
    ssh_port: u16,
}

impl<'a> HostSetup<'a> {
    pub fn new(
        transport: &'a dyn Transport,
        executor: &'a TaskExecutor,
        reporter: &'a dyn ProgressReporter,
        ssh_port: u16,
    ) -> Self {
        Self {
            transport,
            executor,
            reporter,
            ssh_port,
        }
    }

    pub async fn update_system(&self) -> Vec<TaskResult> {
        self.run(Phase::SystemUpdate, &[]).await
    }

    pub async fn install_packages(&self) -> Vec<TaskResult> {
        self.run(Phase::Packages, &[]).await
    }

    pub async fn setup_firewall(&self) -> Vec<TaskResult> {
        self.run(Phase::Firewall, &[]).await
    }

    pub async fn setup_docker(&self) -> Vec<TaskResult> {
        self.run(Phase::ContainerRuntime, &[]).await
    }

    pub async fn setup_users(&self, users: &[User]) -> Vec<TaskResult> {
        self.run(Phase::Users, users).await
    }

    pub async fn setup_monitoring(&self) -> Vec<TaskResult> {
        self.run(Phase::Monitoring, &[]).await
    }

    /// 构建并执行某个阶段
    async fn run(&self, phase: Phase, users: &[User]) -> Vec<TaskResult> {
        let tasks = tasks_for(phase, users, self.ssh_port);
        info!(
            host = %self.transport.host(),
            phase = %phase,
            tasks = tasks.len(),
            "{}",
            phase.display_name()
        );
        self.run_phase(phase, &tasks).await
    }

    /// 依次执行任务，第一个失败后停止
    pub async fn run_phase(&self, phase: Phase, tasks: &[Task]) -> Vec<TaskResult> {
        let host = self.transport.host();
        let total = tasks.len();
        let mut results = Vec::with_capacity(total);

        for (index, task) in tasks.iter().enumerate() {
            self.reporter
                .start_task(&ProgressEvent::running(host, index + 1, total, &task.description));

            let result = self.executor.execute_with_retry(self.transport, task).await;

            if result.changed && !result.msg.is_empty() {
                self.reporter.update_output(host, &result.msg);
            }
            let error = result.failed.then_some(result.msg.as_str());
            self.reporter.finish_task(host, result.status(), error);

            let failed = result.failed;
            results.push(result);

            if failed {
                warn!(
                    host = %host,
                    phase = %phase,
                    step = %task.description,
                    "Phase stopped at failed task"
                );
                break;
            }
            debug!(host = %host, phase = %phase, step = %task.description, "Task done");
        }

        results
    }
}

/// 阶段对应的任务列表（纯函数，不接触主机）
pub fn tasks_for(phase: Phase, users: &[User], ssh_port: u16) -> Vec<Task> {
    match phase {
        Phase::SystemUpdate => system_update_tasks(),
        Phase::Packages => package_tasks(),
        Phase::Firewall => firewall_tasks(ssh_port),
        Phase::ContainerRuntime => docker_tasks(),
        Phase::Users => users.iter().flat_map(user_tasks).collect(),
        Phase::Monitoring => monitoring_tasks(),
    }
}

pub fn system_update_tasks() -> Vec<Task> {
    vec![
        Task::new("Update package lists", "apt-get update").with_timeout(APT_UPDATE_TIMEOUT),
        Task::new(
            "Upgrade installed packages",
            "DEBIAN_FRONTEND=noninteractive apt-get upgrade -y",
        )
        .with_timeout(APT_UPGRADE_TIMEOUT),
    ]
}

pub fn package_tasks() -> Vec<Task> {
    BASE_PACKAGES
        .iter()
        .map(|pkg| {
            Task::new(
                format!("Install package {}", pkg),
                format!("DEBIAN_FRONTEND=noninteractive apt-get install -y {}", pkg),
            )
            .unless(dpkg_installed(pkg))
            .with_timeout(APT_INSTALL_TIMEOUT)
        })
        .collect()
}

fn dpkg_installed(pkg: &str) -> String {
    format!(
        "dpkg-query -W -f='${{Status}}' {} 2>/dev/null | grep -q 'install ok installed'",
        pkg
    )
}

/// ufw allow 对已存在的规则是幂等的，只有默认策略和启用需要检查
pub fn firewall_tasks(ssh_port: u16) -> Vec<Task> {
    let mut tasks = vec![
        Task::new("Deny incoming traffic by default", "ufw default deny incoming")
            .unless("ufw status verbose | grep -q 'deny (incoming)'"),
        Task::new("Allow outgoing traffic by default", "ufw default allow outgoing")
            .unless("ufw status verbose | grep -q 'allow (outgoing)'"),
        Task::new("Allow SSH", "ufw allow ssh"),
        Task::new("Allow HTTP", "ufw allow http"),
        Task::new("Allow HTTPS", "ufw allow https"),
    ];
    if ssh_port != 22 {
        tasks.push(Task::new(
            format!("Allow SSH on port {}", ssh_port),
            format!("ufw allow {}/tcp", ssh_port),
        ));
    }
    tasks.push(
        Task::new("Enable firewall", "ufw --force enable")
            .unless("ufw status | grep -q \"Status: active\""),
    );
    tasks
}

pub fn docker_tasks() -> Vec<Task> {
    vec![
        Task::new(
            "Download Docker install script",
            "curl -fsSL https://get.docker.com -o /tmp/get-docker.sh",
        )
        .unless("command -v docker >/dev/null 2>&1"),
        Task::new("Install Docker", "sh /tmp/get-docker.sh")
            .unless("docker --version >/dev/null 2>&1")
            .with_timeout(DOCKER_INSTALL_TIMEOUT),
        Task::new("Enable Docker service", "systemctl enable docker")
            .unless("systemctl is-enabled --quiet docker"),
        Task::new("Start Docker service", "systemctl start docker")
            .unless("systemctl is-active --quiet docker"),
        Task::new("Verify Docker installation", "docker --version"),
    ]
}

pub fn user_tasks(user: &User) -> Vec<Task> {
    let name = user.username.as_str();
    let ssh_dir = format!("/home/{}/.ssh", name);

    let home_flag = if user.create_home { "-m" } else { "-M" };
    let mut tasks = vec![Task::new(
        format!("Create user {}", name),
        format!("useradd {} -s /bin/bash {}", home_flag, name),
    )
    .unless(format!("id -u {} >/dev/null 2>&1", name))];

    for group in &user.groups {
        tasks.push(
            Task::new(
                format!("Add {} to group {}", name, group),
                format!("usermod -aG {} {}", group, name),
            )
            .unless(format!("id -nG {} | grep -qw {}", name, group)),
        );
    }

    // 不建家目录的用户不配置 SSH 登录
    if user.create_home {
        tasks.push(
            Task::new(
                format!("Create SSH directory for {}", name),
                format!("mkdir -p {dir} && chmod 700 {dir}", dir = ssh_dir),
            )
            .unless(format!("test -d {}", ssh_dir)),
        );

        if !user.ssh_keys.is_empty() {
            tasks.push(authorize_keys_task(name, &user.ssh_keys, &ssh_dir));
        }
    }

    if user.force_password_change {
        tasks.push(
            Task::new(
                format!("Force password change for {}", name),
                format!("chage -d 0 {}", name),
            )
            .unless(format!(
                "chage -l {} | grep -q 'password must be changed'",
                name
            )),
        );
    }

    tasks
}

/// 只追加缺少的公钥，文件中已有的其他公钥保留
fn authorize_keys_task(name: &str, keys: &[String], ssh_dir: &str) -> Task {
    let file = format!("{}/authorized_keys", ssh_dir);
    let quoted: Vec<String> = keys.iter().map(|k| shell_quote(k)).collect();

    let appends: Vec<String> = quoted
        .iter()
        .map(|k| format!("{{ grep -qxF {k} {file} || printf '%s\\n' {k} >> {file}; }}", k = k, file = file))
        .collect();
    let check: Vec<String> = quoted
        .iter()
        .map(|k| format!("grep -qxF {} {}", k, file))
        .collect();

    Task::new(
        format!("Authorize SSH keys for {}", name),
        format!(
            "touch {file} && {appends} && chmod 600 {file} && chown -R {user}:{user} {dir}",
            file = file,
            appends = appends.join(" && "),
            user = name,
            dir = ssh_dir
        ),
    )
    .unless(check.join(" && "))
}

pub fn monitoring_tasks() -> Vec<Task> {
    vec![
        Task::new(
            "Install Prometheus node exporter",
            "DEBIAN_FRONTEND=noninteractive apt-get install -y prometheus-node-exporter",
        )
        .unless(dpkg_installed("prometheus-node-exporter"))
        .with_timeout(APT_INSTALL_TIMEOUT),
        Task::new(
            "Enable node exporter service",
            "systemctl enable prometheus-node-exporter",
        )
        .unless("systemctl is-enabled --quiet prometheus-node-exporter"),
        Task::new(
            "Start node exporter service",
            "systemctl start prometheus-node-exporter",
        )
        .unless("systemctl is-active --quiet prometheus-node-exporter"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::infra::testing::{Reply, Script, ScriptedTransport};
    use crate::services::progress::{ChannelReporter, NullReporter};

    fn fast_executor() -> TaskExecutor {
        TaskExecutor::new(RetryPolicy::new(3, Duration::ZERO), Duration::from_secs(30))
    }

    #[tokio::test]
    async fn test_phase_stops_at_first_failure() {
        let script = Script::new().on_exact("step-two", Reply::fail("broken"));
        let transport = ScriptedTransport::new("h1", script);
        let executor = fast_executor();
        let setup = HostSetup::new(&transport, &executor, &NullReporter, 22);

        let tasks = vec![
            Task::new("one", "step-one"),
            Task::new("two", "step-two"),
            Task::new("three", "step-three"),
        ];
        let results = setup.run_phase(Phase::Packages, &tasks).await;

        assert_eq!(results.len(), 2);
        assert!(!results[0].failed);
        assert!(results[1].failed);
        assert_eq!(results[1].retries, 3);
        assert_eq!(transport.log().count("step-three"), 0);
    }

    #[tokio::test]
    async fn test_phase_reports_each_step() {
        let transport = ScriptedTransport::new("h1", Script::new().on("echo", Reply::ok("hi\n")));
        let executor = fast_executor();
        let reporter = ChannelReporter::new();
        let mut rx = reporter.subscribe();
        let setup = HostSetup::new(&transport, &executor, &reporter, 22);

        let tasks = vec![Task::new("greet", "echo hi"), Task::new("skip", "true").unless("true")];
        let results = setup.run_phase(Phase::Monitoring, &tasks).await;
        assert_eq!(results.len(), 2);
        assert!(results[0].changed);
        assert!(!results[1].changed);

        let mut received = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            received.push(msg.update);
        }
        // greet: started, output, finished; skip: started, finished
        assert_eq!(received.len(), 5);
    }

    #[tokio::test]
    async fn test_phase_methods_run_every_task_on_fresh_host() {
        let mut user = User::new("deploy");
        user.ssh_keys = vec!["ssh-ed25519 AAAA deploy@laptop".to_string()];
        let users = vec![user];

        let mut script = Script::new();
        for phase in Phase::ALL {
            for task in tasks_for(phase, &users, 2222) {
                if let Some(check) = task.check {
                    script = script.on_exact(&check, Reply::fail(""));
                }
            }
        }
        let transport = ScriptedTransport::new("h1", script);
        let executor = fast_executor();
        let setup = HostSetup::new(&transport, &executor, &NullReporter, 2222);

        let runs = [
            (Phase::SystemUpdate, setup.update_system().await),
            (Phase::Packages, setup.install_packages().await),
            (Phase::Firewall, setup.setup_firewall().await),
            (Phase::ContainerRuntime, setup.setup_docker().await),
            (Phase::Users, setup.setup_users(&users).await),
            (Phase::Monitoring, setup.setup_monitoring().await),
        ];
        for (phase, results) in runs {
            assert_eq!(results.len(), tasks_for(phase, &users, 2222).len(), "{}", phase);
            assert!(results.iter().all(|r| r.changed && !r.failed), "{}", phase);
        }
        assert_eq!(transport.log().count("ufw allow 2222/tcp"), 1);
    }

    #[test]
    fn test_force_rotation_appended_only_when_requested() {
        let mut user = User::new("deploy");
        user.groups = vec!["docker".to_string(), "sudo".to_string()];
        user.ssh_keys = vec!["ssh-ed25519 AAAA deploy@laptop".to_string()];

        let tasks = user_tasks(&user);
        assert_eq!(tasks.len(), 5);
        assert!(!tasks.iter().any(|t| t.command.starts_with("chage")));

        user.force_password_change = true;
        let tasks = user_tasks(&user);
        assert_eq!(tasks.len(), 6);
        assert_eq!(tasks.last().unwrap().command, "chage -d 0 deploy");
    }

    #[test]
    fn test_user_without_keys_has_no_key_task() {
        let tasks = user_tasks(&User::new("svc"));
        let descriptions: Vec<&str> = tasks.iter().map(|t| t.description.as_str()).collect();
        assert_eq!(descriptions, vec!["Create user svc", "Create SSH directory for svc"]);
    }

    #[test]
    fn test_user_without_home_gets_no_ssh_tasks() {
        let mut user = User::new("svc");
        user.create_home = false;
        user.groups = vec!["docker".to_string()];
        user.ssh_keys = vec!["ssh-ed25519 AAAA svc@ci".to_string()];

        let tasks = user_tasks(&user);
        assert_eq!(tasks[0].command, "useradd -M -s /bin/bash svc");
        assert_eq!(tasks.len(), 2);
        assert!(!tasks.iter().any(|t| t.command.contains("/home/svc")));
    }

    #[test]
    fn test_authorize_keys_appends_missing_keys_only() {
        let mut user = User::new("deploy");
        user.ssh_keys = vec!["ssh-ed25519 AAAA a@x".to_string(), "ssh-rsa BBBB b@y".to_string()];

        let tasks = user_tasks(&user);
        let task = tasks.last().unwrap();
        let file = "/home/deploy/.ssh/authorized_keys";

        // 不截断文件，每个公钥缺少时才追加
        assert!(!task.command.contains(&format!(" > {}", file)));
        assert_eq!(task.command.matches(&format!(">> {}", file)).count(), 2);
        assert!(task
            .command
            .contains(&format!("grep -qxF 'ssh-rsa BBBB b@y' {} ||", file)));
        assert_eq!(
            task.check.as_deref(),
            Some(
                "grep -qxF 'ssh-ed25519 AAAA a@x' /home/deploy/.ssh/authorized_keys \
                 && grep -qxF 'ssh-rsa BBBB b@y' /home/deploy/.ssh/authorized_keys"
            )
        );
    }

    #[test]
    fn test_firewall_opens_custom_ssh_port() {
        assert_eq!(firewall_tasks(22).len(), 6);
        let tasks = firewall_tasks(2222);
        assert_eq!(tasks.len(), 7);
        assert!(tasks.iter().any(|t| t.command == "ufw allow 2222/tcp"));
        assert_eq!(tasks.last().unwrap().description, "Enable firewall");
    }

    #[test]
    fn test_shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
    }

    #[test]
    fn test_every_package_has_check() {
        let tasks = package_tasks();
        assert_eq!(tasks.len(), BASE_PACKAGES.len());
        assert!(tasks.iter().all(|t| t.check.is_some()));
    }
}
