//! 测试用的脚本化传输
//!
//! 按命令匹配预设回复，记录执行过的命令与连接/断开次数

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::Host;
use crate::error::{ProvisionError, Result};

use super::transport::{CommandOutput, Transport, TransportFactory};

/// 预设回复
#[derive(Clone, Debug)]
pub enum Reply {
    Ok(String),
    Fail { code: i32, stderr: String },
    Timeout,
}

impl Reply {
    pub fn ok(stdout: &str) -> Self {
        Reply::Ok(stdout.to_string())
    }

    pub fn fail(stderr: &str) -> Self {
        Reply::Fail {
            code: 1,
            stderr: stderr.to_string(),
        }
    }
}

#[derive(Clone, Debug)]
enum Matcher {
    Exact(String),
    Contains(String),
}

impl Matcher {
    fn matches(&self, command: &str) -> bool {
        match self {
            Matcher::Exact(s) => command == s,
            Matcher::Contains(s) => command.contains(s.as_str()),
        }
    }
}

/// 单台主机的回复脚本，按添加顺序匹配，未匹配的命令成功返回空输出
#[derive(Clone, Debug, Default)]
pub struct Script {
    rules: Vec<(Matcher, Reply)>,
    connect_error: Option<String>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    /// 验证器各项检查都通过的主机
    pub fn healthy() -> Self {
        Self::new()
            .on("sudo -n true", Reply::ok(""))
            .on("df -h /", Reply::ok("42%\n"))
            .on("free -g", Reply::ok("4\n"))
            .on("nproc", Reply::ok("2\n"))
            .on("/etc/os-release", Reply::ok("PRETTY_NAME=\"Ubuntu 22.04.3 LTS\"\nNAME=\"Ubuntu\"\n"))
    }

    /// 命令包含 `pattern` 时回复
    pub fn on(mut self, pattern: &str, reply: Reply) -> Self {
        self.rules.push((Matcher::Contains(pattern.to_string()), reply));
        self
    }

    /// 命令与 `command` 完全相同时回复，优先于 `on` 规则
    pub fn on_exact(mut self, command: &str, reply: Reply) -> Self {
        self.rules
            .insert(0, (Matcher::Exact(command.to_string()), reply));
        self
    }

    pub fn refuse_connect(mut self, message: &str) -> Self {
        self.connect_error = Some(message.to_string());
        self
    }

    fn reply_for(&self, command: &str) -> Reply {
        self.rules
            .iter()
            .find(|(m, _)| m.matches(command))
            .map(|(_, r)| r.clone())
            .unwrap_or_else(|| Reply::ok(""))
    }
}

/// 某台主机上发生的事情
#[derive(Debug, Default)]
pub struct HostLog {
    pub executed: Mutex<Vec<String>>,
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
}

impl HostLog {
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    pub fn count(&self, command: &str) -> usize {
        self.executed().iter().filter(|c| c.as_str() == command).count()
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

pub struct ScriptedTransport {
    host: String,
    script: Script,
    log: Arc<HostLog>,
}

impl ScriptedTransport {
    pub fn new(host: &str, script: Script) -> Self {
        Self {
            host: host.to_string(),
            script,
            log: Arc::new(HostLog::default()),
        }
    }

    pub fn log(&self) -> Arc<HostLog> {
        self.log.clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn host(&self) -> &str {
        &self.host
    }

    async fn connect(&self) -> Result<()> {
        self.log.connects.fetch_add(1, Ordering::SeqCst);
        match self.script.connect_error {
            Some(ref message) => Err(ProvisionError::connection(self.host.clone(), message.clone())),
            None => Ok(()),
        }
    }

    async fn execute_command(&self, command: &str, timeout: Duration) -> Result<CommandOutput> {
        self.log.executed.lock().unwrap().push(command.to_string());
        // 让出调度，模拟真实 I/O
        tokio::task::yield_now().await;
        match self.script.reply_for(command) {
            Reply::Ok(stdout) => Ok(CommandOutput::stdout(stdout)),
            Reply::Fail { code, stderr } => Err(ProvisionError::Command {
                command: command.to_string(),
                exit_code: code,
                stderr,
            }),
            Reply::Timeout => Err(ProvisionError::Timeout {
                command: command.to_string(),
                timeout,
            }),
        }
    }

    async fn disconnect(&self) {
        self.log.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

/// 按主机地址分配脚本的工厂，同一主机的多次会话共享日志
pub struct ScriptedFactory {
    default: Script,
    scripts: HashMap<String, Script>,
    logs: Mutex<HashMap<String, Arc<HostLog>>>,
}

impl ScriptedFactory {
    pub fn new(default: Script) -> Self {
        Self {
            default,
            scripts: HashMap::new(),
            logs: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_host(mut self, host: &str, script: Script) -> Self {
        self.scripts.insert(host.to_string(), script);
        self
    }

    pub fn log(&self, host: &str) -> Arc<HostLog> {
        self.logs
            .lock()
            .unwrap()
            .entry(host.to_string())
            .or_default()
            .clone()
    }
}

impl TransportFactory for ScriptedFactory {
    fn create(&self, host: &Host) -> Box<dyn Transport> {
        let script = self
            .scripts
            .get(&host.address)
            .cloned()
            .unwrap_or_else(|| self.default.clone());
        Box::new(ScriptedTransport {
            host: host.address.clone(),
            script,
            log: self.log(&host.address),
        })
    }
}
