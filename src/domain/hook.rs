//! 生命周期钩子领域模型

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 生命周期挂载点
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum HookPoint {
    PreProvision,
    PostProvision,
    PreDeploy,
    PostDeploy,
    PreBuild,
    PostBuild,
    PreConnect,
    DockerSetup,
}

impl HookPoint {
    pub const ALL: [HookPoint; 8] = [
        HookPoint::PreProvision,
        HookPoint::PostProvision,
        HookPoint::PreDeploy,
        HookPoint::PostDeploy,
        HookPoint::PreBuild,
        HookPoint::PostBuild,
        HookPoint::PreConnect,
        HookPoint::DockerSetup,
    ];

    /// kebab-case 名称，同时也是钩子脚本文件名（不含 `.sh`）
    pub fn as_str(&self) -> &'static str {
        match self {
            HookPoint::PreProvision => "pre-provision",
            HookPoint::PostProvision => "post-provision",
            HookPoint::PreDeploy => "pre-deploy",
            HookPoint::PostDeploy => "post-deploy",
            HookPoint::PreBuild => "pre-build",
            HookPoint::PostBuild => "post-build",
            HookPoint::PreConnect => "pre-connect",
            HookPoint::DockerSetup => "docker-setup",
        }
    }
}

impl fmt::Display for HookPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HookPoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('_', "-");
        HookPoint::ALL
            .into_iter()
            .find(|p| p.as_str() == normalized)
            .ok_or_else(|| format!("unknown lifecycle point: {}", s))
    }
}

/// 执行上下文
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HookContext {
    /// 在本机执行
    #[default]
    Local,
    /// 在每台目标主机上执行
    Remote,
}

/// 钩子执行条件
///
/// 受限的条件集合，不执行任意表达式：
/// - `always` / `never`
/// - `env:NAME=value` 环境变量等于给定值
/// - `env:NAME` 环境变量已设置且非空
/// - `file:PATH` 文件存在
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum HookCondition {
    Always,
    Never,
    EnvEquals { name: String, value: String },
    EnvSet(String),
    FileExists(PathBuf),
}

impl HookCondition {
    /// 求值，`env` 中的变量优先于进程环境
    pub fn evaluate(&self, env: &HashMap<String, String>) -> bool {
        let lookup = |name: &str| {
            env.get(name)
                .cloned()
                .or_else(|| std::env::var(name).ok())
        };

        match self {
            HookCondition::Always => true,
            HookCondition::Never => false,
            HookCondition::EnvEquals { name, value } => lookup(name).as_deref() == Some(value),
            HookCondition::EnvSet(name) => lookup(name).map_or(false, |v| !v.is_empty()),
            HookCondition::FileExists(path) => path.exists(),
        }
    }
}

impl FromStr for HookCondition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s {
            "always" | "true" => return Ok(HookCondition::Always),
            "never" | "false" => return Ok(HookCondition::Never),
            _ => {}
        }

        if let Some(rest) = s.strip_prefix("env:") {
            let (name, value) = match rest.split_once('=') {
                Some((name, value)) => (name.trim(), Some(value.trim())),
                None => (rest.trim(), None),
            };
            if name.is_empty() {
                return Err(format!("missing variable name in condition: {}", s));
            }
            return Ok(match value {
                Some(value) => HookCondition::EnvEquals {
                    name: name.to_string(),
                    value: value.to_string(),
                },
                None => HookCondition::EnvSet(name.to_string()),
            });
        }

        if let Some(path) = s.strip_prefix("file:") {
            let path = path.trim();
            if path.is_empty() {
                return Err(format!("missing path in condition: {}", s));
            }
            return Ok(HookCondition::FileExists(PathBuf::from(path)));
        }

        Err(format!("unsupported hook condition: {}", s))
    }
}

impl TryFrom<String> for HookCondition {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for HookCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookCondition::Always => f.write_str("always"),
            HookCondition::Never => f.write_str("never"),
            HookCondition::EnvEquals { name, value } => write!(f, "env:{}={}", name, value),
            HookCondition::EnvSet(name) => write!(f, "env:{}", name),
            HookCondition::FileExists(path) => write!(f, "file:{}", path.display()),
        }
    }
}

/// 已加载的钩子（运行期间不可变）
#[derive(Clone, Debug, PartialEq)]
pub struct Hook {
    pub name: String,
    pub point: HookPoint,
    /// 脚本内容
    pub script: String,
    pub context: HookContext,
    pub condition: Option<HookCondition>,
    pub timeout: Option<Duration>,
    /// 脚本来源文件（内联脚本为 None）
    pub source: Option<PathBuf>,
}

impl Hook {
    pub fn new(point: HookPoint, script: impl Into<String>) -> Self {
        Self {
            name: point.as_str().to_string(),
            point,
            script: script.into(),
            context: HookContext::Local,
            condition: None,
            timeout: None,
            source: None,
        }
    }

    pub fn remote(mut self) -> Self {
        self.context = HookContext::Remote;
        self
    }

    pub fn with_condition(mut self, condition: HookCondition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// 钩子执行结果
#[derive(Clone, Debug, PartialEq)]
pub struct HookResult {
    pub success: bool,
    /// 捕获的输出（失败时保留已捕获的部分）
    pub output: String,
    pub error: Option<String>,
    pub duration: Duration,
    /// 因条件不满足而跳过
    pub skipped: bool,
}

impl HookResult {
    pub fn succeeded(output: impl Into<String>, duration: Duration) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
            duration,
            skipped: false,
        }
    }

    pub fn skipped(duration: Duration) -> Self {
        Self {
            success: true,
            output: "Hook skipped: condition not met".to_string(),
            error: None,
            duration,
            skipped: true,
        }
    }

    pub fn failed(output: impl Into<String>, error: impl Into<String>, duration: Duration) -> Self {
        Self {
            success: false,
            output: output.into(),
            error: Some(error.into()),
            duration,
            skipped: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hook_point_parse() {
        assert_eq!("pre-provision".parse::<HookPoint>(), Ok(HookPoint::PreProvision));
        assert_eq!("post_deploy".parse::<HookPoint>(), Ok(HookPoint::PostDeploy));
        assert!("mid-provision".parse::<HookPoint>().is_err());
        assert_eq!(HookPoint::DockerSetup.to_string(), "docker-setup");
    }

    #[test]
    fn test_condition_parse() {
        assert_eq!("always".parse::<HookCondition>(), Ok(HookCondition::Always));
        assert_eq!("never".parse::<HookCondition>(), Ok(HookCondition::Never));
        assert_eq!(
            "env:CI=true".parse::<HookCondition>(),
            Ok(HookCondition::EnvEquals {
                name: "CI".to_string(),
                value: "true".to_string()
            })
        );
        assert_eq!(
            "env:DEPLOY_TOKEN".parse::<HookCondition>(),
            Ok(HookCondition::EnvSet("DEPLOY_TOKEN".to_string()))
        );
        assert_eq!(
            "file:/etc/hosts".parse::<HookCondition>(),
            Ok(HookCondition::FileExists(PathBuf::from("/etc/hosts")))
        );
        assert!("process.env.CI === 'true'".parse::<HookCondition>().is_err());
        assert!("env:=x".parse::<HookCondition>().is_err());
    }

    #[test]
    fn test_condition_evaluate_prefers_supplied_env() {
        let mut env = HashMap::new();
        env.insert("HOOK_TEST_STAGE".to_string(), "staging".to_string());

        let cond: HookCondition = "env:HOOK_TEST_STAGE=staging".parse().unwrap();
        assert!(cond.evaluate(&env));

        let cond: HookCondition = "env:HOOK_TEST_STAGE=production".parse().unwrap();
        assert!(!cond.evaluate(&env));

        let cond = HookCondition::EnvSet("HOOK_TEST_SURELY_UNSET_9f2c".to_string());
        assert!(!cond.evaluate(&env));

        assert!(HookCondition::Always.evaluate(&env));
        assert!(!HookCondition::Never.evaluate(&env));
    }

    #[test]
    fn test_condition_file_exists() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");
        let cond = HookCondition::FileExists(marker.clone());
        assert!(!cond.evaluate(&HashMap::new()));
        std::fs::write(&marker, "").unwrap();
        assert!(cond.evaluate(&HashMap::new()));
    }

    #[test]
    fn test_skipped_result_is_success() {
        let result = HookResult::skipped(Duration::ZERO);
        assert!(result.success);
        assert!(result.skipped);
        assert!(result.output.contains("skipped"));
    }
}
