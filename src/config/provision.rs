//! 配置对象
//!
//! 由外部（配置文件解析、交互式输入）提供的已校验配置。编排引擎只读取，不修改。

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer};

use crate::config::ConnectionDefaults;
use crate::domain::hook::{HookCondition, HookPoint};
use crate::domain::Host;
use crate::error::{ProvisionError, Result};

/// 完整的配置对象
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ProvisionConfig {
    /// 按配置顺序排列的环境
    #[serde(rename = "environment", alias = "environments", default)]
    pub environments: Vec<Environment>,
    /// 在每台主机上创建的用户
    #[serde(default)]
    pub users: Vec<User>,
    /// 生命周期钩子
    #[serde(default)]
    pub hooks: HooksConfig,
}

/// 部署环境（如 staging、production）
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Environment {
    pub name: String,
    /// 环境对应的部署工具配置文件路径
    #[serde(default)]
    pub config: Option<PathBuf>,
    /// 主机地址，有序
    #[serde(deserialize_with = "string_or_list")]
    pub hosts: Vec<String>,
    /// 服务器角色分组
    #[serde(default, rename = "servers", deserialize_with = "string_or_list")]
    pub roles: Vec<String>,
}

impl Environment {
    pub fn new(name: impl Into<String>, hosts: Vec<String>) -> Self {
        Self {
            name: name.into(),
            config: None,
            hosts,
            roles: Vec::new(),
        }
    }

    /// 去除空白项后的主机地址
    pub fn host_addresses(&self) -> impl Iterator<Item = &str> {
        self.hosts.iter().map(|h| h.trim()).filter(|h| !h.is_empty())
    }
}

/// 在目标主机上创建的用户
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct User {
    pub username: String,
    #[serde(default)]
    pub groups: Vec<String>,
    /// 授权的 SSH 公钥
    #[serde(default)]
    pub ssh_keys: Vec<String>,
    /// 首次登录时强制修改密码
    #[serde(default)]
    pub force_password_change: bool,
    #[serde(default = "default_true")]
    pub create_home: bool,
}

impl User {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            groups: Vec::new(),
            ssh_keys: Vec::new(),
            force_password_change: false,
            create_home: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// 钩子配置
///
/// 除 `dir` 目录下按挂载点命名的脚本外，还可以按挂载点显式列出脚本
#[derive(Clone, Debug, Default, Deserialize)]
pub struct HooksConfig {
    /// 钩子脚本目录（`<dir>/<point>.sh`）
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default)]
    pub pre_provision: Vec<HookEntry>,
    #[serde(default)]
    pub post_provision: Vec<HookEntry>,
    #[serde(default)]
    pub pre_deploy: Vec<HookEntry>,
    #[serde(default)]
    pub post_deploy: Vec<HookEntry>,
    #[serde(default)]
    pub pre_build: Vec<HookEntry>,
    #[serde(default)]
    pub post_build: Vec<HookEntry>,
    #[serde(default)]
    pub pre_connect: Vec<HookEntry>,
    #[serde(default)]
    pub docker_setup: Vec<HookEntry>,
}

impl HooksConfig {
    /// 某个挂载点显式配置的脚本
    pub fn entries(&self, point: HookPoint) -> &[HookEntry] {
        match point {
            HookPoint::PreProvision => &self.pre_provision,
            HookPoint::PostProvision => &self.post_provision,
            HookPoint::PreDeploy => &self.pre_deploy,
            HookPoint::PostDeploy => &self.post_deploy,
            HookPoint::PreBuild => &self.pre_build,
            HookPoint::PostBuild => &self.post_build,
            HookPoint::PreConnect => &self.pre_connect,
            HookPoint::DockerSetup => &self.docker_setup,
        }
    }
}

/// 单个显式钩子，`command`（内联脚本）和 `path`（脚本文件）二选一
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct HookEntry {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// 在目标主机上执行
    #[serde(default)]
    pub remote: Option<bool>,
    #[serde(default)]
    pub condition: Option<HookCondition>,
    /// 超时（毫秒）
    #[serde(default)]
    pub timeout: Option<u64>,
}

impl ProvisionConfig {
    /// 从 YAML 或 JSON 文件加载（按扩展名判断）
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .map_or(false, |ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_yaml_str(&content)
        }
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| ProvisionError::config(e.to_string()))
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| ProvisionError::config(e.to_string()))
    }

    /// 配置前的不变量检查
    pub fn validate(&self) -> Result<()> {
        if self.environments.is_empty() {
            return Err(ProvisionError::config("no environments configured"));
        }

        let mut names = HashSet::new();
        for env in &self.environments {
            if env.name.trim().is_empty() {
                return Err(ProvisionError::config("environment name must not be empty"));
            }
            if !names.insert(env.name.as_str()) {
                return Err(ProvisionError::config(format!(
                    "duplicate environment '{}'",
                    env.name
                )));
            }
            if env.hosts.iter().all(|h| h.trim().is_empty()) {
                return Err(ProvisionError::config(format!(
                    "environment '{}' has no hosts",
                    env.name
                )));
            }
        }

        for user in &self.users {
            if !is_safe_name(&user.username) {
                return Err(ProvisionError::config(format!(
                    "invalid username '{}'",
                    user.username
                )));
            }
            if let Some(group) = user.groups.iter().find(|g| !is_safe_name(g)) {
                return Err(ProvisionError::config(format!(
                    "invalid group '{}' for user '{}'",
                    group, user.username
                )));
            }
        }

        for point in HookPoint::ALL {
            for entry in self.hooks.entries(point) {
                if entry.command.is_some() == entry.path.is_some() {
                    return Err(ProvisionError::config(format!(
                        "{} hook must set exactly one of 'command' or 'path'",
                        point
                    )));
                }
            }
        }

        Ok(())
    }

    /// 只保留指定环境
    pub fn for_environment(&self, name: &str) -> Result<Self> {
        let env = self
            .environments
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| {
                ProvisionError::config(format!("Environment '{}' not found in configuration", name))
            })?;

        Ok(Self {
            environments: vec![env.clone()],
            ..self.clone()
        })
    }

    /// 本次运行涉及的全部主机，按环境和配置顺序
    pub fn targeted_hosts(&self, defaults: &ConnectionDefaults) -> Vec<Host> {
        self.environments
            .iter()
            .flat_map(|env| env.host_addresses())
            .map(|address| Host::new(address, defaults))
            .collect()
    }
}

/// Linux 用户名/组名：小写字母、数字、`_`、`-`，不以 `-` 开头
fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 32
        && !name.starts_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

/// 兼容 `hosts: a` 和 `hosts: [a, b]` 两种写法
fn string_or_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
app:
  name: shop
environment:
  - name: staging
    config: config/deploy.staging.yml
    hosts: 10.0.0.1
    servers: web
  - name: production
    config: config/deploy.yml
    hosts: [10.0.1.1, 10.0.1.2]
    servers: [web, worker]
users:
  - username: deploy
    groups: [docker, sudo]
    ssh_keys: ["ssh-ed25519 AAAA deploy@laptop"]
    force_password_change: true
hooks:
  pre_provision:
    - command: echo starting
      condition: env:CI=true
  post_provision:
    - path: scripts/notify.sh
      remote: true
      timeout: 5000
"#;

    #[test]
    fn test_parse_yaml() {
        let config = ProvisionConfig::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(config.environments.len(), 2);
        assert_eq!(config.environments[0].hosts, vec!["10.0.0.1"]);
        assert_eq!(config.environments[1].roles, vec!["web", "worker"]);
        assert_eq!(config.users[0].groups, vec!["docker", "sudo"]);
        assert!(config.users[0].create_home);
        assert_eq!(config.hooks.pre_provision.len(), 1);
        assert_eq!(
            config.hooks.pre_provision[0].condition,
            Some(HookCondition::EnvEquals {
                name: "CI".to_string(),
                value: "true".to_string()
            })
        );
        assert_eq!(config.hooks.post_provision[0].remote, Some(true));
        config.validate().unwrap();
    }

    #[test]
    fn test_unsupported_condition_rejected_at_parse() {
        let yaml = r#"
environment:
  - name: staging
    hosts: [a]
hooks:
  pre_provision:
    - command: echo hi
      condition: "1 + 1 == 2"
"#;
        assert!(matches!(
            ProvisionConfig::from_yaml_str(yaml),
            Err(ProvisionError::Config(_))
        ));
    }

    #[test]
    fn test_validate_rejects_empty_hosts() {
        let config = ProvisionConfig {
            environments: vec![Environment::new("staging", vec![])],
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("has no hosts"));
    }

    #[test]
    fn test_validate_rejects_unsafe_username() {
        let config = ProvisionConfig {
            environments: vec![Environment::new("staging", vec!["a".to_string()])],
            users: vec![User::new("bob; rm -rf /")],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_duplicate_environment() {
        let config = ProvisionConfig {
            environments: vec![
                Environment::new("staging", vec!["a".to_string()]),
                Environment::new("staging", vec!["b".to_string()]),
            ],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_for_environment() {
        let config = ProvisionConfig::from_yaml_str(SAMPLE).unwrap();
        let prod = config.for_environment("production").unwrap();
        assert_eq!(prod.environments.len(), 1);
        assert_eq!(prod.users.len(), 1);

        let err = config.for_environment("qa").unwrap_err();
        assert!(err.to_string().contains("'qa' not found"));
    }

    #[test]
    fn test_targeted_hosts_in_order() {
        let config = ProvisionConfig::from_yaml_str(SAMPLE).unwrap();
        let hosts = config.targeted_hosts(&ConnectionDefaults::default());
        let addresses: Vec<&str> = hosts.iter().map(|h| h.address.as_str()).collect();
        assert_eq!(addresses, vec!["10.0.0.1", "10.0.1.1", "10.0.1.2"]);
    }

    #[test]
    fn test_parse_json() {
        let json = r#"{"environments":[{"name":"qa","hosts":["q1"]}],"users":[]}"#;
        let config = ProvisionConfig::from_json_str(json).unwrap();
        assert_eq!(config.environments[0].name, "qa");
    }
}
