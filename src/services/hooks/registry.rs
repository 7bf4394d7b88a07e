//! 钩子注册表
//!
//! 运行开始时一次性加载，之后只读

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::config::env::constants::DEFAULT_HOOKS_DIR;
use crate::config::{HookEntry, HooksConfig};
use crate::domain::{Hook, HookCondition, HookContext, HookPoint, HookResult};
use crate::error::{ProvisionError, Result};

/// 脚本注释中的设置
#[derive(Debug, Default, PartialEq)]
struct Annotations {
    context: Option<HookContext>,
    timeout: Option<Duration>,
    condition: Option<HookCondition>,
}

/// 解析 `#@remote`、`#@local`、`#@timeout <ms>`、`#@if <condition>`
fn parse_annotations(script: &str) -> std::result::Result<Annotations, String> {
    let mut annotations = Annotations::default();

    for line in script.lines() {
        let Some(directive) = line.trim().strip_prefix("#@") else {
            continue;
        };
        let (key, value) = match directive.split_once(char::is_whitespace) {
            Some((key, value)) => (key, value.trim()),
            None => (directive, ""),
        };

        match key {
            "remote" => annotations.context = Some(HookContext::Remote),
            "local" => annotations.context = Some(HookContext::Local),
            "timeout" => {
                let ms: u64 = value
                    .parse()
                    .map_err(|_| format!("invalid #@timeout value: {:?}", value))?;
                annotations.timeout = Some(Duration::from_millis(ms));
            }
            "if" => annotations.condition = Some(value.parse()?),
            other => debug!(annotation = %other, "Ignoring unknown hook annotation"),
        }
    }

    Ok(annotations)
}

fn load_error(name: &str, point: HookPoint, message: impl Into<String>) -> ProvisionError {
    let message = message.into();
    ProvisionError::Hook {
        hook: name.to_string(),
        point,
        result: Box::new(HookResult::failed("", message.clone(), Duration::ZERO)),
        message,
    }
}

/// 由脚本内容构建钩子，注释决定上下文、超时和条件
fn build_hook(
    name: String,
    point: HookPoint,
    script: String,
    source: Option<PathBuf>,
) -> Result<Hook> {
    let annotations = parse_annotations(&script).map_err(|e| load_error(&name, point, e))?;

    Ok(Hook {
        name,
        point,
        context: annotations.context.unwrap_or_default(),
        timeout: annotations.timeout,
        condition: annotations.condition,
        script,
        source,
    })
}

/// 按挂载点分组的已加载钩子
#[derive(Clone, Debug, Default)]
pub struct HookRegistry {
    hooks: BTreeMap<HookPoint, Vec<Hook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从钩子目录和配置加载
    ///
    /// 目录中的 `<point>.sh` 先注册，配置中显式列出的脚本随后按顺序注册。
    /// 目录不存在时只加载配置中的钩子。
    pub fn load(config: &HooksConfig, dir_override: Option<&Path>) -> Result<Self> {
        let dir = dir_override
            .map(Path::to_path_buf)
            .or_else(|| config.dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_HOOKS_DIR));

        let mut registry = Self::new();

        for point in HookPoint::ALL {
            let path = dir.join(format!("{}.sh", point.as_str()));
            if path.is_file() {
                let script = std::fs::read_to_string(&path).map_err(|e| {
                    load_error(point.as_str(), point, format!("cannot read {}: {}", path.display(), e))
                })?;
                let hook = build_hook(point.as_str().to_string(), point, script, Some(path))?;
                registry.register(hook);
            }

            for (index, entry) in config.entries(point).iter().enumerate() {
                let hook = Self::from_entry(point, index, entry)?;
                registry.register(hook);
            }
        }

        debug!(dir = %dir.display(), hooks = registry.len(), "Hooks loaded");
        Ok(registry)
    }

    /// 配置字段覆盖脚本注释
    fn from_entry(point: HookPoint, index: usize, entry: &HookEntry) -> Result<Hook> {
        let name = entry
            .name
            .clone()
            .unwrap_or_else(|| format!("{}-{}", point.as_str(), index + 1));

        let (script, source) = match (&entry.command, &entry.path) {
            (Some(command), None) => (command.clone(), None),
            (None, Some(path)) => {
                let script = std::fs::read_to_string(path).map_err(|e| {
                    load_error(&name, point, format!("cannot read {}: {}", path.display(), e))
                })?;
                (script, Some(path.clone()))
            }
            _ => {
                return Err(load_error(
                    &name,
                    point,
                    "exactly one of `command` or `path` must be set",
                ))
            }
        };

        let mut hook = build_hook(name, point, script, source)?;
        if let Some(remote) = entry.remote {
            hook.context = if remote {
                HookContext::Remote
            } else {
                HookContext::Local
            };
        }
        if let Some(ref condition) = entry.condition {
            hook.condition = Some(condition.clone());
        }
        if let Some(ms) = entry.timeout {
            hook.timeout = Some(Duration::from_millis(ms));
        }
        Ok(hook)
    }

    pub fn register(&mut self, hook: Hook) {
        self.hooks.entry(hook.point).or_default().push(hook);
    }

    /// 挂载点上的钩子，按注册顺序；没有钩子时为空
    pub fn hooks(&self, point: HookPoint) -> &[Hook] {
        self.hooks.get(&point).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.hooks.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
