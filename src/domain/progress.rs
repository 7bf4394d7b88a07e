//! 进度事件模型
//!
//! 纯观察用途，从不参与控制决策

use serde::Serialize;

/// 步骤状态
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Running,
    Success,
    Failed,
    Skipped,
}

/// 阶段内一个步骤的开始事件
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ProgressEvent {
    /// 主机地址
    pub host: String,
    /// 阶段内序号，从 1 开始
    pub step: usize,
    /// 阶段内步骤总数
    pub total: usize,
    pub description: String,
    pub status: TaskStatus,
}

impl ProgressEvent {
    pub fn running(host: &str, step: usize, total: usize, description: &str) -> Self {
        Self {
            host: host.to_string(),
            step,
            total,
            description: description.to_string(),
            status: TaskStatus::Running,
        }
    }

    /// 展示文本，如 `[2/5] Install package curl`
    pub fn label(&self) -> String {
        format!("[{}/{}] {}", self.step, self.total, self.description)
    }
}

/// 发布给外部渲染器的进度更新
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressUpdate {
    Started(ProgressEvent),
    Output {
        line: String,
    },
    Finished {
        status: TaskStatus,
        duration_ms: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

/// 取多行输出的最后一个非空行
pub fn last_line(output: &str) -> &str {
    output
        .trim()
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .map(str::trim)
        .unwrap_or("")
}
