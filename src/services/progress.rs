//! 进度报告
//!
//! 观察步骤的开始、输出与结束事件，渲染到终端、JSON 行或广播通道。
//! 报告器只做展示，编排逻辑从不读取它的状态。
//!
//! 每台主机同一时刻只有一个活动步骤，由调用方保证先结束再开始下一个。

use std::collections::HashMap;
use std::io::Write;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::domain::progress::last_line;
use crate::domain::{ProgressEvent, ProgressUpdate, TaskStatus};

/// 广播通道容量
const PROGRESS_CHANNEL_CAPACITY: usize = 256;

/// 步骤进度观察者
pub trait ProgressReporter: Send + Sync {
    /// 开始一个步骤
    fn start_task(&self, event: &ProgressEvent);

    /// 显示该主机活动步骤的最新输出
    fn update_output(&self, host: &str, output: &str);

    /// 以终态结束该主机的活动步骤
    fn finish_task(&self, host: &str, status: TaskStatus, error: Option<&str>);
}

/// 不输出任何内容
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl ProgressReporter for NullReporter {
    fn start_task(&self, _event: &ProgressEvent) {}
    fn update_output(&self, _host: &str, _output: &str) {}
    fn finish_task(&self, _host: &str, _status: TaskStatus, _error: Option<&str>) {}
}

/// 按主机记录活动步骤的开始时间
#[derive(Debug, Default)]
struct StepClock {
    started: Mutex<HashMap<String, Instant>>,
}

impl StepClock {
    fn start(&self, host: &str) {
        self.started
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(host.to_string(), Instant::now());
    }

    fn stop(&self, host: &str) -> Duration {
        self.started
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(host)
            .map(|t| t.elapsed())
            .unwrap_or_default()
    }
}

struct ActiveStep {
    bar: ProgressBar,
    label: String,
    started: Instant,
}

/// 终端 spinner 报告器
pub struct ConsoleReporter {
    multi: MultiProgress,
    active: Mutex<HashMap<String, ActiveStep>>,
    show_host: bool,
}

impl ConsoleReporter {
    pub fn new() -> Self {
        Self::with_draw_target(ProgressDrawTarget::stderr())
    }

    pub fn with_draw_target(target: ProgressDrawTarget) -> Self {
        Self {
            multi: MultiProgress::with_draw_target(target),
            active: Mutex::new(HashMap::new()),
            show_host: true,
        }
    }

    /// 单主机运行时可隐藏主机前缀
    pub fn hide_host(mut self) -> Self {
        self.show_host = false;
        self
    }

    fn spinner_style() -> ProgressStyle {
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
    }

    #[cfg(test)]
    fn active_count(&self) -> usize {
        self.active.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    #[cfg(test)]
    fn active_label(&self, host: &str) -> Option<String> {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(host)
            .map(|step| step.label.clone())
    }
}

impl Default for ConsoleReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for ConsoleReporter {
    fn start_task(&self, event: &ProgressEvent) {
        let label = if self.show_host {
            format!("{} {}", style(&event.host).bold(), event.label())
        } else {
            event.label()
        };

        let bar = self.multi.add(ProgressBar::new_spinner());
        bar.set_style(Self::spinner_style());
        bar.set_message(label.clone());
        bar.enable_steady_tick(Duration::from_millis(100));

        let previous = self.active.lock().unwrap_or_else(|e| e.into_inner()).insert(
            event.host.clone(),
            ActiveStep {
                bar,
                label,
                started: Instant::now(),
            },
        );
        if let Some(previous) = previous {
            previous.bar.finish_and_clear();
        }
    }

    fn update_output(&self, host: &str, output: &str) {
        let line = last_line(output);
        if line.is_empty() {
            return;
        }
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(step) = active.get(host) {
            step.bar
                .set_message(format!("{} {}", step.label, style(line).dim()));
        }
    }

    fn finish_task(&self, host: &str, status: TaskStatus, error: Option<&str>) {
        let Some(step) = self
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(host)
        else {
            return;
        };

        let elapsed = format!("({:.1}s)", step.started.elapsed().as_secs_f64());
        let message = match status {
            TaskStatus::Success => format!("{} {} {}", style("✔").green(), step.label, style(elapsed).dim()),
            TaskStatus::Skipped => format!(
                "{} {} {}",
                style("↷").yellow(),
                step.label,
                style(format!("skipped {}", elapsed)).dim()
            ),
            TaskStatus::Failed | TaskStatus::Running => {
                format!("{} {} {}", style("✖").red(), step.label, style(elapsed).dim())
            }
        };
        step.bar.set_style(
            ProgressStyle::with_template("{msg}").unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        step.bar.finish_with_message(message);

        if let Some(error) = error {
            let _ = self.multi.println(format!("  {}", style(error).red()));
        }
    }
}

/// JSON 行报告器中的一条记录
#[derive(Debug, Serialize)]
struct JsonRecord<'a> {
    timestamp: DateTime<Utc>,
    /// 开始事件自带 host，此处省略
    #[serde(skip_serializing_if = "Option::is_none")]
    host: Option<&'a str>,
    #[serde(flatten)]
    update: &'a ProgressUpdate,
}

/// 每个事件输出一行 JSON，供日志收集
pub struct JsonReporter {
    out: Mutex<Box<dyn Write + Send>>,
    clock: StepClock,
}

impl JsonReporter {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
            clock: StepClock::default(),
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    fn emit(&self, host: Option<&str>, update: &ProgressUpdate) {
        let record = JsonRecord {
            timestamp: Utc::now(),
            host,
            update,
        };
        let Ok(line) = serde_json::to_string(&record) else {
            return;
        };
        let mut out = self.out.lock().unwrap_or_else(|e| e.into_inner());
        let _ = writeln!(out, "{}", line);
        let _ = out.flush();
    }
}

impl ProgressReporter for JsonReporter {
    fn start_task(&self, event: &ProgressEvent) {
        self.clock.start(&event.host);
        self.emit(None, &ProgressUpdate::Started(event.clone()));
    }

    fn update_output(&self, host: &str, output: &str) {
        let line = last_line(output);
        if line.is_empty() {
            return;
        }
        self.emit(
            Some(host),
            &ProgressUpdate::Output {
                line: line.to_string(),
            },
        );
    }

    fn finish_task(&self, host: &str, status: TaskStatus, error: Option<&str>) {
        let duration = self.clock.stop(host);
        self.emit(
            Some(host),
            &ProgressUpdate::Finished {
                status,
                duration_ms: duration.as_millis() as u64,
                error: error.map(str::to_string),
            },
        );
    }
}

/// 广播给订阅者的进度消息
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct HostProgress {
    pub host: String,
    pub update: ProgressUpdate,
}

/// 通过广播通道发布进度，供嵌入式前端订阅
pub struct ChannelReporter {
    sender: broadcast::Sender<HostProgress>,
    clock: StepClock,
}

impl ChannelReporter {
    pub fn new() -> Self {
        Self::with_capacity(PROGRESS_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            clock: StepClock::default(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HostProgress> {
        self.sender.subscribe()
    }

    fn publish(&self, host: &str, update: ProgressUpdate) {
        // 没有订阅者时丢弃
        let _ = self.sender.send(HostProgress {
            host: host.to_string(),
            update,
        });
    }
}

impl Default for ChannelReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for ChannelReporter {
    fn start_task(&self, event: &ProgressEvent) {
        self.clock.start(&event.host);
        self.publish(&event.host, ProgressUpdate::Started(event.clone()));
    }

    fn update_output(&self, host: &str, output: &str) {
        let line = last_line(output);
        if !line.is_empty() {
            self.publish(
                host,
                ProgressUpdate::Output {
                    line: line.to_string(),
                },
            );
        }
    }

    fn finish_task(&self, host: &str, status: TaskStatus, error: Option<&str>) {
        let duration = self.clock.stop(host);
        self.publish(
            host,
            ProgressUpdate::Finished {
                status,
                duration_ms: duration.as_millis() as u64,
                error: error.map(str::to_string),
            },
        );
    }
}
