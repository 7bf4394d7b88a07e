//! 运行结果账本
//!
//! 按主机记录状态迁移和任务结果（只追加），运行结束后无论成败都可读取

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::domain::{HostState, Phase, TaskResult};

/// 某个阶段产生的一条任务结果
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PhaseResult {
    pub phase: Phase,
    #[serde(flatten)]
    pub result: TaskResult,
}

/// 单台主机的记录
#[derive(Clone, Debug, Serialize)]
pub struct HostRecord {
    pub environment: String,
    pub host: String,
    pub states: Vec<HostState>,
    pub results: Vec<PhaseResult>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl HostRecord {
    fn new(environment: &str, host: &str) -> Self {
        Self {
            environment: environment.to_string(),
            host: host.to_string(),
            states: Vec::new(),
            results: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn current_state(&self) -> Option<HostState> {
        self.states.last().copied()
    }

    pub fn failed_count(&self) -> usize {
        self.results.iter().filter(|r| r.result.failed).count()
    }
}

/// 记录表和首次出现顺序，放在同一把锁下
#[derive(Default)]
struct LedgerInner {
    records: HashMap<String, HostRecord>,
    order: Vec<String>,
}

impl LedgerInner {
    fn record_mut(&mut self, environment: &str, host: &str) -> &mut HostRecord {
        if !self.records.contains_key(host) {
            self.order.push(host.to_string());
        }
        self.records
            .entry(host.to_string())
            .or_insert_with(|| HostRecord::new(environment, host))
    }
}

/// 结果账本
///
/// 以主机地址为键，保留首次出现的顺序
#[derive(Default)]
pub struct ResultLedger {
    inner: RwLock<LedgerInner>,
}

impl ResultLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录状态迁移，与当前状态相同时忽略
    pub async fn transition(&self, environment: &str, host: &str, state: HostState) {
        let mut inner = self.inner.write().await;
        let record = inner.record_mut(environment, host);

        if record.current_state() == Some(state) {
            return;
        }
        record.environment = environment.to_string();
        record.states.push(state);
        if state.is_terminal() {
            record.finished_at = Some(Utc::now());
        }
    }

    /// 追加一个阶段的任务结果
    pub async fn record(&self, environment: &str, host: &str, phase: Phase, results: &[TaskResult]) {
        let mut inner = self.inner.write().await;
        let record = inner.record_mut(environment, host);
        record.results.extend(results.iter().cloned().map(|result| PhaseResult { phase, result }));
    }

    /// 主机的所有任务结果，按执行顺序
    pub async fn results(&self, host: &str) -> Vec<TaskResult> {
        let inner = self.inner.read().await;
        inner
            .records
            .get(host)
            .map(|r| r.results.iter().map(|p| p.result.clone()).collect())
            .unwrap_or_default()
    }

    pub async fn states(&self, host: &str) -> Vec<HostState> {
        let inner = self.inner.read().await;
        inner.records.get(host).map(|r| r.states.clone()).unwrap_or_default()
    }

    pub async fn get(&self, host: &str) -> Option<HostRecord> {
        self.inner.read().await.records.get(host).cloned()
    }

    /// 是否尝试过该主机
    pub async fn contains(&self, host: &str) -> bool {
        self.inner.read().await.records.contains_key(host)
    }

    /// 所有记录，按主机首次出现的顺序
    pub async fn snapshot(&self) -> Vec<HostRecord> {
        let inner = self.inner.read().await;
        inner
            .order
            .iter()
            .filter_map(|h| inner.records.get(h).cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_transition_dedupes_repeats() {
        let ledger = ResultLedger::new();
        ledger.transition("staging", "h1", HostState::Connecting).await;
        ledger.transition("staging", "h1", HostState::UpdatingSystem).await;
        ledger.transition("staging", "h1", HostState::UpdatingSystem).await;
        ledger.transition("staging", "h1", HostState::Disconnected).await;

        assert_eq!(
            ledger.states("h1").await,
            vec![
                HostState::Connecting,
                HostState::UpdatingSystem,
                HostState::Disconnected
            ]
        );
        let record = ledger.get("h1").await.unwrap();
        assert!(record.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_results_append_in_order() {
        let ledger = ResultLedger::new();
        ledger
            .record("prod", "h1", Phase::SystemUpdate, &[TaskResult::changed("a", "", 0)])
            .await;
        ledger
            .record(
                "prod",
                "h1",
                Phase::Firewall,
                &[TaskResult::unchanged("b"), TaskResult::failed("c", "x", 3)],
            )
            .await;

        let results = ledger.results("h1").await;
        let names: Vec<&str> = results.iter().map(|r| r.description.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(ledger.get("h1").await.unwrap().failed_count(), 1);
        assert!(ledger.results("h2").await.is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_keeps_first_seen_order() {
        let ledger = ResultLedger::new();
        ledger.transition("prod", "b", HostState::Connecting).await;
        ledger.transition("prod", "a", HostState::Connecting).await;
        ledger.record("prod", "b", Phase::Users, &[]).await;

        let hosts: Vec<String> = ledger.snapshot().await.into_iter().map(|r| r.host).collect();
        assert_eq!(hosts, vec!["b", "a"]);
        assert!(!ledger.contains("c").await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_snapshot_concurrent_with_new_hosts() {
        let ledger = Arc::new(ResultLedger::new());

        let writer = {
            let ledger = ledger.clone();
            tokio::spawn(async move {
                for i in 0..5000 {
                    let host = format!("h{}", i % 500);
                    ledger.transition("prod", &host, HostState::Connecting).await;
                    ledger
                        .record("prod", &host, Phase::Users, &[TaskResult::unchanged("u")])
                        .await;
                }
            })
        };
        let reader = {
            let ledger = ledger.clone();
            tokio::spawn(async move {
                for _ in 0..2000 {
                    let snapshot = ledger.snapshot().await;
                    assert!(snapshot.len() <= 500);
                    tokio::task::yield_now().await;
                }
            })
        };

        tokio::time::timeout(Duration::from_secs(20), async {
            writer.await.unwrap();
            reader.await.unwrap();
        })
        .await
        .expect("ledger readers and writers must not block each other");

        let snapshot = ledger.snapshot().await;
        assert_eq!(snapshot.len(), 500);
        assert_eq!(snapshot[0].host, "h0");
        assert_eq!(snapshot[0].results.len(), 10);
    }
}
