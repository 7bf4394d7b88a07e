//! 重试策略

use std::time::Duration;

use super::env::constants::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY_SECS};

/// 任务重试策略
///
/// `max_retries` 为总尝试次数。第 n 次失败后等待
/// `retry_delay * backoff_factor^(n-1)`，默认系数为 1（固定间隔）。
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub backoff_factor: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: Duration::from_secs(DEFAULT_RETRY_DELAY_SECS),
            backoff_factor: 1,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            max_retries,
            retry_delay,
            backoff_factor: 1,
        }
    }

    pub fn with_backoff(mut self, factor: u32) -> Self {
        self.backoff_factor = factor.max(1);
        self
    }

    /// 总尝试次数，至少一次
    pub fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    /// 第 `failures` 次失败后的等待时间
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1);
        let multiplier = self.backoff_factor.saturating_pow(exponent);
        self.retry_delay.saturating_mul(multiplier)
    }
}
