//! 统一重试策略
//!
//! 模型调用与工具调用共用同一个 RetryPolicy：最大尝试次数 + 指数退避（带上限）。
//! 是否可重试由调用方通过闭包判断（如 LlmError::is_retryable）；错误自带的等待提示
//! （如 429 的 retry-after）会把本次等待拉长到不短于提示值。

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;

/// 重试策略：max_attempts 为总尝试次数（含第一次）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            ..Self::default()
        }
    }

    /// 只尝试一次
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 0,
            max_delay_ms: 0,
            multiplier: 1.0,
        }
    }

    /// 第 attempt 次失败后的等待时间（attempt 从 1 开始）
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 || self.base_delay_ms == 0 {
            return Duration::ZERO;
        }
        let exp = self.multiplier.max(1.0).powi(attempt as i32 - 1);
        let delay = (self.base_delay_ms as f64 * exp).min(self.max_delay_ms as f64);
        Duration::from_millis(delay as u64)
    }

    /// 执行 op，失败且可重试时按退避等待后重试；返回最后一次的错误
    pub async fn run<T, E, F, Fut, R>(&self, label: &str, op: F, is_retryable: R) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        self.run_with_hint(label, op, is_retryable, |_| None).await
    }

    /// 同 run，但等待时间取 max(退避, retry_after(&e))
    pub async fn run_with_hint<T, E, F, Fut, R, H>(
        &self,
        label: &str,
        mut op: F,
        is_retryable: R,
        retry_after: H,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: Fn(&E) -> bool,
        H: Fn(&E) -> Option<Duration>,
        E: std::fmt::Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    if attempt >= max_attempts || !is_retryable(&e) {
                        if attempt > 1 {
                            tracing::warn!(op = label, attempts = attempt, error = %e, "giving up after retries");
                        }
                        return Err(e);
                    }
                    let backoff = self.delay_for_attempt(attempt);
                    let delay = retry_after(&e).map_or(backoff, |hint| hint.max(backoff));
                    tracing::debug!(
                        op = label,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay_ms: 100,
            max_delay_ms: 300,
            multiplier: 2.0,
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(300));
        assert_eq!(policy.delay_for_attempt(6), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::new(3, 1);
        let result: Result<u32, String> = policy
            .run(
                "flaky",
                move || async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 {
                        Err(format!("fail {n}"))
                    } else {
                        Ok(n)
                    }
                },
                |_| true,
            )
            .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_stops_after_max_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::new(3, 1);
        let result: Result<(), String> = policy
            .run(
                "down",
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("down".to_string())
                },
                |_| true,
            )
            .await;
        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_fast() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::new(5, 1);
        let result: Result<(), String> = policy
            .run(
                "bad request",
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("400".to_string())
                },
                |_| false,
            )
            .await;
        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_after_hint_extends_delay() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::new(2, 1);
        let start = std::time::Instant::now();
        let result: Result<u32, String> = policy
            .run_with_hint(
                "rate limited",
                move || async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if n == 1 {
                        Err("429".to_string())
                    } else {
                        Ok(n)
                    }
                },
                |_| true,
                |_| Some(Duration::from_millis(120)),
            )
            .await;
        assert_eq!(result.unwrap(), 2);
        assert!(start.elapsed() >= Duration::from_millis(120));
    }

    #[tokio::test]
    async fn test_short_hint_keeps_backoff() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::new(2, 100);
        let start = std::time::Instant::now();
        let result: Result<(), String> = policy
            .run_with_hint(
                "rate limited",
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("429".to_string())
                },
                |_| true,
                |_| Some(Duration::from_millis(1)),
            )
            .await;
        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert!(start.elapsed() >= Duration::from_millis(100));
    }
}
