use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::timeout;
use tracing::warn;

use chronoforge_core::{RetryConfig, SchedulerError, SchedulerResult};

/// 拉取调用的重试策略：指数退避 + 随机抖动，只重试临时性错误
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts.max(1)
    }

    /// 第 `retry` 次重试（从 1 开始）前的等待时间
    pub fn delay_for(&self, retry: u32) -> Duration {
        let base = self.config.base_interval_ms as f64;
        let exponential = base * self.config.backoff_multiplier.powi(retry.saturating_sub(1) as i32);
        let capped = exponential.min(self.config.max_interval_ms as f64);

        let jitter_span = capped * self.config.jitter_factor;
        let jitter = if jitter_span > 0.0 {
            rand::rng().random_range(-jitter_span..=jitter_span)
        } else {
            0.0
        };
        Duration::from_millis((capped + jitter).max(0.0) as u64)
    }

    /// 执行 `op`，每次调用受 `call_timeout` 约束，超时按临时性错误处理
    ///
    /// `on_retry` 在每次重试前调用，参数为即将进行的重试序号和上一次的错误。
    pub async fn run<T, F, Fut, R>(&self, call_timeout: Duration, mut op: F, mut on_retry: R) -> SchedulerResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SchedulerResult<T>>,
        R: FnMut(u32, &SchedulerError),
    {
        let mut attempt = 1;
        loop {
            let result = match timeout(call_timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(SchedulerError::TransientFetch(format!(
                    "call timed out after {}ms",
                    call_timeout.as_millis()
                ))),
            };

            match result {
                Err(e) if e.is_retryable() && attempt < self.max_attempts() => {
                    on_retry(attempt, &e);
                    let delay = self.delay_for(attempt);
                    warn!(attempt = attempt, delay_ms = delay.as_millis() as u64, error = %e, "Retrying after transient failure");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_attempts,
            base_interval_ms: 1,
            max_interval_ms: 4,
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
        })
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = policy(5);
        assert_eq!(policy.delay_for(1), Duration::from_millis(1));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2));
        assert_eq!(policy.delay_for(3), Duration::from_millis(4));
        assert_eq!(policy.delay_for(10), Duration::from_millis(4));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let policy = RetryPolicy::new(RetryConfig {
            base_interval_ms: 1000,
            jitter_factor: 0.1,
            ..RetryConfig::default()
        });
        for _ in 0..100 {
            let ms = policy.delay_for(1).as_millis();
            assert!((900..=1100).contains(&ms), "delay {ms}ms out of range");
        }
    }

    #[tokio::test]
    async fn test_transient_errors_retried_until_success() {
        let calls = AtomicU32::new(0);
        let mut retries = Vec::new();
        let result = policy(3)
            .run(
                Duration::from_secs(1),
                || async {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(SchedulerError::TransientFetch("busy".into()))
                    } else {
                        Ok(7)
                    }
                },
                |attempt, _| retries.push(attempt),
            )
            .await;
        assert_eq!(result, Ok(7));
        assert_eq!(retries, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_attempts_exhausted() {
        let calls = AtomicU32::new(0);
        let result: SchedulerResult<()> = policy(3)
            .run(
                Duration::from_secs(1),
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(SchedulerError::TransientFetch("busy".into()))
                },
                |_, _| {},
            )
            .await;
        assert!(matches!(result, Err(SchedulerError::TransientFetch(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let calls = AtomicU32::new(0);
        let result: SchedulerResult<()> = policy(3)
            .run(
                Duration::from_secs(1),
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(SchedulerError::PermanentFetch("unknown symbol".into()))
                },
                |_, _| {},
            )
            .await;
        assert!(matches!(result, Err(SchedulerError::PermanentFetch(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_treated_as_transient() {
        let calls = AtomicU32::new(0);
        let result = policy(2)
            .run(
                Duration::from_millis(20),
                || async {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                    Ok("done")
                },
                |_, e| assert!(e.is_retryable()),
            )
            .await;
        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
