//! Retry Policy
//!
//! 재시도 로직을 한 곳에 모은 추상화. 세 가지 용도에서 공유:
//!
//! | 용도 | preset | 형태 |
//! |------|--------|------|
//! | DB lock 경합 (`40001`, `40P01`, `55P03`) | [`RetryPolicy::storage`] | 지수 backoff + jitter |
//! | Global API timeout/transport 에러 | [`RetryPolicy::remote`] | 지수 backoff |
//! | Global API 429 | [`RetryPolicy::throttle`] | 고정 cooldown |
//!
//! 재시도 여부는 호출부가 넘기는 predicate가 결정하고, 그 외 에러는 즉시 전파됨.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, warn};

/// 재시도 정책
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 첫 시도를 포함한 최대 시도 횟수
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// 1.0이면 고정 간격
    pub multiplier: f64,
    /// 계산된 delay에 최대 25% 무작위 가산
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::storage()
    }
}

impl RetryPolicy {
    /// DB 쓰기 경합용: 5회, 50ms부터 2배씩, 최대 2초, jitter
    ///
    /// Scraper와 Reconciler가 같은 테이블 lock을 두고 경쟁하므로
    /// jitter로 재시도 시점을 분산
    #[must_use]
    pub fn storage() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
            jitter: true,
        }
    }

    /// 원격 호출의 일시적 실패용
    #[must_use]
    pub fn remote(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            multiplier: 2.0,
            jitter: false,
        }
    }

    /// 429 전용: 고정 cooldown 후 같은 요청 재시도
    #[must_use]
    pub fn throttle(cooldown: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: cooldown,
            max_delay: cooldown,
            multiplier: 1.0,
            jitter: false,
        }
    }

    /// 대기 없이 재시도 (테스트 및 설정상 delay 0)
    #[must_use]
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            jitter: false,
        }
    }

    /// `retry`번째 재시도 전 대기 시간 (0부터 시작), jitter 제외
    pub fn base_delay(&self, retry: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(retry as i32);
        Duration::from_secs_f64(base.min(self.max_delay.as_secs_f64()))
    }

    fn delay(&self, retry: u32) -> Duration {
        let base = self.base_delay(retry);
        if self.jitter && !base.is_zero() {
            let extra = rand::thread_rng().gen_range(0.0..=0.25);
            base.mul_f64(1.0 + extra)
        } else {
            base
        }
    }

    /// `is_retryable`이 true인 에러에 한해 재시도
    pub async fn run<T, E, F, Fut, P>(&self, operation: &str, is_retryable: P, op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        self.run_with_hint(operation, is_retryable, |_| None, op).await
    }

    /// 에러가 직접 대기 시간을 제시하는 경우 (`Retry-After` 등)
    ///
    /// `hint`가 `Some`을 반환하면 정책의 delay 대신 그 값을 사용
    pub async fn run_with_hint<T, E, F, Fut, P, H>(
        &self,
        operation: &str,
        is_retryable: P,
        hint: H,
        mut op: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        H: Fn(&E) -> Option<Duration>,
        E: std::fmt::Display,
    {
        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(operation, retries = attempt, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => {
                    attempt += 1;
                    if !is_retryable(&err) || attempt >= self.max_attempts {
                        return Err(err);
                    }
                    let wait = hint(&err).unwrap_or_else(|| self.delay(attempt - 1));
                    warn!(
                        operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %err,
                        wait_ms = wait.as_millis() as u64,
                        "retrying"
                    );
                    if !wait.is_zero() {
                        sleep(wait).await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    enum TestError {
        Busy,
        Fatal,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    fn is_busy(e: &TestError) -> bool {
        matches!(e, TestError::Busy)
    }

    #[tokio::test]
    async fn test_succeeds_after_retryable_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result: Result<u32, TestError> = RetryPolicy::immediate(5)
            .run("op", is_busy, || {
                let c = c.clone();
                async move {
                    let n = c.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 {
                        Err(TestError::Busy)
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result: Result<(), TestError> = RetryPolicy::immediate(4)
            .run("op", is_busy, || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(TestError::Busy)
                }
            })
            .await;

        assert!(matches!(result, Err(TestError::Busy)));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_non_retryable_error_propagates_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result: Result<(), TestError> = RetryPolicy::immediate(5)
            .run("op", is_busy, || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(TestError::Fatal)
                }
            })
            .await;

        assert!(matches!(result, Err(TestError::Fatal)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_exponential_delay_caps_at_max() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            multiplier: 2.0,
            jitter: false,
        };
        assert_eq!(policy.base_delay(0), Duration::from_millis(100));
        assert_eq!(policy.base_delay(1), Duration::from_millis(200));
        assert_eq!(policy.base_delay(2), Duration::from_millis(400));
        assert_eq!(policy.base_delay(3), Duration::from_millis(500));
    }

    #[test]
    fn test_throttle_policy_is_fixed() {
        let policy = RetryPolicy::throttle(Duration::from_secs(30), 3);
        assert_eq!(policy.base_delay(0), Duration::from_secs(30));
        assert_eq!(policy.base_delay(4), Duration::from_secs(30));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy::storage();
        for retry in 0..4 {
            let base = policy.base_delay(retry);
            let jittered = policy.delay(retry);
            assert!(jittered >= base);
            assert!(jittered <= base.mul_f64(1.25) + Duration::from_nanos(1));
        }
    }
}
