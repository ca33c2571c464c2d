//! The politeness layer between workers and fetch backends: a shared token
//! bucket, fixed/random pre-request pauses, and retry with backoff.

use crate::config::{RetryConfig, ScanConfig};
use crate::error::{Result, ScanError};
use crate::fetch::FetchBackend;
use crate::model::{FetchRequest, FetchResult};
use governor::clock::DefaultClock;
use governor::state::InMemoryState;
use governor::state::direct::NotKeyed;
use governor::{Quota, RateLimiter};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

pub struct Politeness {
    limiter: Option<Arc<DirectLimiter>>,
    delay: Duration,
    random_delay: Option<(Duration, Duration)>,
    retry: RetryConfig,
    cancel: CancellationToken,
}

impl Politeness {
    pub fn new(config: &ScanConfig, cancel: CancellationToken) -> Self {
        let limiter = if config.rate_limit > 0.0 {
            Quota::with_period(Duration::from_secs_f64(1.0 / config.rate_limit))
                .map(|quota| Arc::new(RateLimiter::direct(quota)))
        } else {
            None
        };
        Self {
            limiter,
            delay: config.delay,
            random_delay: config.random_delay,
            retry: config.retry.clone(),
            cancel,
        }
    }

    /// Gates one logical fetch: token, pause, dispatch, retry. Transport
    /// failures and 5xx responses are retried with exponential backoff and
    /// full jitter; 4xx responses are answers, not errors.
    pub async fn fetch(
        &self,
        backend: &dyn FetchBackend,
        request: &FetchRequest,
    ) -> Result<FetchResult> {
        let mut attempt: u32 = 0;
        loop {
            self.acquire_token().await?;
            self.pause().await?;

            let outcome = backend.fetch(request).await;
            let retryable = match &outcome {
                Ok(result) => result.status >= 500,
                Err(ScanError::Http(_)) | Err(ScanError::Browser(_)) => true,
                Err(_) => false,
            };

            if !retryable || attempt + 1 >= self.retry.max_attempts {
                return outcome;
            }

            attempt += 1;
            let backoff = self.backoff_delay(attempt);
            tracing::debug!(
                url = %request.url,
                attempt,
                ?backoff,
                "retrying after failure"
            );
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = self.cancel.cancelled() => return Err(ScanError::Cancelled),
            }
        }
    }

    async fn acquire_token(&self) -> Result<()> {
        if let Some(ref limiter) = self.limiter {
            tokio::select! {
                _ = limiter.until_ready() => {}
                _ = self.cancel.cancelled() => return Err(ScanError::Cancelled),
            }
        }
        Ok(())
    }

    /// Sleeps the larger of the fixed delay and a uniform draw from the
    /// random range.
    async fn pause(&self) -> Result<()> {
        let random = match self.random_delay {
            Some((min, max)) if max > Duration::ZERO => {
                if min == max {
                    min
                } else {
                    let span = (max - min).as_secs_f64();
                    min + Duration::from_secs_f64(rand::thread_rng().gen_range(0.0..span))
                }
            }
            _ => Duration::ZERO,
        };
        let pause = self.delay.max(random);
        if pause.is_zero() {
            return Ok(());
        }
        tokio::select! {
            _ = tokio::time::sleep(pause) => Ok(()),
            _ = self.cancel.cancelled() => Err(ScanError::Cancelled),
        }
    }

    /// base * 2^(attempt-1), scaled by a full-jitter factor in (0, 1].
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self.retry.base_delay * 2u32.pow(attempt.saturating_sub(1));
        exp.mul_f64(rand::thread_rng().gen_range(0.0f64..1.0).max(0.05))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    struct ScriptedBackend {
        calls: AtomicU32,
        statuses: Vec<u16>,
    }

    impl ScriptedBackend {
        fn new(statuses: Vec<u16>) -> Self {
            Self {
                calls: AtomicU32::new(0),
                statuses,
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl FetchBackend for ScriptedBackend {
        async fn fetch(&self, request: &FetchRequest) -> Result<FetchResult> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            let status = *self
                .statuses
                .get(call)
                .or(self.statuses.last())
                .unwrap_or(&200);
            Ok(FetchResult {
                final_url: request.url.clone(),
                status,
                headers: Vec::new(),
                body: String::new(),
                content_type: None,
                truncated: false,
                elapsed: Duration::ZERO,
                observed_subrequests: Vec::new(),
            })
        }
    }

    fn politeness(config: &ScanConfig) -> Politeness {
        Politeness::new(config, CancellationToken::new())
    }

    fn request() -> FetchRequest {
        FetchRequest::get("http://h/", Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_success_is_not_retried() {
        let backend = ScriptedBackend::new(vec![200]);
        let config = ScanConfig::default();
        let result = politeness(&config).fetch(&backend, &request()).await.unwrap();
        assert_eq!(result.status, 200);
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_4xx_is_not_retried() {
        let backend = ScriptedBackend::new(vec![404]);
        let config = ScanConfig::default();
        let result = politeness(&config).fetch(&backend, &request()).await.unwrap();
        assert_eq!(result.status, 404);
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_5xx_retries_until_success() {
        let backend = ScriptedBackend::new(vec![500, 503, 200]);
        let mut config = ScanConfig::default();
        config.retry.base_delay = Duration::from_millis(1);
        let result = politeness(&config).fetch(&backend, &request()).await.unwrap();
        assert_eq!(result.status, 200);
        assert_eq!(backend.calls(), 3);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let backend = ScriptedBackend::new(vec![500]);
        let mut config = ScanConfig::default();
        config.retry.base_delay = Duration::from_millis(1);
        let result = politeness(&config).fetch(&backend, &request()).await.unwrap();
        assert_eq!(result.status, 500);
        assert_eq!(backend.calls(), config.retry.max_attempts);
    }

    #[tokio::test]
    async fn test_rate_limit_throttles_dispatch() {
        let backend = ScriptedBackend::new(vec![200]);
        let mut config = ScanConfig::default();
        config.rate_limit = 20.0;
        let politeness = politeness(&config);
        let started = Instant::now();
        for _ in 0..8 {
            politeness.fetch(&backend, &request()).await.unwrap();
        }
        // 8 requests at 20 req/s need at least ~350ms beyond the first token.
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_zero_rate_limit_bypasses_bucket() {
        let backend = ScriptedBackend::new(vec![200]);
        let config = ScanConfig::default();
        let politeness = politeness(&config);
        let started = Instant::now();
        for _ in 0..50 {
            politeness.fetch(&backend, &request()).await.unwrap();
        }
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_cancellation_aborts_waits() {
        let backend = ScriptedBackend::new(vec![200]);
        let mut config = ScanConfig::default();
        config.delay = Duration::from_secs(30);
        let cancel = CancellationToken::new();
        let politeness = Politeness::new(&config, cancel.clone());
        cancel.cancel();
        let outcome = politeness.fetch(&backend, &request()).await;
        assert!(matches!(outcome, Err(ScanError::Cancelled)));
    }

    #[test]
    fn test_backoff_grows_with_attempts() {
        let config = ScanConfig::default();
        let politeness = politeness(&config);
        // Full jitter keeps each value below the exponential ceiling.
        for attempt in 1..=3 {
            let ceiling = config.retry.base_delay * 2u32.pow(attempt - 1);
            assert!(politeness.backoff_delay(attempt) <= ceiling);
        }
    }
}
