//! Per-provider token buckets. One bucket per provider key, shared
//! process-wide through a registry; providers without a registered key are
//! not limited.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::MedlitError;

/// Token bucket refilled in whole-second windows: `rate` tokens join the
/// bucket at each one-second boundary, capped at `burst`. Waiters queue on
/// the bucket mutex in arrival order, so grants are FIFO.
pub struct RateLimiter {
    rate: f64,
    burst: f64,
    state: tokio::sync::Mutex<Bucket>,
}

struct Bucket {
    tokens: f64,
    window_start: Instant,
}

impl RateLimiter {
    pub fn new(rate: f64, burst: f64) -> Self {
        assert!(rate > 0.0, "rate must be positive");
        Self {
            rate,
            burst: burst.max(1.0),
            state: tokio::sync::Mutex::new(Bucket {
                tokens: burst.max(1.0),
                window_start: Instant::now(),
            }),
        }
    }

    fn refill(&self, bucket: &mut Bucket) {
        let elapsed = bucket.window_start.elapsed().as_secs_f64();
        let windows = elapsed.floor();
        if windows >= 1.0 {
            bucket.tokens = (bucket.tokens + windows * self.rate).min(self.burst);
            bucket.window_start += Duration::from_secs_f64(windows);
        }
    }

    /// Suspend until a token is available. The bucket lock is held while
    /// waiting so earlier callers are always served first.
    pub async fn acquire(&self, cancel: Option<&CancellationToken>) -> Result<(), MedlitError> {
        let mut bucket = self.state.lock().await;
        loop {
            self.refill(&mut bucket);
            if bucket.tokens >= 1.0 {
                bucket.tokens -= 1.0;
                return Ok(());
            }
            let until_window = Duration::from_secs(1)
                .saturating_sub(bucket.window_start.elapsed())
                .max(Duration::from_millis(1));
            match cancel {
                Some(token) => {
                    tokio::select! {
                        _ = token.cancelled() => return Err(MedlitError::Cancelled),
                        _ = tokio::time::sleep(until_window) => {}
                    }
                }
                None => tokio::time::sleep(until_window).await,
            }
        }
    }
}

fn registry() -> &'static Mutex<HashMap<String, Arc<RateLimiter>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<String, Arc<RateLimiter>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Default (rate, burst) per provider key. Values follow each provider's
/// published politeness guidance.
fn default_limits(key: &str) -> (f64, f64) {
    match key {
        "pubmed" => {
            if crate::config::ncbi_api_key().is_some() {
                (10.0, 10.0)
            } else {
                (3.0, 3.0)
            }
        }
        "europepmc" | "crossref" | "openalex" | "icite" | "unpaywall" => (5.0, 5.0),
        "pubtator" => (3.0, 3.0),
        "semanticscholar" => (1.0, 1.0),
        "biorxiv" | "clinicaltrials" => (2.0, 2.0),
        _ => (5.0, 5.0),
    }
}

/// Fetch the process-wide bucket for a provider key, creating it with
/// default limits on first use. The same key always yields the same bucket.
pub fn bucket(key: &str) -> Arc<RateLimiter> {
    let mut map = registry().lock().expect("rate limiter registry poisoned");
    map.entry(key.to_string())
        .or_insert_with(|| {
            let (rate, burst) = default_limits(key);
            Arc::new(RateLimiter::new(rate, burst))
        })
        .clone()
}

/// Acquire a token for a provider key, waiting if the bucket is drained.
pub async fn acquire(key: &str, cancel: Option<&CancellationToken>) -> Result<(), MedlitError> {
    let limiter = bucket(key);
    limiter.acquire(cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn burst_is_granted_immediately() {
        let limiter = RateLimiter::new(3.0, 3.0);
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire(None).await.unwrap();
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn ten_acquires_at_rate_three_complete_in_expected_windows() {
        let limiter = Arc::new(RateLimiter::new(3.0, 3.0));
        let start = Instant::now();
        let mut completions = Vec::new();
        for _ in 0..10 {
            limiter.acquire(None).await.unwrap();
            completions.push(start.elapsed());
        }

        let secs: Vec<f64> = completions.iter().map(|d| d.as_secs_f64()).collect();
        let tolerance = 0.05;
        for (i, expected) in [0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 2.0, 2.0, 2.0, 3.0]
            .iter()
            .enumerate()
        {
            assert!(
                (secs[i] - expected).abs() <= tolerance,
                "acquire {i} completed at {:.3}s, expected ~{expected}s",
                secs[i]
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn window_bound_holds() {
        // Property: in any window of T seconds, grants <= burst + rate * T.
        let limiter = Arc::new(RateLimiter::new(2.0, 4.0));
        let start = Instant::now();
        let mut granted = 0usize;
        while start.elapsed() < Duration::from_secs(5) {
            limiter.acquire(None).await.unwrap();
            granted += 1;
            if granted > 4 + 2 * 5 {
                break;
            }
        }
        assert!(granted <= 4 + 2 * 5, "granted {granted} tokens in 5s");
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_waiter_gets_cancellation_error() {
        let limiter = Arc::new(RateLimiter::new(1.0, 1.0));
        limiter.acquire(None).await.unwrap();

        let token = CancellationToken::new();
        let waiter = {
            let limiter = limiter.clone();
            let token = token.clone();
            tokio::spawn(async move { limiter.acquire(Some(&token)).await })
        };
        tokio::task::yield_now().await;
        token.cancel();
        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(MedlitError::Cancelled)));
    }

    #[tokio::test]
    async fn registry_returns_same_bucket_for_same_key() {
        let a = bucket("test-provider");
        let b = bucket("test-provider");
        assert!(Arc::ptr_eq(&a, &b));
        let c = bucket("other-provider");
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
