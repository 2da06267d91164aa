//! Per-provider circuit breakers. Consecutive failures trip the circuit;
//! tripped circuits fail fast with a retryable error until the recovery
//! timeout elapses, then a single probe call decides whether to close.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::error::MedlitError;

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 10;
pub const DEFAULT_RECOVERY: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    recovery: Duration,
    /// Never held across await points.
    inner: Mutex<Inner>,
}

struct Inner {
    state: CircuitState,
    failures: u32,
    last_failure: Option<Instant>,
    probe_in_flight: bool,
}

impl CircuitBreaker {
    pub fn new(name: &str, failure_threshold: u32, recovery: Duration) -> Self {
        Self {
            name: name.to_string(),
            failure_threshold,
            recovery,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failures: 0,
                last_failure: None,
                probe_in_flight: false,
            }),
        }
    }

    /// Gate a call. Closed circuits always pass. Open circuits fail fast
    /// until the recovery timeout elapses, then admit exactly one probe.
    pub fn try_acquire(&self) -> Result<(), MedlitError> {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let recovered = inner
                    .last_failure
                    .is_some_and(|at| at.elapsed() >= self.recovery);
                if recovered {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    info!(circuit = %self.name, "circuit half-open, probing");
                    Ok(())
                } else {
                    Err(MedlitError::CircuitOpen {
                        api: self.name.clone(),
                    })
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(MedlitError::CircuitOpen {
                        api: self.name.clone(),
                    })
                } else {
                    inner.probe_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.failures = 0;
        inner.probe_in_flight = false;
        if inner.state != CircuitState::Closed {
            info!(circuit = %self.name, "circuit closing after success");
            inner.state = CircuitState::Closed;
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.failures = inner.failures.saturating_add(1);
        inner.last_failure = Some(Instant::now());
        inner.probe_in_flight = false;
        let reopened = inner.state == CircuitState::HalfOpen;
        if reopened || inner.failures >= self.failure_threshold {
            if inner.state != CircuitState::Open {
                warn!(
                    circuit = %self.name,
                    failures = inner.failures,
                    threshold = self.failure_threshold,
                    "circuit open"
                );
            }
            inner.state = CircuitState::Open;
        }
    }

    pub fn state(&self) -> CircuitState {
        let inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            CircuitState::Open
                if inner
                    .last_failure
                    .is_some_and(|at| at.elapsed() >= self.recovery) =>
            {
                CircuitState::HalfOpen
            }
            state => state,
        }
    }
}

fn registry() -> &'static Mutex<HashMap<String, Arc<CircuitBreaker>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<String, Arc<CircuitBreaker>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Fetch the process-wide breaker for a provider key, creating it with
/// default thresholds on first use.
pub fn breaker(key: &str) -> Arc<CircuitBreaker> {
    let mut map = registry().lock().expect("breaker registry poisoned");
    map.entry(key.to_string())
        .or_insert_with(|| {
            Arc::new(CircuitBreaker::new(
                key,
                DEFAULT_FAILURE_THRESHOLD,
                DEFAULT_RECOVERY,
            ))
        })
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trips_after_threshold_and_fails_fast() {
        let cb = CircuitBreaker::new("demo", 3, Duration::from_millis(50));
        for _ in 0..3 {
            cb.try_acquire().unwrap();
            cb.record_failure();
        }
        assert!(matches!(
            cb.try_acquire(),
            Err(MedlitError::CircuitOpen { .. })
        ));
    }

    #[test]
    fn probe_allowed_after_recovery_and_success_closes() {
        let cb = CircuitBreaker::new("demo", 3, Duration::from_millis(20));
        for _ in 0..3 {
            cb.record_failure();
        }
        assert!(cb.try_acquire().is_err());

        std::thread::sleep(Duration::from_millis(30));
        cb.try_acquire().expect("probe should be admitted");
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.try_acquire().is_ok());
    }

    #[test]
    fn failed_probe_reopens() {
        let cb = CircuitBreaker::new("demo", 2, Duration::from_millis(20));
        cb.record_failure();
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(30));
        cb.try_acquire().expect("probe should be admitted");
        cb.record_failure();
        assert!(matches!(
            cb.try_acquire(),
            Err(MedlitError::CircuitOpen { .. })
        ));
    }

    #[test]
    fn only_one_probe_in_half_open() {
        let cb = CircuitBreaker::new("demo", 1, Duration::from_millis(10));
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(20));
        assert!(cb.try_acquire().is_ok());
        assert!(cb.try_acquire().is_err());
    }

    #[test]
    fn success_resets_failure_counter_in_closed() {
        let cb = CircuitBreaker::new("demo", 3, Duration::from_secs(60));
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();
        // Still below threshold because the success reset the counter.
        assert!(cb.try_acquire().is_ok());
    }

    #[test]
    fn registry_is_per_key() {
        let a = breaker("breaker-test-a");
        let b = breaker("breaker-test-a");
        let c = breaker("breaker-test-b");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
