//! Per-remediation-path circuit breaker: closed -> open on N
//! consecutive failures -> half-open after a timeout -> closed after
//! M successes in half-open, or straight back to open on any
//! half-open failure.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<DateTime<Utc>>,
}

pub struct CircuitBreaker {
    failure_threshold: u32,
    timeout_seconds: i64,
    success_threshold: u32,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, timeout_seconds: u64, success_threshold: u32) -> Self {
        Self {
            failure_threshold,
            timeout_seconds: timeout_seconds as i64,
            success_threshold,
            inner: Mutex::new(Inner { state: CircuitState::Closed, failure_count: 0, success_count: 0, last_failure: None }),
        }
    }

    /// True when the breaker is currently rejecting requests. Calling
    /// this past the timeout transitions Open -> HalfOpen in place.
    pub fn is_open(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::Open {
            if let Some(last_failure) = inner.last_failure {
                if (Utc::now() - last_failure).num_seconds() > self.timeout_seconds {
                    inner.state = CircuitState::HalfOpen;
                    inner.success_count = 0;
                    return false;
                }
            }
            return true;
        }
        false
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                }
            }
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.last_failure = Some(Utc::now());
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.success_count = 0;
            }
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.failure_threshold {
                    inner.state = CircuitState::Open;
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.last_failure = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new(3, 60, 2);
        for _ in 0..3 {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.is_open());
    }

    #[test]
    fn half_open_failure_reopens_immediately() {
        let breaker = CircuitBreaker::new(1, 0, 2);
        breaker.record_failure();
        assert!(!breaker.is_open()); // timeout is 0, transitions to half-open
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn half_open_closes_after_success_threshold() {
        let breaker = CircuitBreaker::new(1, 0, 2);
        breaker.record_failure();
        assert!(!breaker.is_open());
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn success_resets_failure_count_while_closed() {
        let breaker = CircuitBreaker::new(3, 60, 2);
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
