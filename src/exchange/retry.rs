// =============================================================================
// Retry + circuit breaker — exponential backoff with jitter, three states
// =============================================================================
//
// Grounded on the backoff-calculator idiom in the hardened ingest session
// module (attempt counter, base * multiplier^attempt, capped, jittered),
// rewritten here for a pull-based REST client rather than a WS session
// state machine: the caller drives retries around a single async call
// instead of a background reconnect loop.
// =============================================================================

use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tracing::{debug, warn};

use crate::error::ExchangeError;

/// `base * 2^(k-1) + jitter`, jitter uniform in `[0, 0.25s]`.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exp = base.as_secs_f64() * 2f64.powi(attempt.saturating_sub(1) as i32);
    let jitter = rand::thread_rng().gen_range(0.0..0.25);
    Duration::from_secs_f64(exp + jitter)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Three-state circuit breaker: consecutive failures trip it open; after a
/// cooldown a single probe is admitted (half-open); success closes it again.
pub struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
    failure_threshold: u32,
    open_duration: Duration,
}

struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<std::time::Instant>,
    probe_in_flight: bool,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, open_duration: Duration) -> Self {
        Self {
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
            failure_threshold,
            open_duration,
        }
    }

    /// Called before every call. Returns `Err(BreakerOpen)` if the call
    /// should be rejected outright.
    pub fn admit(&self) -> Result<(), ExchangeError> {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed >= self.open_duration {
                    inner.state = BreakerState::HalfOpen;
                    inner.probe_in_flight = true;
                    debug!("circuit breaker half-open — admitting probe");
                    Ok(())
                } else {
                    Err(ExchangeError::BreakerOpen)
                }
            }
            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(ExchangeError::BreakerOpen)
                } else {
                    inner.probe_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = 0;
        inner.probe_in_flight = false;
        if inner.state != BreakerState::Closed {
            debug!("circuit breaker closed after successful probe");
        }
        inner.state = BreakerState::Closed;
        inner.opened_at = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.probe_in_flight = false;
        match inner.state {
            BreakerState::HalfOpen => {
                warn!("circuit breaker probe failed — reopening");
                inner.state = BreakerState::Open;
                inner.opened_at = Some(std::time::Instant::now());
            }
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.failure_threshold {
                    warn!(
                        failures = inner.consecutive_failures,
                        "circuit breaker opening after consecutive failures"
                    );
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(std::time::Instant::now());
                }
            }
            BreakerState::Open => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially_with_jitter_bound() {
        let base = Duration::from_millis(500);
        let d1 = backoff_delay(base, 1);
        let d2 = backoff_delay(base, 2);
        let d3 = backoff_delay(base, 3);
        assert!(d1.as_secs_f64() >= 0.5 && d1.as_secs_f64() < 0.75 + 0.01);
        assert!(d2.as_secs_f64() >= 1.0 && d2.as_secs_f64() < 1.25 + 0.01);
        assert!(d3.as_secs_f64() >= 2.0 && d3.as_secs_f64() < 2.25 + 0.01);
    }

    #[test]
    fn breaker_opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        for _ in 0..3 {
            assert!(breaker.admit().is_ok());
            breaker.record_failure();
        }
        assert!(matches!(breaker.admit(), Err(ExchangeError::BreakerOpen)));
    }

    #[test]
    fn breaker_half_opens_after_cooldown_and_closes_on_success() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(1));
        assert!(breaker.admit().is_ok());
        breaker.record_failure();
        assert!(matches!(breaker.admit(), Err(ExchangeError::BreakerOpen)));

        std::thread::sleep(Duration::from_millis(5));
        assert!(breaker.admit().is_ok(), "should admit a probe after cooldown");
        breaker.record_success();
        assert!(breaker.admit().is_ok(), "should be fully closed again");
    }

    #[test]
    fn breaker_never_opens_below_threshold() {
        let breaker = CircuitBreaker::new(5, Duration::from_secs(60));
        for _ in 0..4 {
            breaker.admit().unwrap();
            breaker.record_failure();
        }
        assert!(breaker.admit().is_ok());
    }
}
