//! Circuit Breaker
//!
//! One breaker guards every remote call a client makes. It has three states:
//! Closed (calls pass), Open (calls fail fast without executing) and
//! Half-Open (a single trial call decides whether to close or re-open).
//! The Open → Half-Open transition happens lazily on the next call attempt.

use crate::config::CircuitBreakerConfig;
use crate::error::{CacheError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Instant;
use tracing::{debug, error, info};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    Closed = 0,
    /// Failure mode - all calls fail fast without executing
    Open = 1,
    /// Testing recovery - the next call is a trial
    HalfOpen = 2,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    trial_in_flight: bool,
}

/// Shared failure-tracking state machine
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        info!(
            threshold = config.threshold,
            reset_timeout_ms = config.reset_timeout_ms,
            "Circuit breaker initialized"
        );

        Self {
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
                trial_in_flight: false,
            }),
        }
    }

    /// Current state (the Open → Half-Open move only happens on a call)
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Consecutive failures recorded since the last success
    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    /// Force the breaker closed and clear its failure history
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.last_failure = None;
        inner.trial_in_flight = false;
        info!("Circuit breaker reset");
    }

    /// Execute an operation with circuit breaker protection
    ///
    /// When the circuit is open the operation is never invoked and
    /// [`CacheError::CircuitOpen`] is returned.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute_with(operation, Result::is_ok).await?
    }

    /// Execute an operation that reports its own outcome
    ///
    /// The operation runs under a single admission and `succeeded` decides
    /// how the breaker settles. Used by multi-shard calls, which count once
    /// no matter how many pipelines they fan out to.
    pub async fn execute_with<T, F, Fut, S>(&self, operation: F, succeeded: S) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
        S: FnOnce(&T) -> bool,
    {
        let mut permit = self.admit()?;
        let output = operation().await;
        permit.settle(succeeded(&output));
        Ok(output)
    }

    fn admit(&self) -> Result<Permit<'_>> {
        let mut inner = self.inner.lock();
        let trial = match inner.state {
            CircuitState::Closed => false,
            CircuitState::Open => {
                let cooled_down = inner
                    .last_failure
                    .is_none_or(|at| at.elapsed() > self.config.reset_timeout());
                if !cooled_down {
                    debug!("Circuit open, rejecting call");
                    return Err(CacheError::CircuitOpen);
                }
                inner.state = CircuitState::HalfOpen;
                inner.trial_in_flight = true;
                info!("Circuit breaker half-open (testing recovery)");
                true
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    debug!("Half-open trial in flight, rejecting call");
                    return Err(CacheError::CircuitOpen);
                }
                inner.trial_in_flight = true;
                true
            }
        };

        Ok(Permit {
            breaker: self,
            trial,
            settled: false,
        })
    }

    fn record_success(&self, trial: bool) {
        let mut inner = self.inner.lock();
        if trial {
            inner.state = CircuitState::Closed;
            inner.failure_count = 0;
            inner.trial_in_flight = false;
            info!("Circuit breaker closed (recovered)");
        } else if inner.state == CircuitState::Closed {
            inner.failure_count = 0;
        }
    }

    fn record_failure(&self, trial: bool) {
        let mut inner = self.inner.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure = Some(Instant::now());

        if trial {
            inner.state = CircuitState::Open;
            inner.trial_in_flight = false;
            error!(
                failure_count = inner.failure_count,
                "Circuit breaker trial failed, re-opened"
            );
        } else if inner.state == CircuitState::Closed
            && inner.failure_count >= self.config.threshold
        {
            inner.state = CircuitState::Open;
            error!(
                failure_count = inner.failure_count,
                threshold = self.config.threshold,
                reset_timeout_ms = self.config.reset_timeout_ms,
                "Circuit breaker opened (failing fast)"
            );
        }
    }
}

/// Admission ticket for one call
///
/// Dropping an unsettled trial permit (the caller's future was cancelled)
/// frees the half-open slot without deciding the outcome.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl Permit<'_> {
    fn settle(&mut self, success: bool) {
        self.settled = true;
        if success {
            self.breaker.record_success(self.trial);
        } else {
            self.breaker.record_failure(self.trial);
        }
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if self.trial && !self.settled {
            self.breaker.inner.lock().trial_in_flight = false;
        }
    }
}
