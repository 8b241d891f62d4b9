//! Per-dependency circuit breaker.
//!
//! State machine:
//!
//! ```text
//!   CLOSED --(consecutive failures >= threshold)--> OPEN
//!   OPEN   --(recovery_timeout elapsed, next call)--> HALF_OPEN (single probe)
//!   HALF_OPEN --(probe ok)--> CLOSED      HALF_OPEN --(probe failed)--> OPEN
//! ```
//!
//! While OPEN, or while a probe is in flight, calls are rejected immediately
//! without touching the wrapped operation. Rejected callers are never queued.

use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::metrics::MetricsCollector;

/// Default number of consecutive failures before opening.
const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Default time an open breaker waits before admitting a probe.
const DEFAULT_RECOVERY_TIMEOUT: Duration = Duration::from_secs(60);

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls flow through; failures are counted.
    Closed,
    /// Calls are rejected until the recovery timeout elapses.
    Open,
    /// A single probe call is in flight.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Configuration for a circuit breaker.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the breaker. Values below 1 are treated as 1.
    pub failure_threshold: u32,
    /// How long the breaker stays open before admitting a probe.
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            recovery_timeout: DEFAULT_RECOVERY_TIMEOUT,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            recovery_timeout,
        }
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }
}

/// Fast-fail rejection from a breaker that is not admitting calls.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("Circuit breaker '{name}' is open (retry after {retry_after:?})")]
pub struct BreakerOpen {
    /// Name of the protected dependency.
    pub name: String,
    /// Time left until a probe will be admitted; zero while a probe is in flight.
    pub retry_after: Duration,
}

/// Error returned by [`CircuitBreaker::call`].
#[derive(Debug, Error)]
pub enum CircuitBreakerError<E> {
    /// The call was rejected without running the operation.
    #[error(transparent)]
    Open(BreakerOpen),

    /// The operation ran and failed.
    #[error(transparent)]
    Inner(E),
}

impl<E> CircuitBreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, CircuitBreakerError::Open(_))
    }

    /// Returns the operation's own error, if it ran.
    pub fn into_inner(self) -> Option<E> {
        match self {
            CircuitBreakerError::Inner(e) => Some(e),
            CircuitBreakerError::Open(_) => None,
        }
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    /// When the breaker last opened, if it is not closed.
    pub opened_at: Option<DateTime<Utc>>,
}

struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    opened_at_utc: Option<DateTime<Utc>>,
}

impl BreakerInner {
    fn open(&mut self) {
        self.state = CircuitState::Open;
        self.opened_at = Some(Instant::now());
        self.opened_at_utc = Some(Utc::now());
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.opened_at = None;
        self.opened_at_utc = None;
    }
}

/// Circuit breaker scoped to one logical dependency.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    metrics: MetricsCollector,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

impl CircuitBreaker {
    /// Creates a closed breaker for the dependency `name`.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let config = CircuitBreakerConfig {
            failure_threshold: config.failure_threshold.max(1),
            ..config
        };
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                opened_at_utc: None,
            }),
            metrics: MetricsCollector::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current state. An open breaker whose recovery window has elapsed still
    /// reports `Open` until a caller actually claims the probe.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            opened_at: inner.opened_at_utc,
        }
    }

    /// Forces the breaker back to closed with a zero failure count.
    pub fn reset(&self) {
        self.lock().close();
        self.metrics.set_breaker_state(&self.name, CircuitState::Closed);
        info!(breaker = %self.name, "Circuit breaker manually reset");
    }

    /// Claims admission for one call.
    ///
    /// The returned guard must be settled with [`BreakerGuard::success`] or
    /// [`BreakerGuard::failure`]; dropping it unsettled counts as a failure.
    pub fn enter(&self) -> Result<BreakerGuard<'_>, BreakerOpen> {
        let mut inner = self.lock();
        let state = inner.state;
        match state {
            CircuitState::Closed => Ok(BreakerGuard::new(self, false)),
            CircuitState::HalfOpen => {
                drop(inner);
                self.reject(Duration::ZERO)
            }
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.config.recovery_timeout {
                    inner.state = CircuitState::HalfOpen;
                    drop(inner);
                    self.metrics.set_breaker_state(&self.name, CircuitState::HalfOpen);
                    info!(breaker = %self.name, "Recovery window elapsed, admitting probe");
                    Ok(BreakerGuard::new(self, true))
                } else {
                    let retry_after = self.config.recovery_timeout - elapsed;
                    drop(inner);
                    self.reject(retry_after)
                }
            }
        }
    }

    fn reject<T>(&self, retry_after: Duration) -> Result<T, BreakerOpen> {
        self.metrics.record_breaker_rejection(&self.name);
        debug!(breaker = %self.name, retry_after_ms = retry_after.as_millis() as u64, "Call rejected");
        Err(BreakerOpen {
            name: self.name.clone(),
            retry_after,
        })
    }

    /// Runs `operation` if the breaker admits it, recording the outcome.
    ///
    /// `operation` is not called at all when the breaker rejects.
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let guard = self.enter().map_err(CircuitBreakerError::Open)?;
        match operation().await {
            Ok(value) => {
                guard.success();
                Ok(value)
            }
            Err(e) => {
                guard.failure();
                Err(CircuitBreakerError::Inner(e))
            }
        }
    }

    fn record_success(&self, probe: bool) {
        let mut inner = self.lock();
        if probe {
            inner.close();
            drop(inner);
            self.metrics.set_breaker_state(&self.name, CircuitState::Closed);
            info!(breaker = %self.name, "Probe succeeded, circuit closed");
        } else if inner.state == CircuitState::Closed {
            inner.consecutive_failures = 0;
        }
    }

    fn record_failure(&self, probe: bool) {
        let mut inner = self.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);

        if probe {
            inner.open();
            drop(inner);
            self.metrics.set_breaker_state(&self.name, CircuitState::Open);
            warn!(breaker = %self.name, "Probe failed, circuit reopened");
            return;
        }

        if inner.state == CircuitState::Closed
            && inner.consecutive_failures >= self.config.failure_threshold
        {
            let failures = inner.consecutive_failures;
            inner.open();
            drop(inner);
            self.metrics.set_breaker_state(&self.name, CircuitState::Open);
            warn!(
                breaker = %self.name,
                failures = failures,
                recovery_timeout_ms = self.config.recovery_timeout.as_millis() as u64,
                "Failure threshold reached, circuit opened"
            );
        }
    }
}

/// Admission token for a single call through a [`CircuitBreaker`].
#[must_use = "an unsettled guard counts as a failure when dropped"]
pub struct BreakerGuard<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    settled: bool,
}

impl<'a> BreakerGuard<'a> {
    fn new(breaker: &'a CircuitBreaker, probe: bool) -> Self {
        Self {
            breaker,
            probe,
            settled: false,
        }
    }

    /// True if this call is the recovery probe.
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.record_success(self.probe);
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.record_failure(self.probe);
    }
}

impl Drop for BreakerGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.record_failure(self.probe);
        }
    }
}
