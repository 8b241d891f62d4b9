//! Fault isolation for flaky dependencies.

pub mod circuit_breaker;

pub use circuit_breaker::{
    BreakerGuard, BreakerOpen, BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig,
    CircuitBreakerError, CircuitState,
};
