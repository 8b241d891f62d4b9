//! Crate-level error types.
//!
//! Subsystem errors that several modules share live here; errors owned by
//! a single subsystem (`AgentError`, `PoolError`, `CircuitBreakerError`,
//! `ConfigError`, `PipelineError`) are defined next to it and re-exported
//! from the crate root.

use thiserror::Error;

/// Errors raised by the token aggregator.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AggregationError {
    /// Input was not a list of tokens, or an element was malformed.
    #[error("Invalid aggregation input: {0}")]
    InvalidInput(String),

    #[error("Invalid cluster count {0}: must be at least 1")]
    InvalidClusterCount(usize),

    #[error("Invalid {kind} similarity threshold {value}: must be finite and non-negative")]
    InvalidThreshold { kind: String, value: f64 },

    /// Failure requested through the task context, for exercising abort paths.
    #[error("Injected aggregation failure: {0}")]
    Injected(String),
}
