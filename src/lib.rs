//! token_forge: orchestration core for design-token extraction.
//!
//! Coordinates pluggable agents through a fixed stage sequence
//! (preprocess, extract, aggregate, validate, generate) with bounded
//! concurrency, per-extractor circuit breakers and provenance-aware
//! deduplication of extracted tokens.

// Core modules
pub mod agents;
pub mod aggregation;
pub mod cli;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod resilience;
pub mod scheduler;
pub mod tokens;

// Re-export commonly used types
pub use agents::{Agent, AgentError, AgentResult, Stage};
pub use error::AggregationError;
pub use pipeline::{ConfigError, PipelineConfig, PipelineCoordinator, PipelineError, PipelineResult};
pub use resilience::{BreakerOpen, CircuitBreaker, CircuitBreakerError, CircuitState};
pub use scheduler::{PoolError, TaskPool};
pub use tokens::{DesignToken, Task, TokenKind};
