//! Metrics module for Prometheus-based monitoring.
//!
//! Covers task-pool outcomes, circuit breaker state, pipeline runs and
//! aggregation merges.
//!
//! # Example
//!
//! ```ignore
//! use token_forge::metrics::{init_metrics, export_metrics};
//!
//! init_metrics().expect("Failed to initialize metrics");
//! // ... run pipelines ...
//! let metrics_text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::MetricsCollector;
pub use prometheus::{
    export_metrics, init_metrics, AGGREGATION_MERGES, BREAKER_REJECTIONS, BREAKER_STATE,
    PIPELINE_RUNS_TOTAL, POOL_RUNNING, POOL_TASKS_TOTAL, POOL_TASK_DURATION, REGISTRY,
};
