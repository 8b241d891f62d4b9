//! Recording helpers used by the pool, breaker, aggregator and coordinator.

use crate::agents::Stage;
use crate::resilience::CircuitState;

use super::prometheus::{
    AGGREGATION_MERGES, BREAKER_REJECTIONS, BREAKER_STATE, PIPELINE_RUNS_TOTAL, POOL_RUNNING,
    POOL_TASKS_TOTAL, POOL_TASK_DURATION,
};

/// Thin handle over the global metrics.
///
/// Cheap to copy; every method silently does nothing until
/// [`init_metrics`](super::init_metrics) has been called.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Record one settled pool submission.
    ///
    /// `status` is one of "completed", "failed" or "timeout".
    pub fn record_pool_outcome(&self, stage: Stage, status: &str, duration_secs: f64) {
        if let Some(total) = POOL_TASKS_TOTAL.get() {
            total.with_label_values(&[stage.as_str(), status]).inc();
        }
        if let Some(duration) = POOL_TASK_DURATION.get() {
            duration
                .with_label_values(&[stage.as_str()])
                .observe(duration_secs);
        }

        tracing::trace!(
            stage = %stage,
            status = status,
            duration_secs = duration_secs,
            "Recorded pool outcome metric"
        );
    }

    pub fn set_running(&self, running: usize) {
        if let Some(gauge) = POOL_RUNNING.get() {
            gauge.set(running as f64);
        }
    }

    pub fn set_breaker_state(&self, breaker: &str, state: CircuitState) {
        if let Some(gauge) = BREAKER_STATE.get() {
            let value = match state {
                CircuitState::Closed => 0.0,
                CircuitState::Open => 1.0,
                CircuitState::HalfOpen => 2.0,
            };
            gauge.with_label_values(&[breaker]).set(value);
        }
    }

    pub fn record_breaker_rejection(&self, breaker: &str) {
        if let Some(counter) = BREAKER_REJECTIONS.get() {
            counter.with_label_values(&[breaker]).inc();
        }
    }

    pub fn record_pipeline_run(&self, success: bool) {
        if let Some(counter) = PIPELINE_RUNS_TOTAL.get() {
            let status = if success { "success" } else { "failure" };
            counter.with_label_values(&[status]).inc();
        }
    }

    pub fn record_merges(&self, kind: &str, merged: u64) {
        if merged == 0 {
            return;
        }
        if let Some(counter) = AGGREGATION_MERGES.get() {
            counter.with_label_values(&[kind]).inc_by(merged as f64);
        }
    }
}
