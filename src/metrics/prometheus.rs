//! Prometheus metrics registration and export.
//!
//! Metrics live in process-wide `OnceLock`s. Until [`init_metrics`] runs,
//! every recording call is a no-op, so library users that never scrape
//! pay nothing.

use prometheus::{
    CounterVec, Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all token_forge metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Agent invocations settled by the task pool, labeled by stage and outcome.
pub static POOL_TASKS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Agent invocation duration in seconds, labeled by stage.
pub static POOL_TASK_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Agent invocations currently holding pool permits.
pub static POOL_RUNNING: OnceLock<Gauge> = OnceLock::new();

/// Breaker state per dependency (0 = closed, 1 = open, 2 = half-open).
pub static BREAKER_STATE: OnceLock<GaugeVec> = OnceLock::new();

/// Calls rejected by an open breaker, labeled by breaker name.
pub static BREAKER_REJECTIONS: OnceLock<CounterVec> = OnceLock::new();

/// Pipeline runs, labeled by outcome.
pub static PIPELINE_RUNS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Tokens folded into an existing cluster during aggregation, labeled by kind.
pub static AGGREGATION_MERGES: OnceLock<CounterVec> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Calling this more than once is harmless: later calls build a fresh
/// registry but the statics keep the first one.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric construction or registration fails.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    let pool_tasks_total = CounterVec::new(
        Opts::new(
            "token_forge_pool_tasks_total",
            "Agent invocations settled by the task pool",
        ),
        &["stage", "status"],
    )?;

    let pool_task_duration = HistogramVec::new(
        HistogramOpts::new(
            "token_forge_pool_task_duration_seconds",
            "Agent invocation duration in seconds",
        )
        .buckets(vec![0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
        &["stage"],
    )?;

    let pool_running = Gauge::new(
        "token_forge_pool_running",
        "Agent invocations currently running",
    )?;

    let breaker_state = GaugeVec::new(
        Opts::new(
            "token_forge_breaker_state",
            "Circuit breaker state (0 closed, 1 open, 2 half-open)",
        ),
        &["breaker"],
    )?;

    let breaker_rejections = CounterVec::new(
        Opts::new(
            "token_forge_breaker_rejections_total",
            "Calls rejected by an open circuit breaker",
        ),
        &["breaker"],
    )?;

    let pipeline_runs_total = CounterVec::new(
        Opts::new("token_forge_pipeline_runs_total", "Pipeline runs by outcome"),
        &["status"],
    )?;

    let aggregation_merges = CounterVec::new(
        Opts::new(
            "token_forge_aggregation_merges_total",
            "Tokens merged into an existing cluster",
        ),
        &["kind"],
    )?;

    registry.register(Box::new(pool_tasks_total.clone()))?;
    registry.register(Box::new(pool_task_duration.clone()))?;
    registry.register(Box::new(pool_running.clone()))?;
    registry.register(Box::new(breaker_state.clone()))?;
    registry.register(Box::new(breaker_rejections.clone()))?;
    registry.register(Box::new(pipeline_runs_total.clone()))?;
    registry.register(Box::new(aggregation_merges.clone()))?;

    let _ = REGISTRY.set(registry);
    let _ = POOL_TASKS_TOTAL.set(pool_tasks_total);
    let _ = POOL_TASK_DURATION.set(pool_task_duration);
    let _ = POOL_RUNNING.set(pool_running);
    let _ = BREAKER_STATE.set(breaker_state);
    let _ = BREAKER_REJECTIONS.set(breaker_rejections);
    let _ = PIPELINE_RUNS_TOTAL.set(pipeline_runs_total);
    let _ = AGGREGATION_MERGES.set(aggregation_merges);

    tracing::info!("Prometheus metrics initialized successfully");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_is_idempotent() {
        let first = init_metrics();
        let second = init_metrics();
        assert!(first.is_ok() || REGISTRY.get().is_some());
        assert!(second.is_ok() || REGISTRY.get().is_some());
    }

    #[test]
    fn test_export_after_init() {
        let _ = init_metrics();
        if let Some(counter) = PIPELINE_RUNS_TOTAL.get() {
            counter.with_label_values(&["success"]).inc();
        }

        let text = export_metrics();
        assert!(!text.starts_with("# Error"));
        assert!(text.contains("token_forge_pipeline_runs_total"));
    }
}
