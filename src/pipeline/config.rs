//! Pipeline configuration.
//!
//! Covers pool limits, breaker tuning and aggregation thresholds. Values
//! come from `Default`, the `with_*` builders or `TOKENFORGE_*` environment
//! variables.

use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;

use crate::aggregation::{AggregatorConfig, DEFAULT_COLOR_THRESHOLD, DEFAULT_DIMENSION_THRESHOLD};
use crate::agents::Stage;
use crate::resilience::CircuitBreakerConfig;
use crate::scheduler::TaskPoolConfig;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration for the pipeline coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    // Pool settings
    /// Global cap on concurrently running agent invocations.
    pub max_concurrency: usize,
    /// Optional per-stage caps.
    pub stage_limits: HashMap<Stage, usize>,
    /// Timeout for a single agent invocation.
    pub task_timeout: Duration,

    // Breaker settings
    /// Consecutive failures before an extractor's breaker opens.
    pub breaker_failure_threshold: u32,
    /// How long an open breaker waits before admitting a probe.
    pub breaker_recovery_timeout: Duration,

    // Aggregation settings
    /// Max ΔE00 between merged colors.
    pub color_threshold: f64,
    /// Max px difference between merged lengths.
    pub dimension_threshold: f64,
    /// Optional cap on aggregated clusters.
    pub max_clusters: Option<usize>,
    /// Sort extractor output by a stable key before aggregating.
    pub sort_aggregation_inputs: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            stage_limits: HashMap::new(),
            task_timeout: Duration::from_secs(300),
            breaker_failure_threshold: 5,
            breaker_recovery_timeout: Duration::from_secs(60),
            color_threshold: DEFAULT_COLOR_THRESHOLD,
            dimension_threshold: DEFAULT_DIMENSION_THRESHOLD,
            max_clusters: None,
            sort_aggregation_inputs: false,
        }
    }
}

impl PipelineConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `TOKENFORGE_MAX_CONCURRENCY`: Global concurrency cap (default: 8)
    /// - `TOKENFORGE_STAGE_LIMITS`: Per-stage caps, e.g. `extract=2,validate=1`
    /// - `TOKENFORGE_TASK_TIMEOUT_SECS`: Agent timeout in seconds (default: 300)
    /// - `TOKENFORGE_BREAKER_FAILURE_THRESHOLD`: Failures before opening (default: 5)
    /// - `TOKENFORGE_BREAKER_RECOVERY_SECS`: Open duration in seconds (default: 60)
    /// - `TOKENFORGE_COLOR_THRESHOLD`: Color merge threshold in ΔE00 (default: 2.3)
    /// - `TOKENFORGE_DIMENSION_THRESHOLD`: Length merge threshold in px (default: 0.5)
    /// - `TOKENFORGE_MAX_CLUSTERS`: Cap on aggregated tokens (default: unlimited)
    /// - `TOKENFORGE_SORT_INPUTS`: Sort aggregation input (default: false)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value or the
    /// resulting configuration fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        // Pool settings
        if let Some(val) = lookup("TOKENFORGE_MAX_CONCURRENCY") {
            config.max_concurrency = parse_env_value(&val, "TOKENFORGE_MAX_CONCURRENCY")?;
        }

        if let Some(val) = lookup("TOKENFORGE_STAGE_LIMITS") {
            config.stage_limits = parse_stage_limits(&val, "TOKENFORGE_STAGE_LIMITS")?;
        }

        if let Some(val) = lookup("TOKENFORGE_TASK_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "TOKENFORGE_TASK_TIMEOUT_SECS")?;
            config.task_timeout = Duration::from_secs(secs);
        }

        // Breaker settings
        if let Some(val) = lookup("TOKENFORGE_BREAKER_FAILURE_THRESHOLD") {
            config.breaker_failure_threshold =
                parse_env_value(&val, "TOKENFORGE_BREAKER_FAILURE_THRESHOLD")?;
        }

        if let Some(val) = lookup("TOKENFORGE_BREAKER_RECOVERY_SECS") {
            let secs: u64 = parse_env_value(&val, "TOKENFORGE_BREAKER_RECOVERY_SECS")?;
            config.breaker_recovery_timeout = Duration::from_secs(secs);
        }

        // Aggregation settings
        if let Some(val) = lookup("TOKENFORGE_COLOR_THRESHOLD") {
            config.color_threshold = parse_env_value(&val, "TOKENFORGE_COLOR_THRESHOLD")?;
        }

        if let Some(val) = lookup("TOKENFORGE_DIMENSION_THRESHOLD") {
            config.dimension_threshold = parse_env_value(&val, "TOKENFORGE_DIMENSION_THRESHOLD")?;
        }

        if let Some(val) = lookup("TOKENFORGE_MAX_CLUSTERS") {
            config.max_clusters = Some(parse_env_value(&val, "TOKENFORGE_MAX_CLUSTERS")?);
        }

        if let Some(val) = lookup("TOKENFORGE_SORT_INPUTS") {
            config.sort_aggregation_inputs = parse_env_bool(&val, "TOKENFORGE_SORT_INPUTS")?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_concurrency must be greater than 0".to_string(),
            ));
        }

        if let Some((stage, _)) = self.stage_limits.iter().find(|(_, limit)| **limit == 0) {
            return Err(ConfigError::ValidationFailed(format!(
                "stage_limits[{}] must be greater than 0",
                stage
            )));
        }

        if self.task_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "task_timeout must be greater than 0".to_string(),
            ));
        }

        if self.breaker_failure_threshold == 0 {
            return Err(ConfigError::ValidationFailed(
                "breaker_failure_threshold must be greater than 0".to_string(),
            ));
        }

        if self.breaker_recovery_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "breaker_recovery_timeout must be greater than 0".to_string(),
            ));
        }

        if !self.color_threshold.is_finite() || self.color_threshold < 0.0 {
            return Err(ConfigError::ValidationFailed(
                "color_threshold must be a non-negative number".to_string(),
            ));
        }

        if !self.dimension_threshold.is_finite() || self.dimension_threshold < 0.0 {
            return Err(ConfigError::ValidationFailed(
                "dimension_threshold must be a non-negative number".to_string(),
            ));
        }

        if self.max_clusters == Some(0) {
            return Err(ConfigError::ValidationFailed(
                "max_clusters must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    // Builder methods

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    pub fn with_stage_limit(mut self, stage: Stage, limit: usize) -> Self {
        self.stage_limits.insert(stage, limit);
        self
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    pub fn with_breaker_failure_threshold(mut self, threshold: u32) -> Self {
        self.breaker_failure_threshold = threshold;
        self
    }

    pub fn with_breaker_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.breaker_recovery_timeout = timeout;
        self
    }

    pub fn with_color_threshold(mut self, threshold: f64) -> Self {
        self.color_threshold = threshold;
        self
    }

    pub fn with_dimension_threshold(mut self, threshold: f64) -> Self {
        self.dimension_threshold = threshold;
        self
    }

    pub fn with_max_clusters(mut self, max: usize) -> Self {
        self.max_clusters = Some(max);
        self
    }

    pub fn with_sorted_aggregation_inputs(mut self, enabled: bool) -> Self {
        self.sort_aggregation_inputs = enabled;
        self
    }

    // Derived component configs

    pub fn pool_config(&self) -> TaskPoolConfig {
        TaskPoolConfig {
            max_concurrency: self.max_concurrency,
            stage_limits: self.stage_limits.clone(),
            task_timeout: self.task_timeout,
        }
    }

    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig::new(self.breaker_failure_threshold, self.breaker_recovery_timeout)
    }

    pub fn aggregator_config(&self) -> AggregatorConfig {
        AggregatorConfig {
            color_threshold: self.color_threshold,
            dimension_threshold: self.dimension_threshold,
            max_clusters: self.max_clusters,
            sort_inputs: self.sort_aggregation_inputs,
        }
    }
}

/// Parse an environment variable value into the target type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse an environment variable as a boolean.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}

/// Parse `stage=limit` pairs separated by commas.
fn parse_stage_limits(value: &str, key: &str) -> Result<HashMap<Stage, usize>, ConfigError> {
    let mut limits = HashMap::new();
    for pair in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (stage, limit) = pair.split_once('=').ok_or_else(|| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected stage=limit, got '{}'", pair),
        })?;
        let stage: Stage = stage.trim().parse().map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{}", e),
        })?;
        limits.insert(stage, parse_env_value(limit, key)?);
    }
    Ok(limits)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_concurrency, 8);
        assert!(config.stage_limits.is_empty());
        assert_eq!(config.task_timeout, Duration::from_secs(300));
        assert_eq!(config.breaker_failure_threshold, 5);
        assert_eq!(config.breaker_recovery_timeout, Duration::from_secs(60));
        assert!((config.color_threshold - 2.3).abs() < f64::EPSILON);
        assert!((config.dimension_threshold - 0.5).abs() < f64::EPSILON);
        assert_eq!(config.max_clusters, None);
        assert!(!config.sort_aggregation_inputs);
    }

    #[test]
    fn test_config_builder() {
        let config = PipelineConfig::new()
            .with_max_concurrency(2)
            .with_stage_limit(Stage::Extract, 1)
            .with_task_timeout(Duration::from_secs(10))
            .with_breaker_failure_threshold(3)
            .with_breaker_recovery_timeout(Duration::from_secs(5))
            .with_color_threshold(1.0)
            .with_dimension_threshold(0.0)
            .with_max_clusters(20)
            .with_sorted_aggregation_inputs(true);

        assert_eq!(config.max_concurrency, 2);
        assert_eq!(config.stage_limits.get(&Stage::Extract), Some(&1));
        assert_eq!(config.breaker_failure_threshold, 3);
        assert_eq!(config.max_clusters, Some(20));
        assert!(config.validate().is_ok());

        let pool = config.pool_config();
        assert_eq!(pool.max_concurrency, 2);
        assert_eq!(pool.task_timeout, Duration::from_secs(10));
        assert_eq!(config.breaker_config().failure_threshold, 3);
        assert!(config.aggregator_config().sort_inputs);
    }

    #[test]
    fn test_validation_valid_config() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validation_invalid_concurrency() {
        let result = PipelineConfig::default().with_max_concurrency(0).validate();
        assert!(result.unwrap_err().to_string().contains("max_concurrency"));
    }

    #[test]
    fn test_validation_invalid_stage_limit() {
        let result = PipelineConfig::default()
            .with_stage_limit(Stage::Validate, 0)
            .validate();
        assert!(result.unwrap_err().to_string().contains("stage_limits[validate]"));
    }

    #[test]
    fn test_validation_invalid_timeout() {
        let result = PipelineConfig::default()
            .with_task_timeout(Duration::ZERO)
            .validate();
        assert!(result.unwrap_err().to_string().contains("task_timeout"));
    }

    #[test]
    fn test_validation_invalid_breaker() {
        let result = PipelineConfig::default()
            .with_breaker_failure_threshold(0)
            .validate();
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("breaker_failure_threshold"));
    }

    #[test]
    fn test_validation_invalid_thresholds() {
        let result = PipelineConfig::default().with_color_threshold(-1.0).validate();
        assert!(result.unwrap_err().to_string().contains("color_threshold"));

        let result = PipelineConfig::default()
            .with_dimension_threshold(f64::INFINITY)
            .validate();
        assert!(result.unwrap_err().to_string().contains("dimension_threshold"));
    }

    #[test]
    fn test_validation_zero_clusters() {
        let result = PipelineConfig::default().with_max_clusters(0).validate();
        assert!(result.unwrap_err().to_string().contains("max_clusters"));
    }

    #[test]
    fn test_from_lookup() {
        let config = PipelineConfig::from_lookup(lookup_from(&[
            ("TOKENFORGE_MAX_CONCURRENCY", "3"),
            ("TOKENFORGE_STAGE_LIMITS", "extract=2, generate=1"),
            ("TOKENFORGE_TASK_TIMEOUT_SECS", "12"),
            ("TOKENFORGE_BREAKER_FAILURE_THRESHOLD", "4"),
            ("TOKENFORGE_BREAKER_RECOVERY_SECS", "30"),
            ("TOKENFORGE_COLOR_THRESHOLD", "3.5"),
            ("TOKENFORGE_MAX_CLUSTERS", "50"),
            ("TOKENFORGE_SORT_INPUTS", "yes"),
        ]))
        .expect("valid environment");

        assert_eq!(config.max_concurrency, 3);
        assert_eq!(config.stage_limits.get(&Stage::Extract), Some(&2));
        assert_eq!(config.stage_limits.get(&Stage::Generate), Some(&1));
        assert_eq!(config.task_timeout, Duration::from_secs(12));
        assert_eq!(config.breaker_failure_threshold, 4);
        assert_eq!(config.breaker_recovery_timeout, Duration::from_secs(30));
        assert!((config.color_threshold - 3.5).abs() < f64::EPSILON);
        assert_eq!(config.max_clusters, Some(50));
        assert!(config.sort_aggregation_inputs);
    }

    #[test]
    fn test_from_lookup_empty_uses_defaults() {
        let config = PipelineConfig::from_lookup(|_| None).expect("defaults are valid");
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn test_from_lookup_invalid_values() {
        let err = PipelineConfig::from_lookup(lookup_from(&[("TOKENFORGE_MAX_CONCURRENCY", "many")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "TOKENFORGE_MAX_CONCURRENCY"));

        let err = PipelineConfig::from_lookup(lookup_from(&[("TOKENFORGE_STAGE_LIMITS", "extract")]))
            .unwrap_err();
        assert!(err.to_string().contains("expected stage=limit"));

        let err = PipelineConfig::from_lookup(lookup_from(&[("TOKENFORGE_STAGE_LIMITS", "render=2")]))
            .unwrap_err();
        assert!(err.to_string().contains("TOKENFORGE_STAGE_LIMITS"));

        let err = PipelineConfig::from_lookup(lookup_from(&[("TOKENFORGE_SORT_INPUTS", "maybe")]))
            .unwrap_err();
        assert!(err.to_string().contains("expected boolean"));

        let err = PipelineConfig::from_lookup(lookup_from(&[("TOKENFORGE_MAX_CONCURRENCY", "0")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::ValidationFailed(_)));
    }
}
