//! Multi-stage pipeline coordinator.
//!
//! Runs PREPROCESS → EXTRACT → AGGREGATE → VALIDATE → GENERATE for one task.
//! Every agent call goes through the shared [`TaskPool`]; extractor calls
//! additionally go through a [`CircuitBreaker`] owned by that extractor, so
//! an extractor whose breaker is open never takes a pool slot.
//!
//! Failure policy: an individual extractor failure is recorded and absorbed
//! as long as at least one extractor succeeds. Any other stage failure, or
//! every extractor failing, ends the run with the partial stage trail.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::aggregation::TokenAggregator;
use crate::agents::{Agent, Stage};
use crate::metrics::MetricsCollector;
use crate::resilience::{CircuitBreaker, CircuitBreakerError, CircuitState};
use crate::scheduler::{PoolError, TaskPool};
use crate::tokens::{DesignToken, Task};

use super::config::{ConfigError, PipelineConfig};
use super::result::{ExtractorFailure, PipelineResult, StageResult};

/// Errors raised while assembling a coordinator.
///
/// Running a pipeline never fails with this type; run failures are
/// reported inside [`PipelineResult`].
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Task pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("At least one extractor must be registered")]
    NoExtractors,

    #[error("Agent '{agent}' belongs to stage '{actual}' but was registered for '{expected}'")]
    StageMismatch {
        agent: String,
        expected: Stage,
        actual: Stage,
    },

    #[error("Extractor '{0}' is registered more than once")]
    DuplicateAgent(String),
}

/// Health of one registered agent.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AgentHealth {
    pub agent_type: String,
    pub stage: Stage,
    pub healthy: bool,
    /// Breaker state for extractors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breaker_state: Option<CircuitState>,
}

struct Extractor {
    agent: Arc<dyn Agent>,
    breaker: CircuitBreaker,
}

/// Builder for [`PipelineCoordinator`].
pub struct PipelineCoordinatorBuilder {
    config: PipelineConfig,
    preprocessor: Option<Arc<dyn Agent>>,
    extractors: Vec<Arc<dyn Agent>>,
    validator: Option<Arc<dyn Agent>>,
    generator: Option<Arc<dyn Agent>>,
}

impl PipelineCoordinatorBuilder {
    pub fn preprocessor(mut self, agent: Arc<dyn Agent>) -> Self {
        self.preprocessor = Some(agent);
        self
    }

    /// Registers an extractor. Registration order fixes the order in which
    /// extractor output reaches the aggregator.
    pub fn extractor(mut self, agent: Arc<dyn Agent>) -> Self {
        self.extractors.push(agent);
        self
    }

    pub fn extractors(mut self, agents: impl IntoIterator<Item = Arc<dyn Agent>>) -> Self {
        self.extractors.extend(agents);
        self
    }

    pub fn validator(mut self, agent: Arc<dyn Agent>) -> Self {
        self.validator = Some(agent);
        self
    }

    pub fn generator(mut self, agent: Arc<dyn Agent>) -> Self {
        self.generator = Some(agent);
        self
    }

    /// Validates the configuration and agent wiring.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError` for an invalid config, no extractors, an
    /// agent registered under the wrong stage or a duplicate extractor.
    pub fn build(self) -> Result<PipelineCoordinator, PipelineError> {
        self.config.validate()?;

        if self.extractors.is_empty() {
            return Err(PipelineError::NoExtractors);
        }

        let optional = [
            (&self.preprocessor, Stage::Preprocess),
            (&self.validator, Stage::Validate),
            (&self.generator, Stage::Generate),
        ];
        for (agent, expected) in optional {
            if let Some(agent) = agent {
                check_stage(agent.as_ref(), expected)?;
            }
        }

        let mut seen = HashSet::new();
        let breaker_config = self.config.breaker_config();
        let mut extractors = Vec::with_capacity(self.extractors.len());
        for agent in self.extractors {
            check_stage(agent.as_ref(), Stage::Extract)?;
            if !seen.insert(agent.agent_type().to_string()) {
                return Err(PipelineError::DuplicateAgent(agent.agent_type().to_string()));
            }
            let breaker = CircuitBreaker::new(agent.agent_type(), breaker_config.clone());
            extractors.push(Extractor { agent, breaker });
        }

        let pool = TaskPool::new(self.config.pool_config())?;

        info!(
            extractors = extractors.len(),
            preprocessor = self.preprocessor.is_some(),
            validator = self.validator.is_some(),
            generator = self.generator.is_some(),
            "Pipeline coordinator ready"
        );

        Ok(PipelineCoordinator {
            config: self.config,
            pool,
            preprocessor: self.preprocessor,
            extractors,
            validator: self.validator,
            generator: self.generator,
            metrics: MetricsCollector::new(),
        })
    }
}

fn check_stage(agent: &dyn Agent, expected: Stage) -> Result<(), PipelineError> {
    if agent.stage() != expected {
        return Err(PipelineError::StageMismatch {
            agent: agent.agent_type().to_string(),
            expected,
            actual: agent.stage(),
        });
    }
    Ok(())
}

/// Sequences the pipeline stages for a task.
pub struct PipelineCoordinator {
    config: PipelineConfig,
    pool: TaskPool,
    preprocessor: Option<Arc<dyn Agent>>,
    extractors: Vec<Extractor>,
    validator: Option<Arc<dyn Agent>>,
    generator: Option<Arc<dyn Agent>>,
    metrics: MetricsCollector,
}

impl PipelineCoordinator {
    pub fn builder(config: PipelineConfig) -> PipelineCoordinatorBuilder {
        PipelineCoordinatorBuilder {
            config,
            preprocessor: None,
            extractors: Vec::new(),
            validator: None,
            generator: None,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn pool(&self) -> &TaskPool {
        &self.pool
    }

    /// Breaker guarding the extractor named `agent_type`.
    pub fn breaker(&self, agent_type: &str) -> Option<&CircuitBreaker> {
        self.extractors
            .iter()
            .find(|e| e.agent.agent_type() == agent_type)
            .map(|e| &e.breaker)
    }

    /// Runs `task` through every stage.
    ///
    /// Never fails; stage errors are captured in the returned result.
    pub async fn execute(&self, task: &Task) -> PipelineResult {
        let started = Instant::now();
        let started_at = Utc::now();
        info!(task_id = %task.id(), image = %task.image_ref(), "Pipeline started");

        let mut stages: Vec<StageResult> = Vec::with_capacity(Stage::ALL.len());
        let mut current: Vec<DesignToken> = Vec::new();

        for stage in Stage::ALL {
            let result = match stage {
                Stage::Preprocess => {
                    self.run_single(stage, self.preprocessor.as_deref(), task, &current)
                        .await
                }
                Stage::Extract => self.run_extract(task, &current).await,
                Stage::Aggregate => self.run_aggregate(task, std::mem::take(&mut current)),
                Stage::Validate => {
                    self.run_single(stage, self.validator.as_deref(), task, &current)
                        .await
                }
                Stage::Generate => {
                    self.run_single(stage, self.generator.as_deref(), task, &current)
                        .await
                }
            };

            let success = result.success;
            if success {
                current = result.tokens.clone();
            }
            stages.push(result);

            if !success {
                error!(task_id = %task.id(), stage = %stage, "Stage failed, aborting pipeline");
                break;
            }
        }

        let failure = stages
            .iter()
            .find(|s| !s.success)
            .map(|s| format!("{} stage failed: {}", s.stage, s.error.as_deref().unwrap_or("unknown error")));
        let success = failure.is_none();
        self.metrics.record_pipeline_run(success);

        let duration_ms = started.elapsed().as_millis() as u64;
        info!(
            task_id = %task.id(),
            success = success,
            tokens = current.len(),
            duration_ms = duration_ms,
            "Pipeline finished"
        );

        PipelineResult {
            task_id: task.id().to_string(),
            success,
            stages,
            tokens: if success { current } else { Vec::new() },
            error: failure,
            started_at,
            finished_at: Utc::now(),
            duration_ms,
        }
    }

    async fn run_single(
        &self,
        stage: Stage,
        agent: Option<&dyn Agent>,
        task: &Task,
        input: &[DesignToken],
    ) -> StageResult {
        let Some(agent) = agent else {
            debug!(task_id = %task.id(), stage = %stage, "No agent registered, passing through");
            return StageResult::passthrough(stage, input.to_vec());
        };

        let started = Instant::now();
        let outcome = self.pool.submit(agent, task, input).await;
        let elapsed = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(tokens) => StageResult::succeeded(stage, tokens, elapsed),
            Err(e) => {
                warn!(
                    task_id = %task.id(),
                    stage = %stage,
                    agent = %agent.agent_type(),
                    error = %e,
                    "Stage agent failed"
                );
                StageResult::failed(stage, e.to_string(), elapsed)
            }
        }
    }

    async fn run_extract(&self, task: &Task, input: &[DesignToken]) -> StageResult {
        let started = Instant::now();
        let selected: Vec<&Extractor> = self
            .extractors
            .iter()
            .filter(|e| e.agent.handles(task))
            .collect();

        if selected.is_empty() {
            return StageResult::failed(
                Stage::Extract,
                "no registered extractor supports the requested token kinds",
                started.elapsed().as_millis() as u64,
            );
        }

        let calls = selected.iter().map(|extractor| async move {
            let outcome = extractor
                .breaker
                .call(|| self.pool.submit(extractor.agent.as_ref(), task, input))
                .await;
            (*extractor, outcome)
        });
        // join_all yields in registration order, whatever the completion order.
        let outcomes = join_all(calls).await;

        let mut tokens = Vec::new();
        let mut failures = Vec::new();
        let mut succeeded = 0usize;

        for (extractor, outcome) in outcomes {
            let agent_type = extractor.agent.agent_type();
            match outcome {
                Ok(produced) => {
                    succeeded += 1;
                    tokens.extend(produced.into_iter().map(|token| match token.source() {
                        Some(_) => token,
                        None => token.with_source(agent_type),
                    }));
                }
                Err(CircuitBreakerError::Open(open)) => {
                    warn!(task_id = %task.id(), agent = %agent_type, "Extractor skipped, circuit open");
                    failures.push(ExtractorFailure {
                        agent_type: agent_type.to_string(),
                        error: open.to_string(),
                        retryable: true,
                        timed_out: false,
                        circuit_open: true,
                    });
                }
                Err(CircuitBreakerError::Inner(e)) => {
                    failures.push(ExtractorFailure {
                        agent_type: agent_type.to_string(),
                        error: e.to_string(),
                        retryable: e.is_retryable(),
                        timed_out: e.is_timeout(),
                        circuit_open: false,
                    });
                }
            }
        }

        let elapsed = started.elapsed().as_millis() as u64;
        info!(
            task_id = %task.id(),
            succeeded = succeeded,
            failed = failures.len(),
            tokens = tokens.len(),
            "Extraction fan-out settled"
        );

        if succeeded == 0 {
            let detail = failures
                .iter()
                .map(|f| format!("{}: {}", f.agent_type, f.error))
                .collect::<Vec<_>>()
                .join("; ");
            return StageResult::failed(
                Stage::Extract,
                format!("all {} extractor(s) failed: {}", failures.len(), detail),
                elapsed,
            )
            .with_failed_agents(failures);
        }

        StageResult::succeeded(Stage::Extract, tokens, elapsed).with_failed_agents(failures)
    }

    fn run_aggregate(&self, task: &Task, tokens: Vec<DesignToken>) -> StageResult {
        let started = Instant::now();
        let outcome = TokenAggregator::new(self.config.aggregator_config())
            .and_then(|mut aggregator| aggregator.aggregate_for_task(task, tokens));
        let elapsed = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(tokens) => StageResult::succeeded(Stage::Aggregate, tokens, elapsed),
            Err(e) => {
                warn!(task_id = %task.id(), error = %e, "Aggregation failed");
                StageResult::failed(Stage::Aggregate, e.to_string(), elapsed)
            }
        }
    }

    /// Health of every registered agent, in stage order.
    pub async fn health_report(&self) -> Vec<AgentHealth> {
        let mut report = Vec::new();

        if let Some(agent) = &self.preprocessor {
            report.push(agent_health(agent.as_ref(), None).await);
        }
        for extractor in &self.extractors {
            report.push(agent_health(extractor.agent.as_ref(), Some(extractor.breaker.state())).await);
        }
        for agent in [&self.validator, &self.generator].into_iter().flatten() {
            report.push(agent_health(agent.as_ref(), None).await);
        }

        report
    }
}

async fn agent_health(agent: &dyn Agent, breaker_state: Option<CircuitState>) -> AgentHealth {
    AgentHealth {
        agent_type: agent.agent_type().to_string(),
        stage: agent.stage(),
        healthy: agent.health_check().await && breaker_state != Some(CircuitState::Open),
        breaker_state,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{
        AgentError, AgentResult, FixtureExtractor, PassthroughPreprocessor, PathGenerator,
        SchemaValidator,
    };
    use crate::aggregation::{INJECT_FAILURE_CONTEXT_KEY, PROVENANCE_EXTENSION_KEY};
    use crate::tokens::TokenKind;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Extractor that always fails and counts invocations.
    struct CountingFailure {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Agent for CountingFailure {
        fn agent_type(&self) -> &str {
            "flaky_vision"
        }

        fn stage(&self) -> Stage {
            Stage::Extract
        }

        async fn process(&self, _task: &Task, _input: &[DesignToken]) -> AgentResult<Vec<DesignToken>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(AgentError::Unavailable("vision backend offline".to_string()))
        }
    }

    fn red_blue() -> Arc<dyn Agent> {
        Arc::new(FixtureExtractor::new(
            "palette",
            vec![
                DesignToken::color("primary", "#FF0000", 0.8),
                DesignToken::color("accent", "#0000FF", 0.9),
            ],
        ))
    }

    fn full_pipeline(config: PipelineConfig) -> PipelineCoordinatorBuilder {
        PipelineCoordinator::builder(config)
            .preprocessor(Arc::new(PassthroughPreprocessor))
            .validator(Arc::new(SchemaValidator::default()))
            .generator(Arc::new(PathGenerator))
    }

    #[tokio::test]
    async fn test_graceful_degradation_with_one_failing_extractor() {
        let coordinator = full_pipeline(PipelineConfig::default())
            .extractor(Arc::new(FixtureExtractor::failing("broken", "model crashed")))
            .extractor(red_blue())
            .build()
            .expect("valid coordinator");

        let result = coordinator.execute(&Task::new("screen.png")).await;

        assert!(result.success);
        assert_eq!(result.stages.len(), 5);
        let extract = result.stage(Stage::Extract).expect("extract stage recorded");
        assert!(extract.success);
        assert_eq!(extract.failed_agents.len(), 1);
        assert_eq!(extract.failed_agents[0].agent_type, "broken");
        assert!(extract.failed_agents[0].error.contains("model crashed"));
        assert_eq!(result.tokens.len(), 2);
    }

    #[tokio::test]
    async fn test_all_extractors_failing_aborts() {
        let coordinator = full_pipeline(PipelineConfig::default())
            .extractor(Arc::new(FixtureExtractor::failing("a", "down")))
            .extractor(Arc::new(FixtureExtractor::failing("b", "down too")))
            .build()
            .expect("valid coordinator");

        let result = coordinator.execute(&Task::new("screen.png")).await;

        assert!(!result.success);
        assert_eq!(result.stages.len(), 2);
        let extract = result.failed_stage().expect("a stage failed");
        assert_eq!(extract.stage, Stage::Extract);
        assert_eq!(extract.failed_agents.len(), 2);
        assert!(result.error.unwrap_or_default().contains("all 2 extractor(s) failed"));
        assert!(result.tokens.is_empty());
    }

    #[tokio::test]
    async fn test_preprocess_failure_is_fatal() {
        let coordinator = full_pipeline(PipelineConfig::default())
            .extractor(red_blue())
            .build()
            .expect("valid coordinator");

        let result = coordinator.execute(&Task::new("")).await;

        assert!(!result.success);
        assert_eq!(result.stages.len(), 1);
        assert_eq!(result.stages[0].stage, Stage::Preprocess);
        assert!(result.stages[0]
            .error
            .as_deref()
            .unwrap_or_default()
            .contains("no image reference"));
    }

    #[tokio::test]
    async fn test_validation_failure_stops_before_generate() {
        let coordinator = full_pipeline(PipelineConfig::default())
            .extractor(Arc::new(FixtureExtractor::new(
                "bad",
                vec![DesignToken::color("broken", "not-a-color", 0.9)],
            )))
            .build()
            .expect("valid coordinator");

        let result = coordinator.execute(&Task::new("screen.png")).await;

        assert!(!result.success);
        assert_eq!(result.stages.len(), 4);
        assert_eq!(result.failed_stage().map(|s| s.stage), Some(Stage::Validate));
        assert!(result.stage(Stage::Generate).is_none());
    }

    #[tokio::test]
    async fn test_injected_aggregation_failure() {
        let coordinator = full_pipeline(PipelineConfig::default())
            .extractor(red_blue())
            .build()
            .expect("valid coordinator");
        let task = Task::new("screen.png").with_context(INJECT_FAILURE_CONTEXT_KEY, json!("chaos"));

        let result = coordinator.execute(&task).await;

        assert!(!result.success);
        let failed = result.failed_stage().expect("aggregate failed");
        assert_eq!(failed.stage, Stage::Aggregate);
        assert!(failed.error.as_deref().unwrap_or_default().contains("chaos"));
    }

    #[tokio::test]
    async fn test_missing_optional_agents_pass_through() {
        let coordinator = PipelineCoordinator::builder(PipelineConfig::default())
            .extractor(red_blue())
            .build()
            .expect("valid coordinator");

        let result = coordinator.execute(&Task::new("screen.png")).await;

        assert!(result.success);
        assert!(result.stage(Stage::Preprocess).map(|s| s.passthrough).unwrap_or(false));
        assert!(result.stage(Stage::Generate).map(|s| s.passthrough).unwrap_or(false));
        assert_eq!(result.tokens.len(), 2);
    }

    #[tokio::test]
    async fn test_cross_extractor_dedup_with_provenance() {
        let coordinator = full_pipeline(PipelineConfig::default())
            .extractor(Arc::new(FixtureExtractor::new(
                "A",
                vec![DesignToken::color("red", "#FF0000", 0.8)],
            )))
            .extractor(Arc::new(FixtureExtractor::new(
                "B",
                vec![DesignToken::color("red", "#FF0000", 0.6)],
            )))
            .extractor(Arc::new(FixtureExtractor::new(
                "C",
                vec![DesignToken::color("blue", "#0000FF", 0.9)],
            )))
            .build()
            .expect("valid coordinator");

        let result = coordinator.execute(&Task::new("screen.png")).await;

        assert!(result.success);
        assert_eq!(result.tokens.len(), 2);
        let red = result
            .tokens
            .iter()
            .find(|t| t.canonical_value() == "#FF0000")
            .expect("red token");
        let provenance = &red.extensions[PROVENANCE_EXTENSION_KEY];
        assert_eq!(provenance["sources"], json!(["A", "B"]));
        assert_eq!(provenance["weighted_confidence"], json!(1.0));
    }

    #[tokio::test]
    async fn test_breaker_stops_invoking_failing_extractor() {
        let flaky = Arc::new(CountingFailure {
            calls: AtomicUsize::new(0),
        });
        let coordinator = PipelineCoordinator::builder(
            PipelineConfig::default()
                .with_breaker_failure_threshold(2)
                .with_breaker_recovery_timeout(Duration::from_secs(60)),
        )
        .extractor(flaky.clone())
        .extractor(red_blue())
        .build()
        .expect("valid coordinator");

        for _ in 0..4 {
            let result = coordinator.execute(&Task::new("screen.png")).await;
            assert!(result.success);
        }

        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
        let breaker = coordinator.breaker("flaky_vision").expect("breaker registered");
        assert_eq!(breaker.state(), CircuitState::Open);

        let result = coordinator.execute(&Task::new("screen.png")).await;
        let failure = &result.stage(Stage::Extract).expect("extract").failed_agents[0];
        assert!(failure.circuit_open);
        assert!(failure.retryable);

        // Rejected calls never reach the pool.
        assert_eq!(coordinator.pool().get_stats().failed, 2);
    }

    #[tokio::test]
    async fn test_extractor_timeout_is_reported() {
        let coordinator = PipelineCoordinator::builder(
            PipelineConfig::default().with_task_timeout(Duration::from_millis(30)),
        )
        .extractor(Arc::new(
            FixtureExtractor::new("slow", vec![DesignToken::color("a", "#000000", 0.5)])
                .with_delay(Duration::from_millis(500)),
        ))
        .extractor(red_blue())
        .build()
        .expect("valid coordinator");

        let result = coordinator.execute(&Task::new("screen.png")).await;

        assert!(result.success);
        let failure = &result.stage(Stage::Extract).expect("extract").failed_agents[0];
        assert_eq!(failure.agent_type, "slow");
        assert!(failure.timed_out);
    }

    #[tokio::test]
    async fn test_extractors_selected_by_requested_kinds() {
        let spacing = Arc::new(FixtureExtractor::new(
            "spacing",
            vec![DesignToken::new(TokenKind::Spacing, "gap", json!("8px"), 0.7)],
        ));
        let coordinator = PipelineCoordinator::builder(PipelineConfig::default())
            .extractor(red_blue())
            .extractor(spacing)
            .build()
            .expect("valid coordinator");

        let task = Task::new("screen.png").with_kinds([TokenKind::Spacing]);
        let result = coordinator.execute(&task).await;

        assert!(result.success);
        assert_eq!(result.tokens.len(), 1);
        assert_eq!(result.tokens[0].kind, TokenKind::Spacing);
        assert_eq!(coordinator.pool().task_trackers(task.id()).len(), 1);
    }

    #[test]
    fn test_builder_rejects_bad_wiring() {
        let err = PipelineCoordinator::builder(PipelineConfig::default())
            .build()
            .err()
            .expect("no extractors");
        assert!(matches!(err, PipelineError::NoExtractors));

        let err = PipelineCoordinator::builder(PipelineConfig::default())
            .extractor(Arc::new(PathGenerator))
            .build()
            .err()
            .expect("generator registered as extractor");
        assert!(err.to_string().contains("registered for 'extract'"));

        let err = PipelineCoordinator::builder(PipelineConfig::default())
            .extractor(red_blue())
            .extractor(red_blue())
            .build()
            .err()
            .expect("duplicate extractor");
        assert!(matches!(err, PipelineError::DuplicateAgent(ref name) if name == "palette"));

        let err = PipelineCoordinator::builder(PipelineConfig::default().with_max_concurrency(0))
            .extractor(red_blue())
            .build()
            .err()
            .expect("invalid config");
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[tokio::test]
    async fn test_health_report() {
        let coordinator = full_pipeline(PipelineConfig::default())
            .extractor(Arc::new(FixtureExtractor::failing("broken", "offline")))
            .extractor(red_blue())
            .build()
            .expect("valid coordinator");

        let report = coordinator.health_report().await;

        assert_eq!(report.len(), 5);
        assert_eq!(report[0].stage, Stage::Preprocess);
        let broken = report.iter().find(|h| h.agent_type == "broken").expect("listed");
        assert!(!broken.healthy);
        assert_eq!(broken.breaker_state, Some(CircuitState::Closed));
        assert_eq!(report[4].agent_type, PathGenerator::AGENT_TYPE);
    }

    #[tokio::test]
    async fn test_open_breaker_reported_unhealthy() {
        let coordinator = PipelineCoordinator::builder(
            PipelineConfig::default().with_breaker_failure_threshold(1),
        )
        .extractor(Arc::new(FixtureExtractor::failing("flaky", "timeout upstream")))
        .extractor(red_blue())
        .build()
        .expect("valid coordinator");

        coordinator.execute(&Task::new("a.png")).await;
        let report = coordinator.health_report().await;

        let flaky = report.iter().find(|h| h.agent_type == "flaky").expect("listed");
        assert_eq!(flaky.breaker_state, Some(CircuitState::Open));
        assert!(!flaky.healthy);
    }
}
