//! End-to-end tests for the pipeline coordinator, task pool and breaker.
//!
//! Run with: cargo test --test pipeline_integration

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use token_forge::aggregation::{TokenAggregator, AggregatorConfig, PROVENANCE_EXTENSION_KEY};
use token_forge::agents::{
    Agent, AgentError, AgentResult, FixtureExtractor, PassthroughPreprocessor, PathGenerator,
    SchemaValidator, Stage,
};
use token_forge::cli::FixtureFile;
use token_forge::pipeline::{PipelineConfig, PipelineCoordinator};
use token_forge::resilience::CircuitState;
use token_forge::scheduler::TaskStatus;
use token_forge::tokens::{DesignToken, Task, TokenKind};

/// Extractor that tracks peak concurrency across all instances sharing the counters.
struct GaugedExtractor {
    name: String,
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

#[async_trait]
impl Agent for GaugedExtractor {
    fn agent_type(&self) -> &str {
        &self.name
    }

    fn stage(&self) -> Stage {
        Stage::Extract
    }

    async fn process(&self, _task: &Task, _input: &[DesignToken]) -> AgentResult<Vec<DesignToken>> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(25)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(vec![DesignToken::new(
            TokenKind::Spacing,
            "gap",
            json!(format!("{}px", self.name.len() * 4)),
            0.6,
        )])
    }
}

/// Fails until `healthy_after` calls have been made.
struct RecoveringExtractor {
    calls: AtomicUsize,
    healthy_after: usize,
}

#[async_trait]
impl Agent for RecoveringExtractor {
    fn agent_type(&self) -> &str {
        "recovering"
    }

    fn stage(&self) -> Stage {
        Stage::Extract
    }

    async fn process(&self, _task: &Task, _input: &[DesignToken]) -> AgentResult<Vec<DesignToken>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.healthy_after {
            return Err(AgentError::Unavailable(format!("warming up (call {})", call)));
        }
        Ok(vec![DesignToken::color("recovered", "#00FF00", 0.7)])
    }
}

fn standard_pipeline(config: PipelineConfig) -> token_forge::pipeline::PipelineCoordinatorBuilder {
    PipelineCoordinator::builder(config)
        .preprocessor(Arc::new(PassthroughPreprocessor))
        .validator(Arc::new(SchemaValidator::default()))
        .generator(Arc::new(PathGenerator))
}

#[tokio::test]
async fn test_scenario_a_red_and_blue_aggregation() {
    let mut aggregator = TokenAggregator::new(AggregatorConfig::default()).expect("valid config");
    let tokens = aggregator
        .aggregate_json(json!([
            {"kind": "color", "name": "red", "value": "#FF0000", "confidence": 0.8, "metadata": {"source": "A"}},
            {"kind": "color", "name": "red", "value": "#FF0000", "confidence": 0.6, "metadata": {"source": "B"}},
            {"kind": "color", "name": "blue", "value": "#0000FF", "confidence": 0.9, "metadata": {"source": "C"}}
        ]))
        .expect("aggregation succeeds");

    assert_eq!(tokens.len(), 2);
    let red = &tokens[0].extensions[PROVENANCE_EXTENSION_KEY];
    assert_eq!(red["sources"], json!(["A", "B"]));
    assert_eq!(red["weighted_confidence"], json!(1.0));

    let blue = &tokens[1].extensions[PROVENANCE_EXTENSION_KEY];
    assert_eq!(blue["sources"], json!(["C"]));
    assert!((blue["weighted_confidence"].as_f64().unwrap() - 0.9).abs() < 1e-9);

    assert!(aggregator.aggregate_json(json!("not a list")).is_err());
}

#[tokio::test]
async fn test_scenario_b_graceful_degradation() {
    let coordinator = standard_pipeline(PipelineConfig::default())
        .extractor(Arc::new(FixtureExtractor::failing("ocr", "tesseract exited with 1")))
        .extractor(Arc::new(FixtureExtractor::new(
            "palette",
            vec![DesignToken::color("primary", "#3366FF", 0.9)],
        )))
        .build()
        .expect("valid coordinator");

    let task = Task::new("screens/home.png");
    let result = coordinator.execute(&task).await;

    assert!(result.success);
    let extract = result.stage(Stage::Extract).expect("extract stage");
    assert!(extract.success);
    assert_eq!(extract.failed_agents.len(), 1);
    assert_eq!(extract.failed_agents[0].agent_type, "ocr");
    assert!(extract.failed_agents[0].error.contains("tesseract exited with 1"));

    let trackers = coordinator.pool().task_trackers(task.id());
    let ocr = trackers.iter().find(|t| t.agent_type == "ocr").expect("ocr tracked");
    assert_eq!(ocr.status, TaskStatus::Failed);
    let palette = coordinator
        .pool()
        .get_task_status(task.id(), "palette")
        .expect("palette tracked");
    assert_eq!(palette.status, TaskStatus::Completed);
}

#[tokio::test]
async fn test_global_concurrency_ceiling_across_fan_out() {
    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let agents: Vec<Arc<dyn Agent>> = ["a", "bb", "ccc", "dddd", "eeeee", "ffffff"]
        .iter()
        .map(|name| {
            Arc::new(GaugedExtractor {
                name: name.to_string(),
                current: current.clone(),
                peak: peak.clone(),
            }) as Arc<dyn Agent>
        })
        .collect();

    let coordinator = PipelineCoordinator::builder(PipelineConfig::default().with_max_concurrency(2))
        .extractors(agents)
        .build()
        .expect("valid coordinator");

    let result = coordinator.execute(&Task::new("grid.png")).await;

    assert!(result.success);
    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(result.tokens.len(), 6);
    assert_eq!(coordinator.pool().get_stats().completed, 6);
}

#[tokio::test]
async fn test_breaker_recovers_through_probe() {
    let recovering = Arc::new(RecoveringExtractor {
        calls: AtomicUsize::new(0),
        healthy_after: 2,
    });
    let coordinator = PipelineCoordinator::builder(
        PipelineConfig::default()
            .with_breaker_failure_threshold(2)
            .with_breaker_recovery_timeout(Duration::from_millis(50)),
    )
    .extractor(recovering.clone())
    .extractor(Arc::new(FixtureExtractor::new(
        "palette",
        vec![DesignToken::color("primary", "#3366FF", 0.9)],
    )))
    .build()
    .expect("valid coordinator");

    for _ in 0..3 {
        coordinator.execute(&Task::new("a.png")).await;
    }
    assert_eq!(recovering.calls.load(Ordering::SeqCst), 2);
    assert_eq!(
        coordinator.breaker("recovering").map(|b| b.state()),
        Some(CircuitState::Open)
    );

    tokio::time::sleep(Duration::from_millis(80)).await;
    let result = coordinator.execute(&Task::new("a.png")).await;

    assert!(result.success);
    assert!(result.stage(Stage::Extract).expect("extract").failed_agents.is_empty());
    assert_eq!(
        coordinator.breaker("recovering").map(|b| b.state()),
        Some(CircuitState::Closed)
    );
    assert_eq!(result.tokens.len(), 2);
}

#[tokio::test]
async fn test_fixture_file_drives_pipeline() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    write!(
        file,
        "{}",
        json!({
            "extractors": {
                "palette": [
                    {"kind": "color", "name": "primary", "value": "#FF0000", "confidence": 0.8},
                    {"kind": "spacing", "name": "gap", "value": "1rem", "confidence": 0.6}
                ],
                "vision": [
                    {"kind": "color", "name": "brand", "value": "#FE0000", "confidence": 0.7},
                    {"kind": "spacing", "name": "gutter", "value": "16px", "confidence": 0.5}
                ]
            }
        })
    )
    .expect("write fixture");

    let fixture = FixtureFile::load(file.path()).expect("valid fixture");
    let coordinator = standard_pipeline(PipelineConfig::default())
        .extractors(fixture.extractors(&[]).expect("extractors"))
        .build()
        .expect("valid coordinator");

    let task = Task::new("home.png").with_kinds([TokenKind::Color]);
    let result = coordinator.execute(&task).await;

    assert!(result.success);
    assert_eq!(result.tokens.len(), 1);
    let color = &result.tokens[0];
    assert_eq!(color.kind, TokenKind::Color);
    assert_eq!(color.path, vec!["color".to_string(), "primary".to_string()]);
    assert_eq!(
        color.extensions[PROVENANCE_EXTENSION_KEY]["sources"],
        json!(["palette", "vision"])
    );

    let json = result.to_json().expect("serializable");
    assert!(json.contains("\"stage\": \"generate\""));
}
