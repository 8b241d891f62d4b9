//! CLI command definitions for token-forge.
//!
//! The binary hosts the pipeline with fixture-backed extractors, which makes
//! it usable for smoke tests and for replaying captured extractor output.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::aggregation::INJECT_FAILURE_CONTEXT_KEY;
use crate::agents::{Agent, FixtureExtractor, PassthroughPreprocessor, PathGenerator, SchemaValidator};
use crate::metrics::{export_metrics, init_metrics};
use crate::pipeline::{PipelineConfig, PipelineCoordinator};
use crate::tokens::{DesignToken, Task, TokenKind};

/// Design-token pipeline host.
#[derive(Parser)]
#[command(name = "token-forge")]
#[command(about = "Run the design-token extraction pipeline")]
#[command(version)]
#[command(
    long_about = "token-forge runs the preprocess, extract, aggregate, validate and generate stages over a task.\n\nExtractor output is replayed from a fixture file.\n\nExample usage:\n  token-forge run --image screens/home.png --fixtures extractors.json --kinds color,spacing"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run one task through the pipeline and print the result as JSON.
    Run(RunArgs),

    /// Print the health of every agent built from a fixture file.
    Check(CheckArgs),
}

/// Arguments for `run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Image reference for the task.
    #[arg(short, long)]
    pub image: String,

    /// Fixture file with extractor output.
    #[arg(short, long, env = "TOKENFORGE_FIXTURES")]
    pub fixtures: PathBuf,

    /// Comma-separated token kinds to request (default: all).
    #[arg(short, long, value_delimiter = ',')]
    pub kinds: Vec<String>,

    /// Make the named extractor fail. Repeatable.
    #[arg(long = "fail-extractor")]
    pub fail_extractor: Vec<String>,

    /// Drop tokens below this confidence during validation.
    #[arg(long, default_value_t = 0.0)]
    pub min_confidence: f64,

    /// Explicit task id (default: random UUID).
    #[arg(long)]
    pub task_id: Option<String>,

    /// Force the aggregate stage to fail with this reason.
    #[arg(long)]
    pub inject_aggregation_failure: Option<String>,

    /// Write the result here instead of stdout.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Print Prometheus metrics to stderr after the run.
    #[arg(long)]
    pub metrics: bool,
}

/// Arguments for `check`.
#[derive(Parser, Debug)]
pub struct CheckArgs {
    /// Fixture file with extractor output.
    #[arg(short, long, env = "TOKENFORGE_FIXTURES")]
    pub fixtures: PathBuf,

    /// Treat the named extractor as failing. Repeatable.
    #[arg(long = "fail-extractor")]
    pub fail_extractor: Vec<String>,
}

/// Extractor output keyed by extractor name.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FixtureFile {
    pub extractors: BTreeMap<String, Vec<DesignToken>>,
}

impl FixtureFile {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read fixture file {}", path.display()))?;
        let fixture: FixtureFile = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid fixture file {}", path.display()))?;
        if fixture.extractors.is_empty() {
            anyhow::bail!("Fixture file {} defines no extractors", path.display());
        }
        Ok(fixture)
    }

    /// Builds one extractor per entry, failing the names in `failing`.
    pub fn extractors(&self, failing: &[String]) -> anyhow::Result<Vec<Arc<dyn Agent>>> {
        if let Some(unknown) = failing.iter().find(|name| !self.extractors.contains_key(*name)) {
            anyhow::bail!("Unknown extractor '{}' passed to --fail-extractor", unknown);
        }

        Ok(self
            .extractors
            .iter()
            .map(|(name, tokens)| {
                let extractor = FixtureExtractor::new(name, tokens.clone());
                let agent: Arc<dyn Agent> = if failing.contains(name) {
                    Arc::new(extractor.with_failure("failure forced from the command line"))
                } else {
                    Arc::new(extractor)
                };
                agent
            })
            .collect())
    }
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Parse CLI arguments and run the selected command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with already parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_pipeline_command(args).await,
        Commands::Check(args) => run_check_command(args).await,
    }
}

fn build_coordinator(
    fixture: &FixtureFile,
    failing: &[String],
    min_confidence: f64,
) -> anyhow::Result<PipelineCoordinator> {
    let config = PipelineConfig::from_env().context("Invalid TOKENFORGE_* configuration")?;
    let coordinator = PipelineCoordinator::builder(config)
        .preprocessor(Arc::new(PassthroughPreprocessor))
        .extractors(fixture.extractors(failing)?)
        .validator(Arc::new(SchemaValidator::new(min_confidence)))
        .generator(Arc::new(PathGenerator))
        .build()?;
    Ok(coordinator)
}

fn parse_kinds(raw: &[String]) -> anyhow::Result<Vec<TokenKind>> {
    raw.iter()
        .filter(|k| !k.trim().is_empty())
        .map(|k| k.parse::<TokenKind>().map_err(anyhow::Error::msg))
        .collect()
}

async fn run_pipeline_command(args: RunArgs) -> anyhow::Result<()> {
    if args.metrics {
        init_metrics().context("Failed to initialize metrics")?;
    }

    let fixture = FixtureFile::load(&args.fixtures)?;
    let coordinator = build_coordinator(&fixture, &args.fail_extractor, args.min_confidence)?;

    let mut task = Task::new(&args.image).with_kinds(parse_kinds(&args.kinds)?);
    if let Some(id) = &args.task_id {
        task = task.with_id(id);
    }
    if let Some(reason) = &args.inject_aggregation_failure {
        task = task.with_context(INJECT_FAILURE_CONTEXT_KEY, serde_json::json!(reason));
    }

    info!(task_id = %task.id(), extractors = fixture.extractors.len(), "Running pipeline");
    let result = coordinator.execute(&task).await;
    let json = result.to_json()?;

    match &args.output {
        Some(path) => {
            fs::write(path, &json)
                .with_context(|| format!("Failed to write result to {}", path.display()))?;
            info!(path = %path.display(), "Result written");
        }
        None => println!("{}", json),
    }

    if args.metrics {
        eprint!("{}", export_metrics());
    }

    if !result.success {
        warn!(task_id = %task.id(), "Pipeline run failed");
        anyhow::bail!(
            "Pipeline failed: {}",
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

async fn run_check_command(args: CheckArgs) -> anyhow::Result<()> {
    let fixture = FixtureFile::load(&args.fixtures)?;
    let coordinator = build_coordinator(&fixture, &args.fail_extractor, 0.0)?;

    let report = coordinator.health_report().await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    let unhealthy: Vec<&str> = report
        .iter()
        .filter(|h| !h.healthy)
        .map(|h| h.agent_type.as_str())
        .collect();
    if !unhealthy.is_empty() {
        anyhow::bail!("Unhealthy agents: {}", unhealthy.join(", "));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_fixture(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(contents.as_bytes()).expect("write fixture");
        file
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "token-forge",
            "run",
            "--image",
            "home.png",
            "--fixtures",
            "f.json",
            "--kinds",
            "color,spacing",
            "--fail-extractor",
            "vision",
            "--fail-extractor",
            "ocr",
        ])
        .expect("valid arguments");

        assert_eq!(cli.log_level, "info");
        let Commands::Run(args) = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(args.image, "home.png");
        assert_eq!(args.kinds, vec!["color", "spacing"]);
        assert_eq!(args.fail_extractor, vec!["vision", "ocr"]);
        assert_eq!(
            parse_kinds(&args.kinds).expect("known kinds"),
            vec![TokenKind::Color, TokenKind::Spacing]
        );
    }

    #[test]
    fn test_parse_kinds_rejects_unknown() {
        let err = parse_kinds(&["gradient".to_string()]).unwrap_err();
        assert!(err.to_string().contains("unknown token kind"));
    }

    #[test]
    fn test_fixture_load_and_build() {
        let file = write_fixture(
            r##"{"extractors": {
                "palette": [{"kind": "color", "name": "red", "value": "#FF0000", "confidence": 0.8}],
                "vision": []
            }}"##,
        );
        let fixture = FixtureFile::load(file.path()).expect("valid fixture");
        assert_eq!(fixture.extractors.len(), 2);

        let agents = fixture.extractors(&["vision".to_string()]).expect("known names");
        assert_eq!(agents.len(), 2);
        assert_eq!(agents[0].agent_type(), "palette");

        let err = match fixture.extractors(&["nope".to_string()]) {
            Ok(_) => panic!("unknown extractor accepted"),
            Err(e) => e,
        };
        assert!(err.to_string().contains("'nope'"));
    }

    #[test]
    fn test_fixture_errors() {
        let file = write_fixture(r#"{"extractors": {}}"#);
        assert!(FixtureFile::load(file.path())
            .unwrap_err()
            .to_string()
            .contains("no extractors"));

        let file = write_fixture("not json");
        assert!(FixtureFile::load(file.path())
            .unwrap_err()
            .to_string()
            .contains("Invalid fixture file"));

        assert!(FixtureFile::load(Path::new("/definitely/missing.json")).is_err());
    }
}
