//! Per-stage and per-run results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agents::Stage;
use crate::tokens::DesignToken;

/// One extractor that failed inside the EXTRACT fan-out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractorFailure {
    pub agent_type: String,
    pub error: String,
    pub retryable: bool,
    /// The pool timed the call out.
    #[serde(default)]
    pub timed_out: bool,
    /// The extractor's breaker rejected the call without running it.
    #[serde(default)]
    pub circuit_open: bool,
}

/// Outcome of a single stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageResult {
    pub stage: Stage,
    pub success: bool,
    /// Tokens handed to the next stage.
    pub tokens: Vec<DesignToken>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Extractors that failed while the stage as a whole may still succeed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_agents: Vec<ExtractorFailure>,
    /// No agent was registered, input was forwarded unchanged.
    #[serde(default)]
    pub passthrough: bool,
}

impl StageResult {
    pub(crate) fn succeeded(stage: Stage, tokens: Vec<DesignToken>, duration_ms: u64) -> Self {
        Self {
            stage,
            success: true,
            tokens,
            duration_ms,
            error: None,
            failed_agents: Vec::new(),
            passthrough: false,
        }
    }

    pub(crate) fn failed(stage: Stage, error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            stage,
            success: false,
            tokens: Vec::new(),
            duration_ms,
            error: Some(error.into()),
            failed_agents: Vec::new(),
            passthrough: false,
        }
    }

    pub(crate) fn passthrough(stage: Stage, tokens: Vec<DesignToken>) -> Self {
        Self {
            passthrough: true,
            ..Self::succeeded(stage, tokens, 0)
        }
    }

    pub(crate) fn with_failed_agents(mut self, failures: Vec<ExtractorFailure>) -> Self {
        self.failed_agents = failures;
        self
    }
}

/// Outcome of a whole pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineResult {
    pub task_id: String,
    pub success: bool,
    /// Stage results in execution order; stages after a fatal failure are absent.
    pub stages: Vec<StageResult>,
    /// Output of the last stage when the run succeeded, empty otherwise.
    pub tokens: Vec<DesignToken>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl PipelineResult {
    pub fn stage(&self, stage: Stage) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    /// The stage that aborted the run, if any.
    pub fn failed_stage(&self) -> Option<&StageResult> {
        self.stages.iter().find(|s| !s.success)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passthrough_stage() {
        let stage = StageResult::passthrough(Stage::Validate, vec![DesignToken::color("a", "#fff", 1.0)]);
        assert!(stage.success);
        assert!(stage.passthrough);
        assert_eq!(stage.tokens.len(), 1);
    }

    #[test]
    fn test_failed_stage_serialization() {
        let stage = StageResult::failed(Stage::Extract, "all extractors failed", 12).with_failed_agents(vec![
            ExtractorFailure {
                agent_type: "vision".to_string(),
                error: "model offline".to_string(),
                retryable: true,
                timed_out: false,
                circuit_open: false,
            },
        ]);
        let value = serde_json::to_value(&stage).expect("serialize");
        assert_eq!(value["stage"], "extract");
        assert_eq!(value["success"], false);
        assert_eq!(value["failed_agents"][0]["agent_type"], "vision");

        let back: StageResult = serde_json::from_value(value).expect("deserialize");
        assert_eq!(back, stage);
    }
}
