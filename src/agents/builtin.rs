//! Built-in agents.
//!
//! These cover the stages the core can run without external model
//! backends: a preprocessing guard, a fixture-backed extractor (used by the
//! host binary and tests in place of AI/CV extractors), a schema validator
//! and a path-assigning generator.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::tokens::{parse_px, DesignToken, Rgb, Task, TokenKind};

use super::error::{AgentError, AgentResult};
use super::traits::Agent;
use super::types::Stage;

/// Rejects tasks without an image reference and forwards its input unchanged.
#[derive(Debug, Clone, Default)]
pub struct PassthroughPreprocessor;

impl PassthroughPreprocessor {
    pub const AGENT_TYPE: &'static str = "passthrough_preprocessor";
}

#[async_trait]
impl Agent for PassthroughPreprocessor {
    fn agent_type(&self) -> &str {
        Self::AGENT_TYPE
    }

    fn stage(&self) -> Stage {
        Stage::Preprocess
    }

    async fn process(&self, task: &Task, input: &[DesignToken]) -> AgentResult<Vec<DesignToken>> {
        if task.image_ref().trim().is_empty() {
            return Err(AgentError::Preprocessing(format!(
                "task '{}' has no image reference",
                task.id()
            )));
        }
        Ok(input.to_vec())
    }
}

/// Extractor that replays a fixed token list.
#[derive(Debug, Clone)]
pub struct FixtureExtractor {
    name: String,
    kinds: Vec<TokenKind>,
    tokens: Vec<DesignToken>,
    failure: Option<String>,
    delay: Option<Duration>,
}

impl FixtureExtractor {
    /// Creates an extractor named `name` that returns `tokens`.
    pub fn new(name: impl Into<String>, tokens: Vec<DesignToken>) -> Self {
        let mut kinds: Vec<TokenKind> = tokens.iter().map(|t| t.kind).collect();
        kinds.sort();
        kinds.dedup();
        Self {
            name: name.into(),
            kinds,
            tokens,
            failure: None,
            delay: None,
        }
    }

    /// Makes every call fail with `reason`.
    pub fn failing(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(name, Vec::new()).with_failure(reason)
    }

    pub fn with_failure(mut self, reason: impl Into<String>) -> Self {
        self.failure = Some(reason.into());
        self
    }

    /// Sleeps before answering, to emulate a slow backend.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl Agent for FixtureExtractor {
    fn agent_type(&self) -> &str {
        &self.name
    }

    fn stage(&self) -> Stage {
        Stage::Extract
    }

    fn supported_kinds(&self) -> &[TokenKind] {
        &self.kinds
    }

    async fn process(&self, task: &Task, _input: &[DesignToken]) -> AgentResult<Vec<DesignToken>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = &self.failure {
            return Err(AgentError::extraction(&self.name, reason));
        }

        Ok(self
            .tokens
            .iter()
            .filter(|token| task.requests(token.kind))
            .cloned()
            .map(|token| match token.source() {
                Some(_) => token,
                None => token.with_source(&self.name),
            })
            .collect())
    }

    async fn health_check(&self) -> bool {
        self.failure.is_none()
    }
}

/// Checks token shape and drops low-confidence tokens.
#[derive(Debug, Clone)]
pub struct SchemaValidator {
    min_confidence: f64,
}

impl Default for SchemaValidator {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl SchemaValidator {
    pub const AGENT_TYPE: &'static str = "schema_validator";

    pub fn new(min_confidence: f64) -> Self {
        Self {
            min_confidence: min_confidence.clamp(0.0, 1.0),
        }
    }

    fn check(token: &DesignToken) -> Result<(), String> {
        if token.name.trim().is_empty() {
            return Err(format!("{} token with empty name", token.kind));
        }
        match token.kind {
            TokenKind::Color => {
                let parsed = token.value.as_str().and_then(Rgb::parse);
                if parsed.is_none() {
                    return Err(format!("'{}' has unparseable color {}", token.name, token.value));
                }
            }
            kind if kind.is_length() => {
                if parse_px(&token.value).is_none() {
                    return Err(format!("'{}' has unparseable length {}", token.name, token.value));
                }
            }
            TokenKind::Opacity => {
                let in_range = token.value.as_f64().is_some_and(|v| (0.0..=1.0).contains(&v));
                if !in_range {
                    return Err(format!("'{}' has opacity outside [0, 1]", token.name));
                }
            }
            _ => {}
        }
        Ok(())
    }
}

#[async_trait]
impl Agent for SchemaValidator {
    fn agent_type(&self) -> &str {
        Self::AGENT_TYPE
    }

    fn stage(&self) -> Stage {
        Stage::Validate
    }

    async fn process(&self, _task: &Task, input: &[DesignToken]) -> AgentResult<Vec<DesignToken>> {
        let problems: Vec<String> = input.iter().filter_map(|t| Self::check(t).err()).collect();
        if !problems.is_empty() {
            return Err(AgentError::Validation(format!(
                "{} invalid token(s): {}",
                problems.len(),
                problems.join("; ")
            )));
        }

        let kept: Vec<DesignToken> = input
            .iter()
            .filter(|t| t.confidence >= self.min_confidence)
            .cloned()
            .collect();
        debug!(
            kept = kept.len(),
            dropped = input.len() - kept.len(),
            min_confidence = self.min_confidence,
            "Schema validation complete"
        );
        Ok(kept)
    }
}

/// Assigns unique hierarchical paths (`<kind>.<name>`) to tokens lacking one.
#[derive(Debug, Clone, Default)]
pub struct PathGenerator;

impl PathGenerator {
    pub const AGENT_TYPE: &'static str = "path_generator";
}

fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_dash = true;
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    let trimmed = out.trim_end_matches('-');
    if trimmed.is_empty() {
        "token".to_string()
    } else {
        trimmed.to_string()
    }
}

#[async_trait]
impl Agent for PathGenerator {
    fn agent_type(&self) -> &str {
        Self::AGENT_TYPE
    }

    fn stage(&self) -> Stage {
        Stage::Generate
    }

    async fn process(&self, _task: &Task, input: &[DesignToken]) -> AgentResult<Vec<DesignToken>> {
        let mut taken: HashSet<String> = input
            .iter()
            .filter(|t| !t.path.is_empty())
            .map(|t| t.path.join("."))
            .collect();

        let mut output = Vec::with_capacity(input.len());
        for token in input {
            if !token.path.is_empty() {
                output.push(token.clone());
                continue;
            }

            let base = slug(&token.name);
            let mut leaf = base.clone();
            let mut n = 2;
            while taken.contains(&format!("{}.{}", token.kind, leaf)) {
                leaf = format!("{}-{}", base, n);
                n += 1;
            }
            taken.insert(format!("{}.{}", token.kind, leaf));
            output.push(token.clone().with_path([token.kind.to_string(), leaf]));
        }

        output.sort_by(|a, b| a.kind.cmp(&b.kind).then_with(|| a.path.cmp(&b.path)));
        Ok(output)
    }
}
