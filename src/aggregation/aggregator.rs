//! Single-pass clustering of near-duplicate tokens with provenance.
//!
//! Tokens are visited in input order. Each one joins the nearest existing
//! cluster of the same kind whose representative is within the kind's
//! threshold, or starts a new cluster. A cluster's representative is its
//! first member and never moves, so clusters do not chain: if B joined A's
//! cluster, C is still compared against A, not B. The token shown for a
//! cluster is its highest-confidence member.

use serde_json::json;
use tracing::{debug, info};

use crate::error::AggregationError;
use crate::metrics::MetricsCollector;
use crate::tokens::{DesignToken, Task, TokenKind};

use super::provenance::{ProvenanceRecord, ProvenanceTracker};
use super::similarity::{
    within_threshold, SimilarityThresholds, DEFAULT_COLOR_THRESHOLD, DEFAULT_DIMENSION_THRESHOLD,
};

/// Extension key under which aggregated tokens carry their attribution.
pub const PROVENANCE_EXTENSION_KEY: &str = "com.tokenforge.provenance";

/// Task context key that makes aggregation fail on purpose.
pub const INJECT_FAILURE_CONTEXT_KEY: &str = "inject_aggregation_failure";

/// Source id used for tokens that carry no `source` metadata.
const UNKNOWN_SOURCE: &str = "unknown";

/// Aggregator settings.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatorConfig {
    /// Max ΔE00 between colors in one cluster.
    pub color_threshold: f64,
    /// Max px difference between lengths in one cluster.
    pub dimension_threshold: f64,
    /// Keep only this many clusters, highest weighted confidence first.
    pub max_clusters: Option<usize>,
    /// Sort inputs by a stable key before clustering.
    pub sort_inputs: bool,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            color_threshold: DEFAULT_COLOR_THRESHOLD,
            dimension_threshold: DEFAULT_DIMENSION_THRESHOLD,
            max_clusters: None,
            sort_inputs: false,
        }
    }
}

impl AggregatorConfig {
    pub fn with_color_threshold(mut self, threshold: f64) -> Self {
        self.color_threshold = threshold;
        self
    }

    pub fn with_dimension_threshold(mut self, threshold: f64) -> Self {
        self.dimension_threshold = threshold;
        self
    }

    pub fn with_max_clusters(mut self, max_clusters: usize) -> Self {
        self.max_clusters = Some(max_clusters);
        self
    }

    pub fn with_sorted_inputs(mut self, sort_inputs: bool) -> Self {
        self.sort_inputs = sort_inputs;
        self
    }

    /// Checks thresholds and the cluster cap.
    pub fn validate(&self) -> Result<(), AggregationError> {
        for (kind, value) in [
            ("color", self.color_threshold),
            ("dimension", self.dimension_threshold),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(AggregationError::InvalidThreshold {
                    kind: kind.to_string(),
                    value,
                });
            }
        }
        if self.max_clusters == Some(0) {
            return Err(AggregationError::InvalidClusterCount(0));
        }
        Ok(())
    }

    fn thresholds(&self) -> SimilarityThresholds {
        SimilarityThresholds {
            color: self.color_threshold,
            dimension: self.dimension_threshold,
        }
    }
}

struct Cluster {
    id: String,
    kind: TokenKind,
    representative: DesignToken,
    display: DesignToken,
    members: usize,
}

/// Merges near-duplicate tokens and records where each came from.
///
/// Not safe for concurrent use; the coordinator creates one per run.
#[derive(Debug, Default)]
pub struct TokenAggregator {
    config: AggregatorConfig,
    provenance: ProvenanceTracker,
    metrics: MetricsCollector,
}

impl TokenAggregator {
    /// Creates an aggregator after validating `config`.
    pub fn new(config: AggregatorConfig) -> Result<Self, AggregationError> {
        config.validate()?;
        Ok(Self {
            config,
            provenance: ProvenanceTracker::new(),
            metrics: MetricsCollector::new(),
        })
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    pub fn provenance(&self) -> &ProvenanceTracker {
        &self.provenance
    }

    pub fn provenance_mut(&mut self) -> &mut ProvenanceTracker {
        &mut self.provenance
    }

    /// Aggregates `tokens` for `task`, honoring a failure injected through
    /// the task context.
    pub fn aggregate_for_task(
        &mut self,
        task: &Task,
        tokens: Vec<DesignToken>,
    ) -> Result<Vec<DesignToken>, AggregationError> {
        if let Some(value) = task.context().get(INJECT_FAILURE_CONTEXT_KEY) {
            let reason = value
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| value.to_string());
            return Err(AggregationError::Injected(reason));
        }
        self.aggregate(tokens)
    }

    /// Aggregates a JSON array of tokens.
    pub fn aggregate_json(
        &mut self,
        input: serde_json::Value,
    ) -> Result<Vec<DesignToken>, AggregationError> {
        let serde_json::Value::Array(items) = input else {
            return Err(AggregationError::InvalidInput(format!(
                "expected an array of tokens, got {}",
                json_type_name(&input)
            )));
        };

        let tokens = items
            .into_iter()
            .enumerate()
            .map(|(i, item)| {
                serde_json::from_value::<DesignToken>(item)
                    .map_err(|e| AggregationError::InvalidInput(format!("element {}: {}", i, e)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.aggregate(tokens)
    }

    /// Clusters `tokens` and returns one token per cluster, in the order
    /// clusters were first seen.
    pub fn aggregate(
        &mut self,
        mut tokens: Vec<DesignToken>,
    ) -> Result<Vec<DesignToken>, AggregationError> {
        self.config.validate()?;
        if let Some((i, token)) = tokens
            .iter()
            .enumerate()
            .find(|(_, t)| !(0.0..=1.0).contains(&t.confidence))
        {
            return Err(AggregationError::InvalidInput(format!(
                "element {} ('{}') has confidence {} outside [0, 1]",
                i, token.name, token.confidence
            )));
        }
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        if self.config.sort_inputs {
            tokens.sort_by_cached_key(sort_key);
        }

        let input_count = tokens.len();
        let thresholds = self.config.thresholds();
        let mut clusters: Vec<Cluster> = Vec::new();

        for token in tokens {
            let nearest = clusters
                .iter()
                .enumerate()
                .filter(|(_, c)| c.kind == token.kind)
                .filter_map(|(i, c)| {
                    within_threshold(&c.representative, &token, &thresholds).map(|d| (i, d))
                })
                // Strict comparison keeps the first-seen cluster on ties.
                .fold(None, |best: Option<(usize, f64)>, (i, d)| match best {
                    Some((_, best_d)) if best_d <= d => best,
                    _ => Some((i, d)),
                });

            let record = provenance_record(&token);
            match nearest {
                Some((index, _)) => {
                    let cluster = &mut clusters[index];
                    cluster.members += 1;
                    let confidence = record.confidence;
                    let source = record.source_id.clone();
                    if !self.provenance.add_provenance(&cluster.id, record) {
                        // Same source twice in one cluster: keep its best score.
                        self.provenance
                            .raise_confidence(&cluster.id, &source, confidence);
                    }
                    if token.confidence > cluster.display.confidence {
                        cluster.display = token;
                    }
                }
                None => {
                    let id = self.unique_id(&token, &clusters);
                    self.provenance.add_provenance(&id, record);
                    clusters.push(Cluster {
                        id,
                        kind: token.kind,
                        representative: token.clone(),
                        display: token,
                        members: 1,
                    });
                }
            }
        }

        if let Some(limit) = self.config.max_clusters {
            clusters = self.keep_strongest(clusters, limit);
        }

        for kind in TokenKind::ALL {
            let merged: usize = clusters
                .iter()
                .filter(|c| c.kind == kind)
                .map(|c| c.members - 1)
                .sum();
            self.metrics.record_merges(kind.as_str(), merged as u64);
        }

        let output: Vec<DesignToken> = clusters
            .into_iter()
            .map(|cluster| self.finish(cluster))
            .collect();

        info!(
            input = input_count,
            output = output.len(),
            "Aggregated tokens"
        );
        Ok(output)
    }

    fn unique_id(&self, token: &DesignToken, clusters: &[Cluster]) -> String {
        let base = format!("{}:{}", token.kind, token.canonical_value());
        let taken = |id: &str| self.provenance.contains(id) || clusters.iter().any(|c| c.id == id);
        if !taken(&base) {
            return base;
        }
        (2..)
            .map(|n| format!("{}#{}", base, n))
            .find(|candidate| !taken(candidate))
            .unwrap_or(base)
    }

    fn keep_strongest(&mut self, clusters: Vec<Cluster>, limit: usize) -> Vec<Cluster> {
        if clusters.len() <= limit {
            return clusters;
        }

        let mut ranked: Vec<(usize, f64)> = clusters
            .iter()
            .enumerate()
            .map(|(i, c)| (i, self.provenance.weighted_confidence(&c.id)))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        let mut keep = vec![false; clusters.len()];
        for (i, _) in ranked.into_iter().take(limit) {
            keep[i] = true;
        }

        let mut kept = Vec::with_capacity(limit);
        for (cluster, keep) in clusters.into_iter().zip(keep) {
            if keep {
                kept.push(cluster);
            } else {
                debug!(token_id = %cluster.id, "Dropping cluster over max_clusters");
                self.provenance.remove(&cluster.id);
            }
        }
        kept
    }

    fn finish(&self, cluster: Cluster) -> DesignToken {
        let sources = self.provenance.sources(&cluster.id);
        let weighted = self.provenance.weighted_confidence(&cluster.id);

        let mut token = cluster.display;
        token.extensions.insert(
            PROVENANCE_EXTENSION_KEY.to_string(),
            json!({
                "token_id": cluster.id,
                "sources": sources,
                "weighted_confidence": weighted,
            }),
        );
        token
            .metadata
            .insert("merged_count".to_string(), json!(cluster.members));
        token
    }
}

fn provenance_record(token: &DesignToken) -> ProvenanceRecord {
    ProvenanceRecord::new(token.source().unwrap_or(UNKNOWN_SOURCE), token.confidence)
        .with_metadata(json!({ "name": token.name, "value": token.value }))
}

fn sort_key(token: &DesignToken) -> (TokenKind, String, String, String) {
    (
        token.kind,
        token.path_string(),
        token.source().unwrap_or_default().to_string(),
        token.canonical_value(),
    )
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
