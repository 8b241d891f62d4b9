//! Attribution records for aggregated tokens.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Boost applied per corroborating source beyond the first.
const CORROBORATION_BOOST: f64 = 0.1;

/// One source's contribution to a token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProvenanceRecord {
    pub source_id: String,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl ProvenanceRecord {
    pub fn new(source_id: impl Into<String>, confidence: f64) -> Self {
        Self {
            source_id: source_id.into(),
            confidence,
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Provenance records keyed by canonical token id.
///
/// Records are append-only; a second record with a source id already
/// present for the same token is ignored.
#[derive(Debug, Clone, Default)]
pub struct ProvenanceTracker {
    records: HashMap<String, Vec<ProvenanceRecord>>,
}

impl ProvenanceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `record` to `token_id`. Returns false if the source was
    /// already recorded for that token.
    pub fn add_provenance(&mut self, token_id: &str, record: ProvenanceRecord) -> bool {
        let entries = self.records.entry(token_id.to_string()).or_default();
        if entries.iter().any(|r| r.source_id == record.source_id) {
            return false;
        }
        entries.push(record);
        true
    }

    /// Lifts the confidence recorded for `source_id` on `token_id` to at
    /// least `confidence`. Returns true if the record changed.
    pub(crate) fn raise_confidence(&mut self, token_id: &str, source_id: &str, confidence: f64) -> bool {
        match self
            .records
            .get_mut(token_id)
            .and_then(|entries| entries.iter_mut().find(|r| r.source_id == source_id))
        {
            Some(record) if confidence > record.confidence => {
                record.confidence = confidence;
                true
            }
            _ => false,
        }
    }

    pub fn get_provenance(&self, token_id: &str) -> &[ProvenanceRecord] {
        self.records
            .get(token_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Source ids for `token_id` in insertion order.
    pub fn sources(&self, token_id: &str) -> Vec<String> {
        self.get_provenance(token_id)
            .iter()
            .map(|r| r.source_id.clone())
            .collect()
    }

    /// `min(1, sum * (1 + 0.1 * (n - 1)))` over the token's records, 0 when none.
    pub fn weighted_confidence(&self, token_id: &str) -> f64 {
        let records = self.get_provenance(token_id);
        if records.is_empty() {
            return 0.0;
        }
        let sum: f64 = records.iter().map(|r| r.confidence).sum();
        let boost = 1.0 + CORROBORATION_BOOST * (records.len() - 1) as f64;
        (sum * boost).min(1.0)
    }

    /// Moves every record of `source` onto `target`, skipping source ids the
    /// target already has. Returns the number of records moved.
    pub fn merge_provenance(&mut self, target: &str, source: &str) -> usize {
        if target == source {
            return 0;
        }
        let Some(incoming) = self.records.remove(source) else {
            return 0;
        };
        incoming
            .into_iter()
            .filter(|record| self.add_provenance(target, record.clone()))
            .count()
    }

    /// Drops the records for one token.
    pub fn remove(&mut self, token_id: &str) -> Vec<ProvenanceRecord> {
        self.records.remove(token_id).unwrap_or_default()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn contains(&self, token_id: &str) -> bool {
        self.records.contains_key(token_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_is_idempotent_per_source() {
        let mut tracker = ProvenanceTracker::new();
        assert!(tracker.add_provenance("color:#FF0000", ProvenanceRecord::new("A", 0.8)));
        let before = tracker.weighted_confidence("color:#FF0000");

        assert!(!tracker.add_provenance("color:#FF0000", ProvenanceRecord::new("A", 0.3)));
        assert_eq!(tracker.get_provenance("color:#FF0000").len(), 1);
        assert_eq!(tracker.weighted_confidence("color:#FF0000"), before);
    }

    #[test]
    fn test_weighted_confidence() {
        let mut tracker = ProvenanceTracker::new();
        assert_eq!(tracker.weighted_confidence("missing"), 0.0);

        tracker.add_provenance("t", ProvenanceRecord::new("A", 0.3));
        assert!((tracker.weighted_confidence("t") - 0.3).abs() < 1e-9);

        tracker.add_provenance("t", ProvenanceRecord::new("B", 0.4));
        assert!((tracker.weighted_confidence("t") - 0.77).abs() < 1e-9);

        tracker.add_provenance("t", ProvenanceRecord::new("C", 0.9));
        assert_eq!(tracker.weighted_confidence("t"), 1.0);
    }

    #[test]
    fn test_merge_skips_existing_sources() {
        let mut tracker = ProvenanceTracker::new();
        tracker.add_provenance("a", ProvenanceRecord::new("A", 0.5));
        tracker.add_provenance("b", ProvenanceRecord::new("A", 0.2));
        tracker.add_provenance("b", ProvenanceRecord::new("B", 0.2));

        assert_eq!(tracker.merge_provenance("a", "b"), 1);
        assert_eq!(tracker.sources("a"), vec!["A".to_string(), "B".to_string()]);
        assert!(!tracker.contains("b"));
        assert_eq!(tracker.merge_provenance("a", "a"), 0);
        assert_eq!(tracker.merge_provenance("a", "missing"), 0);
    }

    #[test]
    fn test_clear() {
        let mut tracker = ProvenanceTracker::new();
        tracker.add_provenance("a", ProvenanceRecord::new("A", 0.5));
        assert_eq!(tracker.len(), 1);
        tracker.clear();
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_raise_confidence_only_increases() {
        let mut tracker = ProvenanceTracker::new();
        tracker.add_provenance("a", ProvenanceRecord::new("A", 0.3));

        assert!(tracker.raise_confidence("a", "A", 0.9));
        assert!(!tracker.raise_confidence("a", "A", 0.5));
        assert!(!tracker.raise_confidence("a", "B", 0.9));
        assert!((tracker.weighted_confidence("a") - 0.9).abs() < 1e-9);
    }
}
