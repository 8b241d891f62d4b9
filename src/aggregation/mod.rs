//! Deduplication and provenance for extracted tokens.
//!
//! Tokens from different extractors that describe the same value are merged
//! into one, and every contributing source is recorded:
//!
//! - **similarity**: per-kind distance (CIEDE2000 for colors, px for lengths)
//! - **provenance**: append-only attribution records and weighted confidence
//! - **aggregator**: single-pass, fixed-representative clustering

pub mod aggregator;
pub mod provenance;
pub mod similarity;

pub use aggregator::{
    AggregatorConfig, TokenAggregator, INJECT_FAILURE_CONTEXT_KEY, PROVENANCE_EXTENSION_KEY,
};
pub use provenance::{ProvenanceRecord, ProvenanceTracker};
pub use similarity::{
    token_distance, within_threshold, SimilarityThresholds, DEFAULT_COLOR_THRESHOLD,
    DEFAULT_DIMENSION_THRESHOLD,
};
