//! Pluggable pipeline agents.
//!
//! Every processing step (preprocessing, extraction, validation, generation)
//! implements the [`Agent`] trait and is injected into the coordinator.

pub mod builtin;
pub mod error;
pub mod traits;
pub mod types;

pub use builtin::{FixtureExtractor, PassthroughPreprocessor, PathGenerator, SchemaValidator};
pub use error::{AgentError, AgentResult};
pub use traits::Agent;
pub use types::Stage;
