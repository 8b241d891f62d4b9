//! Pipeline coordination for design-token extraction.
//!
//! # Stages
//!
//! 1. **Preprocess**: optional agent that checks or prepares the task
//! 2. **Extract**: every matching extractor runs concurrently; individual
//!    failures are tolerated as long as one extractor succeeds
//! 3. **Aggregate**: near-duplicate tokens are merged with provenance
//! 4. **Validate**: optional agent that rejects malformed output
//! 5. **Generate**: optional agent that shapes the final token set
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use token_forge::agents::{FixtureExtractor, SchemaValidator};
//! use token_forge::pipeline::{PipelineConfig, PipelineCoordinator};
//! use token_forge::tokens::Task;
//!
//! let coordinator = PipelineCoordinator::builder(PipelineConfig::from_env()?)
//!     .extractor(Arc::new(FixtureExtractor::new("palette", tokens)))
//!     .validator(Arc::new(SchemaValidator::new(0.3)))
//!     .build()?;
//!
//! let result = coordinator.execute(&Task::new("screens/home.png")).await;
//! println!("success={} tokens={}", result.success, result.tokens.len());
//! ```

pub mod config;
pub mod coordinator;
pub mod result;

pub use config::{ConfigError, PipelineConfig};
pub use coordinator::{AgentHealth, PipelineCoordinator, PipelineCoordinatorBuilder, PipelineError};
pub use result::{ExtractorFailure, PipelineResult, StageResult};
