//! Task and design-token data model.
//!
//! This module holds the plain data that flows through the pipeline:
//!
//! - **Task**: an immutable unit of work (image reference, requested token kinds, context)
//! - **DesignToken**: a typed extraction result with confidence, extensions and metadata
//! - **Color / dimension parsing**: value helpers used by the similarity metrics

pub mod color;
pub mod dimension;
pub mod types;

pub use color::{delta_e_2000, Lab, Rgb};
pub use dimension::parse_px;
pub use types::{DesignToken, Task, TokenKind, SOURCE_METADATA_KEY};
