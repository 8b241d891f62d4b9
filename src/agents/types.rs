//! Stage identifiers shared by agents, the task pool and the coordinator.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A fixed step of the extraction pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Preprocess,
    Extract,
    Aggregate,
    Validate,
    Generate,
}

impl Stage {
    /// All stages in execution order.
    pub const ALL: [Stage; 5] = [
        Stage::Preprocess,
        Stage::Extract,
        Stage::Aggregate,
        Stage::Validate,
        Stage::Generate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Preprocess => "preprocess",
            Stage::Extract => "extract",
            Stage::Aggregate => "aggregate",
            Stage::Validate => "validate",
            Stage::Generate => "generate",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .iter()
            .copied()
            .find(|stage| stage.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown stage '{}'", s))
    }
}
