//! The capability contract every pipeline step implements.

use async_trait::async_trait;

use crate::tokens::{DesignToken, Task, TokenKind};

use super::error::AgentResult;
use super::types::Stage;

/// A pluggable processing step.
///
/// Implementations are injected into the coordinator at composition time;
/// extractors, validators and generators are interchangeable as long as
/// they report the right [`Stage`].
#[async_trait]
pub trait Agent: Send + Sync {
    /// Stable identifier, used for breaker scoping, trackers and provenance.
    fn agent_type(&self) -> &str;

    /// The pipeline stage this agent belongs to.
    fn stage(&self) -> Stage;

    /// Token kinds this agent can produce. Empty means "any".
    fn supported_kinds(&self) -> &[TokenKind] {
        &[]
    }

    /// Runs the agent over `input`, the previous stage's output.
    async fn process(&self, task: &Task, input: &[DesignToken]) -> AgentResult<Vec<DesignToken>>;

    /// Reports whether the agent's backing resources look usable.
    async fn health_check(&self) -> bool {
        true
    }

    /// Returns true if this agent has anything to contribute to `task`.
    fn handles(&self, task: &Task) -> bool {
        let kinds = self.supported_kinds();
        kinds.is_empty()
            || task.requested_kinds().is_empty()
            || kinds.iter().any(|kind| task.requests(*kind))
    }
}
