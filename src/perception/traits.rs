use async_trait::async_trait;

use crate::errors::AgentResult;
use crate::perception::types::{Element, Frame};

/// Strategy trait for screen parsing, so the control loop can run against a
/// test double instead of the live demo service.
#[async_trait]
pub trait PerceptionClient: Send + Sync {
    /// Parse one frame into structured elements, ordered by descending
    /// confidence. No internal retry; the caller owns the retry policy.
    async fn parse(&self, frame: &Frame) -> AgentResult<Vec<Element>>;
}
