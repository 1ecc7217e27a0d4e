//! Graph node trait.
//!
//! Every processing node — the orchestrator, the leaves, and the
//! deep-research internals — implements this trait. Nodes mutate the
//! state envelope and set `state.route` to pick the next hop; the
//! runtime owns dispatch.

use async_trait::async_trait;

use super::state::GraphState;
use crate::error::EngineError;

/// A processing node in the execution graph.
///
/// Nodes never surface provider failures as `Err`: those are written
/// into the state as human-readable responses so the plan can continue.
/// An `Err` return is reserved for cancellation and internal faults.
#[async_trait]
pub trait GraphNode: Send + Sync {
    /// Node name for logging and stream frames.
    fn name(&self) -> &'static str;

    /// Runs the node against the turn state.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Cancelled`] when the turn was cancelled,
    /// or [`EngineError::Internal`] on invariant violations.
    async fn run(&self, state: &mut GraphState) -> Result<(), EngineError>;
}
