//! Graph runtime: registry, conditional dispatch, step ceiling, cancellation.
//!
//! A single logical thread of control advances one state envelope per
//! turn. After each node completes, the runtime reads `state.route` and
//! dispatches to the registered node for that target; `Route::End`
//! terminates. A hard ceiling on edge traversals guarantees termination
//! even if a node wires a cycle.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use super::node::GraphNode;
use super::state::{GraphState, Route};
use crate::error::EngineError;

/// Registry of nodes plus the dispatch loop.
pub struct GraphRuntime {
    nodes: HashMap<Route, Arc<dyn GraphNode>>,
    entry: Route,
    max_steps: usize,
}

impl GraphRuntime {
    /// Creates a runtime entering at `entry` with the given step ceiling.
    #[must_use]
    pub fn new(entry: Route, max_steps: usize) -> Self {
        Self {
            nodes: HashMap::new(),
            entry,
            max_steps,
        }
    }

    /// Registers the node dispatched for `route`.
    #[must_use]
    pub fn register(mut self, route: Route, node: Arc<dyn GraphNode>) -> Self {
        self.nodes.insert(route, node);
        self
    }

    /// Runs a turn to completion.
    ///
    /// Cancellation is cooperative: the token is checked before each
    /// dispatch and races each node's execution, so a turn aborts at the
    /// node boundary or the node's next suspension point.
    ///
    /// # Errors
    ///
    /// [`EngineError::Cancelled`] on cancellation,
    /// [`EngineError::StepCeiling`] when the ceiling is hit, and
    /// [`EngineError::Internal`] for routes with no registered node.
    pub async fn run(
        &self,
        state: &mut GraphState,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        let mut current = self.entry;
        let mut steps = 0usize;

        loop {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            if steps >= self.max_steps {
                error!(max_steps = self.max_steps, "graph step ceiling reached");
                return Err(EngineError::StepCeiling {
                    max_steps: self.max_steps,
                });
            }

            let node = self.nodes.get(&current).ok_or_else(|| {
                EngineError::internal(format!("no node registered for route {current}"))
            })?;

            debug!(node = node.name(), step = steps, "dispatching node");
            tokio::select! {
                () = cancel.cancelled() => return Err(EngineError::Cancelled),
                result = node.run(state) => result?,
            }

            steps += 1;
            current = state.route;
            if current == Route::End {
                debug!(steps, "graph reached END");
                return Ok(());
            }
        }
    }
}

impl std::fmt::Debug for GraphRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.nodes.values().map(|n| n.name()).collect();
        names.sort_unstable();
        f.debug_struct("GraphRuntime")
            .field("entry", &self.entry)
            .field("max_steps", &self.max_steps)
            .field("nodes", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Node that forwards to a fixed next route, counting invocations.
    struct HopNode {
        name: &'static str,
        next: Route,
        hits: std::sync::atomic::AtomicUsize,
    }

    impl HopNode {
        fn new(name: &'static str, next: Route) -> Arc<Self> {
            Arc::new(Self {
                name,
                next,
                hits: std::sync::atomic::AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl GraphNode for HopNode {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn run(&self, state: &mut GraphState) -> Result<(), EngineError> {
            self.hits.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            state.route = self.next;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_linear_dispatch_reaches_end() {
        let a = HopNode::new("a", Route::SimpleLlm);
        let b = HopNode::new("b", Route::End);
        let runtime = GraphRuntime::new(Route::Orchestrator, 8)
            .register(Route::Orchestrator, a.clone())
            .register(Route::SimpleLlm, b.clone());

        let mut state = GraphState::new("s", "q");
        let cancel = CancellationToken::new();
        let result = runtime.run(&mut state, &cancel).await;
        assert!(result.is_ok());
        assert_eq!(a.hits.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(b.hits.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_step_ceiling_breaks_cycles() {
        // Orchestrator routes to itself forever.
        let looping = HopNode::new("loop", Route::Orchestrator);
        let runtime =
            GraphRuntime::new(Route::Orchestrator, 4).register(Route::Orchestrator, looping);

        let mut state = GraphState::new("s", "q");
        let cancel = CancellationToken::new();
        let result = runtime.run(&mut state, &cancel).await;
        assert!(matches!(result, Err(EngineError::StepCeiling { max_steps: 4 })));
    }

    #[tokio::test]
    async fn test_missing_node_is_internal() {
        let hop = HopNode::new("a", Route::Rag);
        let runtime = GraphRuntime::new(Route::Orchestrator, 8).register(Route::Orchestrator, hop);

        let mut state = GraphState::new("s", "q");
        let cancel = CancellationToken::new();
        let result = runtime.run(&mut state, &cancel).await;
        assert!(matches!(result, Err(EngineError::Internal { .. })));
    }

    #[tokio::test]
    async fn test_pre_cancelled_turn_never_dispatches() {
        let hop = HopNode::new("a", Route::End);
        let runtime =
            GraphRuntime::new(Route::Orchestrator, 8).register(Route::Orchestrator, hop.clone());

        let mut state = GraphState::new("s", "q");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = runtime.run(&mut state, &cancel).await;
        assert!(matches!(result, Err(EngineError::Cancelled)));
        assert_eq!(hop.hits.load(std::sync::atomic::Ordering::SeqCst), 0);
    }
}
