//! External tool invocation leaf.
//!
//! Loads the session's connected tool definitions, then drives the
//! model ↔ tool round-trip: send a request, execute any tool calls in
//! the reply, append results, and repeat until the model produces a
//! final text answer or the iteration limit is reached.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::complete_leaf;
use crate::error::EngineError;
use crate::graph::node::GraphNode;
use crate::graph::state::GraphState;
use crate::provider::llm::LlmProvider;
use crate::provider::message::{
    ChatRequest, ChatResponse, assistant_tool_calls_message, system_message, tool_message,
    user_message,
};
use crate::provider::tool::ToolRuntime;

/// Ceiling on model ↔ tool round-trips per invocation.
const MAX_TOOL_ITERATIONS: usize = 10;

const TOOL_SYSTEM_PROMPT: &str = "You are an assistant with access to external \
tools. Use them when they help answer the user's request, then reply with a \
clear final answer describing what was done and what was found.";

/// Leaf node for external tool invocation.
pub struct ToolNode {
    llm: Arc<dyn LlmProvider>,
    runtime: Option<Arc<dyn ToolRuntime>>,
}

impl ToolNode {
    /// Creates the node. `runtime` is `None` when no tools are connected.
    #[must_use]
    pub fn new(llm: Arc<dyn LlmProvider>, runtime: Option<Arc<dyn ToolRuntime>>) -> Self {
        Self { llm, runtime }
    }

    /// Runs the tool-calling loop to a final text response.
    async fn tool_loop(
        &self,
        runtime: &dyn ToolRuntime,
        session_id: &str,
        request: &mut ChatRequest,
    ) -> Result<ChatResponse, EngineError> {
        for iteration in 0..MAX_TOOL_ITERATIONS {
            let response = self.llm.chat(request).await?;

            if response.tool_calls.is_empty() {
                debug!(iteration, "tool loop completed with final text response");
                return Ok(response);
            }

            debug!(
                iteration,
                tool_count = response.tool_calls.len(),
                "executing tool calls"
            );

            request
                .messages
                .push(assistant_tool_calls_message(response.tool_calls.clone()));

            for call in &response.tool_calls {
                let result = match runtime.execute(session_id, call).await {
                    Ok(result) => result,
                    Err(e) => crate::provider::tool::ToolResult {
                        tool_call_id: call.id.clone(),
                        content: format!("tool execution failed: {e}"),
                        is_error: true,
                    },
                };
                debug!(
                    tool = call.name,
                    call_id = call.id,
                    is_error = result.is_error,
                    "tool execution complete"
                );
                request
                    .messages
                    .push(tool_message(&result.tool_call_id, &result.content));
            }
        }

        Err(EngineError::ToolLoopExceeded {
            max_iterations: MAX_TOOL_ITERATIONS,
        })
    }
}

#[async_trait]
impl GraphNode for ToolNode {
    fn name(&self) -> &'static str {
        "Tool"
    }

    async fn run(&self, state: &mut GraphState) -> Result<(), EngineError> {
        let query = if state.resolved_query.is_empty() {
            state.user_query.clone()
        } else {
            state.resolved_query.clone()
        };

        let Some(runtime) = self.runtime.clone() else {
            return complete_leaf(
                state,
                self.name(),
                "Error: no external tools are connected for this session.".to_string(),
                None,
            )
            .await;
        };

        let definitions = match runtime.definitions(&state.session_id).await {
            Ok(defs) if !defs.is_empty() => defs,
            Ok(_) => {
                return complete_leaf(
                    state,
                    self.name(),
                    "Error: no external tools are connected for this session.".to_string(),
                    None,
                )
                .await;
            }
            Err(e) => {
                warn!(error = %e, "failed to load tool definitions");
                return complete_leaf(
                    state,
                    self.name(),
                    format!("Error: failed to load connected tools: {e}"),
                    None,
                )
                .await;
            }
        };

        let tool_count = definitions.len();
        let mut request = ChatRequest {
            tools: definitions,
            ..ChatRequest::simple(
                &state.llm_model,
                vec![system_message(TOOL_SYSTEM_PROMPT), user_message(&query)],
                0.0,
            )
        };

        let output = match self
            .tool_loop(runtime.as_ref(), &state.session_id, &mut request)
            .await
        {
            Ok(response) => response.content,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                warn!(error = %e, "tool invocation failed");
                format!("Error: tool invocation failed: {e}")
            }
        };

        let metadata = serde_json::json!({ "tools_available": tool_count });
        complete_leaf(state, self.name(), output, Some(metadata)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::testing::{MockLlm, MockReply};
    use crate::provider::tool::{ToolCall, ToolDefinition, ToolResult};
    use tokio::sync::Mutex;

    /// Runtime with one echo tool; records executed calls.
    struct EchoRuntime {
        executed: Mutex<Vec<String>>,
    }

    impl EchoRuntime {
        fn new() -> Self {
            Self {
                executed: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ToolRuntime for EchoRuntime {
        async fn definitions(
            &self,
            _session_id: &str,
        ) -> Result<Vec<ToolDefinition>, EngineError> {
            Ok(vec![ToolDefinition {
                name: "echo".to_string(),
                description: "Echo the input".to_string(),
                parameters: serde_json::json!({"type": "object", "properties": {}}),
            }])
        }

        async fn execute(
            &self,
            _session_id: &str,
            call: &ToolCall,
        ) -> Result<ToolResult, EngineError> {
            self.executed.lock().await.push(call.name.clone());
            Ok(ToolResult {
                tool_call_id: call.id.clone(),
                content: format!("echoed {}", call.arguments),
                is_error: false,
            })
        }
    }

    fn tool_call(id: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: "echo".to_string(),
            arguments: "{}".to_string(),
        }
    }

    #[tokio::test]
    async fn test_loop_executes_tools_then_finishes() {
        let llm = Arc::new(MockLlm::new(vec![
            MockReply::ToolCalls(vec![tool_call("c1")]),
            MockReply::Text("All done".to_string()),
        ]));
        let runtime = Arc::new(EchoRuntime::new());
        let node = ToolNode::new(llm, Some(Arc::clone(&runtime) as Arc<dyn ToolRuntime>));

        let mut state = GraphState::new("s1", "use the tool");
        state.llm_model = "gpt-4o".to_string();
        state.resolved_query = "use the tool".to_string();

        node.run(&mut state).await.unwrap_or(());
        assert_eq!(state.response.as_deref(), Some("All done"));
        assert_eq!(runtime.executed.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_no_runtime_is_error_response() {
        let node = ToolNode::new(Arc::new(MockLlm::text("unused")), None);
        let mut state = GraphState::new("s1", "use the tool");

        node.run(&mut state).await.unwrap_or(());
        assert!(state.response.unwrap_or_default().starts_with("Error"));
    }

    #[tokio::test]
    async fn test_loop_ceiling_becomes_error_response() {
        // The model asks for tools forever.
        let replies: Vec<MockReply> = (0..12)
            .map(|i| MockReply::ToolCalls(vec![tool_call(&format!("c{i}"))]))
            .collect();
        let llm = Arc::new(MockLlm::new(replies));
        let node = ToolNode::new(llm, Some(Arc::new(EchoRuntime::new())));

        let mut state = GraphState::new("s1", "loop");
        state.llm_model = "gpt-4o".to_string();

        node.run(&mut state).await.unwrap_or(());
        let response = state.response.unwrap_or_default();
        assert!(response.starts_with("Error"));
        assert!(response.contains("10"));
    }
}
