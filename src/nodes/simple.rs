//! Plain generation leaf.
//!
//! Builds a prompt from the static system prefix, the session's custom
//! instruction, the rolling summary, and the last two turns, then
//! streams the model's answer.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use super::{complete_leaf, stream_completion};
use crate::error::EngineError;
use crate::graph::node::GraphNode;
use crate::graph::state::GraphState;
use crate::prompts::{SIMPLE_SYSTEM_PREFIX, build_simple_context};
use crate::provider::llm::LlmProvider;
use crate::provider::message::{ChatRequest, system_message, user_message};

/// Leaf node for direct LLM generation.
pub struct SimpleLlmNode {
    llm: Arc<dyn LlmProvider>,
}

impl SimpleLlmNode {
    /// Creates the node over the given provider.
    #[must_use]
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl GraphNode for SimpleLlmNode {
    fn name(&self) -> &'static str {
        "SimpleLLM"
    }

    async fn run(&self, state: &mut GraphState) -> Result<(), EngineError> {
        let query = if state.resolved_query.is_empty() {
            state.user_query.clone()
        } else {
            state.resolved_query.clone()
        };

        let system = if state.gpt_config.instruction.trim().is_empty() {
            SIMPLE_SYSTEM_PREFIX.to_string()
        } else {
            format!("{SIMPLE_SYSTEM_PREFIX}\n\n{}", state.gpt_config.instruction)
        };
        let context = build_simple_context(&state.summary, &state.messages, &query);

        let request = ChatRequest {
            stream: true,
            ..ChatRequest::simple(
                &state.llm_model,
                vec![system_message(&system), user_message(&context)],
                state.gpt_config.temperature,
            )
        };

        let sink = state.sink.clone();
        let output = match stream_completion(&*self.llm, &request, sink.as_ref(), self.name()).await
        {
            Ok(full) => full,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                warn!(error = %e, "simple generation failed");
                format!("Error: generation failed: {e}")
            }
        };

        complete_leaf(state, self.name(), output, None).await
    }
}
