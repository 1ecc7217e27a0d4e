//! Processing nodes of the execution graph.
//!
//! The orchestrator plans and dispatches; the leaves (retrieval, web
//! search, deep research, simple generation, image, tool) execute one
//! task each and hand control back. Leaves never propagate provider
//! failures into the runtime: they write an "Error …" response and let
//! the plan continue.

pub mod deep_research;
pub mod image;
pub mod orchestrator;
pub mod retrieval;
pub mod simple;
pub mod tool;
pub mod web_search;

pub use deep_research::register_deep_research;
pub use image::ImageNode;
pub use orchestrator::OrchestratorNode;
pub use retrieval::RagNode;
pub use simple::SimpleLlmNode;
pub use tool::ToolNode;
pub use web_search::WebSearchNode;

use futures_util::StreamExt;

use crate::error::EngineError;
use crate::graph::state::{GraphState, Route};
use crate::provider::llm::LlmProvider;
use crate::provider::message::ChatRequest;
use crate::stream::EventSink;

/// Streams a chat completion, forwarding each delta through the sink.
///
/// Returns the accumulated full response. Cancellation (a dropped sink
/// receiver) propagates; provider stream failures surface as
/// [`EngineError::Stream`] for the caller to convert into an error
/// response.
pub(crate) async fn stream_completion(
    llm: &dyn LlmProvider,
    request: &ChatRequest,
    sink: Option<&EventSink>,
    node: &str,
) -> Result<String, EngineError> {
    let mut stream = llm.chat_stream(request).await?;
    let mut full = String::new();

    while let Some(item) = stream.next().await {
        let delta = item?;
        if delta.is_empty() {
            continue;
        }
        full.push_str(&delta);
        if let Some(sink) = sink {
            sink.content(node, &delta).await?;
        }
    }

    Ok(full)
}

/// Finishes a leaf: records the response, appends the intermediate
/// result, emits the node-completion frame, and routes back to the
/// orchestrator.
pub(crate) async fn complete_leaf(
    state: &mut GraphState,
    node: &str,
    output: String,
    metadata: Option<serde_json::Value>,
) -> Result<(), EngineError> {
    if let Some(sink) = state.sink.clone() {
        sink.complete_node(node, &output).await?;
    }
    let query = state.resolved_query.clone();
    state.push_intermediate(node, query, output.clone(), metadata);
    state.response = Some(output);
    state.route = Route::Orchestrator;
    Ok(())
}

/// Strips markdown code fences an LLM may wrap around JSON output.
#[must_use]
pub(crate) fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    if trimmed.starts_with("```") {
        trimmed
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim()
    } else {
        trimmed
    }
}
