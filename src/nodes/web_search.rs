//! Web-search leaf.
//!
//! Queries the external search adapter, formats the hits as numbered
//! sources, and streams an LLM-written answer. Without an adapter or
//! results, emits the canonical unavailable message as a single
//! terminal frame.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{complete_leaf, stream_completion};
use crate::error::EngineError;
use crate::graph::node::GraphNode;
use crate::graph::state::GraphState;
use crate::prompts::{
    WEBSEARCH_CONCISE_PROMPT, WEBSEARCH_DETAILED_PROMPT, build_websearch_sources,
};
use crate::provider::llm::LlmProvider;
use crate::provider::message::{ChatRequest, system_message, user_message};
use crate::provider::search::{SearchDepth, WebSearchProvider};

/// Canonical message when the adapter is absent or returns nothing.
const NO_RESULTS_MESSAGE: &str = "No web results found";
/// Snippet cap per formatted source.
const SNIPPET_CAP: usize = 400;
/// Result count with the web-search toggle on.
const MAX_RESULTS_ADVANCED: usize = 5;
/// Result count with the toggle off.
const MAX_RESULTS_BASIC: usize = 2;

/// Leaf node for web search and answer formatting.
pub struct WebSearchNode {
    llm: Arc<dyn LlmProvider>,
    search: Option<Arc<dyn WebSearchProvider>>,
}

impl WebSearchNode {
    /// Creates the node. `search` is `None` when no key is configured.
    #[must_use]
    pub fn new(llm: Arc<dyn LlmProvider>, search: Option<Arc<dyn WebSearchProvider>>) -> Self {
        Self { llm, search }
    }
}

#[async_trait]
impl GraphNode for WebSearchNode {
    fn name(&self) -> &'static str {
        "WebSearch"
    }

    async fn run(&self, state: &mut GraphState) -> Result<(), EngineError> {
        let query = if state.resolved_query.is_empty() {
            state.user_query.clone()
        } else {
            state.resolved_query.clone()
        };

        if query.is_empty() {
            return complete_leaf(
                state,
                self.name(),
                "No query provided for web search.".to_string(),
                None,
            )
            .await;
        }

        let Some(search) = self.search.clone() else {
            debug!("web search adapter not configured");
            return complete_leaf(state, self.name(), NO_RESULTS_MESSAGE.to_string(), None).await;
        };

        let advanced = state.web_search;
        let (max_results, depth) = if advanced {
            (MAX_RESULTS_ADVANCED, SearchDepth::Advanced)
        } else {
            (MAX_RESULTS_BASIC, SearchDepth::Basic)
        };

        let hits = match search.search(&query, max_results, depth).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, "web search failed");
                Vec::new()
            }
        };

        if hits.is_empty() {
            return complete_leaf(state, self.name(), NO_RESULTS_MESSAGE.to_string(), None).await;
        }

        let sources_text = build_websearch_sources(&hits, SNIPPET_CAP);
        let system_prompt = if advanced {
            WEBSEARCH_DETAILED_PROMPT
        } else {
            WEBSEARCH_CONCISE_PROMPT
        };
        let user_prompt =
            format!("User Query: {query}\n\nSearch Results:\n{sources_text}");

        let request = ChatRequest {
            stream: true,
            ..ChatRequest::simple(
                &state.llm_model,
                vec![system_message(system_prompt), user_message(&user_prompt)],
                if advanced { 0.3 } else { 0.0 },
            )
        };

        let sink = state.sink.clone();
        let output = match stream_completion(&*self.llm, &request, sink.as_ref(), self.name()).await
        {
            Ok(full) => full,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                warn!(error = %e, "web search formatting failed");
                format!("Error: web search formatting failed: {e}")
            }
        };

        let metadata = serde_json::json!({ "results": hits.len(), "advanced": advanced });
        complete_leaf(state, self.name(), output, Some(metadata)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::state::Route;
    use crate::nodes::testing::{MockLlm, MockSearch};
    use crate::provider::search::SearchHit;

    fn hit(title: &str, url: &str, content: &str) -> SearchHit {
        SearchHit {
            title: title.to_string(),
            url: url.to_string(),
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn test_no_adapter_emits_canonical_message() {
        let node = WebSearchNode::new(Arc::new(MockLlm::text("unused")), None);
        let mut state = GraphState::new("s1", "rust news");
        state.resolved_query = "rust news".to_string();

        node.run(&mut state).await.unwrap_or(());
        assert_eq!(state.response.as_deref(), Some(NO_RESULTS_MESSAGE));
        assert_eq!(state.route, Route::Orchestrator);
    }

    #[tokio::test]
    async fn test_zero_results_emits_canonical_message() {
        let node = WebSearchNode::new(
            Arc::new(MockLlm::text("unused")),
            Some(Arc::new(MockSearch { hits: vec![] })),
        );
        let mut state = GraphState::new("s1", "rust news");
        state.resolved_query = "rust news".to_string();

        node.run(&mut state).await.unwrap_or(());
        assert_eq!(state.response.as_deref(), Some(NO_RESULTS_MESSAGE));
    }

    #[tokio::test]
    async fn test_formats_numbered_sources() {
        let llm = Arc::new(MockLlm::text("Answer [Source 1]"));
        let node = WebSearchNode::new(
            Arc::clone(&llm) as Arc<dyn LlmProvider>,
            Some(Arc::new(MockSearch {
                hits: vec![hit("Title A", "https://a", "snippet a")],
            })),
        );
        let mut state = GraphState::new("s1", "query");
        state.resolved_query = "query".to_string();
        state.llm_model = "gpt-4o".to_string();

        node.run(&mut state).await.unwrap_or(());
        let requests = llm.requests.lock().await;
        let prompt = &requests[0].messages[1].content;
        assert!(prompt.contains("[Source 1] Title A (https://a)"));
        assert_eq!(state.response.as_deref(), Some("Answer [Source 1]"));
    }

    #[tokio::test]
    async fn test_toggle_selects_depth_and_prompt() {
        let llm = Arc::new(MockLlm::text("detailed"));
        let node = WebSearchNode::new(
            Arc::clone(&llm) as Arc<dyn LlmProvider>,
            Some(Arc::new(MockSearch {
                hits: vec![hit("T", "https://u", "c")],
            })),
        );
        let mut state = GraphState::new("s1", "q");
        state.resolved_query = "q".to_string();
        state.llm_model = "gpt-4o".to_string();
        state.web_search = true;

        node.run(&mut state).await.unwrap_or(());
        let requests = llm.requests.lock().await;
        assert!(requests[0].messages[0].content.contains("Sources Used"));
    }

    #[tokio::test]
    async fn test_empty_query_short_circuits() {
        let node = WebSearchNode::new(Arc::new(MockLlm::text("unused")), None);
        let mut state = GraphState::new("s1", "");

        node.run(&mut state).await.unwrap_or(());
        assert_eq!(
            state.response.as_deref(),
            Some("No query provided for web search.")
        );
    }
}
