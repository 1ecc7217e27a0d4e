//! Retrieval-augmented generation leaf.
//!
//! Runs the source-selection classifier and both searches concurrently,
//! gates the results by the classifier's decision, assembles a
//! source-aware context, and streams the answer.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{complete_leaf, stream_completion, strip_code_fences};
use crate::error::EngineError;
use crate::graph::node::GraphNode;
use crate::graph::state::GraphState;
use crate::prompts::{build_rag_context, build_rag_system_prompt, build_source_selection_prompt};
use crate::provider::llm::LlmProvider;
use crate::provider::message::{ChatRequest, system_message, user_message};
use crate::retrieval::cache::{CacheManager, kb_collection, user_docs_collection};
use crate::retrieval::index::{DEFAULT_FUSION_K, HybridMode};
use crate::session::Document;

/// The classifier's source-selection decision.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceDecision {
    /// Whether to answer from the user's uploaded documents.
    pub use_user_docs: bool,
    /// Whether to answer from the knowledge base.
    pub use_kb: bool,
    /// One of `user_docs_only`, `kb_only`, `both`, `none`.
    pub search_strategy: String,
    /// One-line rationale.
    #[serde(default)]
    pub reasoning: String,
}

impl SourceDecision {
    /// Fallback decision: the union of available sources.
    #[must_use]
    pub fn fallback(has_user_docs: bool, has_kb: bool) -> Self {
        let search_strategy = match (has_user_docs, has_kb) {
            (true, true) => "both",
            (true, false) => "user_docs_only",
            (false, true) => "kb_only",
            (false, false) => "none",
        };
        Self {
            use_user_docs: has_user_docs,
            use_kb: has_kb,
            search_strategy: search_strategy.to_string(),
            reasoning: "Fallback due to classifier parse error".to_string(),
        }
    }

    /// Falsifies any field the session's availability can't support.
    fn clamp(mut self, has_user_docs: bool, has_kb: bool) -> Self {
        if !has_user_docs {
            self.use_user_docs = false;
        }
        if !has_kb {
            self.use_kb = false;
        }
        self
    }
}

/// Leaf node for retrieval-augmented answers.
pub struct RagNode {
    llm: Arc<dyn LlmProvider>,
    cache: Arc<CacheManager>,
    fast_model: String,
    top_k: usize,
}

impl RagNode {
    /// Creates the node.
    #[must_use]
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        cache: Arc<CacheManager>,
        fast_model: impl Into<String>,
        top_k: usize,
    ) -> Self {
        Self {
            llm,
            cache,
            fast_model: fast_model.into(),
            top_k,
        }
    }

    /// Invokes the classifier; falls back to the union of available
    /// sources on any provider or parse failure.
    async fn select_sources(
        &self,
        query: &str,
        has_user_docs: bool,
        has_kb: bool,
        custom_instruction: &str,
    ) -> SourceDecision {
        let prompt =
            build_source_selection_prompt(query, has_user_docs, has_kb, custom_instruction);
        let request = ChatRequest::json(&self.fast_model, vec![user_message(&prompt)], 0.4);

        let decision = match self.llm.chat(&request).await {
            Ok(response) => {
                serde_json::from_str::<SourceDecision>(strip_code_fences(&response.content))
                    .map_err(|e| {
                        warn!(error = %e, "source selection parse failed");
                    })
                    .ok()
            }
            Err(e) => {
                warn!(error = %e, "source selection call failed");
                None
            }
        };

        let decision = decision
            .unwrap_or_else(|| SourceDecision::fallback(has_user_docs, has_kb))
            .clamp(has_user_docs, has_kb);
        info!(
            strategy = %decision.search_strategy,
            reasoning = %decision.reasoning,
            "source selection"
        );
        decision
    }

    /// Preprocesses (if needed) and searches the user-doc collection.
    async fn search_user_docs(
        &self,
        session_id: &str,
        docs: &[Document],
        query: &str,
        hybrid: bool,
    ) -> Vec<String> {
        if !self.cache.has_user_docs(session_id).await
            && let Err(e) = self
                .cache
                .preprocess_user_docs(session_id, docs, hybrid, true)
                .await
        {
            warn!(error = %e, "user-doc preprocess failed");
            return Vec::new();
        }

        let collection = user_docs_collection(session_id);
        let result = if hybrid {
            self.cache
                .index()
                .search_hybrid(&collection, query, self.top_k, DEFAULT_FUSION_K, HybridMode::Rrf)
                .await
        } else {
            self.cache.index().search_dense(&collection, query, self.top_k).await
        };
        result.unwrap_or_else(|e| {
            warn!(error = %e, "user-doc search failed");
            Vec::new()
        })
    }

    /// Preprocesses (if needed) and searches the KB collection.
    async fn search_kb(
        &self,
        session_id: &str,
        docs: &[Document],
        query: &str,
        hybrid: bool,
    ) -> Vec<String> {
        if let Err(e) = self.cache.preprocess_kb(session_id, docs, hybrid).await {
            warn!(error = %e, "KB preprocess failed");
            return Vec::new();
        }

        let collection = kb_collection(session_id);
        let mode = if hybrid {
            HybridMode::Intersection
        } else {
            HybridMode::Rrf
        };
        self.cache
            .index()
            .search_hybrid(&collection, query, self.top_k, DEFAULT_FUSION_K, mode)
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "KB search failed");
                Vec::new()
            })
    }
}

#[async_trait]
impl GraphNode for RagNode {
    fn name(&self) -> &'static str {
        "RAG"
    }

    #[allow(clippy::too_many_lines)]
    async fn run(&self, state: &mut GraphState) -> Result<(), EngineError> {
        let query = if state.resolved_query.is_empty() {
            state.user_query.clone()
        } else {
            state.resolved_query.clone()
        };
        let hybrid = state.hybrid_rag;
        let has_user_docs = !state.active_docs.is_empty();
        let has_kb = !state.kb_docs.is_empty();

        if let Some(sink) = &state.sink {
            sink.status(self.name(), "Analyzing query and selecting sources", Some(10))
                .await?;
        }

        // Classifier and both searches run concurrently; gating happens
        // after all three complete.
        let classify = self.select_sources(
            &query,
            has_user_docs,
            has_kb,
            &state.gpt_config.instruction,
        );
        let user_search = async {
            if has_user_docs {
                self.search_user_docs(&state.session_id, &state.active_docs, &query, hybrid)
                    .await
            } else {
                Vec::new()
            }
        };
        let kb_search = async {
            if has_kb {
                self.search_kb(&state.session_id, &state.kb_docs, &query, hybrid)
                    .await
            } else {
                Vec::new()
            }
        };

        let (decision, user_found, kb_found) = tokio::join!(classify, user_search, kb_search);

        // Discard results for any side the classifier did not select.
        let user_chunks = if decision.use_user_docs { user_found } else { Vec::new() };
        let kb_chunks = if decision.use_kb { kb_found } else { Vec::new() };
        debug!(
            user_chunks = user_chunks.len(),
            kb_chunks = kb_chunks.len(),
            strategy = %decision.search_strategy,
            "retrieval complete"
        );

        if let Some(sink) = &state.sink {
            sink.status(self.name(), "Combining information from sources", Some(80))
                .await?;
        }

        let system_prompt = build_rag_system_prompt(&state.gpt_config.instruction);
        let context = build_rag_context(
            &state.summary,
            &state.messages,
            &query,
            &decision.search_strategy,
            &decision.reasoning,
            &user_chunks,
            &kb_chunks,
        );

        let request = ChatRequest {
            stream: true,
            ..ChatRequest::simple(
                &state.llm_model,
                vec![system_message(&system_prompt), user_message(&context)],
                0.3,
            )
        };

        let sink = state.sink.clone();
        let output = match stream_completion(&*self.llm, &request, sink.as_ref(), self.name()).await
        {
            Ok(full) => full,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                warn!(error = %e, "retrieval answer generation failed");
                format!("Error: answer generation failed: {e}")
            }
        };

        let metadata = serde_json::json!({
            "strategy": decision.search_strategy,
            "sources_used": {
                "user_docs": user_chunks.len(),
                "kb": kb_chunks.len(),
            },
        });
        complete_leaf(state, self.name(), output, Some(metadata)).await
    }
}
