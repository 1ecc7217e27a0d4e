//! Engine: wires providers, retrieval, sessions, and the graph runtime,
//! and executes chat turns end to end.
//!
//! One engine serves all sessions. A turn acquires its session's turn
//! lock, builds the state envelope, runs the graph under the turn
//! deadline, streams frames through the sink, and folds results back
//! into the session.

use std::sync::Arc;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::graph::runtime::GraphRuntime;
use crate::graph::state::{GraphState, Route};
use crate::nodes::deep_research::{ResearchDeps, register_deep_research};
use crate::nodes::{ImageNode, OrchestratorNode, RagNode, SimpleLlmNode, ToolNode, WebSearchNode};
use crate::provider::Providers;
use crate::retrieval::cache::CacheManager;
use crate::retrieval::index::RetrievalIndex;
use crate::retrieval::vector::MemoryVectorStore;
use crate::session::{Session, SessionStore};
use crate::stream::EventSink;

/// Per-turn options from the chat request body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TurnOptions {
    /// The user's message.
    pub message: String,
    /// Web-search toggle for this turn.
    #[serde(default)]
    pub web_search: bool,
    /// Hybrid-retrieval toggle for this turn.
    #[serde(default)]
    pub rag: bool,
    /// Deep-research toggle for this turn.
    #[serde(default)]
    pub deep_search: bool,
    /// Whether the client just uploaded a document for this turn.
    #[serde(default)]
    pub uploaded_doc: bool,
}

/// The assembled engine.
pub struct Engine {
    config: EngineConfig,
    providers: Providers,
    cache: Arc<CacheManager>,
    sessions: SessionStore,
    runtime: GraphRuntime,
    http: reqwest::Client,
}

impl Engine {
    /// Builds the engine from configuration with the default provider set.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        let providers = Providers::from_config(&config);
        Self::with_providers(config, providers)
    }

    /// Builds the engine with explicit providers (the test seam).
    #[must_use]
    pub fn with_providers(config: EngineConfig, providers: Providers) -> Self {
        if config.vector_store_url != "memory" {
            warn!(
                url = %config.vector_store_url,
                "remote vector stores are wired via the VectorBackend trait; using the in-process store"
            );
        }
        let index = Arc::new(RetrievalIndex::new(
            Arc::new(MemoryVectorStore::new()),
            Arc::clone(&providers.embeddings),
        ));
        let cache = Arc::new(CacheManager::new(index));
        let runtime = build_runtime(&config, &providers, &cache);

        Self {
            config,
            providers,
            cache,
            sessions: SessionStore::new(),
            runtime,
            http: reqwest::Client::new(),
        }
    }

    /// Engine configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Session store.
    #[must_use]
    pub const fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Retrieval cache manager.
    #[must_use]
    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    /// Shared HTTP client for document fetches.
    #[must_use]
    pub const fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Whether an LLM provider is configured (health endpoint).
    #[must_use]
    pub fn provider_configured(&self) -> bool {
        !self.config.api_key.is_empty()
    }

    /// Runs one chat turn, streaming frames through `sink`.
    ///
    /// Serialized per session by the session's turn lock. Emits exactly
    /// one terminal frame: `done` on success, `error` otherwise.
    pub async fn run_turn(
        &self,
        session: Arc<Session>,
        options: TurnOptions,
        sink: EventSink,
        cancel: CancellationToken,
    ) {
        let _turn = session.lock_turn().await;

        if sink
            .status("Orchestrator", "Starting processing", None)
            .await
            .is_err()
        {
            return;
        }

        let mut state = self.build_state(&session, &options).await;
        state.sink = Some(sink.clone());

        let outcome = tokio::time::timeout(
            self.config.turn_timeout,
            self.runtime.run(&mut state, &cancel),
        )
        .await;

        let result = match outcome {
            Ok(result) => result,
            Err(_) => {
                cancel.cancel();
                Err(EngineError::Cancelled)
            }
        };

        match result {
            Ok(()) => {
                let answer = state.settled_answer().map(str::to_string);
                match answer {
                    Some(answer) if !answer.is_empty() => {
                        self.fold_back(&session, &state, &answer).await;
                        if sink.done(&session.id).await.is_err() {
                            warn!(session = %session.id, "client went away before done frame");
                        }
                    }
                    _ => {
                        error!(session = %session.id, "turn produced no answer");
                        sink.error("No response generated from graph").await;
                    }
                }
            }
            Err(e) if e.is_cancelled() => {
                info!(session = %session.id, "turn cancelled");
                sink.error("turn cancelled").await;
            }
            Err(e) => {
                error!(session = %session.id, error = %e, "turn failed");
                sink.error(&e.to_string()).await;
            }
        }
    }

    /// Builds the per-turn state from the session and request options.
    async fn build_state(&self, session: &Arc<Session>, options: &TurnOptions) -> GraphState {
        let mut data = session.write().await;
        let new_uploads = std::mem::take(&mut data.new_uploads);

        let mut state = GraphState::new(session.id.clone(), options.message.clone());
        state.llm_model = data
            .gpt_config
            .model
            .clone()
            .unwrap_or_else(|| self.config.chat_model.clone());
        state.hybrid_rag = options.rag || data.gpt_config.hybrid_rag;
        state.deep_search = options.deep_search || data.gpt_config.deep_search;
        state.web_search = options.web_search || data.gpt_config.web_search;
        state.uploaded_doc = options.uploaded_doc || !new_uploads.is_empty();
        state.active_docs = data.uploaded_docs.clone();
        state.kb_docs = data.kb_docs.clone();
        state.new_uploads = new_uploads;
        state.messages = data.messages.clone();
        state.gpt_config = data.gpt_config.clone();
        state.summary = data.context.summary.clone();
        state
    }

    /// Writes the turn's outcome back into the session record.
    async fn fold_back(&self, session: &Arc<Session>, state: &GraphState, answer: &str) {
        let mut data = session.write().await;
        data.messages
            .push(crate::provider::message::user_message(&state.user_query));
        data.messages
            .push(crate::provider::message::assistant_message(answer));
        data.context.summary = state.summary.clone();
        data.context.last_route = state.tasks.first().map(|route| route.name().to_string());
        data.context.followup = state.followup.clone();
        data.generated_images.extend(state.new_image_urls.iter().cloned());
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("providers", &self.providers)
            .finish()
    }
}

/// Registers every node on a fresh runtime.
fn build_runtime(
    config: &EngineConfig,
    providers: &Providers,
    cache: &Arc<CacheManager>,
) -> GraphRuntime {
    let research_deps = Arc::new(ResearchDeps {
        llm: Arc::clone(&providers.llm),
        search: providers.web_search.clone(),
        max_iterations: config.max_research_iterations,
    });

    let runtime = GraphRuntime::new(Route::Orchestrator, config.max_steps)
        .register(
            Route::Orchestrator,
            Arc::new(OrchestratorNode::new(
                Arc::clone(&providers.llm),
                config.fast_model.clone(),
                config.keep_last,
                config.synthesize_multi_step,
            )),
        )
        .register(
            Route::Rag,
            Arc::new(RagNode::new(
                Arc::clone(&providers.llm),
                Arc::clone(cache),
                config.fast_model.clone(),
                config.retrieval_top_k,
            )),
        )
        .register(
            Route::WebSearch,
            Arc::new(WebSearchNode::new(
                Arc::clone(&providers.llm),
                providers.web_search.clone(),
            )),
        )
        .register(
            Route::SimpleLlm,
            Arc::new(SimpleLlmNode::new(Arc::clone(&providers.llm))),
        )
        .register(Route::Image, Arc::new(ImageNode::new(providers.image.clone())))
        .register(
            Route::Tool,
            Arc::new(ToolNode::new(
                Arc::clone(&providers.llm),
                providers.tools.clone(),
            )),
        );

    register_deep_research(runtime, &research_deps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_options_defaults() {
        let options: TurnOptions =
            serde_json::from_str(r#"{"message": "hi"}"#).unwrap_or_default();
        assert_eq!(options.message, "hi");
        assert!(!options.web_search);
        assert!(!options.rag);
        assert!(!options.deep_search);
        assert!(!options.uploaded_doc);
    }
}
