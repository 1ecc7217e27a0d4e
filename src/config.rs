//! Engine configuration with builder pattern and environment variable support.
//!
//! Configuration is resolved in order: explicit values → environment variables → defaults.

use std::time::Duration;

use crate::error::EngineError;

/// Default chat model for answer generation.
const DEFAULT_CHAT_MODEL: &str = "gpt-4o";
/// Default fast model for classification, rewriting, and judging.
const DEFAULT_FAST_MODEL: &str = "gpt-4o-mini";
/// Default embedding model.
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
/// Embedding dimensionality for the default model.
const DEFAULT_EMBEDDING_DIMENSIONS: usize = 1536;
/// Default image generation model.
const DEFAULT_IMAGE_MODEL: &str = "dall-e-3";
/// Message-history turns kept verbatim; older turns are summarized.
const DEFAULT_KEEP_LAST: usize = 3;
/// Hard ceiling on graph edge traversals per turn.
const DEFAULT_MAX_STEPS: usize = 32;
/// Deep-research iteration ceiling.
const DEFAULT_MAX_RESEARCH_ITERATIONS: usize = 5;
/// End-to-end turn deadline in seconds.
const DEFAULT_TURN_TIMEOUT_SECS: u64 = 120;
/// Per-external-call deadline in seconds.
const DEFAULT_CALL_TIMEOUT_SECS: u64 = 30;
/// Retrieval depth per source side.
const DEFAULT_RETRIEVAL_TOP_K: usize = 6;

/// Configuration for the engine and its providers.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// API key for the LLM/embedding/image provider.
    pub api_key: String,
    /// Optional base URL override (for proxies or compatible APIs).
    pub base_url: Option<String>,
    /// Model for answer generation and synthesis.
    pub chat_model: String,
    /// Model for classification, query rewriting, and the follow-up judge.
    pub fast_model: String,
    /// Embedding model.
    pub embedding_model: String,
    /// Embedding dimensionality. Collections reject mismatched vectors.
    pub embedding_dimensions: usize,
    /// Image generation model.
    pub image_model: String,
    /// Web-search API key. `None` turns the web-search node into a no-op.
    pub search_api_key: Option<String>,
    /// Vector store location. The special value `"memory"` selects the
    /// in-process store.
    pub vector_store_url: String,
    /// Vector store API key, for remote stores.
    pub vector_store_api_key: Option<String>,
    /// Message-history turns kept verbatim before summarization.
    pub keep_last: usize,
    /// Graph edge-traversal ceiling per turn.
    pub max_steps: usize,
    /// Deep-research iteration ceiling.
    pub max_research_iterations: usize,
    /// End-to-end turn deadline.
    pub turn_timeout: Duration,
    /// Deadline for each external call.
    pub call_timeout: Duration,
    /// Retrieval depth per source side.
    pub retrieval_top_k: usize,
    /// When true, multi-step plans end with an LLM synthesis pass instead
    /// of concatenating intermediate outputs.
    pub synthesize_multi_step: bool,
}

impl EngineConfig {
    /// Creates a new builder for `EngineConfig`.
    #[must_use]
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Creates configuration from environment variables with defaults.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ApiKeyMissing`] if no API key is found.
    pub fn from_env() -> Result<Self, EngineError> {
        Self::builder().from_env().build()
    }
}

/// Builder for [`EngineConfig`].
#[derive(Debug, Clone, Default)]
pub struct EngineConfigBuilder {
    api_key: Option<String>,
    base_url: Option<String>,
    chat_model: Option<String>,
    fast_model: Option<String>,
    embedding_model: Option<String>,
    embedding_dimensions: Option<usize>,
    image_model: Option<String>,
    search_api_key: Option<String>,
    vector_store_url: Option<String>,
    vector_store_api_key: Option<String>,
    keep_last: Option<usize>,
    max_steps: Option<usize>,
    max_research_iterations: Option<usize>,
    turn_timeout: Option<Duration>,
    call_timeout: Option<Duration>,
    retrieval_top_k: Option<usize>,
    synthesize_multi_step: Option<bool>,
}

impl EngineConfigBuilder {
    /// Populates unset fields from environment variables.
    #[must_use]
    pub fn from_env(mut self) -> Self {
        if self.api_key.is_none() {
            self.api_key = std::env::var("OPENAI_API_KEY")
                .or_else(|_| std::env::var("CHATGRAPH_API_KEY"))
                .ok();
        }
        if self.base_url.is_none() {
            self.base_url = std::env::var("OPENAI_BASE_URL")
                .or_else(|_| std::env::var("CHATGRAPH_BASE_URL"))
                .ok();
        }
        if self.chat_model.is_none() {
            self.chat_model = std::env::var("CHATGRAPH_CHAT_MODEL").ok();
        }
        if self.fast_model.is_none() {
            self.fast_model = std::env::var("CHATGRAPH_FAST_MODEL").ok();
        }
        if self.embedding_model.is_none() {
            self.embedding_model = std::env::var("CHATGRAPH_EMBEDDING_MODEL").ok();
        }
        if self.image_model.is_none() {
            self.image_model = std::env::var("CHATGRAPH_IMAGE_MODEL").ok();
        }
        if self.search_api_key.is_none() {
            self.search_api_key = std::env::var("TAVILY_API_KEY").ok();
        }
        if self.vector_store_url.is_none() {
            self.vector_store_url = std::env::var("VECTOR_STORE_URL").ok();
        }
        if self.vector_store_api_key.is_none() {
            self.vector_store_api_key = std::env::var("VECTOR_STORE_API_KEY").ok();
        }
        if self.keep_last.is_none() {
            self.keep_last = std::env::var("CHATGRAPH_KEEP_LAST")
                .ok()
                .and_then(|v| v.parse().ok());
        }
        if self.synthesize_multi_step.is_none() {
            self.synthesize_multi_step = std::env::var("CHATGRAPH_SYNTHESIZE_MULTI_STEP")
                .ok()
                .and_then(|v| v.parse().ok());
        }
        self
    }

    /// Sets the API key.
    #[must_use]
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sets the base URL override.
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Sets the chat model.
    #[must_use]
    pub fn chat_model(mut self, model: impl Into<String>) -> Self {
        self.chat_model = Some(model.into());
        self
    }

    /// Sets the fast model.
    #[must_use]
    pub fn fast_model(mut self, model: impl Into<String>) -> Self {
        self.fast_model = Some(model.into());
        self
    }

    /// Sets the embedding model.
    #[must_use]
    pub fn embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = Some(model.into());
        self
    }

    /// Sets the embedding dimensionality.
    #[must_use]
    pub const fn embedding_dimensions(mut self, n: usize) -> Self {
        self.embedding_dimensions = Some(n);
        self
    }

    /// Sets the image model.
    #[must_use]
    pub fn image_model(mut self, model: impl Into<String>) -> Self {
        self.image_model = Some(model.into());
        self
    }

    /// Sets the web-search API key.
    #[must_use]
    pub fn search_api_key(mut self, key: impl Into<String>) -> Self {
        self.search_api_key = Some(key.into());
        self
    }

    /// Sets the vector store URL (`"memory"` for in-process).
    #[must_use]
    pub fn vector_store_url(mut self, url: impl Into<String>) -> Self {
        self.vector_store_url = Some(url.into());
        self
    }

    /// Sets how many history turns are kept verbatim.
    #[must_use]
    pub const fn keep_last(mut self, n: usize) -> Self {
        self.keep_last = Some(n);
        self
    }

    /// Sets the graph step ceiling.
    #[must_use]
    pub const fn max_steps(mut self, n: usize) -> Self {
        self.max_steps = Some(n);
        self
    }

    /// Sets the deep-research iteration ceiling.
    #[must_use]
    pub const fn max_research_iterations(mut self, n: usize) -> Self {
        self.max_research_iterations = Some(n);
        self
    }

    /// Sets the end-to-end turn deadline.
    #[must_use]
    pub const fn turn_timeout(mut self, duration: Duration) -> Self {
        self.turn_timeout = Some(duration);
        self
    }

    /// Sets the per-external-call deadline.
    #[must_use]
    pub const fn call_timeout(mut self, duration: Duration) -> Self {
        self.call_timeout = Some(duration);
        self
    }

    /// Sets the retrieval depth per source side.
    #[must_use]
    pub const fn retrieval_top_k(mut self, n: usize) -> Self {
        self.retrieval_top_k = Some(n);
        self
    }

    /// Selects LLM synthesis over concatenation for multi-step plans.
    #[must_use]
    pub const fn synthesize_multi_step(mut self, on: bool) -> Self {
        self.synthesize_multi_step = Some(on);
        self
    }

    /// Builds the [`EngineConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ApiKeyMissing`] if no API key was set.
    pub fn build(self) -> Result<EngineConfig, EngineError> {
        let api_key = self.api_key.ok_or(EngineError::ApiKeyMissing)?;

        Ok(EngineConfig {
            api_key,
            base_url: self.base_url,
            chat_model: self
                .chat_model
                .unwrap_or_else(|| DEFAULT_CHAT_MODEL.to_string()),
            fast_model: self
                .fast_model
                .unwrap_or_else(|| DEFAULT_FAST_MODEL.to_string()),
            embedding_model: self
                .embedding_model
                .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
            embedding_dimensions: self
                .embedding_dimensions
                .unwrap_or(DEFAULT_EMBEDDING_DIMENSIONS),
            image_model: self
                .image_model
                .unwrap_or_else(|| DEFAULT_IMAGE_MODEL.to_string()),
            search_api_key: self.search_api_key,
            vector_store_url: self
                .vector_store_url
                .unwrap_or_else(|| "memory".to_string()),
            vector_store_api_key: self.vector_store_api_key,
            keep_last: self.keep_last.unwrap_or(DEFAULT_KEEP_LAST),
            max_steps: self.max_steps.unwrap_or(DEFAULT_MAX_STEPS),
            max_research_iterations: self
                .max_research_iterations
                .unwrap_or(DEFAULT_MAX_RESEARCH_ITERATIONS),
            turn_timeout: self
                .turn_timeout
                .unwrap_or(Duration::from_secs(DEFAULT_TURN_TIMEOUT_SECS)),
            call_timeout: self
                .call_timeout
                .unwrap_or(Duration::from_secs(DEFAULT_CALL_TIMEOUT_SECS)),
            retrieval_top_k: self.retrieval_top_k.unwrap_or(DEFAULT_RETRIEVAL_TOP_K),
            synthesize_multi_step: self.synthesize_multi_step.unwrap_or(false),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = EngineConfig::builder()
            .api_key("test-key")
            .build()
            .unwrap_or_else(|_| unreachable!());
        assert_eq!(config.api_key, "test-key");
        assert_eq!(config.chat_model, DEFAULT_CHAT_MODEL);
        assert_eq!(config.fast_model, DEFAULT_FAST_MODEL);
        assert_eq!(config.keep_last, DEFAULT_KEEP_LAST);
        assert_eq!(config.max_steps, DEFAULT_MAX_STEPS);
        assert_eq!(config.vector_store_url, "memory");
        assert!(!config.synthesize_multi_step);
    }

    #[test]
    fn test_builder_missing_api_key() {
        let result = EngineConfig::builder().build();
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_custom_values() {
        let config = EngineConfig::builder()
            .api_key("key")
            .chat_model("gpt-4o-mini")
            .keep_last(5)
            .max_steps(16)
            .turn_timeout(Duration::from_secs(60))
            .synthesize_multi_step(true)
            .build()
            .unwrap_or_else(|_| unreachable!());
        assert_eq!(config.chat_model, "gpt-4o-mini");
        assert_eq!(config.keep_last, 5);
        assert_eq!(config.max_steps, 16);
        assert_eq!(config.turn_timeout, Duration::from_secs(60));
        assert!(config.synthesize_multi_step);
    }
}
