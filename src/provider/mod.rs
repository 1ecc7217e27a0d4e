//! External provider contracts and implementations.
//!
//! Every outbound dependency of the engine — LLM chat, embeddings, web
//! search, image generation, external tools — lives behind a trait in
//! this module. Nodes receive the bundled [`Providers`] rather than
//! importing concrete clients.

pub mod embedding;
pub mod image;
pub mod llm;
pub mod message;
pub mod openai;
pub mod search;
pub mod tool;

use std::sync::Arc;

pub use embedding::EmbeddingProvider;
pub use image::ImageProvider;
pub use llm::{ChatStream, LlmProvider};
pub use message::{
    ChatMessage, ChatRequest, ChatResponse, Role, TokenUsage, assistant_message,
    assistant_tool_calls_message, system_message, tool_message, user_message,
};
pub use openai::OpenAiProvider;
pub use search::{SearchDepth, SearchHit, TavilyClient, WebSearchProvider};
pub use tool::{ToolCall, ToolDefinition, ToolResult, ToolRuntime};

use crate::config::EngineConfig;

/// The bundle of providers handed to nodes.
///
/// Optional members degrade gracefully: a missing web-search provider
/// turns the web-search node into a no-op, a missing tool runtime means
/// the tool node reports no connected tools.
#[derive(Clone)]
pub struct Providers {
    /// Chat completion provider.
    pub llm: Arc<dyn LlmProvider>,
    /// Dense embedding provider.
    pub embeddings: Arc<dyn EmbeddingProvider>,
    /// Web-search provider, when configured.
    pub web_search: Option<Arc<dyn WebSearchProvider>>,
    /// Image generation provider, when configured.
    pub image: Option<Arc<dyn ImageProvider>>,
    /// External tool runtime, when connected.
    pub tools: Option<Arc<dyn ToolRuntime>>,
}

impl Providers {
    /// Wires the default provider set from configuration.
    ///
    /// One `OpenAI`-compatible client backs chat, embeddings, and images;
    /// web search is present only when a search API key is configured.
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        let openai = Arc::new(OpenAiProvider::new(config));
        let web_search: Option<Arc<dyn WebSearchProvider>> =
            config.search_api_key.as_deref().map(|key| {
                Arc::new(TavilyClient::new(key, config.call_timeout)) as Arc<dyn WebSearchProvider>
            });

        Self {
            llm: openai.clone(),
            embeddings: openai.clone(),
            web_search,
            image: Some(openai),
            tools: None,
        }
    }

    /// Replaces the tool runtime.
    #[must_use]
    pub fn with_tools(mut self, tools: Arc<dyn ToolRuntime>) -> Self {
        self.tools = Some(tools);
        self
    }
}

impl std::fmt::Debug for Providers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Providers")
            .field("llm", &self.llm.name())
            .field("web_search", &self.web_search.is_some())
            .field("image", &self.image.is_some())
            .field("tools", &self.tools.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_without_search_key() {
        let config = EngineConfig::builder()
            .api_key("test")
            .build()
            .unwrap_or_else(|_| unreachable!());
        let providers = Providers::from_config(&config);
        assert_eq!(providers.llm.name(), "openai");
        assert!(providers.web_search.is_none());
        assert!(providers.image.is_some());
        assert!(providers.tools.is_none());
    }

    #[test]
    fn test_from_config_with_search_key() {
        let config = EngineConfig::builder()
            .api_key("test")
            .search_api_key("tvly-key")
            .build()
            .unwrap_or_else(|_| unreachable!());
        let providers = Providers::from_config(&config);
        assert!(providers.web_search.is_some());
    }
}
