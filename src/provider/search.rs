//! Web-search provider contract and Tavily-compatible adapter.
//!
//! The adapter is optional: without an API key the engine carries no
//! search provider and the web-search node degrades to its canonical
//! unavailable message.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::EngineError;

/// Default endpoint for the Tavily search API.
const TAVILY_ENDPOINT: &str = "https://api.tavily.com/search";

/// Search depth requested from the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchDepth {
    /// Fast, shallow search.
    Basic,
    /// Slower, deeper search.
    Advanced,
}

/// A single web-search result.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchHit {
    /// Page title.
    #[serde(default)]
    pub title: String,
    /// Page URL.
    #[serde(default)]
    pub url: String,
    /// Extracted snippet.
    #[serde(default)]
    pub content: String,
}

/// Trait for web-search backends.
#[async_trait]
pub trait WebSearchProvider: Send + Sync {
    /// Runs a search and returns up to `max_results` hits.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Provider`] on HTTP or API failures.
    async fn search(
        &self,
        query: &str,
        max_results: usize,
        depth: SearchDepth,
    ) -> Result<Vec<SearchHit>, EngineError>;
}

#[derive(Serialize)]
struct TavilyRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    max_results: usize,
    search_depth: SearchDepth,
}

#[derive(Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

/// Tavily-compatible web-search client.
pub struct TavilyClient {
    http: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl TavilyClient {
    /// Creates a client against the default Tavily endpoint with the
    /// given per-call deadline.
    #[must_use]
    pub fn new(api_key: impl Into<String>, call_timeout: std::time::Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(call_timeout)
            .build()
            .unwrap_or_default();
        Self {
            http,
            api_key: api_key.into(),
            endpoint: TAVILY_ENDPOINT.to_string(),
        }
    }

    /// Overrides the endpoint (for tests and self-hosted proxies).
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

impl std::fmt::Debug for TavilyClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TavilyClient")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

#[async_trait]
impl WebSearchProvider for TavilyClient {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
        depth: SearchDepth,
    ) -> Result<Vec<SearchHit>, EngineError> {
        let body = TavilyRequest {
            api_key: &self.api_key,
            query,
            max_results,
            search_depth: depth,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::Provider {
                provider: "web-search",
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::Provider {
                provider: "web-search",
                message: format!("search API returned {status}"),
            });
        }

        let parsed: TavilyResponse =
            response.json().await.map_err(|e| EngineError::Provider {
                provider: "web-search",
                message: format!("malformed search response: {e}"),
            })?;

        debug!(query, hits = parsed.results.len(), "web search completed");
        Ok(parsed.results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_serialization() {
        let json = serde_json::to_string(&SearchDepth::Advanced).unwrap_or_default();
        assert_eq!(json, "\"advanced\"");
        let json = serde_json::to_string(&SearchDepth::Basic).unwrap_or_default();
        assert_eq!(json, "\"basic\"");
    }

    #[test]
    fn test_response_parsing_defaults() {
        let parsed: TavilyResponse = serde_json::from_str("{}").unwrap_or(TavilyResponse {
            results: Vec::new(),
        });
        assert!(parsed.results.is_empty());

        let parsed: TavilyResponse = serde_json::from_str(
            r#"{"results": [{"title": "T", "url": "https://e.com", "content": "snippet"}]}"#,
        )
        .unwrap_or(TavilyResponse {
            results: Vec::new(),
        });
        assert_eq!(parsed.results.len(), 1);
        assert_eq!(parsed.results[0].title, "T");
    }
}
