//! Pluggable LLM provider trait.
//!
//! Implementations translate provider-agnostic [`ChatRequest`]/[`ChatResponse`]
//! into provider-specific SDK calls. This keeps all node logic decoupled
//! from any particular LLM vendor.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;

use super::message::{ChatRequest, ChatResponse};
use crate::error::EngineError;

/// A stream of incremental text deltas from a streaming completion.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<String, EngineError>> + Send>>;

/// Trait for LLM provider backends.
///
/// Implementations handle the transport layer (HTTP, SDK calls, retries)
/// for a specific provider while presenting a uniform interface to nodes.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name (e.g., `"openai"`).
    fn name(&self) -> &'static str;

    /// Executes a chat completion request.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] on API failures, timeouts, or parse errors.
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, EngineError>;

    /// Executes a streaming chat completion request.
    ///
    /// Returns a stream of text chunks as they arrive from the provider,
    /// preserving the provider's byte order.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] on connection or streaming failures.
    async fn chat_stream(&self, request: &ChatRequest) -> Result<ChatStream, EngineError>;
}
