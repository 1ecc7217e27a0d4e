//! Embedding provider contract.
//!
//! The core only assumes a stable dimensionality per collection; the
//! concrete model lives behind this trait.

use async_trait::async_trait;

use crate::error::EngineError;

/// Trait for dense embedding backends.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Fixed dimensionality of the vectors this provider produces.
    fn dimensions(&self) -> usize;

    /// Embeds a batch of texts, one vector per input in order.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Provider`] on API failures or timeouts.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EngineError>;

    /// Embeds a single query string.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Provider`] on API failures or timeouts.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EngineError> {
        let mut vectors = self.embed(std::slice::from_ref(&text.to_string())).await?;
        vectors.pop().ok_or_else(|| EngineError::Provider {
            provider: "embedding",
            message: "provider returned no vectors for query".to_string(),
        })
    }
}
