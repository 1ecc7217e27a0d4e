//! Image generation provider contract.

use async_trait::async_trait;

use crate::error::EngineError;

/// Trait for image generation backends.
///
/// The engine only needs a URL back; hosting and format are the
/// provider's concern.
#[async_trait]
pub trait ImageProvider: Send + Sync {
    /// Generates one image for the prompt and returns its URL.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Provider`] on API failures or when the
    /// provider returns no image.
    async fn generate(&self, prompt: &str) -> Result<String, EngineError>;
}
