//! Image generation leaf.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use super::complete_leaf;
use crate::error::EngineError;
use crate::graph::node::GraphNode;
use crate::graph::state::GraphState;
use crate::provider::image::ImageProvider;

/// Leaf node that turns the resolved query into an image URL.
pub struct ImageNode {
    image: Option<Arc<dyn ImageProvider>>,
}

impl ImageNode {
    /// Creates the node. `image` is `None` when no provider is configured.
    #[must_use]
    pub fn new(image: Option<Arc<dyn ImageProvider>>) -> Self {
        Self { image }
    }
}

#[async_trait]
impl GraphNode for ImageNode {
    fn name(&self) -> &'static str {
        "Image"
    }

    async fn run(&self, state: &mut GraphState) -> Result<(), EngineError> {
        let prompt = if state.resolved_query.is_empty() {
            state.user_query.clone()
        } else {
            state.resolved_query.clone()
        };

        let Some(provider) = self.image.clone() else {
            return complete_leaf(
                state,
                self.name(),
                "Error: no image provider is configured.".to_string(),
                None,
            )
            .await;
        };

        let output = match provider.generate(&prompt).await {
            Ok(url) => {
                state.new_image_urls.push(url.clone());
                format!("Generated an image for \"{prompt}\":\n{url}")
            }
            Err(e) => {
                warn!(error = %e, "image generation failed");
                format!("Error: image generation failed: {e}")
            }
        };

        complete_leaf(state, self.name(), output, None).await
    }
}
