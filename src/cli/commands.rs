//! Command dispatch.

use std::sync::Arc;

use tracing::info;

use super::parser::{Cli, Commands};
use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::server;

/// Runs the parsed CLI command.
///
/// # Errors
///
/// Returns an error on missing configuration or bind failure; the
/// process maps that to a non-zero exit code.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Serve { host, port } => {
            let config = EngineConfig::from_env()?;
            let engine = Arc::new(Engine::new(config));
            server::serve(engine, &host, port).await
        }
        Commands::Check => {
            let config = EngineConfig::from_env()?;
            info!(
                chat_model = %config.chat_model,
                fast_model = %config.fast_model,
                embedding_model = %config.embedding_model,
                vector_store = %config.vector_store_url,
                web_search = config.search_api_key.is_some(),
                "configuration resolved"
            );
            Ok(())
        }
    }
}
