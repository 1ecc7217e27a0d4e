//! Error types for the engine.
//!
//! One `thiserror` taxonomy covers the whole crate. Nodes recover from
//! provider and parse failures locally (they write a human-readable
//! `response` and let the plan continue); only cancellation and genuine
//! internal faults propagate out of the graph runtime.

use thiserror::Error;

/// Errors produced by the engine and its collaborators.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed request, unknown session, or missing required field.
    /// Surfaced to HTTP clients as a 4xx before the graph is entered.
    #[error("invalid input: {message}")]
    InvalidInput {
        /// What was wrong with the input.
        message: String,
    },

    /// No LLM API key was configured.
    #[error("no API key configured (set OPENAI_API_KEY or CHATGRAPH_API_KEY)")]
    ApiKeyMissing,

    /// An external provider (LLM, embedding, search, image) failed or
    /// timed out. Recovered locally by the producing node.
    #[error("{provider} provider error: {message}")]
    Provider {
        /// Which provider failed.
        provider: &'static str,
        /// Provider-reported failure detail.
        message: String,
    },

    /// A streaming response broke mid-flight.
    #[error("stream error: {message}")]
    Stream {
        /// Failure detail from the stream.
        message: String,
    },

    /// An LLM returned malformed output where strict structure was
    /// demanded. Callers fall back to documented defaults.
    #[error("failed to parse {context}: {message}")]
    Parse {
        /// What was being parsed (e.g. "source selection").
        context: &'static str,
        /// Parse failure detail.
        message: String,
    },

    /// Invalid configuration, including embedding-dimension mismatches
    /// within a collection.
    #[error("configuration error: {message}")]
    Config {
        /// Configuration failure detail.
        message: String,
    },

    /// The model kept requesting tools beyond the iteration ceiling.
    #[error("tool loop exceeded {max_iterations} iterations")]
    ToolLoopExceeded {
        /// The ceiling that was hit.
        max_iterations: usize,
    },

    /// The turn's deadline elapsed or the client disconnected.
    #[error("turn cancelled")]
    Cancelled,

    /// The graph traversed more edges than the configured ceiling
    /// without reaching END.
    #[error("graph exceeded {max_steps} steps without reaching END")]
    StepCeiling {
        /// The ceiling that was hit.
        max_steps: usize,
    },

    /// Programmer bug or violated invariant. Logged and surfaced as an
    /// error frame; never masked.
    #[error("internal error: {message}")]
    Internal {
        /// Invariant or bug description.
        message: String,
    },
}

impl EngineError {
    /// Shorthand for an [`EngineError::Internal`] with a formatted message.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Shorthand for an [`EngineError::InvalidInput`].
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Whether this error represents cooperative cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
