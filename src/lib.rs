//! Graph-orchestrated conversational AI backend.
//!
//! Accepts a user turn plus session context, decides which capabilities
//! to invoke (plain generation, retrieval over uploaded documents and a
//! curated knowledge base, web search, iterative deep research, image
//! generation, external tools), executes them as a possibly multi-step
//! plan, and streams one synthesized answer back to the caller.
//!
//! # Architecture
//!
//! ```text
//! POST /chat/stream → Orchestrator (plan, rewrite, dispatch)
//!   ├── RAG (source selection → parallel dense/lexical search → answer)
//!   ├── WebSearch (adapter → numbered sources → formatted answer)
//!   ├── DeepResearch (plan → execute → gap-analyze → loop → synthesize)
//!   ├── SimpleLLM / Image / Tool
//!   └── back to Orchestrator → next step or final answer → done frame
//! ```
//!
//! The graph runtime threads one mutable state envelope through the
//! nodes; routing is a closed enum with a hard step ceiling; every node
//! writes incremental output through the streaming multiplexer.

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod extract;
pub mod graph;
pub mod nodes;
pub mod prompts;
pub mod provider;
pub mod retrieval;
pub mod server;
pub mod session;
pub mod stream;

// Re-export key types
pub use config::EngineConfig;
pub use engine::{Engine, TurnOptions};
pub use error::EngineError;
pub use graph::{GraphNode, GraphRuntime, GraphState, Route};
pub use provider::Providers;
pub use retrieval::{CacheManager, RetrievalIndex};
pub use session::{Document, GptConfig, Session, SessionStore};
pub use stream::{EventSink, StreamFrame};
