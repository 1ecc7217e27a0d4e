//! Execution graph: state envelope, node trait, and runtime.

pub mod node;
pub mod runtime;
pub mod state;

pub use node::GraphNode;
pub use runtime::GraphRuntime;
pub use state::{GraphState, IntermediateResult, ResearchFinding, ResearchState, Route};
