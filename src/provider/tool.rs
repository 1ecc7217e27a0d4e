//! Tool types for external function-calling.
//!
//! Provider-agnostic definitions, calls, and results, plus the contract
//! for the external tool runtime a session may be connected to. The tool
//! node drives the model ↔ runtime round-trip; this module only carries
//! the shapes that cross that boundary.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// A tool definition that can be sent to an LLM for function-calling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name (must match the runtime's dispatch table).
    pub name: String,
    /// Human-readable description of what the tool does.
    pub description: String,
    /// JSON Schema object describing the tool's parameters.
    pub parameters: serde_json::Value,
}

/// A tool call requested by the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique identifier for this call (assigned by the provider).
    pub id: String,
    /// Name of the tool to invoke.
    pub name: String,
    /// JSON-encoded arguments for the tool.
    pub arguments: String,
}

/// The result of executing a tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// ID of the tool call this result corresponds to.
    pub tool_call_id: String,
    /// Result content (JSON string on success, error message on failure).
    pub content: String,
    /// Whether this result represents an error.
    pub is_error: bool,
}

/// Contract for the external tool-integration runtime.
///
/// The engine does not know how tools are connected or executed; it only
/// asks the runtime which tools a session exposes and hands tool calls
/// over for execution. A runtime that can't execute a call returns a
/// [`ToolResult`] with `is_error = true` rather than an `Err`, so the
/// model can recover within the loop.
#[async_trait]
pub trait ToolRuntime: Send + Sync {
    /// Tool definitions connected for the given session.
    async fn definitions(&self, session_id: &str) -> Result<Vec<ToolDefinition>, EngineError>;

    /// Executes a single tool call on behalf of a session.
    async fn execute(&self, session_id: &str, call: &ToolCall) -> Result<ToolResult, EngineError>;
}
