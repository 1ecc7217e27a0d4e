//! Typed per-turn state envelope and routing.
//!
//! One [`GraphState`] is threaded through every node of a turn. Routing
//! is a closed enum; string aliases are accepted only through
//! [`Route::normalize`], which is the single place the orchestrator maps
//! analyzer output onto the node set.

use serde::Serialize;

use crate::provider::message::ChatMessage;
use crate::session::{Document, GptConfig};
use crate::stream::EventSink;

/// Closed set of routing targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    /// Planning and dispatch node.
    Orchestrator,
    /// Retrieval-augmented generation leaf.
    Rag,
    /// Web-search leaf.
    WebSearch,
    /// Plain generation leaf.
    SimpleLlm,
    /// Deep-research entry (initialize).
    DeepResearch,
    /// Image generation leaf.
    Image,
    /// External tool invocation leaf.
    Tool,
    /// Deep-research internal: decompose the query.
    PlanResearch,
    /// Deep-research internal: run searches for the current queries.
    ExecuteResearch,
    /// Deep-research internal: assess confidence and gaps.
    AnalyzeGaps,
    /// Deep-research internal: produce the final report.
    SynthesizeReport,
    /// Terminate the turn.
    End,
}

impl Route {
    /// Canonical display name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Orchestrator => "Orchestrator",
            Self::Rag => "RAG",
            Self::WebSearch => "WebSearch",
            Self::SimpleLlm => "SimpleLLM",
            Self::DeepResearch => "DeepResearch",
            Self::Image => "Image",
            Self::Tool => "Tool",
            Self::PlanResearch => "plan_research",
            Self::ExecuteResearch => "execute_research",
            Self::AnalyzeGaps => "analyze_gaps",
            Self::SynthesizeReport => "synthesize_report",
            Self::End => "END",
        }
    }

    /// Maps an accepted alias onto the closed node set.
    ///
    /// Canonicalization is case-insensitive and idempotent: feeding a
    /// canonical name back in returns the same route. Unknown strings
    /// return `None`.
    #[must_use]
    pub fn normalize(raw: &str) -> Option<Self> {
        let lowered = raw.trim().to_lowercase();
        match lowered.as_str() {
            "orchestrator" => Some(Self::Orchestrator),
            "rag" => Some(Self::Rag),
            "web_search" | "websearch" | "search" => Some(Self::WebSearch),
            "simple_llm" | "simplellm" | "llm" => Some(Self::SimpleLlm),
            "deepresearch" | "deep_research" | "deep_search" => Some(Self::DeepResearch),
            "image" | "image_generation" => Some(Self::Image),
            "tool" | "tools" | "mcp" => Some(Self::Tool),
            "plan_research" => Some(Self::PlanResearch),
            "execute_research" => Some(Self::ExecuteResearch),
            "analyze_gaps" => Some(Self::AnalyzeGaps),
            "synthesize_report" => Some(Self::SynthesizeReport),
            "end" => Some(Self::End),
            _ => None,
        }
    }

    /// Whether this target is a leaf the orchestrator can schedule.
    #[must_use]
    pub const fn is_plannable(self) -> bool {
        matches!(
            self,
            Self::Rag | Self::WebSearch | Self::SimpleLlm | Self::DeepResearch | Self::Image | Self::Tool
        )
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Record of one completed leaf within a plan.
#[derive(Debug, Clone, Serialize)]
pub struct IntermediateResult {
    /// Node that produced the output.
    pub node: String,
    /// The resolved query the node ran with.
    pub query: String,
    /// The node's output (possibly an error string).
    pub output: String,
    /// Node-specific metadata (strategy, counts, iterations, …).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// One finding gathered during a deep-research iteration.
#[derive(Debug, Clone, Serialize)]
pub struct ResearchFinding {
    /// The sub-query that produced this finding.
    pub query: String,
    /// Finding origin (currently always `"web"`).
    pub source: String,
    /// Concatenated title + snippet text.
    pub content: String,
    /// Source URLs backing the finding.
    pub urls: Vec<String>,
    /// Iteration the finding was gathered in.
    pub iteration: usize,
}

/// Embedded state of an in-flight deep-research run.
#[derive(Debug, Clone, Default)]
pub struct ResearchState {
    /// Sub-questions planned for iteration 0.
    pub plan: Vec<String>,
    /// Completed iterations.
    pub iteration: usize,
    /// Iteration ceiling.
    pub max_iterations: usize,
    /// All findings across iterations.
    pub findings: Vec<ResearchFinding>,
    /// Follow-up questions driving the next iteration.
    pub knowledge_gaps: Vec<String>,
    /// Latest confidence estimate from gap analysis.
    pub confidence: f32,
    /// URLs of every source consulted, in encounter order.
    pub sources: Vec<String>,
}

impl ResearchState {
    /// Fresh research record with the given iteration ceiling.
    #[must_use]
    pub fn new(max_iterations: usize) -> Self {
        Self {
            max_iterations,
            ..Self::default()
        }
    }

    /// Unique source URLs in first-seen order, capped at `limit`.
    #[must_use]
    pub fn unique_sources(&self, limit: usize) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.sources
            .iter()
            .filter(|url| !url.is_empty() && seen.insert(url.as_str()))
            .take(limit)
            .cloned()
            .collect()
    }
}

/// Per-turn mutable state threaded through all nodes.
#[derive(Debug)]
pub struct GraphState {
    /// Owning session id.
    pub session_id: String,
    /// The user's message as received.
    pub user_query: String,
    /// The rewritten query the current leaf actually runs with.
    pub resolved_query: String,
    /// Ordered task plan.
    pub tasks: Vec<Route>,
    /// Index of the current task within `tasks`.
    pub task_index: usize,
    /// Model used for answer generation this turn.
    pub llm_model: String,
    /// Hybrid retrieval toggle.
    pub hybrid_rag: bool,
    /// Deep-research toggle.
    pub deep_search: bool,
    /// Web-search toggle (advanced depth + detailed formatting).
    pub web_search: bool,
    /// Whether a document arrived with this turn.
    pub uploaded_doc: bool,
    /// User documents active for retrieval.
    pub active_docs: Vec<Document>,
    /// Knowledge-base documents.
    pub kb_docs: Vec<Document>,
    /// Documents from the latest upload (new-upload latch input).
    pub new_uploads: Vec<Document>,
    /// Normalized message history.
    pub messages: Vec<ChatMessage>,
    /// Session GPT configuration.
    pub gpt_config: GptConfig,
    /// Next routing decision.
    pub route: Route,
    /// Output of the most recent leaf; drained by the orchestrator.
    pub response: Option<String>,
    /// Completed-leaf log for this turn.
    pub intermediate_results: Vec<IntermediateResult>,
    /// Final synthesized answer; set exactly once at termination.
    pub final_answer: Option<String>,
    /// Rolling session summary (input and output of summarization).
    pub summary: String,
    /// Deep-research record, present while the subgraph runs.
    pub research: Option<ResearchState>,
    /// Streaming sink, when the caller wants incremental output.
    pub sink: Option<EventSink>,
    /// Set once the orchestrator has produced a plan for this turn.
    pub planned: bool,
    /// Image URLs generated this turn; merged into the session after.
    pub new_image_urls: Vec<String>,
    /// Advisory follow-up verdict recorded for the session context.
    pub followup: Option<crate::session::FollowupVerdict>,
}

impl GraphState {
    /// Creates the state for a new turn entering at the orchestrator.
    #[must_use]
    pub fn new(session_id: impl Into<String>, user_query: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            user_query: user_query.into(),
            resolved_query: String::new(),
            tasks: Vec::new(),
            task_index: 0,
            llm_model: String::new(),
            hybrid_rag: false,
            deep_search: false,
            web_search: false,
            uploaded_doc: false,
            active_docs: Vec::new(),
            kb_docs: Vec::new(),
            new_uploads: Vec::new(),
            messages: Vec::new(),
            gpt_config: GptConfig::default(),
            route: Route::Orchestrator,
            response: None,
            intermediate_results: Vec::new(),
            final_answer: None,
            summary: String::new(),
            research: None,
            sink: None,
            planned: false,
            new_image_urls: Vec::new(),
            followup: None,
        }
    }

    /// The task currently being executed, if a plan exists.
    #[must_use]
    pub fn current_task(&self) -> Option<Route> {
        self.tasks.get(self.task_index).copied()
    }

    /// Whether another task follows the current one.
    #[must_use]
    pub const fn has_next_task(&self) -> bool {
        self.task_index + 1 < self.tasks.len()
    }

    /// Advances to the next task. Returns the new current task.
    ///
    /// Callers must check [`GraphState::has_next_task`] first; advancing
    /// past the end leaves the index clamped at the last task.
    pub fn advance_task(&mut self) -> Option<Route> {
        if self.has_next_task() {
            self.task_index += 1;
        }
        self.current_task()
    }

    /// Appends a completed-leaf record.
    pub fn push_intermediate(
        &mut self,
        node: &str,
        query: impl Into<String>,
        output: impl Into<String>,
        metadata: Option<serde_json::Value>,
    ) {
        self.intermediate_results.push(IntermediateResult {
            node: node.to_string(),
            query: query.into(),
            output: output.into(),
            metadata,
        });
    }

    /// Takes the pending leaf response, leaving `None`.
    pub fn take_response(&mut self) -> Option<String> {
        self.response.take()
    }

    /// The answer a terminated turn settles on: `final_answer` when set,
    /// otherwise the pending `response`.
    #[must_use]
    pub fn settled_answer(&self) -> Option<&str> {
        self.final_answer
            .as_deref()
            .or(self.response.as_deref())
    }
}
