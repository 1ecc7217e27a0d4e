//! System prompts and template builders for all nodes.
//!
//! Prompts are the core instructions behind each LLM call. Template
//! builders format the per-turn context (history, retrieved chunks,
//! search hits, findings) into user messages.

use std::fmt::Write;

use crate::graph::state::{ResearchFinding, Route};
use crate::provider::message::ChatMessage;
use crate::provider::search::SearchHit;

/// Base system prompt for retrieval-augmented answers.
pub const RAG_BASE_PROMPT: &str = "You are a retrieval-augmented assistant. \
Answer using only the provided context sections. Be direct, cite specifics \
from the context, and avoid meta-commentary about sources unless asked.";

/// System prompt for plain generation.
pub const SIMPLE_SYSTEM_PREFIX: &str = "You are a helpful assistant. Answer \
clearly and concisely, using the conversation context when it is relevant.";

/// Detailed formatter prompt for web-search answers (toggle on).
pub const WEBSEARCH_DETAILED_PROMPT: &str = "You are a helpful assistant. Format \
the following search results into a clear, structured answer with headings, \
bullet points, and numbered lists. Always cite sources as [Source X] and end \
with a 'Sources Used' section listing titles and URLs.";

/// Concise formatter prompt for web-search answers (toggle off).
pub const WEBSEARCH_CONCISE_PROMPT: &str = "Provide a concise answer (3-5 \
sentences) based only on the search results. Cite as [Source X].";

/// Framing prompt shared by all deep-research LLM calls.
pub const DEEP_RESEARCH_PROMPT: &str = "You are a deep research assistant. You \
conduct comprehensive multi-iteration research: decompose questions, gather \
evidence, identify gaps, and synthesize well-structured reports grounded in \
the gathered sources.";

/// System prompt for the history summarizer.
pub const SUMMARIZER_PROMPT: &str = "Summarize the conversation so far in 3-5 \
sentences. Preserve named entities, decisions, and open questions. Output only \
the summary.";

/// System prompt for the query analyzer that produces the task plan.
pub const QUERY_ANALYZER_PROMPT: &str = r#"You are a query analyzer for a
multi-capability assistant. Decide which processing nodes should handle the
user's request and in what order.

Available nodes:
- "RAG": answer from uploaded documents and/or the knowledge base
- "WebSearch": answer from live web results
- "SimpleLLM": plain generation from the model's own knowledge
- "Image": generate an image from a description
- "Tool": invoke a connected external tool

Rules:
- Most queries need exactly one node.
- Use several nodes only when the request has clearly sequential parts
  (e.g. research something, then draft from the findings).
- Prefer "SimpleLLM" for greetings, chit-chat, and general knowledge.

Respond with a single JSON object and nothing else:
{"execution_order": ["NodeName", ...]}"#;

/// System prompt for the step-wise query rewriter.
pub const QUERY_REWRITE_PROMPT: &str = "You rewrite queries between plan steps. \
Given the user's original goal, the full plan, the current step, and the most \
recent step's result, emit one self-contained query for the current step. \
Incorporate any fact the current step needs (a name, topic, or list) from the \
previous result. Output only the rewritten query.";

/// System prompt for the advisory follow-up judge.
pub const FOLLOWUP_JUDGE_PROMPT: &str = r#"You are a routing judge. Decide if
the NEW user message is a FOLLOW-UP in the same thread that should keep using
the same sources (uploaded documents and/or knowledge base). Consider the
conversation and the presence of docs/KB in the session.
Output STRICT JSON with keys: is_followup (bool), should_reuse_sources (bool),
confidence (0..1), rationale (short string)."#;

/// Builds the source-selection classifier prompt.
///
/// The decision rules are ordered; the classifier must follow them top
/// to bottom and answer in strict JSON.
#[must_use]
pub fn build_source_selection_prompt(
    query: &str,
    has_user_docs: bool,
    has_kb: bool,
    custom_instruction: &str,
) -> String {
    let kb_status = if has_kb { "Available" } else { "Not Available" };
    let instruction = if custom_instruction.trim().is_empty() {
        "General assistant"
    } else {
        custom_instruction
    };
    format!(
        r#"You are a precise routing agent. Analyze the user's query and the
system's state to decide which knowledge source to use.

## System State
* User Query: "{query}"
* User documents present: {has_user_docs}
* Knowledge Base (KB): {kb_status}
* Custom Instructions: "{instruction}"

## Decision Logic (follow in this exact order)
1. If a new document was just uploaded AND the query is generic ("summarize
this", "explain", "key points"), the decision MUST be "user_docs_only".
2. If the query asks for a comparison, review, or validation AND the custom
instructions imply a standard of comparison (e.g. "You are a resume
reviewer"), the decision MUST be "both" (if the KB is available).
3. If the query asks for an explanation requiring external domain knowledge
the KB supplies, the decision is "both" (if the KB is available).
4. For other specific queries, default to "user_docs_only" when user
documents are available.
5. If no user documents are available or the query is general, use "kb_only"
when the KB is relevant; otherwise "none".

## Output
Respond with a single valid JSON object and nothing else:
{{"use_user_docs": true/false, "use_kb": true/false, "search_strategy":
"user_docs_only" | "kb_only" | "both" | "none", "reasoning": "one line"}}"#
    )
}

/// Combines the RAG base prompt, custom instruction, and source-aware
/// response rules into the generation system prompt.
#[must_use]
pub fn build_rag_system_prompt(custom_instruction: &str) -> String {
    let custom = if custom_instruction.trim().is_empty() {
        "No custom instructions provided."
    } else {
        custom_instruction
    };
    format!(
        "{RAG_BASE_PROMPT}\n\n---\n# CUSTOM CONFIGURATION\n{custom}\n\n---\n\
# SOURCE-AWARE RESPONSE RULES\n\
- Only use the provided context sections in your response.\n\
- If only user-document context is provided, focus exclusively on it.\n\
- If only knowledge-base context is provided, focus on standards and guidelines.\n\
- If both are provided, integrate them appropriately.\n\
- If no retrieval context is present, use general knowledge and the conversation.\n\
- For comparisons, use a structured format; for summaries, clear paragraphs."
    )
}

/// Renders the last `limit` history turns as `Speaker: text` lines.
#[must_use]
pub fn render_recent_turns(messages: &[ChatMessage], limit: usize) -> String {
    let turns: Vec<String> = messages
        .iter()
        .filter(|m| !m.content.is_empty())
        .map(|m| format!("{}: {}", m.speaker(), m.content))
        .collect();
    let start = turns.len().saturating_sub(limit);
    if turns[start..].is_empty() {
        "None".to_string()
    } else {
        turns[start..].join("\n")
    }
}

/// Assembles the RAG generation context from summary, history, query,
/// routing decision, and the selected retrieved chunks.
#[must_use]
pub fn build_rag_context(
    summary: &str,
    messages: &[ChatMessage],
    query: &str,
    strategy: &str,
    reasoning: &str,
    user_chunks: &[String],
    kb_chunks: &[String],
) -> String {
    let mut out = String::new();
    let summary = if summary.is_empty() { "None" } else { summary };
    let _ = write!(
        out,
        "CONVERSATION CONTEXT:\nSummary: {summary}\nLast Turns:\n{}",
        render_recent_turns(messages, 2)
    );
    let _ = write!(out, "\n\nUSER QUERY:\n{query}");
    let _ = write!(
        out,
        "\n\nSOURCE ROUTING DECISION:\nStrategy: {strategy}\nReasoning: {reasoning}"
    );

    if !user_chunks.is_empty() {
        let _ = write!(out, "\n\nUSER DOCUMENT CONTEXT:\n{}", user_chunks.join("\n"));
    }
    if !kb_chunks.is_empty() {
        let _ = write!(out, "\n\nKNOWLEDGE BASE CONTEXT:\n{}", kb_chunks.join("\n"));
    }
    if user_chunks.is_empty() && kb_chunks.is_empty() {
        out.push_str(
            "\n\nNO RETRIEVAL CONTEXT: No relevant documents were found. Provide \
a helpful response based on general knowledge and conversation history.",
        );
    } else if user_chunks.is_empty() {
        out.push_str(
            "\n\nPARTIAL CONTEXT: Only knowledge-base information is available. \
The user may need to upload documents for analysis.",
        );
    }
    out
}

/// Formats web-search hits as numbered sources with capped snippets.
#[must_use]
pub fn build_websearch_sources(hits: &[SearchHit], snippet_cap: usize) -> String {
    let mut out = String::new();
    for (i, hit) in hits.iter().enumerate() {
        let snippet: String = hit.content.chars().take(snippet_cap).collect();
        let _ = write!(
            out,
            "[Source {}] {} ({})\n{}\n",
            i + 1,
            hit.title,
            hit.url,
            snippet
        );
    }
    out
}

/// Builds the plain-generation message context.
#[must_use]
pub fn build_simple_context(summary: &str, messages: &[ChatMessage], query: &str) -> String {
    let summary = if summary.is_empty() { "None" } else { summary };
    format!(
        "Conversation summary: {summary}\nRecent turns:\n{}\n\nCurrent query: {query}",
        render_recent_turns(messages, 2)
    )
}

/// Builds the research planning prompt that decomposes a query.
#[must_use]
pub fn build_research_plan_prompt(query: &str) -> String {
    format!(
        "{DEEP_RESEARCH_PROMPT}\n---\nUser's Complex Query: {query}\n\n\
Task: Break this down into 3-10 specific sub-questions that need to be \
answered comprehensively.\n\n\
Provide sub-questions as a numbered list. Focus on:\n\
1. Core concepts and definitions\n\
2. Current state and recent developments\n\
3. Key challenges or controversies\n\
4. Practical implications\n\
5. Future directions (if relevant)\n\
Sub-questions:"
    )
}

/// Builds the gap-analysis prompt over the most recent findings.
#[must_use]
pub fn build_gap_analysis_prompt(
    original_query: &str,
    plan: &[String],
    findings: &[ResearchFinding],
    iteration: usize,
    max_iterations: usize,
) -> String {
    let mut info_summary = String::new();
    for item in findings.iter().rev().take(10).rev() {
        let preview: String = item.content.chars().take(300).collect();
        let ellipsis = if item.content.chars().count() > 300 { "..." } else { "" };
        let _ = write!(
            info_summary,
            "[{}] {}: {preview}{ellipsis}\n\n",
            item.source.to_uppercase(),
            item.query
        );
    }

    format!(
        "{DEEP_RESEARCH_PROMPT}\n---\nOriginal Query: {original_query}\n\n\
Research Plan: {}\n\
Gathered Information Summary (Iteration {iteration}/{max_iterations}):\n\
{info_summary}\n---\n\
Tasks:\n\
1. Assess if we have enough information to answer the original query comprehensively\n\
2. Identify any remaining knowledge gaps or unclear areas\n\
3. Provide a confidence score (0.0-1.0) for how well we can answer the query\n\
4. List 2-3 specific follow-up questions if gaps exist\n\n\
Format your response EXACTLY as:\n\
CONFIDENCE: [0.0-1.0]\n\
GAPS: [List specific gaps, one per line, or \"None\"]\n\
FOLLOW_UP: [Specific questions, one per line, or \"None\"]\n\
REASONING: [One short paragraph]",
        plan.join(", ")
    )
}

/// Builds the final research synthesis prompt over all findings.
#[must_use]
pub fn build_research_synthesis_prompt(
    original_query: &str,
    findings: &[ResearchFinding],
    iterations: usize,
    sources: &[String],
) -> String {
    let mut all_info = String::new();
    for item in findings {
        let capped: String = item.content.chars().take(600).collect();
        let _ = write!(
            all_info,
            "[{} - Iteration {}]\nQuery: {}\nFindings: {capped}...\n\n",
            item.source.to_uppercase(),
            item.iteration,
            item.query
        );
    }
    let sources_text = if sources.is_empty() {
        "None".to_string()
    } else {
        sources
            .iter()
            .map(|url| format!("- {url}"))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "{DEEP_RESEARCH_PROMPT}\n\n---\n\nOriginal Query: {original_query}\n\n\
All Gathered Information Across {iterations} Iterations:\n{all_info}\n\
Sources Used:\n{sources_text}\n\n---\n\n\
Create a comprehensive, well-structured response that:\n\
1. Directly answers the original query\n\
2. Integrates information from multiple sources and iterations\n\
3. Provides specific examples and evidence\n\
4. Uses clear headings and structure\n\
5. Cites sources where appropriate\n\
6. Acknowledges any limitations or uncertainties\n\n\
Final Report:"
    )
}

/// Builds the step-wise rewrite user message.
#[must_use]
pub fn build_rewrite_prompt(
    user_goal: &str,
    plan: &[Route],
    current_task: Route,
    last_result: Option<&str>,
) -> String {
    let plan_text: Vec<&str> = plan.iter().map(|r| r.name()).collect();
    let last = last_result.unwrap_or("(none)");
    format!(
        "Original user goal: {user_goal}\n\
Full plan: {}\n\
Current step: {}\n\
Most recent step result:\n{last}\n\n\
Rewritten query:",
        plan_text.join(" -> "),
        current_task.name()
    )
}

/// Builds the follow-up judge user message.
#[must_use]
pub fn build_followup_prompt(
    query: &str,
    messages: &[ChatMessage],
    docs_present: bool,
    kb_present: bool,
) -> String {
    format!(
        "Docs present: {docs_present} | KB present: {kb_present}\n\
Conversation (most recent last):\n{}\n\n\
NEW user message: {query}\nReturn JSON only.",
        render_recent_turns(messages, 12)
    )
}
