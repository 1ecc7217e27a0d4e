//! Orchestrator: planning, step-wise query rewriting, and dispatch.
//!
//! First entry for a turn summarizes overlong history, latches newly
//! uploaded documents, builds the task plan, and dispatches the first
//! leaf. Re-entries log the previous leaf's output, advance the plan
//! with a rewritten query, and terminate with either a concatenated or
//! synthesized final answer.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::strip_code_fences;
use crate::error::EngineError;
use crate::graph::node::GraphNode;
use crate::graph::state::{GraphState, Route};
use crate::prompts::{
    FOLLOWUP_JUDGE_PROMPT, QUERY_ANALYZER_PROMPT, QUERY_REWRITE_PROMPT, SUMMARIZER_PROMPT,
    build_followup_prompt, build_rewrite_prompt, render_recent_turns,
};
use crate::provider::llm::LlmProvider;
use crate::provider::message::{ChatRequest, system_message, user_message};
use crate::session::FollowupVerdict;

/// Word-count threshold for the heuristic follow-up fallback.
const FOLLOWUP_WORD_LIMIT: usize = 8;

#[derive(Debug, Deserialize)]
struct AnalyzerReply {
    #[serde(default)]
    execution_order: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct JudgeReply {
    #[serde(default)]
    is_followup: bool,
    #[serde(default)]
    should_reuse_sources: bool,
    #[serde(default)]
    confidence: f32,
    #[serde(default)]
    rationale: String,
}

/// Planning and dispatch node.
pub struct OrchestratorNode {
    llm: Arc<dyn LlmProvider>,
    fast_model: String,
    keep_last: usize,
    synthesize_multi_step: bool,
}

impl OrchestratorNode {
    /// Creates the node.
    #[must_use]
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        fast_model: impl Into<String>,
        keep_last: usize,
        synthesize_multi_step: bool,
    ) -> Self {
        Self {
            llm,
            fast_model: fast_model.into(),
            keep_last,
            synthesize_multi_step,
        }
    }

    /// Summarizes history older than the verbatim window into the
    /// rolling summary, then trims. Skips the trim if the summary call
    /// fails so no context is silently lost.
    async fn summarize_history(&self, state: &mut GraphState) {
        if state.messages.len() <= self.keep_last {
            return;
        }
        let split = state.messages.len() - self.keep_last;
        let older = render_recent_turns(&state.messages[..split], usize::MAX);
        let prompt = if state.summary.is_empty() {
            format!("Conversation so far:\n{older}")
        } else {
            format!(
                "Existing summary: {}\n\nAdditional turns to fold in:\n{older}",
                state.summary
            )
        };

        let request = ChatRequest::simple(
            &self.fast_model,
            vec![system_message(SUMMARIZER_PROMPT), user_message(&prompt)],
            0.0,
        );
        match self.llm.chat(&request).await {
            Ok(response) if !response.content.trim().is_empty() => {
                state.summary = response.content.trim().to_string();
                state.messages.drain(..split);
                debug!(kept = state.messages.len(), "history summarized and trimmed");
            }
            Ok(_) | Err(_) => {
                warn!("history summarization failed; keeping full history");
            }
        }
    }

    /// Builds the task plan for the turn.
    async fn plan(&self, state: &GraphState) -> Vec<Route> {
        if state.deep_search {
            return vec![Route::DeepResearch];
        }
        if state.user_query.trim().is_empty() {
            return vec![Route::SimpleLlm];
        }

        let request = ChatRequest::json(
            &self.fast_model,
            vec![
                system_message(QUERY_ANALYZER_PROMPT),
                user_message(&state.user_query),
            ],
            0.2,
        );

        let mut plan: Vec<Route> = match self.llm.chat(&request).await {
            Ok(response) => {
                serde_json::from_str::<AnalyzerReply>(strip_code_fences(&response.content))
                    .map(|reply| {
                        reply
                            .execution_order
                            .iter()
                            .filter_map(|name| Route::normalize(name))
                            .filter(|route| route.is_plannable())
                            .collect()
                    })
                    .unwrap_or_else(|e| {
                        warn!(error = %e, "query analyzer parse failed");
                        Vec::new()
                    })
            }
            Err(e) => {
                warn!(error = %e, "query analyzer call failed");
                Vec::new()
            }
        };

        if plan.is_empty() {
            plan = vec![Route::SimpleLlm];
        }

        // A fresh upload forces retrieval first; single-step plans that
        // aren't retrieval are replaced outright.
        if state.uploaded_doc && plan.first() != Some(&Route::Rag) {
            if plan.len() <= 1 {
                plan = vec![Route::Rag];
            } else {
                plan.retain(|route| *route != Route::Rag);
                plan.insert(0, Route::Rag);
            }
        }

        plan
    }

    /// Advisory follow-up judge; the result is recorded, never branched on.
    async fn judge_followup(&self, state: &GraphState) -> FollowupVerdict {
        let docs_present = !state.active_docs.is_empty();
        let kb_present = !state.kb_docs.is_empty();
        let prompt = build_followup_prompt(
            &state.user_query,
            &state.messages,
            docs_present,
            kb_present,
        );
        let request = ChatRequest::json(
            &self.fast_model,
            vec![system_message(FOLLOWUP_JUDGE_PROMPT), user_message(&prompt)],
            0.0,
        );

        let parsed = match self.llm.chat(&request).await {
            Ok(response) => {
                serde_json::from_str::<JudgeReply>(strip_code_fences(&response.content)).ok()
            }
            Err(_) => None,
        };

        parsed.map_or_else(
            || FollowupVerdict {
                is_followup: state.user_query.split_whitespace().count() < FOLLOWUP_WORD_LIMIT
                    && (docs_present || kb_present),
                should_reuse_sources: docs_present || kb_present,
                confidence: 0.4,
                rationale: "Fallback heuristic because the judge did not return valid JSON."
                    .to_string(),
            },
            |reply| FollowupVerdict {
                is_followup: reply.is_followup,
                should_reuse_sources: reply.should_reuse_sources,
                confidence: reply.confidence,
                rationale: reply.rationale,
            },
        )
    }

    /// Rewrites the query for the current step, falling back to the
    /// original user query on any failure.
    async fn rewrite_query(&self, state: &GraphState, last_result: Option<&str>) -> String {
        let Some(current) = state.current_task() else {
            return state.user_query.clone();
        };
        let prompt = build_rewrite_prompt(&state.user_query, &state.tasks, current, last_result);
        let request = ChatRequest::simple(
            &self.fast_model,
            vec![system_message(QUERY_REWRITE_PROMPT), user_message(&prompt)],
            0.0,
        );

        match self.llm.chat(&request).await {
            Ok(response) => {
                let rewritten = response.content.trim().to_string();
                if rewritten.is_empty() {
                    state.user_query.clone()
                } else {
                    rewritten
                }
            }
            Err(e) => {
                warn!(error = %e, "query rewrite failed; using original query");
                state.user_query.clone()
            }
        }
    }

    /// First entry: summarize, latch uploads, plan, dispatch step one.
    async fn first_entry(&self, state: &mut GraphState) -> Result<(), EngineError> {
        self.summarize_history(state).await;

        if !state.new_uploads.is_empty() {
            state.active_docs = state.new_uploads.clone();
            state.uploaded_doc = true;
        }

        let plan = self.plan(state).await;
        info!(plan = ?plan.iter().map(|r| r.name()).collect::<Vec<_>>(), "task plan");

        state.followup = Some(self.judge_followup(state).await);

        state.tasks = plan;
        state.task_index = 0;
        state.planned = true;

        state.resolved_query = if state.tasks == [Route::Rag] {
            state.user_query.clone()
        } else {
            self.rewrite_query(state, None).await
        };

        state.route = state.tasks.first().copied().unwrap_or(Route::SimpleLlm);
        Ok(())
    }

    /// Re-entry: log the leaf's output, advance or terminate.
    async fn reenter(&self, state: &mut GraphState) -> Result<(), EngineError> {
        // Always record the last leaf's output, even an error string,
        // unless the leaf already appended the same entry itself.
        if let Some(response) = state.take_response() {
            let already_logged = state
                .intermediate_results
                .last()
                .is_some_and(|entry| entry.output == response);
            if !already_logged {
                let node = state.current_task().map_or("unknown", Route::name);
                let query = state.resolved_query.clone();
                state.push_intermediate(node, query, response, None);
            }
        }

        if state.has_next_task() {
            state.advance_task();
            let last_output = state
                .intermediate_results
                .last()
                .map(|entry| entry.output.clone());
            state.resolved_query = self.rewrite_query(state, last_output.as_deref()).await;
            state.route = state.current_task().unwrap_or(Route::SimpleLlm);
            debug!(
                step = state.task_index,
                route = %state.route,
                "advancing to next task"
            );
            return Ok(());
        }

        let final_answer = if state.tasks.len() > 1 {
            self.combine_results(state).await
        } else {
            state
                .intermediate_results
                .last()
                .map(|entry| entry.output.clone())
                .unwrap_or_default()
        };
        state.final_answer = Some(final_answer);
        state.route = Route::End;
        Ok(())
    }

    /// Combines multi-step outputs: per-step headed sections by default,
    /// an LLM synthesis pass when configured (concatenation on failure).
    async fn combine_results(&self, state: &GraphState) -> String {
        let concatenated = state
            .intermediate_results
            .iter()
            .map(|entry| format!("**{} Result:**\n{}", entry.node, entry.output))
            .collect::<Vec<_>>()
            .join("\n\n");

        if !self.synthesize_multi_step {
            return concatenated;
        }

        let prompt = format!(
            "User goal: {}\n\nStep results:\n{concatenated}\n\nWrite one \
coherent answer to the user's goal from these step results.",
            state.user_query
        );
        let request =
            ChatRequest::simple(&state.llm_model, vec![user_message(&prompt)], 0.3);
        match self.llm.chat(&request).await {
            Ok(response) if !response.content.trim().is_empty() => response.content,
            Ok(_) | Err(_) => {
                warn!("multi-step synthesis failed; falling back to concatenation");
                concatenated
            }
        }
    }
}

#[async_trait]
impl GraphNode for OrchestratorNode {
    fn name(&self) -> &'static str {
        "Orchestrator"
    }

    async fn run(&self, state: &mut GraphState) -> Result<(), EngineError> {
        if state.planned {
            self.reenter(state).await
        } else {
            self.first_entry(state).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::testing::{MockLlm, MockReply};
    use crate::provider::message::{assistant_message, user_message as user};

    fn node_with(llm: Arc<MockLlm>) -> OrchestratorNode {
        OrchestratorNode::new(llm, "fast", 3, false)
    }

    #[tokio::test]
    async fn test_deep_search_toggle_skips_analyzer() {
        // No replies scripted for the analyzer; only judge + rewrite run.
        let llm = Arc::new(MockLlm::new(vec![
            MockReply::Text(r#"{"is_followup": false, "should_reuse_sources": false, "confidence": 0.9, "rationale": "new"}"#.to_string()),
            MockReply::Text("rewritten".to_string()),
        ]));
        let node = node_with(llm);

        let mut state = GraphState::new("s1", "research everything about X");
        state.deep_search = true;

        node.run(&mut state).await.unwrap_or(());
        assert_eq!(state.tasks, vec![Route::DeepResearch]);
        assert_eq!(state.route, Route::DeepResearch);
        assert!(state.planned);
    }

    #[tokio::test]
    async fn test_empty_query_plans_simple_llm() {
        let llm = Arc::new(MockLlm::new(vec![
            MockReply::Text(r#"{"is_followup": false, "should_reuse_sources": false, "confidence": 0.5, "rationale": "r"}"#.to_string()),
            MockReply::Text("rewritten".to_string()),
        ]));
        let node = node_with(llm);

        let mut state = GraphState::new("s1", "   ");
        node.run(&mut state).await.unwrap_or(());
        assert_eq!(state.tasks, vec![Route::SimpleLlm]);
    }

    #[tokio::test]
    async fn test_analyzer_failure_defaults_to_simple_llm() {
        let llm = Arc::new(MockLlm::new(vec![
            MockReply::Text("not valid json".to_string()),
            MockReply::Text(r#"{"is_followup": false, "should_reuse_sources": false, "confidence": 0.5, "rationale": "r"}"#.to_string()),
            MockReply::Text("rewritten".to_string()),
        ]));
        let node = node_with(llm);

        let mut state = GraphState::new("s1", "hello there");
        node.run(&mut state).await.unwrap_or(());
        assert_eq!(state.tasks, vec![Route::SimpleLlm]);
        assert_eq!(state.resolved_query, "rewritten");
    }

    #[tokio::test]
    async fn test_upload_forces_rag_and_skips_rewrite() {
        let llm = Arc::new(MockLlm::new(vec![
            MockReply::Text(r#"{"execution_order": ["SimpleLLM"]}"#.to_string()),
            MockReply::Text(r#"{"is_followup": false, "should_reuse_sources": true, "confidence": 0.5, "rationale": "r"}"#.to_string()),
        ]));
        let node = node_with(llm);

        let mut state = GraphState::new("s1", "summarize this");
        state.new_uploads = vec![crate::session::Document {
            id: "d1".to_string(),
            filename: "a.txt".to_string(),
            content: "body".to_string(),
            file_type: "txt".to_string(),
            size: 4,
            file_url: None,
        }];

        node.run(&mut state).await.unwrap_or(());
        assert_eq!(state.tasks, vec![Route::Rag]);
        assert_eq!(state.active_docs.len(), 1);
        assert!(state.uploaded_doc);
        // Plans of exactly [RAG] keep the raw user query.
        assert_eq!(state.resolved_query, "summarize this");
    }

    #[tokio::test]
    async fn test_upload_forces_rag_first_in_multi_step_plan() {
        let llm = Arc::new(MockLlm::new(vec![
            MockReply::Text(r#"{"execution_order": ["WebSearch", "SimpleLLM"]}"#.to_string()),
            MockReply::Text(r#"{"is_followup": false, "should_reuse_sources": true, "confidence": 0.5, "rationale": "r"}"#.to_string()),
            MockReply::Text("rewritten step one".to_string()),
        ]));
        let node = node_with(llm);

        let mut state = GraphState::new("s1", "compare my doc with recent news and summarize");
        state.new_uploads = vec![crate::session::Document {
            id: "d1".to_string(),
            filename: "a.txt".to_string(),
            content: "body".to_string(),
            file_type: "txt".to_string(),
            size: 4,
            file_url: None,
        }];

        node.run(&mut state).await.unwrap_or(());
        assert_eq!(
            state.tasks,
            vec![Route::Rag, Route::WebSearch, Route::SimpleLlm]
        );
        assert_eq!(state.route, Route::Rag);
    }

    #[tokio::test]
    async fn test_reentry_advances_and_rewrites() {
        let llm = Arc::new(MockLlm::new(vec![MockReply::Text(
            "draft a tweet about Book A, Book B, Book C".to_string(),
        )]));
        let node = node_with(llm);

        let mut state = GraphState::new("s1", "find top 3 books then tweet");
        state.planned = true;
        state.tasks = vec![Route::WebSearch, Route::SimpleLlm];
        state.task_index = 0;
        state.resolved_query = "top 3 books".to_string();
        state.response = Some("1. Book A 2. Book B 3. Book C".to_string());

        node.run(&mut state).await.unwrap_or(());
        assert_eq!(state.task_index, 1);
        assert_eq!(state.route, Route::SimpleLlm);
        assert!(state.resolved_query.contains("Book B"));
        // The orchestrator logged the web-search output.
        assert_eq!(state.intermediate_results.len(), 1);
        assert_eq!(state.intermediate_results[0].node, "WebSearch");
        assert!(state.response.is_none());
    }

    #[tokio::test]
    async fn test_reentry_does_not_duplicate_leaf_logged_entry() {
        let llm = Arc::new(MockLlm::new(vec![]));
        let node = node_with(llm);

        let mut state = GraphState::new("s1", "q");
        state.planned = true;
        state.tasks = vec![Route::SimpleLlm];
        state.push_intermediate("SimpleLLM", "q", "the answer", None);
        state.response = Some("the answer".to_string());

        node.run(&mut state).await.unwrap_or(());
        assert_eq!(state.intermediate_results.len(), 1);
        assert_eq!(state.final_answer.as_deref(), Some("the answer"));
        assert_eq!(state.route, Route::End);
    }

    #[tokio::test]
    async fn test_multi_step_termination_concatenates() {
        let llm = Arc::new(MockLlm::new(vec![]));
        let node = node_with(llm);

        let mut state = GraphState::new("s1", "q");
        state.planned = true;
        state.tasks = vec![Route::WebSearch, Route::SimpleLlm];
        state.task_index = 1;
        state.push_intermediate("WebSearch", "q1", "search findings", None);
        state.push_intermediate("SimpleLLM", "q2", "tweet draft", None);
        state.response = Some("tweet draft".to_string());

        node.run(&mut state).await.unwrap_or(());
        let answer = state.final_answer.unwrap_or_default();
        assert!(answer.contains("**WebSearch Result:**\nsearch findings"));
        assert!(answer.contains("**SimpleLLM Result:**\ntweet draft"));
        assert_eq!(state.route, Route::End);
    }

    #[tokio::test]
    async fn test_history_summarization_trims() {
        let llm = Arc::new(MockLlm::new(vec![
            MockReply::Text("they discussed four things".to_string()),
            MockReply::Text(r#"{"execution_order": ["SimpleLLM"]}"#.to_string()),
            MockReply::Text(r#"{"is_followup": true, "should_reuse_sources": false, "confidence": 0.8, "rationale": "r"}"#.to_string()),
            MockReply::Text("rewritten".to_string()),
        ]));
        let node = node_with(llm);

        let mut state = GraphState::new("s1", "next");
        state.messages = vec![
            user("one"),
            assistant_message("two"),
            user("three"),
            assistant_message("four"),
            user("five"),
        ];

        node.run(&mut state).await.unwrap_or(());
        assert_eq!(state.summary, "they discussed four things");
        assert_eq!(state.messages.len(), 3);
        assert_eq!(state.messages[0].content, "three");
    }

    #[tokio::test]
    async fn test_followup_heuristic_on_judge_failure() {
        let llm = Arc::new(MockLlm::new(vec![
            MockReply::Text(r#"{"execution_order": ["RAG"]}"#.to_string()),
            MockReply::Text("judge said something weird".to_string()),
        ]));
        let node = node_with(llm);

        let mut state = GraphState::new("s1", "and the second one?");
        state.active_docs = vec![crate::session::Document {
            id: "d1".to_string(),
            filename: "a.txt".to_string(),
            content: "body".to_string(),
            file_type: "txt".to_string(),
            size: 4,
            file_url: None,
        }];

        node.run(&mut state).await.unwrap_or(());
        let verdict = state.followup.unwrap_or(FollowupVerdict {
            is_followup: false,
            should_reuse_sources: false,
            confidence: 0.0,
            rationale: String::new(),
        });
        // Short query + docs present → heuristic says follow-up.
        assert!(verdict.is_followup);
        assert!(verdict.should_reuse_sources);
        assert!(verdict.rationale.contains("heuristic"));
    }
}
