//! Deep-research subgraph: plan → execute → gap-analyze → iterate → synthesize.
//!
//! Five internal nodes driven by the same route field as the outer
//! graph. The loop is bounded twice: by the research record's iteration
//! ceiling and by the runtime's global step ceiling. Synthesis hands
//! control back to the orchestrator like any other leaf.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::complete_leaf;
use crate::error::EngineError;
use crate::graph::node::GraphNode;
use crate::graph::state::{GraphState, ResearchFinding, ResearchState, Route};
use crate::prompts::{
    build_gap_analysis_prompt, build_research_plan_prompt, build_research_synthesis_prompt,
};
use crate::provider::llm::LlmProvider;
use crate::provider::message::{ChatRequest, user_message};
use crate::provider::search::{SearchDepth, WebSearchProvider};

/// Web results fetched per sub-query.
const RESULTS_PER_QUERY: usize = 3;
/// Snippet cap when building finding content.
const FINDING_SNIPPET_CAP: usize = 300;
/// Minimum accepted sub-question length.
const MIN_QUESTION_LEN: usize = 15;
/// Sub-questions kept from the plan.
const MAX_PLAN_QUESTIONS: usize = 5;
/// Follow-up questions kept per gap analysis.
const MAX_FOLLOW_UPS: usize = 3;
/// Confidence at which research stops early.
const CONFIDENCE_STOP: f32 = 0.85;
/// Unique URLs listed in the synthesis prompt.
const PROMPT_SOURCE_CAP: usize = 10;
/// Unique URLs enumerated in the appended sources section.
const REPORT_SOURCE_CAP: usize = 15;

/// Shared dependencies of the research nodes.
pub struct ResearchDeps {
    /// Chat provider for planning, gap analysis, and synthesis.
    pub llm: Arc<dyn LlmProvider>,
    /// Web-search adapter, when configured.
    pub search: Option<Arc<dyn WebSearchProvider>>,
    /// Iteration ceiling for the research loop.
    pub max_iterations: usize,
}

/// Registers the five research nodes on a runtime.
#[must_use]
pub fn register_deep_research(
    runtime: crate::graph::runtime::GraphRuntime,
    deps: &Arc<ResearchDeps>,
) -> crate::graph::runtime::GraphRuntime {
    runtime
        .register(Route::DeepResearch, Arc::new(InitializeNode { deps: Arc::clone(deps) }))
        .register(Route::PlanResearch, Arc::new(PlanNode { deps: Arc::clone(deps) }))
        .register(Route::ExecuteResearch, Arc::new(ExecuteNode { deps: Arc::clone(deps) }))
        .register(Route::AnalyzeGaps, Arc::new(AnalyzeGapsNode { deps: Arc::clone(deps) }))
        .register(Route::SynthesizeReport, Arc::new(SynthesizeNode { deps: Arc::clone(deps) }))
}

fn research_query(state: &GraphState) -> String {
    if state.resolved_query.is_empty() {
        state.user_query.clone()
    } else {
        state.resolved_query.clone()
    }
}

/// Creates the embedded research record and enters the subgraph.
struct InitializeNode {
    deps: Arc<ResearchDeps>,
}

#[async_trait]
impl GraphNode for InitializeNode {
    fn name(&self) -> &'static str {
        "DeepResearch"
    }

    async fn run(&self, state: &mut GraphState) -> Result<(), EngineError> {
        state.research = Some(ResearchState::new(self.deps.max_iterations));
        if let Some(sink) = &state.sink {
            sink.status(self.name(), "Starting deep research", Some(5)).await?;
        }
        state.route = Route::PlanResearch;
        Ok(())
    }
}

/// Decomposes the query into sub-questions.
struct PlanNode {
    deps: Arc<ResearchDeps>,
}

#[async_trait]
impl GraphNode for PlanNode {
    fn name(&self) -> &'static str {
        "plan_research"
    }

    async fn run(&self, state: &mut GraphState) -> Result<(), EngineError> {
        let query = research_query(state);
        let prompt = build_research_plan_prompt(&query);
        let request = ChatRequest::simple(&state.llm_model, vec![user_message(&prompt)], 0.2);

        let plan = match self.deps.llm.chat(&request).await {
            Ok(response) => parse_plan_lines(&response.content),
            Err(e) => {
                warn!(error = %e, "research planning failed");
                Vec::new()
            }
        };

        if plan.is_empty() {
            return complete_leaf(
                state,
                "DeepResearch",
                "Unable to plan research. Please refine your query.".to_string(),
                None,
            )
            .await;
        }

        info!(sub_questions = plan.len(), "research plan ready");
        if let Some(research) = state.research.as_mut() {
            research.plan = plan;
        }
        state.route = Route::ExecuteResearch;
        Ok(())
    }
}

/// Runs web searches for the current iteration's queries.
struct ExecuteNode {
    deps: Arc<ResearchDeps>,
}

#[async_trait]
impl GraphNode for ExecuteNode {
    fn name(&self) -> &'static str {
        "execute_research"
    }

    async fn run(&self, state: &mut GraphState) -> Result<(), EngineError> {
        let (queries, iteration, max_iterations) = {
            let Some(research) = state.research.as_ref() else {
                return Err(EngineError::internal("execute_research without research state"));
            };
            let queries = if research.iteration == 0 {
                research.plan.clone()
            } else {
                research.knowledge_gaps.clone()
            };
            (queries, research.iteration, research.max_iterations)
        };

        if queries.is_empty() {
            debug!("no queries to research; synthesizing");
            state.route = Route::SynthesizeReport;
            return Ok(());
        }

        if let Some(sink) = &state.sink {
            sink.status(
                "DeepResearch",
                &format!("Research iteration {}/{max_iterations}", iteration + 1),
                None,
            )
            .await?;
        }

        let mut findings = Vec::new();
        if let Some(search) = &self.deps.search {
            for query in &queries {
                match search
                    .search(query, RESULTS_PER_QUERY, SearchDepth::Advanced)
                    .await
                {
                    Ok(hits) if !hits.is_empty() => {
                        let content = hits
                            .iter()
                            .map(|hit| {
                                let snippet: String =
                                    hit.content.chars().take(FINDING_SNIPPET_CAP).collect();
                                format!("{}: {snippet}", hit.title)
                            })
                            .collect::<Vec<_>>()
                            .join("\n");
                        let urls: Vec<String> =
                            hits.iter().map(|hit| hit.url.clone()).collect();
                        findings.push(ResearchFinding {
                            query: query.clone(),
                            source: "web".to_string(),
                            content,
                            urls,
                            iteration,
                        });
                    }
                    Ok(_) => {}
                    Err(e) => warn!(query = %query, error = %e, "research web search failed"),
                }
            }
        } else {
            warn!("no web-search adapter; research iteration gathers nothing");
        }

        let Some(research) = state.research.as_mut() else {
            return Err(EngineError::internal("execute_research without research state"));
        };
        for finding in &findings {
            research.sources.extend(finding.urls.iter().cloned());
        }
        research.findings.extend(findings);
        research.iteration += 1;

        state.route = if research.iteration < research.max_iterations {
            Route::AnalyzeGaps
        } else {
            Route::SynthesizeReport
        };
        Ok(())
    }
}

/// Parsed gap-analysis reply.
#[derive(Debug, Clone, PartialEq)]
pub struct GapAnalysis {
    /// Confidence that the query can be answered, 0.0–1.0.
    pub confidence: f32,
    /// Remaining gap descriptions.
    pub gaps: Vec<String>,
    /// Follow-up questions for the next iteration.
    pub follow_ups: Vec<String>,
}

impl Default for GapAnalysis {
    fn default() -> Self {
        Self {
            confidence: 0.5,
            gaps: Vec::new(),
            follow_ups: Vec::new(),
        }
    }
}

/// Assesses confidence and decides whether to iterate.
struct AnalyzeGapsNode {
    deps: Arc<ResearchDeps>,
}

#[async_trait]
impl GraphNode for AnalyzeGapsNode {
    fn name(&self) -> &'static str {
        "analyze_gaps"
    }

    async fn run(&self, state: &mut GraphState) -> Result<(), EngineError> {
        let prompt = {
            let Some(research) = state.research.as_ref() else {
                return Err(EngineError::internal("analyze_gaps without research state"));
            };
            build_gap_analysis_prompt(
                &state.user_query,
                &research.plan,
                &research.findings,
                research.iteration,
                research.max_iterations,
            )
        };
        let request = ChatRequest::simple(&state.llm_model, vec![user_message(&prompt)], 0.2);

        let analysis = match self.deps.llm.chat(&request).await {
            Ok(response) => parse_gap_analysis(&response.content),
            Err(e) => {
                warn!(error = %e, "gap analysis failed; synthesizing with what we have");
                GapAnalysis {
                    confidence: 1.0,
                    ..GapAnalysis::default()
                }
            }
        };

        info!(
            confidence = analysis.confidence,
            follow_ups = analysis.follow_ups.len(),
            "gap analysis"
        );
        let Some(research) = state.research.as_mut() else {
            return Err(EngineError::internal("analyze_gaps without research state"));
        };
        research.confidence = analysis.confidence;

        if analysis.confidence >= CONFIDENCE_STOP || analysis.follow_ups.is_empty() {
            state.route = Route::SynthesizeReport;
        } else {
            research.knowledge_gaps = analysis.follow_ups;
            state.route = Route::ExecuteResearch;
        }
        Ok(())
    }
}

/// Produces the final report and returns control to the orchestrator.
struct SynthesizeNode {
    deps: Arc<ResearchDeps>,
}

#[async_trait]
impl GraphNode for SynthesizeNode {
    fn name(&self) -> &'static str {
        "synthesize_report"
    }

    async fn run(&self, state: &mut GraphState) -> Result<(), EngineError> {
        let user_query = state.user_query.clone();
        let Some(research) = state.research.take() else {
            return Err(EngineError::internal("synthesize_report without research state"));
        };

        if let Some(sink) = &state.sink {
            sink.status("DeepResearch", "Synthesizing final report", Some(90))
                .await?;
        }

        let prompt = build_research_synthesis_prompt(
            &user_query,
            &research.findings,
            research.iteration,
            &research.unique_sources(PROMPT_SOURCE_CAP),
        );
        let request = ChatRequest::simple(&state.llm_model, vec![user_message(&prompt)], 0.3);

        let mut report = match self.deps.llm.chat(&request).await {
            Ok(response) => response.content,
            Err(e) => {
                warn!(error = %e, "report synthesis failed");
                format!("Error: research synthesis failed: {e}")
            }
        };

        let unique = research.unique_sources(REPORT_SOURCE_CAP);
        if !unique.is_empty() && !report.to_lowercase().contains("sources") {
            report.push_str("\n\n## Sources & References\n");
            for (i, url) in unique.iter().enumerate() {
                report.push_str(&format!("{}. {url}\n", i + 1));
            }
        }

        let metadata = serde_json::json!({
            "iterations": research.iteration,
            "confidence": research.confidence,
            "sources_count": research.unique_sources(usize::MAX).len(),
            "findings_count": research.findings.len(),
        });
        complete_leaf(state, "DeepResearch", report, Some(metadata)).await
    }
}

/// Extracts sub-questions from a numbered or bulleted plan reply.
///
/// Accepts lines beginning with a digit, `-`, or `•`; strips list
/// markers; drops anything shorter than the minimum length.
#[must_use]
pub fn parse_plan_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| {
            line.chars()
                .next()
                .is_some_and(|c| c.is_ascii_digit() || c == '-' || c == '•')
        })
        .map(|line| line.trim_start_matches(['0', '1', '2', '3', '4', '5', '6', '7', '8', '9', '.', '-', '•', ')', ' ']).trim().to_string())
        .filter(|line| line.len() >= MIN_QUESTION_LEN)
        .take(MAX_PLAN_QUESTIONS)
        .collect()
}

/// Defensively parses the `CONFIDENCE:` / `GAPS:` / `FOLLOW_UP:` reply
/// format, falling back per field.
#[must_use]
pub fn parse_gap_analysis(content: &str) -> GapAnalysis {
    let mut analysis = GapAnalysis::default();

    if let Some(rest) = content.split("CONFIDENCE:").nth(1)
        && let Some(line) = rest.lines().next()
    {
        let cleaned = line.trim().trim_matches(['[', ']']);
        if let Ok(value) = cleaned.parse::<f32>() {
            analysis.confidence = value.clamp(0.0, 1.0);
        }
    }

    if let Some(rest) = content.split("GAPS:").nth(1) {
        let section = rest.split("FOLLOW_UP:").next().unwrap_or("");
        if !section.to_lowercase().contains("none") {
            analysis.gaps = section
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(String::from)
                .collect();
        }
    }

    if let Some(rest) = content.split("FOLLOW_UP:").nth(1) {
        let section = rest.split("REASONING:").next().unwrap_or("");
        if !section.to_lowercase().contains("none") {
            analysis.follow_ups = section
                .lines()
                .map(str::trim)
                .filter(|l| l.len() > MIN_QUESTION_LEN && l.contains('?'))
                .map(String::from)
                .take(MAX_FOLLOW_UPS)
                .collect();
        }
    }

    analysis
}
