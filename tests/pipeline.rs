//! End-to-end turns through the engine with scripted providers.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::Stream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use chatgraph::engine::{Engine, TurnOptions};
use chatgraph::error::EngineError;
use chatgraph::provider::embedding::EmbeddingProvider;
use chatgraph::provider::llm::LlmProvider;
use chatgraph::provider::message::{ChatRequest, ChatResponse, TokenUsage};
use chatgraph::provider::search::{SearchDepth, SearchHit, WebSearchProvider};
use chatgraph::provider::Providers;
use chatgraph::retrieval::{kb_collection, user_docs_collection};
use chatgraph::session::Document;
use chatgraph::stream::{EventSink, StreamFrame};
use chatgraph::EngineConfig;

/// LLM provider popping scripted replies in order.
struct ScriptedLlm {
    replies: Mutex<VecDeque<Result<String, String>>>,
}

impl ScriptedLlm {
    fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|r| Ok((*r).to_string())).collect()),
        })
    }

    async fn pop(&self) -> Result<String, EngineError> {
        match self.replies.lock().await.pop_front() {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(message)) => Err(EngineError::Provider {
                provider: "scripted",
                message,
            }),
            None => Ok("(script exhausted)".to_string()),
        }
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn chat(&self, _request: &ChatRequest) -> Result<ChatResponse, EngineError> {
        Ok(ChatResponse {
            content: self.pop().await?,
            usage: TokenUsage::default(),
            tool_calls: Vec::new(),
            finish_reason: Some("stop".to_string()),
        })
    }

    async fn chat_stream(
        &self,
        _request: &ChatRequest,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<String, EngineError>> + Send>>, EngineError> {
        let content = self.pop().await?;
        let deltas: Vec<Result<String, EngineError>> = content
            .split_inclusive(' ')
            .map(|w| Ok(w.to_string()))
            .collect();
        Ok(Box::pin(futures_util::stream::iter(deltas)))
    }
}

/// Token-count embedder keyed by word hashes.
struct HashEmbedder;

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn dimensions(&self) -> usize {
        8
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EngineError> {
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = [0.0f32; 8];
                for word in t.split_whitespace() {
                    let h = word.bytes().fold(0usize, |acc, b| acc * 31 + b as usize);
                    v[h % 8] += 1.0;
                }
                v.to_vec()
            })
            .collect())
    }
}

struct FixedSearch {
    hits: Vec<SearchHit>,
}

#[async_trait]
impl WebSearchProvider for FixedSearch {
    async fn search(
        &self,
        _query: &str,
        max_results: usize,
        _depth: SearchDepth,
    ) -> Result<Vec<SearchHit>, EngineError> {
        Ok(self.hits.iter().take(max_results).cloned().collect())
    }
}

fn engine(llm: Arc<ScriptedLlm>, search: Option<Arc<FixedSearch>>) -> Arc<Engine> {
    let config = EngineConfig::builder()
        .api_key("test")
        .build()
        .unwrap_or_else(|_| unreachable!());
    let providers = Providers {
        llm,
        embeddings: Arc::new(HashEmbedder),
        web_search: search.map(|s| s as Arc<dyn WebSearchProvider>),
        image: None,
        tools: None,
    };
    Arc::new(Engine::with_providers(config, providers))
}

async fn run_and_collect(
    engine: &Arc<Engine>,
    session: Arc<chatgraph::Session>,
    options: TurnOptions,
) -> Vec<StreamFrame> {
    let (sink, mut rx) = EventSink::channel(256);
    let cancel = CancellationToken::new();
    let engine = Arc::clone(engine);
    let handle = tokio::spawn(async move {
        engine.run_turn(session, options, sink, cancel).await;
    });

    let mut frames = Vec::new();
    while let Some(frame) = rx.recv().await {
        frames.push(frame);
    }
    let _ = handle.await;
    frames
}

fn completion_frames(frames: &[StreamFrame]) -> Vec<&StreamFrame> {
    frames
        .iter()
        .filter(|f| matches!(f, StreamFrame::Content { is_complete: true, .. }))
        .collect()
}

fn has_done(frames: &[StreamFrame]) -> bool {
    frames.iter().any(|f| matches!(f, StreamFrame::Done { .. }))
}

const ANALYZER_SIMPLE: &str = r#"{"execution_order": ["SimpleLLM"]}"#;
const JUDGE_NO: &str = r#"{"is_followup": false, "should_reuse_sources": false, "confidence": 0.9, "rationale": "fresh"}"#;

#[tokio::test]
async fn single_shot_chit_chat() {
    let llm = ScriptedLlm::new(&[
        ANALYZER_SIMPLE,
        JUDGE_NO,
        "hello",
        "Hi! How can I help you today?",
    ]);
    let engine = engine(llm, None);
    let session = engine.sessions().create().await;
    let session_id = session.id.clone();

    let frames = run_and_collect(
        &engine,
        session,
        TurnOptions {
            message: "hello".to_string(),
            ..TurnOptions::default()
        },
    )
    .await;

    // Exactly one node-completion frame, then done.
    assert_eq!(completion_frames(&frames).len(), 1);
    assert!(has_done(&frames));

    // The completion frame's full_response equals the settled answer.
    match completion_frames(&frames)[0] {
        StreamFrame::Content { full_response, .. } => {
            assert_eq!(full_response, "Hi! How can I help you today?");
        }
        _ => unreachable!(),
    }

    // Zero retrieval-cache mutations.
    assert!(!engine.cache().has_kb(&session_id).await);
    assert!(!engine.cache().has_user_docs(&session_id).await);
    assert!(
        !engine
            .cache()
            .index()
            .has_collection(&user_docs_collection(&session_id))
            .await
    );

    // History recorded the user turn and the answer.
    let session = engine.sessions().get(&session_id).await;
    match session {
        Some(session) => {
            let data = session.read().await;
            assert_eq!(data.messages.len(), 2);
            assert_eq!(data.messages[1].content, "Hi! How can I help you today?");
        }
        None => unreachable!("session vanished"),
    }
}

#[tokio::test]
async fn deep_search_toggle_overrides_classifier() {
    // No analyzer reply scripted: the deep-search toggle must skip it.
    let llm = ScriptedLlm::new(&[
        JUDGE_NO,
        "overview of X",
        "1. What is the historical background of X?",
        "CONFIDENCE: 0.90\nGAPS: None\nFOLLOW_UP: None",
        "X is well understood. Here is the overview.",
    ]);
    let search = Arc::new(FixedSearch {
        hits: vec![
            SearchHit {
                title: "X Primer".to_string(),
                url: "https://x-primer.example".to_string(),
                content: "all about X".to_string(),
            },
            SearchHit {
                title: "X Deep Dive".to_string(),
                url: "https://x-deep.example".to_string(),
                content: "more about X".to_string(),
            },
        ],
    });
    let engine = engine(llm, Some(search));
    let session = engine.sessions().create().await;

    let frames = run_and_collect(
        &engine,
        session,
        TurnOptions {
            message: "overview of X".to_string(),
            deep_search: true,
            ..TurnOptions::default()
        },
    )
    .await;

    assert!(has_done(&frames));
    let completions = completion_frames(&frames);
    assert_eq!(completions.len(), 1);
    match completions[0] {
        StreamFrame::Content { full_response, .. } => {
            assert!(full_response.contains("Here is the overview"));
            assert!(full_response.contains("Sources & References"));
            assert!(full_response.contains("https://x-primer.example"));
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn multi_step_plan_concatenates_under_headings() {
    let llm = ScriptedLlm::new(&[
        r#"{"execution_order": ["WebSearch", "SimpleLLM"]}"#,
        JUDGE_NO,
        "top 3 Go books",
        "Top Go books: [Source 1] The Go Programming Language",
        "draft a tweet about The Go Programming Language",
        "Just read the top Go books - highly recommend!",
    ]);
    let search = Arc::new(FixedSearch {
        hits: vec![SearchHit {
            title: "Best Go Books".to_string(),
            url: "https://books.example".to_string(),
            content: "The Go Programming Language tops the list".to_string(),
        }],
    });
    let engine = engine(llm, Some(search));
    let session = engine.sessions().create().await;

    let frames = run_and_collect(
        &engine,
        session,
        TurnOptions {
            message: "find top 3 Go books and then draft a tweet about them".to_string(),
            web_search: true,
            ..TurnOptions::default()
        },
    )
    .await;

    // One completion frame per plan step, then done.
    assert_eq!(completion_frames(&frames).len(), 2);
    assert!(has_done(&frames));

    // Step frames are ordered: the WebSearch completion precedes any
    // SimpleLLM content.
    let nodes: Vec<Option<&str>> = frames
        .iter()
        .filter_map(|f| match f {
            StreamFrame::Content { node, .. } => Some(node.as_deref()),
            _ => None,
        })
        .collect();
    let first_simple = nodes.iter().position(|n| *n == Some("SimpleLLM"));
    let last_web = nodes.iter().rposition(|n| *n == Some("WebSearch"));
    assert!(last_web < first_simple);
}

#[tokio::test]
async fn new_upload_summarize_uses_user_docs_only() {
    let llm = ScriptedLlm::new(&[
        ANALYZER_SIMPLE, // would be SimpleLLM, but the upload forces RAG
        JUDGE_NO,
        r#"{"use_user_docs": true, "use_kb": false, "search_strategy": "user_docs_only", "reasoning": "fresh upload"}"#,
        "The document covers three pages about widgets.",
    ]);
    let engine = engine(llm, None);
    let session = engine.sessions().create().await;
    let session_id = session.id.clone();

    {
        let mut data = session.write().await;
        let doc = Document {
            id: "d1".to_string(),
            filename: "report.txt".to_string(),
            content: "widgets ".repeat(300),
            file_type: "txt".to_string(),
            size: 2400,
            file_url: None,
        };
        data.uploaded_docs = vec![doc.clone()];
        data.new_uploads = vec![doc];
    }

    let frames = run_and_collect(
        &engine,
        session,
        TurnOptions {
            message: "summarize this".to_string(),
            uploaded_doc: true,
            ..TurnOptions::default()
        },
    )
    .await;

    assert!(has_done(&frames));
    match completion_frames(&frames)[0] {
        StreamFrame::Content { full_response, .. } => {
            assert!(full_response.contains("three pages about widgets"));
        }
        _ => unreachable!(),
    }

    // User-doc collection was built; no KB search side-effects.
    assert!(
        engine
            .cache()
            .index()
            .has_collection(&user_docs_collection(&session_id))
            .await
    );
    assert!(
        !engine
            .cache()
            .index()
            .has_collection(&kb_collection(&session_id))
            .await
    );
    let chunks = engine
        .cache()
        .index()
        .payload_texts(&user_docs_collection(&session_id))
        .await;
    assert!(!chunks.is_empty());
}

#[tokio::test]
async fn client_disconnect_cancels_turn() {
    let long_answer = "word ".repeat(5000);
    let llm = ScriptedLlm::new(&[ANALYZER_SIMPLE, JUDGE_NO, "q", &long_answer]);
    let engine = engine(llm, None);
    let session = engine.sessions().create().await;

    let (sink, mut rx) = EventSink::channel(4);
    let cancel = CancellationToken::new();
    let run_engine = Arc::clone(&engine);
    let handle = tokio::spawn(async move {
        run_engine
            .run_turn(
                session,
                TurnOptions {
                    message: "talk forever".to_string(),
                    ..TurnOptions::default()
                },
                sink,
                cancel,
            )
            .await;
    });

    // Read a few frames, then hang up.
    let mut seen = 0;
    while seen < 3 {
        if rx.recv().await.is_none() {
            break;
        }
        seen += 1;
    }
    drop(rx);

    // The turn must terminate promptly; no done frame was delivered.
    let finished = tokio::time::timeout(std::time::Duration::from_secs(5), handle).await;
    assert!(finished.is_ok());
}

#[tokio::test]
async fn provider_failure_surfaces_in_answer_and_plan_continues() {
    // WebSearch formatting fails; SimpleLLM still runs; both sections land.
    let llm = Arc::new(ScriptedLlm {
        replies: Mutex::new(
            [
                Ok(r#"{"execution_order": ["WebSearch", "SimpleLLM"]}"#.to_string()),
                Ok(JUDGE_NO.to_string()),
                Ok("step one".to_string()),
                Err("model exploded".to_string()),
                Ok("step two".to_string()),
                Ok("recovered answer".to_string()),
            ]
            .into_iter()
            .collect(),
        ),
    });
    let search = Arc::new(FixedSearch {
        hits: vec![SearchHit {
            title: "T".to_string(),
            url: "https://t".to_string(),
            content: "c".to_string(),
        }],
    });
    let engine = engine(llm, Some(search));
    let session = engine.sessions().create().await;
    let session_id = session.id.clone();

    let frames = run_and_collect(
        &engine,
        session,
        TurnOptions {
            message: "search then summarize".to_string(),
            ..TurnOptions::default()
        },
    )
    .await;

    assert!(has_done(&frames));
    let session = engine.sessions().get(&session_id).await;
    let answer = match session {
        Some(session) => {
            let data = session.read().await;
            data.messages.last().map(|m| m.content.clone()).unwrap_or_default()
        }
        None => String::new(),
    };
    assert!(answer.contains("**WebSearch Result:**"));
    assert!(answer.contains("Error"));
    assert!(answer.contains("recovered answer"));
}
