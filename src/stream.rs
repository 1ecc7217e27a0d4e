//! Streaming multiplexer.
//!
//! Nodes write through an [`EventSink`]; the HTTP layer drains the other
//! end of the channel and frames each record as a `data: <json>` line.
//! The sink owns the per-node running `full_response` so content frames
//! are monotone within a node, and it emits the node-completion frame
//! (empty `content`, `is_complete = true`) before control returns to the
//! orchestrator.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, mpsc};

use crate::error::EngineError;

/// One frame of the client-facing stream.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum StreamFrame {
    /// Advisory progress update from a node.
    Status {
        /// Coarse state, e.g. `"processing"`.
        status: String,
        /// Human-readable progress message.
        message: String,
        /// The node reporting progress.
        current_node: String,
        /// Optional 0–100 progress estimate.
        #[serde(skip_serializing_if = "Option::is_none")]
        progress: Option<u8>,
    },
    /// Incremental content from a node's generation.
    Content {
        /// The incremental delta (may be empty on the completion frame).
        content: String,
        /// Running concatenation for the emitting node.
        full_response: String,
        /// True exactly once per node, on its final frame.
        is_complete: bool,
        /// The emitting node.
        #[serde(skip_serializing_if = "Option::is_none")]
        node: Option<String>,
    },
    /// Terminal error for the turn.
    Error {
        /// Human-readable error description.
        error: String,
    },
    /// Final frame of a successful turn.
    Done {
        /// The session this turn belonged to.
        session_id: String,
    },
}

/// Serializes a frame as a newline-delimited `data: ` record.
#[must_use]
pub fn frame_to_wire(frame: &StreamFrame) -> String {
    serde_json::to_string(frame)
        .map_or_else(|_| String::from("data: {}\n\n"), |json| format!("data: {json}\n\n"))
}

struct SinkInner {
    tx: mpsc::Sender<StreamFrame>,
    /// Running concatenation for the node currently streaming.
    running: Mutex<String>,
}

/// Shared handle nodes use to emit frames.
///
/// Sending fails with [`EngineError::Cancelled`] once the receiver is
/// dropped (client disconnect); nodes propagate that so the turn stops
/// at its next suspension point.
#[derive(Clone)]
pub struct EventSink {
    inner: Arc<SinkInner>,
}

impl EventSink {
    /// Creates a sink and the receiving end the HTTP layer drains.
    #[must_use]
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<StreamFrame>) {
        let (tx, rx) = mpsc::channel(buffer);
        (
            Self {
                inner: Arc::new(SinkInner {
                    tx,
                    running: Mutex::new(String::new()),
                }),
            },
            rx,
        )
    }

    async fn send(&self, frame: StreamFrame) -> Result<(), EngineError> {
        self.inner
            .tx
            .send(frame)
            .await
            .map_err(|_| EngineError::Cancelled)
    }

    /// Emits an advisory status frame.
    pub async fn status(
        &self,
        node: &str,
        message: &str,
        progress: Option<u8>,
    ) -> Result<(), EngineError> {
        self.send(StreamFrame::Status {
            status: "processing".to_string(),
            message: message.to_string(),
            current_node: node.to_string(),
            progress,
        })
        .await
    }

    /// Emits one incremental content delta for `node`.
    ///
    /// The sink accumulates the node's running `full_response`; callers
    /// only pass the delta.
    pub async fn content(&self, node: &str, delta: &str) -> Result<(), EngineError> {
        let full = {
            let mut running = self.inner.running.lock().await;
            running.push_str(delta);
            running.clone()
        };
        self.send(StreamFrame::Content {
            content: delta.to_string(),
            full_response: full,
            is_complete: false,
            node: Some(node.to_string()),
        })
        .await
    }

    /// Emits the node-completion frame and resets the running buffer.
    ///
    /// When the node produced its output without incremental streaming,
    /// `fallback_full` supplies the `full_response` for the completion
    /// frame.
    pub async fn complete_node(
        &self,
        node: &str,
        fallback_full: &str,
    ) -> Result<(), EngineError> {
        let full = {
            let mut running = self.inner.running.lock().await;
            let full = if running.is_empty() {
                fallback_full.to_string()
            } else {
                running.clone()
            };
            running.clear();
            full
        };
        self.send(StreamFrame::Content {
            content: String::new(),
            full_response: full,
            is_complete: true,
            node: Some(node.to_string()),
        })
        .await
    }

    /// Emits a terminal error frame. Best-effort: a closed channel is
    /// ignored since the client is already gone.
    pub async fn error(&self, error: &str) {
        let _ = self
            .send(StreamFrame::Error {
                error: error.to_string(),
            })
            .await;
    }

    /// Emits the final done frame for a successful turn.
    pub async fn done(&self, session_id: &str) -> Result<(), EngineError> {
        self.send(StreamFrame::Done {
            session_id: session_id.to_string(),
        })
        .await
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink").finish()
    }
}
