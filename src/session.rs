//! Process-wide session store.
//!
//! Sessions own their message history, uploaded documents, knowledge-base
//! documents, GPT configuration, and a rolling context summary. Each
//! session carries a turn lock so at most one chat turn is in flight per
//! session; the store itself is shared across sessions.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

use crate::provider::message::ChatMessage;

/// A document owned by a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Opaque document identifier.
    pub id: String,
    /// Original filename.
    pub filename: String,
    /// Extracted text content.
    pub content: String,
    /// File type tag (`"pdf"`, `"txt"`, …).
    pub file_type: String,
    /// Size in bytes of the source file.
    pub size: u64,
    /// Remote URL the document was fetched from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
}

/// Per-session GPT configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GptConfig {
    /// Model name for answer generation.
    #[serde(default)]
    pub model: Option<String>,
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Custom instruction prepended to system prompts.
    #[serde(default)]
    pub instruction: String,
    /// Enables hybrid (dense + lexical) retrieval.
    #[serde(default)]
    pub hybrid_rag: bool,
    /// Enables advanced web-search depth and detailed formatting.
    #[serde(default)]
    pub web_search: bool,
    /// Forces the deep-research plan.
    #[serde(default)]
    pub deep_search: bool,
}

const fn default_temperature() -> f32 {
    0.3
}

impl Default for GptConfig {
    fn default() -> Self {
        Self {
            model: None,
            temperature: default_temperature(),
            instruction: String::new(),
            hybrid_rag: false,
            web_search: false,
            deep_search: false,
        }
    }
}

/// Verdict of the advisory follow-up judge, recorded per turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowupVerdict {
    /// Whether the new message continues the previous thread.
    pub is_followup: bool,
    /// Whether the same sources should be reused.
    pub should_reuse_sources: bool,
    /// Judge confidence, 0.0–1.0.
    pub confidence: f32,
    /// One-line rationale.
    pub rationale: String,
}

/// Rolling per-session context carried between turns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionContext {
    /// Summary of history older than the verbatim window.
    pub summary: String,
    /// Route chosen for the previous turn (advisory).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_route: Option<String>,
    /// Verdict recorded by the follow-up judge (advisory).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub followup: Option<FollowupVerdict>,
}

/// Mutable body of a session, guarded by the session's `RwLock`.
#[derive(Debug, Default)]
pub struct SessionData {
    /// Ordered message history.
    pub messages: Vec<ChatMessage>,
    /// User-uploaded documents.
    pub uploaded_docs: Vec<Document>,
    /// Knowledge-base documents.
    pub kb_docs: Vec<Document>,
    /// Documents from the most recent upload; drained by the next turn.
    pub new_uploads: Vec<Document>,
    /// GPT configuration.
    pub gpt_config: GptConfig,
    /// Rolling context.
    pub context: SessionContext,
    /// URLs of images generated for this session.
    pub generated_images: Vec<String>,
}

/// A single conversational session.
#[derive(Debug)]
pub struct Session {
    /// Opaque session identifier.
    pub id: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    data: RwLock<SessionData>,
    turn_lock: Arc<Mutex<()>>,
}

impl Session {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            data: RwLock::new(SessionData::default()),
            turn_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Read access to the session body.
    pub async fn read(&self) -> tokio::sync::RwLockReadGuard<'_, SessionData> {
        self.data.read().await
    }

    /// Write access to the session body.
    pub async fn write(&self) -> tokio::sync::RwLockWriteGuard<'_, SessionData> {
        self.data.write().await
    }

    /// Acquires the turn lock, serializing chat turns for this session.
    pub async fn lock_turn(&self) -> OwnedMutexGuard<()> {
        Arc::clone(&self.turn_lock).lock_owned().await
    }
}

/// Process-wide mapping from session id to session record.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a session and returns it.
    pub async fn create(&self) -> Arc<Session> {
        let session = Arc::new(Session::new());
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), Arc::clone(&session));
        session
    }

    /// Looks up a session by id.
    pub async fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Removes a session, returning it if present.
    pub async fn remove(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.write().await.remove(id)
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Whether the store holds no sessions.
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::message::user_message;

    #[tokio::test]
    async fn test_create_and_get() {
        let store = SessionStore::new();
        let session = store.create().await;
        assert!(!session.id.is_empty());

        let found = store.get(&session.id).await;
        assert!(found.is_some());
        assert!(store.get("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_remove_destroys_session() {
        let store = SessionStore::new();
        let session = store.create().await;
        assert_eq!(store.len().await, 1);
        store.remove(&session.id).await;
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_session_data_mutation() {
        let store = SessionStore::new();
        let session = store.create().await;
        {
            let mut data = session.write().await;
            data.messages.push(user_message("hello"));
            data.context.summary = "summary".to_string();
        }
        let data = session.read().await;
        assert_eq!(data.messages.len(), 1);
        assert_eq!(data.context.summary, "summary");
    }

    #[tokio::test]
    async fn test_turn_lock_serializes() {
        let store = SessionStore::new();
        let session = store.create().await;

        let guard = session.lock_turn().await;
        // Second acquisition must not complete while the first is held.
        let second = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            session.lock_turn(),
        )
        .await;
        assert!(second.is_err());
        drop(guard);

        let third = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            session.lock_turn(),
        )
        .await;
        assert!(third.is_ok());
    }

    #[test]
    fn test_gpt_config_defaults() {
        let config: GptConfig = serde_json::from_str("{}").unwrap_or_default();
        assert!((config.temperature - 0.3).abs() < f32::EPSILON);
        assert!(!config.deep_search);
        assert!(config.model.is_none());
    }
}
