//! Per-session retrieval cache lifecycle.
//!
//! Two process-wide maps (knowledge base and user documents) track which
//! sessions already have populated collections. Writes are serialized
//! per session key; a new upload holds the key's lock across the whole
//! drop + recreate window so no reader ever sees a half-built
//! collection.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::index::RetrievalIndex;
use crate::error::EngineError;
use crate::session::Document;

/// Collection name for a session's knowledge base.
#[must_use]
pub fn kb_collection(session_id: &str) -> String {
    format!("kb_{session_id}")
}

/// Collection name for a session's uploaded documents.
#[must_use]
pub fn user_docs_collection(session_id: &str) -> String {
    format!("user_docs_{session_id}")
}

/// Cache record for one populated collection.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Backing collection name.
    pub collection: String,
    /// Whether a lexical index was built alongside.
    pub hybrid: bool,
    /// When preprocessing completed.
    pub processed_at: DateTime<Utc>,
    /// Number of documents preprocessed.
    pub doc_count: usize,
}

/// Owns the embedding/index lifecycle per session.
pub struct CacheManager {
    index: Arc<RetrievalIndex>,
    kb: Mutex<HashMap<String, CacheEntry>>,
    user: Mutex<HashMap<String, CacheEntry>>,
    key_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl CacheManager {
    /// Creates a manager over the given index.
    #[must_use]
    pub fn new(index: Arc<RetrievalIndex>) -> Self {
        Self {
            index,
            kb: Mutex::new(HashMap::new()),
            user: Mutex::new(HashMap::new()),
            key_locks: Mutex::new(HashMap::new()),
        }
    }

    /// The retrieval index this manager controls.
    #[must_use]
    pub fn index(&self) -> &Arc<RetrievalIndex> {
        &self.index
    }

    async fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.key_locks.lock().await;
        Arc::clone(locks.entry(key.to_string()).or_default())
    }

    /// Preprocesses knowledge-base documents for a session. Idempotent:
    /// if a cache entry exists, nothing happens.
    ///
    /// # Errors
    ///
    /// Propagates embedding and backend failures.
    pub async fn preprocess_kb(
        &self,
        session_id: &str,
        docs: &[Document],
        hybrid: bool,
    ) -> Result<(), EngineError> {
        let collection = kb_collection(session_id);
        let lock = self.key_lock(&collection).await;
        let _guard = lock.lock().await;

        if self.kb.lock().await.contains_key(session_id) {
            debug!(session_id, "KB cache hit; skipping preprocess");
            return Ok(());
        }

        let texts = kb_texts(docs);
        self.index.upsert(&collection, &texts, hybrid).await?;

        self.kb.lock().await.insert(
            session_id.to_string(),
            CacheEntry {
                collection,
                hybrid,
                processed_at: Utc::now(),
                doc_count: docs.len(),
            },
        );
        info!(session_id, docs = docs.len(), hybrid, "KB preprocessed");
        Ok(())
    }

    /// Preprocesses user documents for a session.
    ///
    /// With `new_upload` set, evicts the prior cache entry and drops the
    /// prior collection (vectors and lexical index) before re-creating
    /// it, so the collection afterwards holds exactly the passed
    /// documents' chunks. Without it, upserts into the existing
    /// collection.
    ///
    /// # Errors
    ///
    /// Propagates embedding and backend failures.
    pub async fn preprocess_user_docs(
        &self,
        session_id: &str,
        docs: &[Document],
        hybrid: bool,
        new_upload: bool,
    ) -> Result<(), EngineError> {
        let collection = user_docs_collection(session_id);
        let lock = self.key_lock(&collection).await;
        let _guard = lock.lock().await;

        if new_upload {
            self.user.lock().await.remove(session_id);
            self.index.drop_collection(&collection).await?;
        }

        let texts: Vec<String> = docs.iter().map(|d| d.content.clone()).collect();
        self.index.upsert(&collection, &texts, hybrid).await?;

        let mut user = self.user.lock().await;
        match user.get_mut(session_id) {
            Some(entry) if !new_upload => {
                entry.doc_count += docs.len();
                entry.processed_at = Utc::now();
            }
            _ => {
                user.insert(
                    session_id.to_string(),
                    CacheEntry {
                        collection,
                        hybrid,
                        processed_at: Utc::now(),
                        doc_count: docs.len(),
                    },
                );
            }
        }
        info!(
            session_id,
            docs = docs.len(),
            hybrid,
            new_upload,
            "user docs preprocessed"
        );
        Ok(())
    }

    /// Whether a session's KB is already preprocessed.
    pub async fn has_kb(&self, session_id: &str) -> bool {
        self.kb.lock().await.contains_key(session_id)
    }

    /// Whether a session's user documents are already preprocessed.
    pub async fn has_user_docs(&self, session_id: &str) -> bool {
        self.user.lock().await.contains_key(session_id)
    }

    /// Evicts KB cache entries: one session, or all when `None`.
    ///
    /// # Errors
    ///
    /// Propagates backend failures while dropping collections.
    pub async fn clear_kb(&self, session_id: Option<&str>) -> Result<(), EngineError> {
        let evicted: Vec<CacheEntry> = {
            let mut kb = self.kb.lock().await;
            match session_id {
                Some(id) => kb.remove(id).into_iter().collect(),
                None => kb.drain().map(|(_, entry)| entry).collect(),
            }
        };
        for entry in evicted {
            self.index.drop_collection(&entry.collection).await?;
        }
        Ok(())
    }

    /// Evicts user-doc cache entries and their lexical indices: one
    /// session, or all when `None`.
    ///
    /// # Errors
    ///
    /// Propagates backend failures while dropping collections.
    pub async fn clear_user_docs(&self, session_id: Option<&str>) -> Result<(), EngineError> {
        let evicted: Vec<CacheEntry> = {
            let mut user = self.user.lock().await;
            match session_id {
                Some(id) => user.remove(id).into_iter().collect(),
                None => user.drain().map(|(_, entry)| entry).collect(),
            }
        };
        for entry in evicted {
            self.index.drop_collection(&entry.collection).await?;
            self.index.drop_lexical(&entry.collection).await;
        }
        Ok(())
    }
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager").finish()
    }
}

/// Formats KB documents with their metadata header for indexing.
fn kb_texts(docs: &[Document]) -> Vec<String> {
    docs.iter()
        .map(|doc| {
            format!(
                "[Document: {} ({})]\n{}",
                doc.filename, doc.file_type, doc.content
            )
        })
        .collect()
}
