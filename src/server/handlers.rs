//! Request handlers for the API.

use std::sync::Arc;

use axum::Json;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use crate::engine::{Engine, TurnOptions};
use crate::error::EngineError;
use crate::extract::{PlainTextExtractor, TextExtractor};
use crate::session::{Document, GptConfig, Session};
use crate::stream::{EventSink, frame_to_wire};

/// API error with an HTTP status.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        let status = match e {
            EngineError::InvalidInput { .. } => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

async fn lookup(engine: &Engine, id: &str) -> Result<Arc<Session>, ApiError> {
    engine
        .sessions()
        .get(id)
        .await
        .ok_or_else(|| ApiError::not_found(format!("unknown session: {id}")))
}

#[derive(Serialize)]
struct SessionCreated {
    session_id: String,
    created_at: String,
}

/// `POST /api/sessions`
pub async fn create_session(State(engine): State<Arc<Engine>>) -> impl IntoResponse {
    let session = engine.sessions().create().await;
    (
        StatusCode::CREATED,
        Json(SessionCreated {
            session_id: session.id.clone(),
            created_at: session.created_at.to_rfc3339(),
        }),
    )
}

#[derive(Serialize)]
struct DocumentMeta {
    id: String,
    filename: String,
    file_type: String,
    size: u64,
}

impl From<&Document> for DocumentMeta {
    fn from(doc: &Document) -> Self {
        Self {
            id: doc.id.clone(),
            filename: doc.filename.clone(),
            file_type: doc.file_type.clone(),
            size: doc.size,
        }
    }
}

#[derive(Serialize)]
pub struct SessionSnapshot {
    session_id: String,
    created_at: String,
    message_count: usize,
    uploaded_docs: Vec<DocumentMeta>,
    kb: Vec<DocumentMeta>,
    gpt_config: GptConfig,
    summary: String,
    generated_images: Vec<String>,
}

/// `GET /api/sessions/{id}`
pub async fn get_session(
    State(engine): State<Arc<Engine>>,
    Path(id): Path<String>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let session = lookup(&engine, &id).await?;
    let data = session.read().await;
    Ok(Json(SessionSnapshot {
        session_id: session.id.clone(),
        created_at: session.created_at.to_rfc3339(),
        message_count: data.messages.len(),
        uploaded_docs: data.uploaded_docs.iter().map(DocumentMeta::from).collect(),
        kb: data.kb_docs.iter().map(DocumentMeta::from).collect(),
        gpt_config: data.gpt_config.clone(),
        summary: data.context.summary.clone(),
        generated_images: data.generated_images.clone(),
    }))
}

/// `DELETE /api/sessions/{id}`
pub async fn delete_session(
    State(engine): State<Arc<Engine>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    engine
        .sessions()
        .remove(&id)
        .await
        .ok_or_else(|| ApiError::not_found(format!("unknown session: {id}")))?;
    engine.cache().clear_kb(Some(&id)).await?;
    engine.cache().clear_user_docs(Some(&id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /api/sessions/{id}/gpt-config`
pub async fn set_gpt_config(
    State(engine): State<Arc<Engine>>,
    Path(id): Path<String>,
    Json(config): Json<GptConfig>,
) -> Result<StatusCode, ApiError> {
    let session = lookup(&engine, &id).await?;
    session.write().await.gpt_config = config;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct IncomingDocument {
    #[serde(default)]
    id: Option<String>,
    filename: String,
    #[serde(default)]
    file_url: Option<String>,
    #[serde(default)]
    file_type: Option<String>,
    #[serde(default)]
    size: Option<u64>,
    /// Inline content, accepted as an alternative to `file_url`.
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
pub struct AddDocumentsRequest {
    documents: Vec<IncomingDocument>,
    doc_type: String,
}

#[derive(Serialize)]
pub struct AddDocumentsResponse {
    added: usize,
    doc_type: String,
}

/// `POST /api/sessions/{id}/add-documents`
///
/// Fetches each document URL, extracts text, and stores the result in
/// the session. User-doc uploads trigger a new-upload preprocess, which
/// drops and re-creates the session's user-doc collection.
pub async fn add_documents(
    State(engine): State<Arc<Engine>>,
    Path(id): Path<String>,
    Json(request): Json<AddDocumentsRequest>,
) -> Result<Json<AddDocumentsResponse>, ApiError> {
    let session = lookup(&engine, &id).await?;
    if request.documents.is_empty() {
        return Err(ApiError::bad_request("documents must not be empty"));
    }
    let doc_type = request.doc_type.to_lowercase();
    if doc_type != "user" && doc_type != "kb" {
        return Err(ApiError::bad_request("doc_type must be \"user\" or \"kb\""));
    }

    let extractor = PlainTextExtractor;
    let mut stored = Vec::with_capacity(request.documents.len());
    for incoming in request.documents {
        let file_type = incoming
            .file_type
            .clone()
            .or_else(|| {
                incoming
                    .filename
                    .rsplit('.')
                    .next()
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "txt".to_string());

        let (content, size) = if let Some(content) = incoming.content {
            let size = content.len() as u64;
            (content, incoming.size.unwrap_or(size))
        } else if let Some(url) = &incoming.file_url {
            let bytes = fetch_document(&engine, url).await?;
            let size = incoming.size.unwrap_or(bytes.len() as u64);
            (extractor.extract(&file_type, &bytes)?, size)
        } else {
            return Err(ApiError::bad_request(format!(
                "document '{}' has neither file_url nor content",
                incoming.filename
            )));
        };

        stored.push(Document {
            id: incoming.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            filename: incoming.filename,
            content,
            file_type,
            size,
            file_url: incoming.file_url,
        });
    }

    let added = stored.len();
    let hybrid = {
        let mut data = session.write().await;
        if doc_type == "user" {
            data.uploaded_docs = stored.clone();
            data.new_uploads = stored.clone();
        } else {
            data.kb_docs.extend(stored.clone());
        }
        data.gpt_config.hybrid_rag
    };

    if doc_type == "user" {
        engine
            .cache()
            .preprocess_user_docs(&id, &stored, hybrid, true)
            .await?;
    }

    Ok(Json(AddDocumentsResponse { added, doc_type }))
}

async fn fetch_document(engine: &Engine, url: &str) -> Result<Vec<u8>, ApiError> {
    let response = engine
        .http()
        .get(url)
        .send()
        .await
        .map_err(|e| ApiError::bad_request(format!("failed to fetch {url}: {e}")))?;
    if !response.status().is_success() {
        return Err(ApiError::bad_request(format!(
            "failed to fetch {url}: status {}",
            response.status()
        )));
    }
    response
        .bytes()
        .await
        .map(|b| b.to_vec())
        .map_err(|e| ApiError::bad_request(format!("failed to read {url}: {e}")))
}

#[derive(Serialize)]
pub struct DocumentsResponse {
    uploaded_docs: Vec<DocumentMeta>,
    kb: Vec<DocumentMeta>,
}

/// `GET /api/sessions/{id}/documents`
pub async fn get_documents(
    State(engine): State<Arc<Engine>>,
    Path(id): Path<String>,
) -> Result<Json<DocumentsResponse>, ApiError> {
    let session = lookup(&engine, &id).await?;
    let data = session.read().await;
    Ok(Json(DocumentsResponse {
        uploaded_docs: data.uploaded_docs.iter().map(DocumentMeta::from).collect(),
        kb: data.kb_docs.iter().map(DocumentMeta::from).collect(),
    }))
}

/// `POST /api/sessions/{id}/chat/stream`
///
/// Runs the turn in a background task and streams frames as
/// newline-delimited `data:` records. Dropping the response body (client
/// disconnect) cancels the turn at its next suspension point.
pub async fn chat_stream(
    State(engine): State<Arc<Engine>>,
    Path(id): Path<String>,
    Json(options): Json<TurnOptions>,
) -> Result<Response, ApiError> {
    let session = lookup(&engine, &id).await?;

    let (sink, rx) = EventSink::channel(64);
    let cancel = CancellationToken::new();

    let turn_cancel = cancel.clone();
    tokio::spawn(async move {
        engine.run_turn(session, options, sink, turn_cancel).await;
    });

    let guard = cancel.drop_guard();
    let body = ReceiverStream::new(rx).map(move |frame| {
        let _alive = &guard;
        Ok::<_, std::convert::Infallible>(axum::body::Bytes::from(frame_to_wire(&frame)))
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(body))
        .map_err(|e| {
            warn!(error = %e, "failed to build stream response");
            ApiError::from(EngineError::internal("failed to build stream response"))
        })
}

#[derive(Serialize)]
pub struct Health {
    status: &'static str,
    provider_configured: bool,
    timestamp: String,
}

/// `GET /api/health`
pub async fn health(State(engine): State<Arc<Engine>>) -> Json<Health> {
    Json(Health {
        status: "ok",
        provider_configured: engine.provider_configured(),
        timestamp: Utc::now().to_rfc3339(),
    })
}
