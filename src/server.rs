//! HTTP surface for the gateway.
//!
//! Generation endpoints answer with Server-Sent Events: one `token` event
//! per token (`{"token": "..."}`), then either a `done` event or a single
//! `error` event (`{"code": "...", "message": "..."}`) before the stream
//! closes. A client that disconnects drops the event stream, which cancels
//! the request and the provider call behind it.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/v1/generate/stream` | Plain generation (SSE) |
//! | `POST` | `/v1/generate/rag` | Retrieval-augmented generation (SSE) |
//! | `POST` | `/v1/documents` | Ingest a document |
//! | `DELETE` | `/v1/collections/{name}/documents/{id}` | Delete a document |
//! | `POST` | `/v1/collections` | Create a collection |
//! | `GET`  | `/v1/collections` | List collections, oldest first |
//! | `DELETE` | `/v1/collections/{name}` | Delete a collection |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "success": false, "message": "collection not found: x",
//!   "error": { "code": "not_found", "message": "collection not found: x" } }
//! ```
//!
//! Status codes: `bad_request` (400), `not_found` (404), `already_exists`
//! (409), provider failures (502), `timeout` (504), store and rollback
//! failures (500).

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use rag_gateway_core::models::Metadata;
use rag_gateway_core::RagError;

use crate::gateway::Gateway;
use crate::ingest::IngestRequest;
use crate::orchestrator::{GenerateRequest, RagRequest, ResponseStream};

type AppState = Arc<Gateway>;

/// Build the router. Exposed separately from [`run_server`] so tests can
/// drive it with `tower::ServiceExt::oneshot`.
pub fn router(gateway: Arc<Gateway>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/generate/stream", post(handle_generate_stream))
        .route("/v1/generate/rag", post(handle_generate_rag))
        .route("/v1/documents", post(handle_ingest))
        .route(
            "/v1/collections",
            post(handle_create_collection).get(handle_list_collections),
        )
        .route("/v1/collections/{name}", delete(handle_delete_collection))
        .route(
            "/v1/collections/{name}/documents/{id}",
            delete(handle_delete_document),
        )
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(gateway)
}

/// Serve on `[server].bind` until Ctrl-C.
pub async fn run_server(gateway: Arc<Gateway>) -> anyhow::Result<()> {
    let bind_addr = gateway.config().server.bind.clone();
    let app = router(gateway);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    message: String,
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError(RagError);

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        AppError(err)
    }
}

fn status_for(err: &RagError) -> StatusCode {
    match err {
        RagError::Validation(_) => StatusCode::BAD_REQUEST,
        RagError::CollectionNotFound { .. } => StatusCode::NOT_FOUND,
        RagError::CollectionAlreadyExists { .. } => StatusCode::CONFLICT,
        RagError::EmbeddingProvider { .. } | RagError::GenerationProvider(_) => {
            StatusCode::BAD_GATEWAY
        }
        RagError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        RagError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        RagError::Configuration(_) | RagError::Store(_) | RagError::IngestionRollback { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::error!(code = self.0.code(), error = %self.0, "request failed");
        }
        let message = self.0.to_string();
        let body = ErrorBody {
            success: false,
            message: message.clone(),
            error: ErrorDetail {
                code: self.0.code().to_string(),
                message,
            },
        };
        (status, Json(body)).into_response()
    }
}

// ============ SSE ============

#[derive(Serialize)]
struct TokenFrame<'a> {
    token: &'a str,
}

#[derive(Serialize)]
struct DoneFrame {
    request_id: String,
}

#[derive(Serialize)]
struct ErrorFrame<'a> {
    code: &'a str,
    message: String,
}

fn frame(event: &str, data: &impl Serialize) -> Event {
    Event::default()
        .event(event)
        .data(serde_json::to_string(data).unwrap_or_default())
}

/// Token events, then exactly one terminal `done` or `error` event.
fn sse_events(stream: ResponseStream) -> impl Stream<Item = Result<Event, Infallible>> {
    let request_id = stream.request_id().to_string();
    futures::stream::unfold(Some(stream), move |state| {
        let request_id = request_id.clone();
        async move {
            let mut stream = state?;
            let event = match stream.next().await {
                Some(Ok(token)) => {
                    return Some((Ok(frame("token", &TokenFrame { token: &token })), Some(stream)))
                }
                Some(Err(e)) => frame(
                    "error",
                    &ErrorFrame {
                        code: e.code(),
                        message: e.to_string(),
                    },
                ),
                None => frame("done", &DoneFrame { request_id }),
            };
            Some((Ok(event), None))
        }
    })
}

fn sse_response(stream: ResponseStream) -> Response {
    let request_id = stream.request_id().to_string();
    let mut response = Sse::new(sse_events(stream))
        .keep_alive(KeepAlive::default())
        .into_response();
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

// ============ Generation ============

#[derive(Deserialize)]
struct GenerateBody {
    prompt: String,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    conversation_id: Option<String>,
}

async fn handle_generate_stream(
    State(gateway): State<AppState>,
    Json(body): Json<GenerateBody>,
) -> Result<Response, AppError> {
    let stream = gateway.orchestrator().generate_stream(GenerateRequest {
        prompt: body.prompt,
        user_id: body.user_id,
        conversation_id: body.conversation_id,
    })?;
    Ok(sse_response(stream))
}

#[derive(Deserialize)]
struct RagBody {
    prompt: String,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(default)]
    rag_collection: Option<String>,
    #[serde(default)]
    adaptive: bool,
}

async fn handle_generate_rag(
    State(gateway): State<AppState>,
    Json(body): Json<RagBody>,
) -> Result<Response, AppError> {
    let stream = gateway.orchestrator().generate_with_rag(RagRequest {
        prompt: body.prompt,
        user_id: body.user_id,
        conversation_id: body.conversation_id,
        rag_collection: body.rag_collection,
        adaptive: body.adaptive,
    })?;
    Ok(sse_response(stream))
}

// ============ Documents ============

#[derive(Deserialize)]
struct IngestBody {
    content: String,
    collection: String,
    #[serde(default)]
    metadata: Metadata,
    #[serde(default)]
    document_id: Option<String>,
}

#[derive(Serialize)]
struct IngestResponse {
    success: bool,
    message: String,
    document_id: String,
    chunks_created: usize,
}

async fn handle_ingest(
    State(gateway): State<AppState>,
    Json(body): Json<IngestBody>,
) -> Result<Json<IngestResponse>, AppError> {
    let collection = body.collection.clone();
    let outcome = gateway
        .pipeline()
        .ingest(IngestRequest {
            content: body.content,
            collection: body.collection,
            metadata: body.metadata,
            document_id: body.document_id,
        })
        .await?;

    Ok(Json(IngestResponse {
        success: true,
        message: format!(
            "Ingested {} chunks into '{}'",
            outcome.chunks_created, collection
        ),
        document_id: outcome.document_id,
        chunks_created: outcome.chunks_created,
    }))
}

#[derive(Serialize)]
struct DeleteDocumentResponse {
    success: bool,
    message: String,
    chunks_deleted: usize,
}

async fn handle_delete_document(
    State(gateway): State<AppState>,
    Path((name, id)): Path<(String, String)>,
) -> Result<Json<DeleteDocumentResponse>, AppError> {
    let removed = gateway.pipeline().delete_document(&name, &id).await?;
    Ok(Json(DeleteDocumentResponse {
        success: true,
        message: format!("Deleted document '{}' from '{}'", id, name),
        chunks_deleted: removed,
    }))
}

// ============ Collections ============

#[derive(Deserialize)]
struct CreateCollectionBody {
    collection_name: String,
    #[serde(default)]
    metadata: Metadata,
}

#[derive(Serialize)]
struct CreateCollectionResponse {
    success: bool,
    message: String,
    collection_name: String,
}

async fn handle_create_collection(
    State(gateway): State<AppState>,
    Json(body): Json<CreateCollectionBody>,
) -> Result<(StatusCode, Json<CreateCollectionResponse>), AppError> {
    let collection = gateway
        .registry()
        .create(&body.collection_name, body.metadata)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateCollectionResponse {
            success: true,
            message: format!("Collection '{}' created", collection.name),
            collection_name: collection.name,
        }),
    ))
}

#[derive(Serialize)]
struct CollectionInfo {
    name: String,
    document_count: u64,
    created_at: DateTime<Utc>,
    metadata: Metadata,
}

#[derive(Serialize)]
struct ListCollectionsResponse {
    collections: Vec<CollectionInfo>,
}

async fn handle_list_collections(
    State(gateway): State<AppState>,
) -> Result<Json<ListCollectionsResponse>, AppError> {
    let collections = gateway
        .registry()
        .list()
        .await?
        .into_iter()
        .map(|c| CollectionInfo {
            name: c.name,
            document_count: c.document_count,
            created_at: c.created_at,
            metadata: c.metadata,
        })
        .collect();
    Ok(Json(ListCollectionsResponse { collections }))
}

#[derive(Serialize)]
struct DeleteCollectionResponse {
    success: bool,
    message: String,
}

async fn handle_delete_collection(
    State(gateway): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<DeleteCollectionResponse>, AppError> {
    gateway.registry().delete(&name).await?;
    Ok(Json(DeleteCollectionResponse {
        success: true,
        message: format!("Collection '{}' deleted", name),
    }))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
