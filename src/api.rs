//! HTTP surface for the document QA service.
//!
//! A thin `axum` router: request validation and JSON (de)serialization only.
//! All business logic lives in [`crate::rag`], [`crate::query`], and
//! [`crate::analytics`].

use crate::analytics::Analytics;
use crate::config::AppConfig;
use crate::error::AppError;
use crate::progress::{IncomingMessage, OutgoingEvent, ProgressHub};
use crate::query::QueryPipeline;
use crate::rag::RagOrchestrator;
use crate::storage::{DocumentRecord, Storage};
use axum::{
    body::Bytes,
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Multipart, Path as AxPath, Query, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<QueryPipeline>,
    pub orchestrator: Arc<RagOrchestrator>,
    pub analytics: Arc<Analytics>,
    pub storage: Storage,
    pub progress: Arc<ProgressHub>,
    pub data_dir: PathBuf,
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

pub struct ApiError(AppError);

impl<E: Into<AppError>> From<E> for ApiError {
    fn from(e: E) -> Self {
        ApiError(e.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::TooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::UnsupportedFormat(_) => StatusCode::BAD_REQUEST,
            AppError::NoExtractableText => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Llm(crate::error::LlmError::Unavailable)
            | AppError::Llm(crate::error::LlmError::AllProvidersFailed) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        warn!("request failed: {}", self.0);
        (status, Json(ErrorResponse { error: self.0.to_string() })).into_response()
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DocumentResponse {
    pub id: String,
    pub filename: String,
    pub file_type: String,
    pub status: String,
    pub char_count: i64,
    pub chunks_created: i64,
    pub created_at: chrono::DateTime<Utc>,
}

impl From<DocumentRecord> for DocumentResponse {
    fn from(d: DocumentRecord) -> Self {
        Self {
            id: d.id,
            filename: d.filename,
            file_type: d.file_type,
            status: d.status,
            char_count: d.char_count,
            chunks_created: d.chunks_created,
            created_at: d.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    pub offset: usize,
    #[serde(default = "default_page_limit")]
    pub limit: usize,
}

fn default_page_limit() -> usize {
    20
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AskRequest {
    pub question: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_top_k() -> usize {
    5
}
fn default_score_threshold() -> f32 {
    0.3
}
fn default_max_tokens() -> u32 {
    512
}
fn default_temperature() -> f32 {
    0.3
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_search_threshold")]
    pub score_threshold: f32,
}

fn default_search_threshold() -> f32 {
    0.2
}

/// Form-encoded variant of document search.
#[derive(Debug, Deserialize)]
pub struct DocumentSearchForm {
    pub query: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SearchResultEntry {
    pub document_id: String,
    pub chunk_id: String,
    pub text: String,
    pub score: f32,
}

#[derive(Debug, Deserialize)]
pub struct TrendsQuery {
    #[serde(default = "default_days")]
    pub days: u32,
}

fn default_days() -> u32 {
    7
}

#[derive(Debug, Deserialize)]
pub struct PopularQuery {
    #[serde(default = "default_min_frequency")]
    pub min_frequency: usize,
    #[serde(default = "default_popular_limit")]
    pub limit: usize,
}

fn default_min_frequency() -> usize {
    2
}
fn default_popular_limit() -> usize {
    10
}

#[derive(OpenApi)]
#[openapi(
    paths(health_handler, ask_handler, search_handler),
    components(schemas(HealthResponse, AskRequest, SearchRequest, ErrorResponse))
)]
struct ApiDoc;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/v1/system/capabilities", get(capabilities_handler))
        .route("/api/v1/documents/upload", post(upload_document_handler))
        .route("/api/v1/documents", get(list_documents_handler))
        .route(
            "/api/v1/documents/{id}",
            get(get_document_handler).delete(delete_document_handler),
        )
        .route("/api/v1/documents/{id}/preview", get(preview_document_handler))
        .route("/api/v1/documents/{id}/content", get(content_document_handler))
        .route("/api/v1/documents/{id}/download", get(download_document_handler))
        .route("/api/v1/documents/search", post(documents_search_handler))
        .route("/api/v1/query/ask", post(ask_handler))
        .route("/api/v1/query/search", post(search_handler))
        .route("/api/v1/query/history", get(query_history_handler))
        .route("/api/v1/analytics/stats", get(stats_handler))
        .route("/api/v1/analytics/popular-questions", get(popular_questions_handler))
        .route("/api/v1/analytics/query-trends", get(trends_handler))
        .route("/api/v1/analytics/llm-usage", get(llm_usage_handler))
        .route("/ws/client/{client_id}", get(ws_handler))
        .route("/api-docs/openapi.json", get(openapi_spec_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn openapi_spec_handler() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[utoipa::path(get, path = "/health", tag = "health", responses((status = 200, body = HealthResponse)))]
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: crate::VERSION.to_string(),
    })
}

#[derive(Debug, Serialize)]
struct CapabilitiesResponse {
    accepted_extensions: Vec<&'static str>,
    max_upload_bytes: u64,
    backends: Vec<&'static str>,
}

async fn capabilities_handler() -> Json<CapabilitiesResponse> {
    Json(CapabilitiesResponse {
        accepted_extensions: crate::extractor::SUPPORTED_EXTENSIONS.to_vec(),
        max_upload_bytes: crate::extractor::MAX_FILE_SIZE_BYTES,
        backends: vec!["local", "openai", "groq"],
    })
}

/// Edge-level upload limit, tighter than the extractor's own hard cap so
/// obviously oversized uploads are rejected before touching disk.
const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

async fn upload_document_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<DocumentResponse>> {
    let field = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("invalid multipart body: {e}")))?
        .ok_or_else(|| AppError::Validation("no file field provided".to_string()))?;

    let filename = field
        .file_name()
        .map(|n| n.to_string())
        .ok_or_else(|| AppError::Validation("missing filename".to_string()))?;

    let ext = PathBuf::from(&filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();
    if !crate::extractor::SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
        return Err(AppError::UnsupportedFormat(ext).into());
    }

    let bytes = field
        .bytes()
        .await
        .map_err(|e| AppError::Validation(format!("failed to read upload: {e}")))?;
    if bytes.len() > MAX_UPLOAD_BYTES {
        return Err(
            AppError::TooLarge(format!("{} bytes exceeds the {MAX_UPLOAD_BYTES} byte upload limit", bytes.len()))
                .into(),
        );
    }

    let document_id = Uuid::new_v4().to_string();
    let docs_dir = state.data_dir.join("documents");
    std::fs::create_dir_all(&docs_dir)?;
    let dest = docs_dir.join(format!("{document_id}.{ext}"));
    std::fs::write(&dest, &bytes)?;

    let now = Utc::now();
    let mut record = DocumentRecord {
        id: document_id.clone(),
        filename: filename.clone(),
        file_path: dest.display().to_string(),
        file_type: ext,
        processed_path: None,
        status: "uploaded".to_string(),
        char_count: 0,
        chunks_created: 0,
        document_id: document_id.clone(),
        created_at: now,
        updated_at: now,
    };
    state.storage.upsert_document(&record).await?;

    match state
        .orchestrator
        .ingest(&dest, &document_id, HashMap::new())
        .await
    {
        Ok(result) => {
            record.status = "processed".to_string();
            record.char_count = result.char_count as i64;
            record.chunks_created = result.chunks_created as i64;
        }
        Err(e) => {
            warn!("ingest failed for document {document_id}: {e}");
            record.status = "failed".to_string();
        }
    }
    record.updated_at = Utc::now();
    state.storage.upsert_document(&record).await?;

    Ok(Json(DocumentResponse::from(record)))
}

async fn list_documents_handler(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
) -> ApiResult<Json<Vec<DocumentResponse>>> {
    let docs = state.storage.list_documents().await?;
    let page = docs
        .into_iter()
        .skip(page.offset)
        .take(page.limit)
        .map(DocumentResponse::from)
        .collect();
    Ok(Json(page))
}

async fn get_document_handler(
    State(state): State<AppState>,
    AxPath(id): AxPath<String>,
) -> ApiResult<Json<DocumentResponse>> {
    let doc = state
        .storage
        .get_document(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("document {id}")))?;
    Ok(Json(DocumentResponse::from(doc)))
}

async fn delete_document_handler(
    State(state): State<AppState>,
    AxPath(id): AxPath<String>,
) -> ApiResult<StatusCode> {
    let existed = state.storage.delete_document(&id).await?;
    if !existed {
        return Err(AppError::NotFound(format!("document {id}")).into());
    }
    Ok(StatusCode::NO_CONTENT)
}

const PREVIEW_CHAR_LIMIT: usize = 500;

async fn preview_document_handler(
    State(state): State<AppState>,
    AxPath(id): AxPath<String>,
) -> ApiResult<Json<String>> {
    let text = extracted_text(&state, &id).await?;
    let preview: String = text.chars().take(PREVIEW_CHAR_LIMIT).collect();
    Ok(Json(preview))
}

async fn content_document_handler(
    State(state): State<AppState>,
    AxPath(id): AxPath<String>,
) -> ApiResult<Json<String>> {
    Ok(Json(extracted_text(&state, &id).await?))
}

async fn extracted_text(state: &AppState, id: &str) -> ApiResult<String> {
    let doc = state
        .storage
        .get_document(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("document {id}")))?;
    let extracted = crate::extractor::extract(std::path::Path::new(&doc.file_path))?;
    Ok(extracted.text)
}

async fn download_document_handler(
    State(state): State<AppState>,
    AxPath(id): AxPath<String>,
) -> ApiResult<Response> {
    let doc = state
        .storage
        .get_document(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("document {id}")))?;
    let bytes: Bytes = std::fs::read(&doc.file_path)?.into();
    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", doc.filename),
            ),
        ],
        bytes,
    )
        .into_response())
}

async fn documents_search_handler(
    State(state): State<AppState>,
    Form(form): Form<DocumentSearchForm>,
) -> ApiResult<Json<Vec<SearchResultEntry>>> {
    let response = state.orchestrator.search(&form.query, form.top_k, 0.0, None).await;
    if !response.success {
        return Err(AppError::Validation("search failed".to_string()).into());
    }
    Ok(Json(hits_to_entries(response.hits)))
}

#[utoipa::path(post, path = "/api/v1/query/ask", tag = "query", request_body = AskRequest, responses((status = 200)))]
async fn ask_handler(
    State(state): State<AppState>,
    Json(request): Json<AskRequest>,
) -> ApiResult<Json<crate::query::AskResponse>> {
    let response = state
        .pipeline
        .ask(
            &request.question,
            request.top_k,
            request.score_threshold,
            request.max_tokens,
            request.temperature,
        )
        .await?;
    Ok(Json(response))
}

#[utoipa::path(post, path = "/api/v1/query/search", tag = "query", request_body = SearchRequest, responses((status = 200)))]
async fn search_handler(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> ApiResult<Json<Vec<SearchResultEntry>>> {
    let response = state
        .pipeline
        .search(&request.query, request.top_k, request.score_threshold)
        .await;
    if !response.success {
        return Err(AppError::Validation("search failed".to_string()).into());
    }
    Ok(Json(hits_to_entries(response.hits)))
}

fn hits_to_entries(hits: Vec<crate::vector_store::SearchHit>) -> Vec<SearchResultEntry> {
    hits.into_iter()
        .map(|hit| SearchResultEntry {
            document_id: hit.chunk.document_id,
            chunk_id: hit.chunk.chunk_id,
            text: hit.chunk.text,
            score: hit.score,
        })
        .collect()
}

async fn query_history_handler(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
) -> ApiResult<Json<Vec<crate::storage::QueryRecord>>> {
    let records = state.storage.all_query_records().await?;
    let page = records.into_iter().skip(page.offset).take(page.limit).collect();
    Ok(Json(page))
}

async fn stats_handler(State(state): State<AppState>) -> ApiResult<Json<crate::analytics::Stats>> {
    let total_documents = state.storage.list_documents().await?.len() as i64;
    let stats = state.analytics.stats(total_documents).await?;
    Ok(Json(stats))
}

async fn popular_questions_handler(
    State(state): State<AppState>,
    Query(params): Query<PopularQuery>,
) -> ApiResult<Json<crate::analytics::PopularQuestionsReport>> {
    let report = state
        .analytics
        .popular_questions(params.min_frequency, params.limit)
        .await?;
    Ok(Json(report))
}

async fn trends_handler(
    State(state): State<AppState>,
    Query(params): Query<TrendsQuery>,
) -> ApiResult<Json<Vec<crate::analytics::DailyTrend>>> {
    let trends = state.analytics.trends(params.days).await?;
    Ok(Json(trends))
}

async fn llm_usage_handler(State(state): State<AppState>) -> ApiResult<Json<crate::analytics::LlmUsage>> {
    let usage = state.analytics.llm_usage().await?;
    Ok(Json(usage))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    AxPath(client_id): AxPath<String>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, client_id, state))
}

async fn handle_socket(mut socket: WebSocket, client_id: String, state: AppState) {
    state.progress.register(&client_id).await;
    info!("websocket client {client_id} connected");

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        match serde_json::from_str::<IncomingMessage>(&text) {
                            Ok(message) => {
                                if let Some(reply) = state.progress.handle_incoming(&message) {
                                    if send_event(&mut socket, &reply).await.is_err() {
                                        break;
                                    }
                                }
                                if let IncomingMessage::StreamAnswer { question, .. } = message {
                                    match state.pipeline.ask(&question, 5, 0.3, 512, 0.3).await {
                                        Ok(response) => {
                                            state.progress.stream_answer(&client_id, &response.answer, &response.llm_used).await;
                                        }
                                        Err(e) => {
                                            state.progress.send(&client_id, OutgoingEvent::AnswerStreamError { error: e.to_string() }).await;
                                        }
                                    }
                                }
                            }
                            Err(e) => warn!("ignoring malformed client message: {e}"),
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!("websocket error for {client_id}: {e}");
                        break;
                    }
                    _ => {}
                }
            }
            _ = tokio::time::sleep(tokio::time::Duration::from_millis(50)) => {
                for event in state.progress.drain(&client_id).await {
                    if send_event(&mut socket, &event).await.is_err() {
                        state.progress.deregister(&client_id).await;
                        return;
                    }
                }
            }
        }
    }

    state.progress.deregister(&client_id).await;
    info!("websocket client {client_id} disconnected");
}

async fn send_event(socket: &mut WebSocket, event: &OutgoingEvent) -> std::result::Result<(), axum::Error> {
    let text = serde_json::to_string(event).unwrap_or_default();
    socket.send(WsMessage::Text(text.into())).await
}

pub async fn start_server(state: AppState, config: &AppConfig) -> crate::error::Result<()> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("starting API server on {addr}");

    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("API server listening on {addr}");

    axum::serve(listener, app)
        .await
        .map_err(|e| AppError::Config(format!("server error: {e}")))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_response_serializes() {
        let response = HealthResponse {
            status: "ok".to_string(),
            version: "0.1.0".to_string(),
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"status\":\"ok\""));
    }

    #[test]
    fn test_ask_request_defaults() {
        let json = r#"{"question": "what is rust?"}"#;
        let request: AskRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.top_k, 5);
        assert_eq!(request.score_threshold, 0.3);
    }

    #[test]
    fn test_page_query_defaults() {
        let json = r#"{}"#;
        let page: PageQuery = serde_json::from_str(json).unwrap();
        assert_eq!(page.offset, 0);
        assert_eq!(page.limit, 20);
    }
}
