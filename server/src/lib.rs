use anyhow::Result;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use search_core::docstore::Document;
use search_core::extract::PlainTextExtractor;
use search_core::history::{HistoryEntry, QueryFrequency};
use search_core::indexing::{IndexStats, ReindexHandle};
use search_core::search::SearchResponse;
use search_core::{DocId, SearchConfig, SearchEngine, SearchError};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Deserialize)]
pub struct SearchParams {
    #[serde(alias = "q")]
    pub query: String,
    #[serde(default)]
    pub page: usize,
    #[serde(default = "default_size")]
    pub size: usize,
}
fn default_size() -> usize { 10 }

#[derive(Deserialize)]
pub struct HistoryParams {
    #[serde(default = "default_size")]
    pub limit: usize,
}

#[derive(Deserialize)]
pub struct WindowParams {
    #[serde(default = "default_days")]
    pub days: i64,
}
fn default_days() -> i64 { 7 }

#[derive(Deserialize)]
pub struct DocumentInput {
    pub title: String,
    pub content: String,
    pub url: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadParams {
    pub file_name: String,
    pub title: Option<String>,
    pub url: Option<String>,
}

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SearchEngine>,
    reindex: Arc<Mutex<Option<ReindexHandle>>>,
}

/// Maps engine errors onto HTTP statuses.
pub struct ApiError(SearchError);

impl From<SearchError> for ApiError {
    fn from(err: SearchError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            SearchError::Validation(_) => StatusCode::BAD_REQUEST,
            SearchError::NotFound(_) => StatusCode::NOT_FOUND,
            SearchError::Extraction(_) => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

pub fn build_app(data_dir: &std::path::Path, config: SearchConfig) -> Result<Router> {
    let engine = SearchEngine::open(data_dir, config)?;
    Ok(router(Arc::new(engine)))
}

pub fn router(engine: Arc<SearchEngine>) -> Router {
    let app_state = AppState { engine, reindex: Arc::new(Mutex::new(None)) };

    // CORS: read CORS_ALLOW_ORIGIN (comma-separated) or allow Any by default
    let cors = match std::env::var("CORS_ALLOW_ORIGIN") {
        Ok(val) => {
            let origins: Vec<_> = val
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            if origins.is_empty() {
                CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
            } else {
                CorsLayer::new().allow_origin(AllowOrigin::list(origins)).allow_methods(Any).allow_headers(Any)
            }
        }
        Err(_) => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
    };

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/search", get(search_handler))
        .route("/api/search/history", get(history_handler))
        .route("/api/search/popular", get(popular_handler))
        .route("/api/search/stats/average-time", get(average_time_handler))
        .route("/api/documents", get(list_documents).post(index_document))
        .route("/api/documents/upload", post(upload_document))
        .route("/api/documents/unindexed", get(unindexed_documents))
        .route("/api/documents/stats", get(document_stats))
        .route("/api/documents/reindex", get(reindex_status).post(start_reindex))
        .route("/api/documents/:id", axum::routing::put(update_document).delete(delete_document))
        .route("/api/index/optimize", post(optimize_index))
        .with_state(app_state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
}

pub async fn search_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<SearchParams>,
) -> ApiResult<SearchResponse> {
    let ip = client_ip(&headers);
    let response = state.engine.search().search_from(&params.query, params.page, params.size, ip.as_deref())?;
    Ok(Json(response))
}

async fn history_handler(State(state): State<AppState>, Query(params): Query<HistoryParams>) -> ApiResult<Vec<HistoryEntry>> {
    Ok(Json(state.engine.search().recent_searches(params.limit)?))
}

async fn popular_handler(State(state): State<AppState>, Query(params): Query<WindowParams>) -> ApiResult<Vec<QueryFrequency>> {
    Ok(Json(state.engine.search().popular_queries(params.days)?))
}

/// No searches in the window reads as 0.0.
async fn average_time_handler(State(state): State<AppState>, Query(params): Query<WindowParams>) -> ApiResult<f64> {
    Ok(Json(state.engine.search().average_search_time(params.days)?.unwrap_or(0.0)))
}

async fn index_document(State(state): State<AppState>, Json(input): Json<DocumentInput>) -> ApiResult<Document> {
    Ok(Json(state.engine.indexing().index_document(&input.title, &input.content, &input.url)?))
}

async fn upload_document(
    State(state): State<AppState>,
    Query(params): Query<UploadParams>,
    body: Bytes,
) -> ApiResult<Document> {
    let document = state.engine.indexing().index_file(
        &PlainTextExtractor,
        &body,
        &params.file_name,
        params.title.as_deref(),
        params.url.as_deref(),
    )?;
    Ok(Json(document))
}

async fn update_document(
    State(state): State<AppState>,
    Path(id): Path<DocId>,
    Json(input): Json<DocumentInput>,
) -> ApiResult<Document> {
    Ok(Json(state.engine.indexing().update_document(id, &input.title, &input.content, &input.url)?))
}

async fn delete_document(State(state): State<AppState>, Path(id): Path<DocId>) -> ApiResult<Value> {
    state.engine.indexing().delete_document(id)?;
    Ok(Json(json!({ "message": "Document deleted successfully", "id": id })))
}

async fn list_documents(State(state): State<AppState>) -> ApiResult<Vec<Document>> {
    Ok(Json(state.engine.indexing().all_documents()?))
}

async fn unindexed_documents(State(state): State<AppState>) -> ApiResult<Vec<Document>> {
    Ok(Json(state.engine.indexing().unindexed_documents()?))
}

async fn document_stats(State(state): State<AppState>) -> ApiResult<IndexStats> {
    Ok(Json(state.engine.indexing().stats()?))
}

async fn start_reindex(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let mut slot = state.reindex.lock();
    if let Some(running) = slot.as_ref().filter(|h| !h.is_finished()) {
        return (StatusCode::CONFLICT, Json(json!({ "error": "reindexing already running", "progress": running.progress() })));
    }
    *slot = Some(state.engine.indexing().reindex_all());
    (StatusCode::ACCEPTED, Json(json!({ "message": "Reindexing started" })))
}

async fn reindex_status(State(state): State<AppState>) -> Json<Value> {
    let slot = state.reindex.lock();
    match slot.as_ref() {
        Some(handle) => Json(json!({ "running": !handle.is_finished(), "progress": handle.progress() })),
        None => Json(json!({ "running": false, "progress": null })),
    }
}

async fn optimize_index(State(state): State<AppState>) -> ApiResult<Value> {
    state.engine.indexing().optimize()?;
    Ok(Json(json!({ "message": "Index optimization completed" })))
}
