use anyhow::Result;
use axum::{extract::{Path, Query, State}, http::StatusCode, response::{IntoResponse, Response}, routing::get, Json, Router};
use searchcore::retrieval::{rank, Query as SearchQuery, QueryEngine, QueryExpander, RetrievalModel, DEFAULT_TOP_K};
use searchcore::source::JsonDocumentSource;
use searchcore::tokenizer::{StopWords, Tokenizer};
use searchcore::{DocId, DocumentRecord};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Deserialize)]
pub struct SearchParams {
    pub q: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default)]
    pub expand: bool,
}
fn default_k() -> usize { 10 }

#[derive(Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub model: String,
    pub took_s: f64,
    pub total_hits: usize,
    pub results: Vec<SearchHit>,
}

#[derive(Serialize)]
pub struct SearchHit {
    pub rank: usize,
    pub doc_id: DocId,
    pub score: f64,
    pub path: String,
}

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<QueryEngine>,
    pub tokenizer: Arc<Tokenizer>,
    pub expander: Arc<QueryExpander>,
}

/// Handler error: status plus a JSON `{"error": ...}` body.
pub struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(serde_json::json!({ "error": self.1 }))).into_response()
    }
}

impl From<searchcore::Error> for ApiError {
    fn from(e: searchcore::Error) -> Self {
        tracing::error!(error = %e, "request failed");
        ApiError(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    }
}

pub fn build_app(index_dir: impl AsRef<std::path::Path>, stopwords: Option<&std::path::Path>) -> Result<Router> {
    let engine = QueryEngine::open(index_dir.as_ref())?;
    let tokenizer = Arc::new(match stopwords {
        Some(dir) => Tokenizer::new(StopWords::load_dir(dir)?, engine.manifest().tokenizer.clone()),
        None => engine.manifest().query_tokenizer(),
    });
    let expander = Arc::new(QueryExpander::new(Arc::clone(&tokenizer), Arc::new(JsonDocumentSource)));
    let app_state = AppState { engine: Arc::new(engine), tokenizer, expander };

    // CORS: read CORS_ALLOW_ORIGIN (comma-separated) or allow Any by default
    let origins: Vec<_> = std::env::var("CORS_ALLOW_ORIGIN")
        .map(|val| val.split(',').filter_map(|s| s.trim().parse().ok()).collect())
        .unwrap_or_default();
    let cors = if origins.is_empty() {
        CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
    } else {
        CorsLayer::new().allow_origin(AllowOrigin::list(origins)).allow_methods(Any).allow_headers(Any)
    };

    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/search", get(search_handler))
        .route("/doc/:doc_id", get(doc_handler))
        .with_state(app_state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());
    Ok(app)
}

pub async fn search_handler(State(state): State<AppState>, Query(params): Query<SearchParams>) -> Result<Json<SearchResponse>, ApiError> {
    let start = std::time::Instant::now();
    let model: RetrievalModel = match params.model.as_deref() {
        Some(name) => name.parse().map_err(|e: searchcore::Error| ApiError(StatusCode::BAD_REQUEST, e.to_string()))?,
        None => RetrievalModel::default(),
    };
    let k = params.k.clamp(1, DEFAULT_TOP_K);

    // Postings are read from disk; keep that off the async workers.
    let worker = state.clone();
    let text = params.q.clone();
    let expand = params.expand;
    let hits = tokio::task::spawn_blocking(move || -> searchcore::Result<_> {
        let query = SearchQuery::new("http", &text, &worker.tokenizer);
        let mut hits = model.evaluate(&query, &worker.engine)?;
        if expand {
            let expanded = worker.expander.expand(&query, &hits, &worker.engine);
            hits = model.evaluate(&expanded, &worker.engine)?;
        }
        Ok(hits)
    })
    .await
    .map_err(|e| ApiError(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))??;

    let total_hits = hits.len();
    let results = rank(&hits)
        .into_iter()
        .take(k)
        .map(|r| SearchHit {
            rank: r.rank,
            doc_id: r.doc_id,
            score: r.score,
            path: state.engine.document(r.doc_id).map(|d| d.path.clone()).unwrap_or_default(),
        })
        .collect();

    let took_s = start.elapsed().as_secs_f64();
    tracing::info!(query = %params.q, model = %model, total_hits, took_s, "search");
    Ok(Json(SearchResponse { query: params.q, model: model.to_string(), took_s, total_hits, results }))
}

pub async fn doc_handler(State(state): State<AppState>, Path(doc_id): Path<DocId>) -> Result<Json<DocumentRecord>, ApiError> {
    state
        .engine
        .document(doc_id)
        .cloned()
        .map(Json)
        .ok_or_else(|| ApiError(StatusCode::NOT_FOUND, format!("document {doc_id} not found")))
}
