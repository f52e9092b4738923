use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use rival_crawler::fetch::policy::PolicyVerdict;
use rival_crawler::fetch::FetchStage;
use rival_crawler::search::{AllEnginesOutcome, MultiSearchOutcome, SearchRequest};
use rival_crawler::traverse::{TraversalConfig, TraversalReport};
use rival_crawler::{FetchError, Retriever};

#[derive(Clone)]
pub struct AppState {
    pub retriever: Arc<Retriever>,
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub request_id: String,
    pub error: String,
}

fn error_response(status: StatusCode, request_id: &str, error: impl ToString) -> axum::response::Response {
    (
        status,
        Json(ErrorResponse {
            request_id: request_id.to_string(),
            error: error.to_string(),
        }),
    )
        .into_response()
}

fn fetch_status(err: &FetchError) -> StatusCode {
    match err {
        FetchError::InvalidUrl(_) => StatusCode::BAD_REQUEST,
        FetchError::BatchTimeout { .. } | FetchError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    }
}

#[derive(Deserialize, ToSchema)]
pub struct SearchBody {
    #[serde(flatten)]
    pub request: SearchRequest,
    /// Restrict the run to these engines (bing, duckduckgo, yahoo)
    #[serde(default)]
    pub engines: Option<Vec<String>>,
}

#[derive(Serialize, ToSchema)]
pub struct SearchResponse {
    pub request_id: String,
    #[serde(flatten)]
    pub outcome: MultiSearchOutcome,
}

#[utoipa::path(
    post,
    path = "/search",
    request_body = SearchBody,
    responses(
        (status = 200, description = "Results plus per-engine failures", body = SearchResponse),
        (status = 400, description = "Empty query", body = ErrorResponse)
    ),
    tag = "retrieval"
)]
pub async fn search(State(state): State<AppState>, Json(body): Json<SearchBody>) -> impl IntoResponse {
    let request_id = Uuid::new_v4().to_string();
    if body.request.query.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, &request_id, "query must not be empty");
    }
    info!(request_id = %request_id, query = %body.request.query, "search");

    let outcome = state
        .retriever
        .search(&body.request, body.engines.as_deref())
        .await;
    Json(SearchResponse { request_id, outcome }).into_response()
}

#[derive(Serialize, ToSchema)]
pub struct SearchAllResponse {
    pub request_id: String,
    #[serde(flatten)]
    pub outcome: AllEnginesOutcome,
}

#[utoipa::path(
    post,
    path = "/search/all",
    request_body = SearchBody,
    responses(
        (status = 200, description = "Per-engine status, count and results plus a summary", body = SearchAllResponse),
        (status = 400, description = "Empty query", body = ErrorResponse)
    ),
    tag = "retrieval"
)]
pub async fn search_all(State(state): State<AppState>, Json(body): Json<SearchBody>) -> impl IntoResponse {
    let request_id = Uuid::new_v4().to_string();
    if body.request.query.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, &request_id, "query must not be empty");
    }
    info!(request_id = %request_id, query = %body.request.query, "search all engines");

    let outcome = state
        .retriever
        .search_all(&body.request, body.engines.as_deref())
        .await;
    Json(SearchAllResponse { request_id, outcome }).into_response()
}

#[derive(Deserialize, ToSchema)]
pub struct FetchBody {
    pub url: String,
}

#[derive(Serialize, ToSchema)]
pub struct FetchResponse {
    pub request_id: String,
    pub url: String,
    pub final_url: String,
    #[schema(value_type = Object)]
    pub stage: FetchStage,
    #[schema(value_type = String)]
    pub verdict: PolicyVerdict,
    pub content: String,
}

#[utoipa::path(
    post,
    path = "/fetch",
    request_body = FetchBody,
    responses(
        (status = 200, description = "Page content and the stage that produced it", body = FetchResponse),
        (status = 400, description = "Invalid URL", body = ErrorResponse),
        (status = 502, description = "Every fetch stage failed", body = ErrorResponse)
    ),
    tag = "retrieval"
)]
pub async fn fetch(State(state): State<AppState>, Json(body): Json<FetchBody>) -> impl IntoResponse {
    let request_id = Uuid::new_v4().to_string();
    info!(request_id = %request_id, url = %body.url, "fetch");

    match state.retriever.fetch_page(&body.url).await {
        Ok(page) => Json(FetchResponse {
            request_id,
            url: page.url,
            final_url: page.final_url,
            stage: page.stage,
            verdict: page.verdict,
            content: page.content,
        })
        .into_response(),
        Err(e) => {
            warn!(request_id = %request_id, url = %body.url, "fetch failed: {}", e);
            error_response(fetch_status(&e), &request_id, e)
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct BatchBody {
    pub urls: Vec<String>,
}

#[derive(Serialize, ToSchema)]
pub struct BatchItem {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct BatchResponse {
    pub request_id: String,
    pub items: Vec<BatchItem>,
}

#[utoipa::path(
    post,
    path = "/batch",
    request_body = BatchBody,
    responses(
        (status = 200, description = "One item per URL, in request order", body = BatchResponse),
        (status = 504, description = "Whole-batch timeout", body = ErrorResponse)
    ),
    tag = "retrieval"
)]
pub async fn batch(State(state): State<AppState>, Json(body): Json<BatchBody>) -> impl IntoResponse {
    let request_id = Uuid::new_v4().to_string();
    info!(request_id = %request_id, count = body.urls.len(), "batch");

    match state.retriever.retrieve_many(&body.urls).await {
        Ok(results) => {
            let items = body
                .urls
                .into_iter()
                .zip(results)
                .map(|(url, result)| match result {
                    Ok(content) => BatchItem {
                        url,
                        content: Some(content),
                        error: None,
                    },
                    Err(e) => BatchItem {
                        url,
                        content: None,
                        error: Some(e.to_string()),
                    },
                })
                .collect();
            Json(BatchResponse { request_id, items }).into_response()
        }
        Err(e) => {
            warn!(request_id = %request_id, "batch failed: {}", e);
            error_response(fetch_status(&e), &request_id, e)
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct TraverseBody {
    pub url: String,
    /// research, documentation or structure
    pub preset: Option<String>,
    pub max_depth: Option<usize>,
    pub max_pages: Option<usize>,
    pub same_domain_only: Option<bool>,
    pub include_patterns: Option<Vec<String>>,
    pub exclude_patterns: Option<Vec<String>>,
}

impl TraverseBody {
    fn config(&self) -> TraversalConfig {
        let pages = self.max_pages;
        let mut config = match self.preset.as_deref() {
            Some("research") => TraversalConfig::research_topic(pages.unwrap_or(5)),
            Some("documentation") => TraversalConfig::explore_documentation(pages.unwrap_or(15)),
            Some("structure") => TraversalConfig::map_website_structure(pages.unwrap_or(20)),
            _ => TraversalConfig::default(),
        };
        if let Some(max_pages) = pages {
            config.max_pages = max_pages;
        }
        if let Some(depth) = self.max_depth {
            config.max_depth = depth;
        }
        if let Some(same) = self.same_domain_only {
            config.same_domain_only = same;
        }
        if let Some(include) = &self.include_patterns {
            config.include_patterns = include.clone();
        }
        if let Some(exclude) = &self.exclude_patterns {
            config.exclude_patterns = exclude.clone();
        }
        config
    }
}

#[utoipa::path(
    post,
    path = "/traverse",
    request_body = TraverseBody,
    responses(
        (status = 200, description = "Breadth-first traversal report", body = TraversalReport),
        (status = 400, description = "Invalid start URL", body = ErrorResponse)
    ),
    tag = "retrieval"
)]
pub async fn traverse(State(state): State<AppState>, Json(body): Json<TraverseBody>) -> impl IntoResponse {
    let request_id = Uuid::new_v4().to_string();
    let config = body.config();
    info!(request_id = %request_id, url = %body.url, max_pages = config.max_pages, "traverse");

    match state.retriever.traverse(&body.url, config).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => error_response(fetch_status(&e), &request_id, e),
    }
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub engines: Vec<String>,
}

#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up", body = HealthResponse)),
    tag = "retrieval"
)]
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        engines: state
            .retriever
            .engine_names()
            .into_iter()
            .map(String::from)
            .collect(),
    })
}
