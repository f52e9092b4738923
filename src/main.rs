mod api;

use std::sync::Arc;

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use rival_crawler::{Config, Retriever};

#[derive(OpenApi)]
#[openapi(
    paths(api::search, api::search_all, api::fetch, api::batch, api::traverse, api::health),
    components(
        schemas(
            api::SearchBody,
            api::SearchResponse,
            api::SearchAllResponse,
            api::FetchBody,
            api::FetchResponse,
            api::BatchBody,
            api::BatchItem,
            api::BatchResponse,
            api::TraverseBody,
            api::HealthResponse,
            api::ErrorResponse,
            rival_crawler::search::SearchRequest,
            rival_crawler::search::SearchResult,
            rival_crawler::search::EngineFailure,
            rival_crawler::search::MultiSearchOutcome,
            rival_crawler::search::AllEnginesOutcome,
            rival_crawler::search::AllEnginesSummary,
            rival_crawler::search::EngineReport,
            rival_crawler::search::EngineStatus,
            rival_crawler::extract::page::HtmlStructure,
            rival_crawler::extract::page::ChildElement,
            rival_crawler::follow::LinkedPage,
            rival_crawler::traverse::TraversalConfig,
            rival_crawler::traverse::TraversalReport,
            rival_crawler::traverse::PageSummary
        )
    ),
    tags((name = "retrieval", description = "Search, fetch and traversal API"))
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("invalid configuration")?;
    let retriever = Retriever::from_config(&config).context("failed to build HTTP clients")?;
    let state = api::AppState {
        retriever: Arc::new(retriever),
    };

    let app = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/search", post(api::search))
        .route("/search/all", post(api::search_all))
        .route("/fetch", post(api::fetch))
        .route("/batch", post(api::batch))
        .route("/traverse", post(api::traverse))
        .route("/health", get(api::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
