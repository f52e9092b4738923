//! Single entry point tying search, fetching and traversal together.

use std::sync::Arc;

use tracing::{info, warn};
use url::Url;

use crate::config::Config;
use crate::error::{FetchError, RetrieveError};
use crate::extract::cascade::{ContentUtilities, ExtractionCascade, ReadabilityUtilities};
use crate::fetch::{FetchedPage, Fetcher, HttpTransport, PageFetcher, Transport};
use crate::proxy::ProxyPool;
use crate::search::{AllEnginesOutcome, EngineContext, MultiEngineSearch, MultiSearchOutcome, SearchRequest, SearchResult};
use crate::traverse::{TraversalConfig, TraversalReport, WebsiteTraverser};

/// Explicit query marker accepted by [`Retriever::retrieve`].
const SEARCH_PREFIX: &str = "search:";

pub struct Retriever {
    fetcher: Arc<Fetcher>,
    cascade: Arc<ExtractionCascade>,
    engines: MultiEngineSearch,
}

/// Resource kinds understood by `retrieve`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    Url(String),
    Query(String),
}

impl Resource {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if let Some(query) = raw.strip_prefix(SEARCH_PREFIX) {
            return Resource::Query(query.trim().to_string());
        }
        match Url::parse(raw) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Resource::Url(raw.to_string()),
            _ => Resource::Query(raw.to_string()),
        }
    }
}

/// Numbered plain-text listing of search results.
pub fn format_listing(query: &str, results: &[SearchResult]) -> String {
    let mut out = format!("Search results for '{}':\n\n", query);
    for (i, result) in results.iter().enumerate() {
        out.push_str(&format!("{}. {}\n   {}\n", i + 1, result.title, result.target_url()));
        if !result.description.is_empty() {
            out.push_str(&format!("   {}\n", result.description));
        }
        out.push('\n');
    }
    out.trim_end().to_string()
}

impl Retriever {
    pub fn new(fetcher: Arc<Fetcher>, search_transport: Arc<dyn Transport>, cascade: Arc<ExtractionCascade>) -> Self {
        let timeout = fetcher.policy().timeout;
        let page_fetcher: Arc<dyn PageFetcher> = fetcher.clone();
        let ctx = EngineContext::new(search_transport, page_fetcher, cascade.clone()).with_timeout(timeout);
        Self {
            engines: MultiEngineSearch::with_defaults(ctx),
            fetcher,
            cascade,
        }
    }

    pub fn with_engines(mut self, engines: MultiEngineSearch) -> Self {
        self.engines = engines;
        self
    }

    /// Real transports, proxies and (with the `browser` feature) headless
    /// Chrome, as the configuration asks.
    pub fn from_config(config: &Config) -> Result<Self, FetchError> {
        let policy = config.fetch_policy();
        let mut fetcher = Fetcher::http(policy)?;

        if config.use_browser {
            #[cfg(feature = "browser")]
            {
                info!("headless Chrome is the bypass transport");
                fetcher = fetcher.with_bypass(Arc::new(crate::fetch::browser::BrowserTransport::new()));
            }
            #[cfg(not(feature = "browser"))]
            warn!("USE_BROWSER is set but the crate was built without the browser feature");
        }

        if config.use_proxies {
            match ProxyPool::http(config.proxy_settings()) {
                Ok(pool) => fetcher = fetcher.with_proxies(Arc::new(pool)),
                Err(e) => warn!("proxy pool disabled: {}", e),
            }
        }

        let search_transport = Arc::new(HttpTransport::new(config.connect_timeout)?);
        Ok(Self::new(
            Arc::new(fetcher),
            search_transport,
            Arc::new(ExtractionCascade::default()),
        ))
    }

    pub fn engine_names(&self) -> Vec<&'static str> {
        self.engines.engine_names()
    }

    /// Multi-engine search; `engines` limits the run to the named engines.
    pub async fn search(&self, request: &SearchRequest, engines: Option<&[String]>) -> MultiSearchOutcome {
        match engines {
            Some(names) if !names.is_empty() => self.engines.only(names).search(request).await,
            _ => self.engines.search(request).await,
        }
    }

    /// Every engine (or the named ones) at once, reported per engine.
    pub async fn search_all(&self, request: &SearchRequest, engines: Option<&[String]>) -> AllEnginesOutcome {
        match engines {
            Some(names) if !names.is_empty() => self.engines.only(names).search_all(request).await,
            _ => self.engines.search_all(request).await,
        }
    }

    pub async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        self.fetcher.fetch(url).await
    }

    pub async fn fetch_page(&self, url: &str) -> Result<FetchedPage, FetchError> {
        self.fetcher.fetch_page(url).await
    }

    pub async fn batch_fetch(&self, urls: &[String]) -> Result<Vec<Result<String, FetchError>>, FetchError> {
        self.fetcher.batch_fetch(urls).await
    }

    /// Cleaned text for a URL, or a numbered listing for a query.
    pub async fn retrieve(&self, resource: &str, limit: usize) -> Result<String, RetrieveError> {
        match Resource::parse(resource) {
            Resource::Url(url) => {
                let html = self.fetcher.fetch(&url).await?;
                Ok(self.clean_text(&url, &html))
            }
            Resource::Query(query) => {
                let request = SearchRequest::new(query.clone()).with_results(limit.max(1));
                let results = self.engines.search(&request).await.into_result()?;
                info!(query = %query, count = results.len(), "query retrieved");
                Ok(format_listing(&query, &results))
            }
        }
    }

    /// `batch_fetch` under the unified name.
    pub async fn retrieve_many(&self, urls: &[String]) -> Result<Vec<Result<String, FetchError>>, FetchError> {
        self.batch_fetch(urls).await
    }

    pub async fn traverse(&self, start_url: &str, config: TraversalConfig) -> Result<TraversalReport, FetchError> {
        let fetcher: Arc<dyn PageFetcher> = self.fetcher.clone();
        WebsiteTraverser::new(fetcher, self.cascade.clone(), config)
            .traverse(start_url)
            .await
    }

    fn clean_text(&self, url: &str, html: &str) -> String {
        ReadabilityUtilities::for_page(url)
            .markdown(html)
            .filter(|text| !text.trim().is_empty())
            .unwrap_or_else(|| self.cascade.extract_main_content(html))
    }
}
