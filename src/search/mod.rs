//! Search engines: a shared contract, the per-engine result parsers and
//! the multi-engine fallback loop.

pub mod bing;
pub mod duckduckgo;
pub mod multi;
pub mod redirect;
pub mod yahoo;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;
use utoipa::ToSchema;

use crate::error::SearchError;
use crate::extract::cascade::ExtractionCascade;
use crate::extract::page::{extract_internal_links, normalize_whitespace, HtmlStructure};
use crate::extract::serp::{extract_search_results, SerpHit};
use crate::fetch::{PageFetcher, RequestProfile, Transport};
use crate::follow::{FollowLimits, LinkFollower, LinkedPage, VisitedSet};

pub use bing::BingEngine;
pub use duckduckgo::DuckDuckGoEngine;
pub use multi::{
    AllEnginesOutcome, AllEnginesSummary, EngineFailure, EngineReport, EngineStatus, MultiEngineSearch,
    MultiSearchOutcome,
};
pub use redirect::resolve_redirect;
pub use yahoo::YahooEngine;

/// One search hit, enriched in place when content extraction is requested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub description: String,
    #[serde(rename = "engine")]
    pub source_engine: String,
    /// 1-based position in the engine's own list
    pub rank: usize,
    #[schema(value_type = String)]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_real_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_links: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub nested_content: Option<BTreeMap<String, LinkedPage>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_structure: Option<HtmlStructure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_snippet: Option<String>,
}

impl SearchResult {
    pub fn new(
        engine: &str,
        rank: usize,
        title: impl Into<String>,
        url: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            description: description.into(),
            source_engine: engine.to_string(),
            rank,
            timestamp: Utc::now(),
            resolved_real_url: None,
            full_content: None,
            internal_links: None,
            nested_content: None,
            html_structure: None,
            raw_snippet: None,
        }
    }

    /// Where the result really points: the unwrapped redirect target when
    /// one was found, else the listed URL.
    pub fn target_url(&self) -> &str {
        self.resolved_real_url.as_deref().unwrap_or(&self.url)
    }
}

fn default_num_results() -> usize {
    10
}

fn default_max_depth() -> usize {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_num_results")]
    pub num_results: usize,
    #[serde(default)]
    pub extract_content: bool,
    #[serde(default)]
    pub follow_links: bool,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            num_results: default_num_results(),
            extract_content: false,
            follow_links: false,
            max_depth: default_max_depth(),
        }
    }

    pub fn with_results(mut self, num_results: usize) -> Self {
        self.num_results = num_results;
        self
    }

    pub fn with_content(mut self) -> Self {
        self.extract_content = true;
        self
    }

    /// Extract content and follow internal links down to `max_depth`.
    pub fn following(mut self, max_depth: usize) -> Self {
        self.extract_content = true;
        self.follow_links = true;
        self.max_depth = max_depth;
        self
    }

    pub fn wants_following(&self) -> bool {
        self.extract_content && self.follow_links && self.max_depth > 1
    }
}

/// Collaborators every engine shares: the client for result pages, the
/// fetch orchestrator for result targets, the cascade and the follower.
#[derive(Clone)]
pub struct EngineContext {
    transport: Arc<dyn Transport>,
    timeout: Duration,
    fetcher: Arc<dyn PageFetcher>,
    cascade: Arc<ExtractionCascade>,
    follower: Arc<LinkFollower>,
}

impl EngineContext {
    pub fn new(
        transport: Arc<dyn Transport>,
        fetcher: Arc<dyn PageFetcher>,
        cascade: Arc<ExtractionCascade>,
    ) -> Self {
        let follower = Arc::new(LinkFollower::new(fetcher.clone(), cascade.clone()));
        Self {
            transport,
            timeout: Duration::from_secs(30),
            fetcher,
            cascade,
            follower,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_follow_limits(mut self, limits: FollowLimits) -> Self {
        self.follower = Arc::new(
            LinkFollower::new(self.fetcher.clone(), self.cascade.clone()).with_limits(limits),
        );
        self
    }

    pub fn fetcher(&self) -> &Arc<dyn PageFetcher> {
        &self.fetcher
    }

    pub fn cascade(&self) -> &Arc<ExtractionCascade> {
        &self.cascade
    }

    async fn result_page(&self, engine: &str, url: &str) -> Result<String, SearchError> {
        let profile = RequestProfile::browser_like(self.timeout);
        let resp = self.transport.get(url, &profile).await?;
        if !resp.is_success() {
            return Err(SearchError::Status {
                engine: engine.to_string(),
                status: resp.status,
            });
        }
        Ok(resp.body)
    }

    /// Fetch one result's target and attach its content, links, layout
    /// snapshot and (optionally) followed pages. Failures leave the result
    /// as it was. The caller has already claimed the target in `visited`.
    async fn enrich(&self, result: &mut SearchResult, follow: bool, visited: &VisitedSet) {
        let target = result.target_url().to_string();
        let html = match self.fetcher.fetch(&target).await {
            Ok(html) => html,
            Err(e) => {
                warn!(url = %target, "content extraction skipped: {}", e);
                return;
            }
        };

        let content = self.cascade.extract_main_content(&html);
        let links = extract_internal_links(&html, &target);
        result.html_structure = Some(HtmlStructure::capture(&html));
        result.full_content = Some(content);

        if follow && !links.is_empty() {
            let nested = self.follower.follow(&target, &links, visited).await;
            result.nested_content = Some(nested);
        }
        result.internal_links = Some(links);
    }
}

/// One search provider.
///
/// Implementations only build their request URL and parse their own
/// result page; fetching, redirect resolution and enrichment are shared.
#[async_trait]
pub trait SearchEngine: Send + Sync {
    fn name(&self) -> &'static str;

    /// Lower runs first in a multi-engine search.
    fn priority(&self) -> u8 {
        100
    }

    fn context(&self) -> &EngineContext;

    fn request_url(&self, query: &str, num_results: usize) -> Result<String, SearchError>;

    /// Results with 1-based ranks, at most `num_results` of them.
    fn parse(&self, body: &str, num_results: usize) -> Vec<SearchResult>;

    fn resolve(&self, raw: &str) -> Option<String> {
        resolve_redirect(raw)
    }

    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchResult>, SearchError> {
        let query = request.query.trim();
        if query.is_empty() {
            return Err(SearchError::InvalidQuery("query is empty".to_string()));
        }
        if request.num_results == 0 {
            return Ok(Vec::new());
        }

        let ctx = self.context();
        let url = self.request_url(query, request.num_results)?;
        let body = ctx.result_page(self.name(), &url).await?;

        let mut results = self.parse(&body, request.num_results);
        if results.is_empty() {
            return Err(SearchError::NoResults {
                engine: self.name().to_string(),
            });
        }
        for result in results.iter_mut() {
            if result.resolved_real_url.is_none() {
                result.resolved_real_url = self.resolve(&result.url);
            }
        }
        info!(engine = self.name(), query = %query, count = results.len(), "search parsed");

        if request.extract_content {
            // Every result target is claimed before any link following
            // starts, so followers never take a page that is itself a result.
            let visited = VisitedSet::new();
            let follow = request.wants_following();
            let claimed: Vec<bool> = results.iter().map(|r| visited.claim(r.target_url())).collect();
            join_all(
                results
                    .iter_mut()
                    .zip(claimed)
                    .filter_map(|(result, claimed)| {
                        if !claimed {
                            debug!(url = %result.target_url(), rank = result.rank, "target already enriched under a higher rank");
                        }
                        claimed.then_some(result)
                    })
                    .map(|result| ctx.enrich(result, follow, &visited)),
            )
            .await;
            debug!(engine = self.name(), visited = visited.len(), "enrichment finished");
        }

        Ok(results)
    }
}

static ANCHOR: Lazy<Option<Selector>> = Lazy::new(|| Selector::parse("a[href]").ok());

/// Container/link/snippet selectors for an HTML result page. Each list is
/// ordered; the first container selector that matches anything is used.
pub(crate) struct ResultLayout {
    containers: Vec<Selector>,
    links: Vec<Selector>,
    snippets: Vec<Selector>,
}

fn parse_all(selectors: &[&str]) -> Vec<Selector> {
    selectors
        .iter()
        .filter_map(|s| Selector::parse(s).ok())
        .collect()
}

/// Absolute form of a result href: protocol-relative and root-relative
/// links are resolved against `base`.
pub(crate) fn absolutize(href: &str, base: &Url) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    let joined = base.join(href).ok()?;
    matches!(joined.scheme(), "http" | "https").then(|| joined.to_string())
}

fn text_of(element: ElementRef<'_>) -> String {
    normalize_whitespace(&element.text().collect::<Vec<_>>().join(" "))
}

fn href_of(element: ElementRef<'_>) -> Option<&str> {
    if element.value().name() == "a" {
        return element.value().attr("href");
    }
    element.select(ANCHOR.as_ref()?).next()?.value().attr("href")
}

impl ResultLayout {
    pub(crate) fn new(containers: &[&str], links: &[&str], snippets: &[&str]) -> Self {
        Self {
            containers: parse_all(containers),
            links: parse_all(links),
            snippets: parse_all(snippets),
        }
    }

    pub(crate) fn parse(&self, html: &str, base: &Url, max_results: usize) -> Vec<SerpHit> {
        let document = Html::parse_document(html);
        let Some(containers) = self
            .containers
            .iter()
            .map(|sel| document.select(sel).collect::<Vec<_>>())
            .find(|found| !found.is_empty())
        else {
            return Vec::new();
        };

        let mut seen = HashSet::new();
        let mut hits = Vec::new();
        for container in containers {
            if hits.len() >= max_results {
                break;
            }
            let Some(link_el) = self.links.iter().find_map(|sel| container.select(sel).next()) else {
                continue;
            };
            let title = text_of(link_el);
            let Some(url) = href_of(link_el).and_then(|href| absolutize(href, base)) else {
                continue;
            };
            if title.is_empty() || !seen.insert(url.clone()) {
                continue;
            }
            let snippet = self
                .snippets
                .iter()
                .find_map(|sel| container.select(sel).next())
                .map(text_of)
                .unwrap_or_default();
            hits.push(SerpHit {
                title,
                url,
                snippet,
            });
        }
        hits
    }
}

/// Parse with the engine's own layout and fall back to the generic
/// selector families when it finds nothing.
pub(crate) fn parse_html_results(
    engine: &str,
    layout: &ResultLayout,
    html: &str,
    base: &Url,
    max_results: usize,
) -> Vec<SearchResult> {
    let mut hits = layout.parse(html, base, max_results);
    if hits.is_empty() {
        hits = extract_search_results(html, max_results);
        if !hits.is_empty() {
            debug!(engine, found = hits.len(), "engine layout failed, generic families used");
        }
    }
    hits.into_iter()
        .take(max_results)
        .enumerate()
        .map(|(i, hit)| {
            let mut result = SearchResult::new(engine, i + 1, hit.title, hit.url, hit.snippet.clone());
            result.raw_snippet = Some(hit.snippet);
            result
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialises_as_flat_record() {
        let mut result = SearchResult::new("bing", 1, "Rust", "https://www.rust-lang.org/", "A language");
        result.internal_links = Some(vec!["https://www.rust-lang.org/learn".to_string()]);
        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["engine"], "bing");
        assert_eq!(json["rank"], 1);
        assert!(json.get("source_engine").is_none());
        assert!(json.get("full_content").is_none());
        assert_eq!(json["internal_links"][0], "https://www.rust-lang.org/learn");
    }

    #[test]
    fn request_defaults() {
        let request: SearchRequest = serde_json::from_str(r#"{"query":"tokio"}"#).unwrap();
        assert_eq!(request, SearchRequest::new("tokio"));
        assert_eq!(request.num_results, 10);
        assert!(!request.wants_following());
        assert!(SearchRequest::new("q").following(2).wants_following());
        assert!(!SearchRequest::new("q").following(1).wants_following());
    }

    #[test]
    fn target_prefers_resolved_url() {
        let mut result = SearchResult::new("ddg", 1, "t", "https://duckduckgo.com/l/?uddg=x", "");
        assert_eq!(result.target_url(), "https://duckduckgo.com/l/?uddg=x");
        result.resolved_real_url = Some("https://x.example/".to_string());
        assert_eq!(result.target_url(), "https://x.example/");
    }

    #[test]
    fn layout_uses_first_matching_container_selector() {
        let layout = ResultLayout::new(&["div.missing", "div.hit"], &["a.title", "a"], &[".snip"]);
        let html = r#"
            <div class="hit"><a class="title" href="/one">One</a><span class="snip">first</span></div>
            <div class="hit"><a href="//cdn.example/two">Two</a></div>
            <div class="hit"><a href="/one">Duplicate</a></div>
        "#;
        let base = Url::parse("https://engine.example/search").unwrap();
        let hits = layout.parse(html, &base, 10);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].url, "https://engine.example/one");
        assert_eq!(hits[0].snippet, "first");
        assert_eq!(hits[1].url, "https://cdn.example/two");
        assert_eq!(hits[1].snippet, "");
    }

    #[test]
    fn absolutize_rejects_other_schemes() {
        let base = Url::parse("https://engine.example/").unwrap();
        assert_eq!(absolutize("javascript:void(0)", &base), None);
        assert_eq!(absolutize("", &base), None);
        assert_eq!(
            absolutize("https://a.example/x", &base).as_deref(),
            Some("https://a.example/x")
        );
    }
}
