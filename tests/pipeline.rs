use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use rival_crawler::error::FetchError;
use rival_crawler::extract::cascade::{MIN_CONTENT_LENGTH, MIN_TITLE_LENGTH};
use rival_crawler::fetch::policy::PolicyVerdict;
use rival_crawler::fetch::{FetchPolicy, FetchStage, Fetcher, PageFetcher, PageResponse, RequestProfile, Transport};
use rival_crawler::search::{BingEngine, EngineContext, EngineStatus, MultiEngineSearch, SearchEngine, SearchRequest};
use rival_crawler::{ExtractionCascade, Retriever};

// ============================================================================
// Fakes
// ============================================================================

/// Answers by URL prefix; records every request.
#[derive(Default)]
struct FakeTransport {
    routes: Vec<(String, u16, String)>,
    timeouts: Vec<String>,
    calls: Mutex<Vec<String>>,
}

impl FakeTransport {
    fn route(mut self, prefix: &str, status: u16, body: &str) -> Self {
        self.routes.push((prefix.to_string(), status, body.to_string()));
        self
    }

    fn time_out(mut self, prefix: &str) -> Self {
        self.timeouts.push(prefix.to_string());
        self
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn get(&self, url: &str, _profile: &RequestProfile) -> Result<PageResponse, FetchError> {
        self.calls.lock().unwrap().push(url.to_string());
        if self.timeouts.iter().any(|p| url.starts_with(p.as_str())) {
            return Err(FetchError::Timeout { url: url.to_string() });
        }
        self.routes
            .iter()
            .find(|(prefix, _, _)| url.starts_with(prefix.as_str()))
            .map(|(_, status, body)| PageResponse {
                status: *status,
                final_url: url.to_string(),
                body: body.clone(),
            })
            .ok_or_else(|| FetchError::InvalidUrl(url.to_string()))
    }
}

/// A site where `/` links to `/p0`..`/p14` and every `/pN` links back
/// home, to its neighbour and to ten children.
struct FanOutSite {
    fetched: Mutex<Vec<String>>,
}

const SITE: &str = "https://site.example";

impl FanOutSite {
    fn page(url: &str) -> String {
        let path = url.trim_start_matches(SITE);
        let links: String = if path == "/" {
            (0..15).map(|i| format!("<a href=\"/p{}\">page {}</a>", i, i)).collect()
        } else {
            let mut links = String::from("<a href=\"/\">home</a><a href=\"/p1\">neighbour</a>");
            for i in 0..10 {
                links.push_str(&format!("<a href=\"{}/c{}\">child {}</a>", path, i, i));
            }
            links
        };
        format!(
            "<html><head><title>Page {}</title></head><body><main><p>{}</p>{}</main></body></html>",
            path,
            "Plenty of readable body text on this page. ".repeat(5),
            links
        )
    }
}

#[async_trait]
impl PageFetcher for FanOutSite {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        self.fetched.lock().unwrap().push(url.to_string());
        Ok(Self::page(url))
    }
}

fn rss(items: usize) -> String {
    let body: String = (1..=items)
        .map(|i| {
            format!(
                "<item><title>Result {i}</title><link>https://r{i}.example/</link><description>Snippet {i}</description></item>"
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?><rss version="2.0"><channel><title>Bing: rust programming</title><link>https://www.bing.com/</link><description>Search results</description>{body}</channel></rss>"#
    )
}

fn quiet_policy(mirrors: &[&str]) -> FetchPolicy {
    FetchPolicy {
        bypass_probability: 0.0,
        archive_mirrors: mirrors.iter().map(|m| m.to_string()).collect(),
        ..FetchPolicy::default()
    }
    .without_delay()
}

fn context(transport: Arc<FakeTransport>, fetcher: Arc<dyn PageFetcher>) -> EngineContext {
    EngineContext::new(transport, fetcher, Arc::new(ExtractionCascade::new()))
}

// ============================================================================
// Search
// ============================================================================

#[tokio::test]
async fn rss_engine_keeps_feed_order_and_limit() {
    let transport = Arc::new(FakeTransport::default().route("https://www.bing.com/search", 200, &rss(7)));
    let site: Arc<dyn PageFetcher> = Arc::new(FanOutSite {
        fetched: Mutex::new(Vec::new()),
    });
    let engine = BingEngine::new(context(transport.clone(), site));

    let results = engine
        .search(&SearchRequest::new("rust programming").with_results(5))
        .await
        .unwrap();

    assert_eq!(results.len(), 5);
    let ranks: Vec<usize> = results.iter().map(|r| r.rank).collect();
    assert_eq!(ranks, vec![1, 2, 3, 4, 5]);
    assert_eq!(results[0].title, "Result 1");
    assert_eq!(results[4].url, "https://r5.example/");
    assert!(results.iter().all(|r| r.full_content.is_none()));

    let calls = transport.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].contains("format=rss"));
    assert!(calls[0].contains("q=rust+programming"));
}

#[tokio::test]
async fn all_engines_failing_is_not_an_error() {
    let transport = Arc::new(FakeTransport::default());
    let site: Arc<dyn PageFetcher> = Arc::new(FanOutSite {
        fetched: Mutex::new(Vec::new()),
    });
    let search = MultiEngineSearch::with_defaults(context(transport.clone(), site));

    let outcome = search.search(&SearchRequest::new("rust programming")).await;

    assert!(outcome.results.is_empty());
    let failed: Vec<&str> = outcome.failures.iter().map(|f| f.engine.as_str()).collect();
    assert_eq!(failed, vec!["bing", "duckduckgo", "yahoo"]);
    assert!(outcome.failures.iter().all(|f| !f.reason.is_empty()));
    assert_eq!(transport.calls().len(), 3);
    assert!(outcome.into_result().is_err());
}

#[tokio::test]
async fn later_engines_fill_and_dedupe() {
    let ddg_page = r#"<div class="result"><a class="result__a" href="https://r1.example/?utm_source=ddg">Dup</a></div>
        <div class="result"><a class="result__a" href="https://fresh.example/">Fresh</a><div class="result__snippet">new</div></div>"#;
    let transport = Arc::new(
        FakeTransport::default()
            .route("https://www.bing.com/search", 200, &rss(1))
            .route("https://duckduckgo.com/html/", 200, ddg_page),
    );
    let site: Arc<dyn PageFetcher> = Arc::new(FanOutSite {
        fetched: Mutex::new(Vec::new()),
    });
    let search = MultiEngineSearch::with_defaults(context(transport, site));

    let outcome = search.search(&SearchRequest::new("rust").with_results(2)).await;

    let urls: Vec<&str> = outcome.results.iter().map(|r| r.url.as_str()).collect();
    assert_eq!(urls, vec!["https://r1.example/", "https://fresh.example/"]);
    assert_eq!(outcome.engines_tried, vec!["bing", "duckduckgo"]);
    assert!(outcome.failures.is_empty());
}

#[tokio::test]
async fn all_engines_mode_reports_each_engine() {
    let transport = Arc::new(
        FakeTransport::default()
            .route("https://www.bing.com/search", 200, &rss(3))
            .route("https://duckduckgo.com/html/", 200, "<html><body><p>No results.</p></body></html>"),
    );
    let site: Arc<dyn PageFetcher> = Arc::new(FanOutSite {
        fetched: Mutex::new(Vec::new()),
    });
    let search = MultiEngineSearch::with_defaults(context(transport.clone(), site));

    let outcome = search.search_all(&SearchRequest::new("rust").with_results(2)).await;

    let statuses: Vec<(&str, EngineStatus, usize)> = outcome
        .engines
        .iter()
        .map(|r| (r.engine.as_str(), r.status, r.count))
        .collect();
    assert_eq!(
        statuses,
        vec![
            ("bing", EngineStatus::Success, 2),
            ("duckduckgo", EngineStatus::NoResults, 0),
            ("yahoo", EngineStatus::Failed, 0),
        ]
    );
    assert!(outcome.report("yahoo").and_then(|r| r.error.as_ref()).is_some());
    assert_eq!(outcome.summary.engines_tested, 3);
    assert_eq!(outcome.summary.successful_engines, 1);
    assert_eq!(outcome.summary.failed_engines, 2);
    assert_eq!(outcome.summary.total_results, 2);
    assert_eq!(transport.calls().len(), 3);

    let fallback = search.search(&SearchRequest::new("rust").with_results(5)).await;
    assert_eq!(fallback.empty_engines, vec!["duckduckgo"]);
    let failed: Vec<&str> = fallback.failures.iter().map(|f| f.engine.as_str()).collect();
    assert_eq!(failed, vec!["yahoo"]);
}

// ============================================================================
// Fetch ladder
// ============================================================================

const STORY: &str = "https://news.example/story";
const MIRROR: &str = "https://mirror.example/?u=";

#[tokio::test]
async fn paywalled_page_is_replaced_by_clean_archive() {
    let primary = Arc::new(
        FakeTransport::default()
            .route(STORY, 200, "<p>Subscribe now to read this story</p>")
            .route(MIRROR, 200, "<p>The whole story, archived.</p>"),
    );
    let fetcher = Fetcher::new(primary, quiet_policy(&[MIRROR]));

    let page = fetcher.fetch_page(STORY).await.unwrap();
    assert_eq!(page.content, "<p>The whole story, archived.</p>");
    assert_eq!(page.verdict, PolicyVerdict::Clean);
    assert_eq!(
        page.stage,
        FetchStage::Archive {
            mirror: MIRROR.to_string()
        }
    );
}

#[tokio::test]
async fn timeout_then_paywalled_bypass_then_archive() {
    let primary = Arc::new(
        FakeTransport::default()
            .time_out(STORY)
            .route(MIRROR, 200, "<p>Archived copy with the full text.</p>"),
    );
    let bypass = Arc::new(FakeTransport::default().route(STORY, 200, "<div class=paywall>Members only</div>"));
    let fetcher = Fetcher::new(primary.clone(), quiet_policy(&[MIRROR])).with_bypass(bypass.clone());

    let content = fetcher.fetch(STORY).await.unwrap();

    assert_eq!(content, "<p>Archived copy with the full text.</p>");
    assert_eq!(bypass.calls(), vec![STORY.to_string()]);
    assert_eq!(primary.calls(), vec![STORY.to_string(), format!("{}{}", MIRROR, STORY)]);
}

#[tokio::test]
async fn exhaustion_names_the_url() {
    let fetcher = Fetcher::new(Arc::new(FakeTransport::default()), quiet_policy(&[MIRROR]));
    let err = fetcher.fetch(STORY).await.unwrap_err();
    assert!(matches!(err, FetchError::Exhausted { .. }));
    assert!(err.to_string().contains(STORY));
}

#[tokio::test]
async fn batch_keeps_order_and_isolates_failures() {
    let primary = Arc::new(
        FakeTransport::default()
            .route("https://a.example/", 200, "first")
            .route("https://c.example/", 200, "third"),
    );
    let fetcher = Fetcher::new(primary, quiet_policy(&[]));
    let urls = vec![
        "https://a.example/".to_string(),
        "https://b.example/".to_string(),
        "https://c.example/".to_string(),
    ];

    let results = fetcher.batch_fetch(&urls).await.unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].as_deref().ok(), Some("first"));
    assert!(results[1].is_err());
    assert_eq!(results[2].as_deref().ok(), Some("third"));
}

#[tokio::test]
async fn batch_runs_on_spawned_tasks() {
    let primary = Arc::new(FakeTransport::default().route("https://a.example/", 200, "first"));
    let fetcher = Arc::new(Fetcher::new(primary, quiet_policy(&[])));
    let urls = vec!["https://a.example/".to_string(), "https://b.example/".to_string()];

    let direct = {
        let fetcher = fetcher.clone();
        let urls = urls.clone();
        tokio::spawn(async move { fetcher.batch_fetch(&urls).await })
    };
    let results = direct.await.unwrap().unwrap();
    assert_eq!(results[0].as_deref().ok(), Some("first"));
    assert!(results[1].is_err());

    let retriever = Arc::new(Retriever::new(
        fetcher,
        Arc::new(FakeTransport::default()),
        Arc::new(ExtractionCascade::new()),
    ));
    let unified = tokio::spawn(async move { retriever.retrieve_many(&urls).await });
    let results = unified.await.unwrap().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].as_deref().ok(), Some("first"));
}

// ============================================================================
// Link following
// ============================================================================

#[tokio::test]
async fn following_links_stays_within_budget() {
    let feed = r#"<?xml version="1.0"?><rss version="2.0"><channel><title>t</title><link>https://www.bing.com/</link><description>d</description>
        <item><title>Site home</title><link>https://site.example/</link><description>home</description></item>
        </channel></rss>"#;
    let transport = Arc::new(FakeTransport::default().route("https://www.bing.com/search", 200, feed));
    let site = Arc::new(FanOutSite {
        fetched: Mutex::new(Vec::new()),
    });
    let engine = BingEngine::new(context(transport, site.clone()));

    let results = engine
        .search(&SearchRequest::new("site").with_results(1).following(2))
        .await
        .unwrap();

    let fetched = site.fetched.lock().unwrap().clone();
    assert!(fetched.len() <= 1 + 10 + 3 * 2, "fetched {} pages", fetched.len());
    let unique: HashSet<&String> = fetched.iter().collect();
    assert_eq!(unique.len(), fetched.len(), "a page was fetched twice");

    let result = &results[0];
    assert!(result.full_content.as_deref().map_or(false, |c| c.len() >= MIN_CONTENT_LENGTH));
    assert_eq!(result.internal_links.as_ref().map(Vec::len), Some(15));

    let nested = result.nested_content.as_ref().unwrap();
    assert_eq!(nested.len(), 10);
    let expanded: Vec<_> = nested.values().filter_map(|p| p.third_level.as_ref()).collect();
    assert_eq!(expanded.len(), 3);
    for third in expanded {
        assert!(third.len() <= 2);
        assert!(third.values().all(|p| p.third_level.is_none()));
        assert!(third.keys().all(|u| u.contains("/c")));
    }
}

#[tokio::test]
async fn result_pages_are_not_taken_by_other_results_followers() {
    let feed = r#"<?xml version="1.0"?><rss version="2.0"><channel><title>t</title><link>https://www.bing.com/</link><description>d</description>
        <item><title>Site home</title><link>https://site.example/</link><description>home</description></item>
        <item><title>Page three</title><link>https://site.example/p3</link><description>p3</description></item>
        </channel></rss>"#;
    let transport = Arc::new(FakeTransport::default().route("https://www.bing.com/search", 200, feed));
    let site = Arc::new(FanOutSite {
        fetched: Mutex::new(Vec::new()),
    });
    let engine = BingEngine::new(context(transport, site.clone()));

    let results = engine
        .search(&SearchRequest::new("site").with_results(2).following(2))
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.full_content.is_some()));
    let home_nested = results[0].nested_content.as_ref().unwrap();
    assert!(!home_nested.contains_key("https://site.example/p3"));
    assert_eq!(home_nested.len(), 10);

    let fetched = site.fetched.lock().unwrap().clone();
    let unique: HashSet<&String> = fetched.iter().collect();
    assert_eq!(unique.len(), fetched.len(), "a page was fetched twice");
    assert_eq!(fetched.iter().filter(|u| u.as_str() == "https://site.example/p3").count(), 1);
}

// ============================================================================
// Extraction
// ============================================================================

#[test]
fn cascade_respects_thresholds() {
    let cascade = ExtractionCascade::new();
    let samples = [
        String::new(),
        "<<<>>>".to_string(),
        "<title>Tiny</title>".to_string(),
        "<title>A sufficiently long title</title><body><p>short</p></body>".to_string(),
        format!("<main>{}</main>", "word ".repeat(60)),
        format!("<div><p>{}</div>", "unclosed paragraph text ".repeat(10)),
    ];
    for html in &samples {
        let text = cascade.extract_main_content(html);
        assert!(
            text.is_empty() || text.chars().count() >= MIN_TITLE_LENGTH,
            "{:?} produced {:?}",
            html,
            text
        );
    }
    assert!(cascade.extract_main_content(&samples[4]).chars().count() >= MIN_CONTENT_LENGTH);
    assert_eq!(cascade.extract_main_content(&samples[3]), "A sufficiently long title");
    assert!(cascade.extract_main_content(&samples[2]).is_empty());
}

// ============================================================================
// Unified retrieval
// ============================================================================

#[tokio::test]
async fn retrieve_dispatches_queries_and_urls() {
    let guide = format!(
        "<html><head><title>Guide</title></head><body><main><h1>Guide</h1><p>Read the guide to learn everything about it. {}</p></main></body></html>",
        "Each chapter builds on the one before. ".repeat(4)
    );
    let pages = Arc::new(FakeTransport::default().route("https://docs.example/", 200, &guide));
    let fetcher = Arc::new(Fetcher::new(pages, quiet_policy(&[])));
    let search = Arc::new(FakeTransport::default().route("https://www.bing.com/search", 200, &rss(3)));
    let retriever = Retriever::new(fetcher, search, Arc::new(ExtractionCascade::new()));

    let listing = retriever.retrieve("search:rust programming", 2).await.unwrap();
    assert!(listing.contains("1. Result 1"));
    assert!(listing.contains("2. Result 2"));
    assert!(!listing.contains("Result 3"));

    let text = retriever.retrieve("https://docs.example/", 5).await.unwrap();
    assert!(text.contains("Read the guide"));

    assert_eq!(retriever.engine_names(), vec!["bing", "duckduckgo", "yahoo"]);
}
