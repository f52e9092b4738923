//! Breadth-first website traversal from a start URL.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use regex::{Regex, RegexBuilder};
use serde::Serialize;
use tracing::{debug, info, warn};
use url::Url;
use utoipa::ToSchema;

use crate::error::FetchError;
use crate::extract::cascade::ExtractionCascade;
use crate::extract::page::{extract_internal_links, extract_links, extract_title, normalize_url, preview};
use crate::fetch::PageFetcher;
use crate::follow::VisitedSet;

/// Upper bound on queued, not yet fetched URLs.
const MAX_QUEUE: usize = 100;
/// Characters of each page's content kept in the report.
const REPORT_PREVIEW_CHARS: usize = 1000;

const SKIPPED_EXTENSIONS: &[&str] = &[
    ".pdf", ".doc", ".docx", ".xls", ".xlsx", ".ppt", ".pptx", ".zip", ".rar", ".tar", ".gz", ".7z",
    ".jpg", ".jpeg", ".png", ".gif", ".bmp", ".svg", ".mp3", ".mp4", ".avi", ".mov", ".wmv", ".css",
    ".js", ".xml", ".rss",
];

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct TraversalConfig {
    /// 0 fetches only the start page
    pub max_depth: usize,
    pub max_pages: usize,
    pub max_content_per_page: usize,
    pub same_domain_only: bool,
    /// Case-insensitive regexes; when non-empty a link must match one
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    #[serde(serialize_with = "millis::serialize")]
    #[schema(value_type = u64)]
    pub delay_between_requests: Duration,
}

mod millis {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }
}

impl Default for TraversalConfig {
    fn default() -> Self {
        Self {
            max_depth: 2,
            max_pages: 10,
            max_content_per_page: 3000,
            same_domain_only: true,
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
            delay_between_requests: Duration::from_millis(500),
        }
    }
}

fn patterns(list: &[&str]) -> Vec<String> {
    list.iter().map(|p| p.to_string()).collect()
}

impl TraversalConfig {
    /// Follow related pages, skipping taxonomy, search and account pages.
    pub fn research_topic(max_pages: usize) -> Self {
        Self {
            max_depth: 2,
            max_pages,
            exclude_patterns: patterns(&[
                r"/tag/", r"/category/", r"/archive/", r"/search/", r"\.pdf$", r"\.doc$", r"/login",
                r"/register",
            ]),
            ..Self::default()
        }
    }

    /// Stay inside documentation-like paths.
    pub fn explore_documentation(max_pages: usize) -> Self {
        Self {
            max_depth: 3,
            max_pages,
            include_patterns: patterns(&[
                r"/docs?/", r"/documentation/", r"/guide/", r"/tutorial/", r"/api/", r"/reference/",
                r"/manual/",
            ]),
            exclude_patterns: patterns(&[r"/forum/", r"/blog/", r"/news/", r"/download/"]),
            ..Self::default()
        }
    }

    pub fn map_website_structure(max_pages: usize) -> Self {
        Self {
            max_depth: 2,
            max_pages,
            exclude_patterns: patterns(&[
                r"\.pdf$", r"\.doc$", r"\.zip$", r"/search\?", r"/login", r"/register", r"/cart",
                r"/checkout",
            ]),
            ..Self::default()
        }
    }

    pub fn without_delay(mut self) -> Self {
        self.delay_between_requests = Duration::ZERO;
        self
    }
}

/// One fetched (or failed) page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraversedPage {
    pub url: String,
    pub title: String,
    pub content: String,
    pub links_found: Vec<String>,
    pub depth: usize,
    pub error: Option<String>,
}

impl TraversedPage {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct PageSummary {
    pub url: String,
    pub title: String,
    pub content: String,
    pub depth: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct TraversalReport {
    pub start_url: String,
    pub pages_fetched: usize,
    pub total_attempts: usize,
    pub unique_links_found: usize,
    pub max_depth_reached: usize,
    pub pages: Vec<PageSummary>,
    pub summary: String,
    pub config: TraversalConfig,
}

impl TraversalReport {
    fn build(start_url: &str, config: &TraversalConfig, visited: &[TraversedPage]) -> Self {
        let mut links = HashSet::new();
        let pages: Vec<PageSummary> = visited
            .iter()
            .filter(|p| p.succeeded())
            .map(|p| {
                links.extend(p.links_found.iter().cloned());
                PageSummary {
                    url: p.url.clone(),
                    title: p.title.clone(),
                    content: preview(&p.content, REPORT_PREVIEW_CHARS),
                    depth: p.depth,
                }
            })
            .collect();

        Self {
            start_url: start_url.to_string(),
            pages_fetched: pages.len(),
            total_attempts: visited.len(),
            unique_links_found: links.len(),
            max_depth_reached: visited.iter().map(|p| p.depth).max().unwrap_or(0),
            summary: format!("Traversed {} pages starting from {}", pages.len(), start_url),
            pages,
            config: config.clone(),
        }
    }
}

fn compile(patterns: &[String]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| match RegexBuilder::new(p).case_insensitive(true).build() {
            Ok(re) => Some(re),
            Err(e) => {
                warn!(pattern = %p, "ignoring invalid link pattern: {}", e);
                None
            }
        })
        .collect()
}

pub struct WebsiteTraverser {
    fetcher: Arc<dyn PageFetcher>,
    cascade: Arc<ExtractionCascade>,
    config: TraversalConfig,
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl WebsiteTraverser {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        cascade: Arc<ExtractionCascade>,
        config: TraversalConfig,
    ) -> Self {
        Self {
            include: compile(&config.include_patterns),
            exclude: compile(&config.exclude_patterns),
            fetcher,
            cascade,
            config,
        }
    }

    pub fn config(&self) -> &TraversalConfig {
        &self.config
    }

    pub fn should_follow(&self, link: &str, start: &Url) -> bool {
        let Ok(url) = Url::parse(link) else {
            return false;
        };
        if self.config.same_domain_only && url.host_str() != start.host_str() {
            return false;
        }
        if !self.include.is_empty() && !self.include.iter().any(|re| re.is_match(link)) {
            return false;
        }
        if self.exclude.iter().any(|re| re.is_match(link)) {
            return false;
        }
        let path = url.path().to_ascii_lowercase();
        !SKIPPED_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
    }

    async fn visit(&self, url: &str, depth: usize) -> TraversedPage {
        let mut page = TraversedPage {
            url: url.to_string(),
            title: String::new(),
            content: String::new(),
            links_found: Vec::new(),
            depth,
            error: None,
        };

        let html = match self.fetcher.fetch(url).await {
            Ok(html) if !html.trim().is_empty() => html,
            Ok(_) => {
                page.error = Some("empty content".to_string());
                return page;
            }
            Err(e) => {
                page.error = Some(e.to_string());
                return page;
            }
        };

        page.title = extract_title(&html);
        if page.title.is_empty() {
            page.title = "Untitled".to_string();
        }
        page.links_found = if self.config.same_domain_only {
            extract_internal_links(&html, url)
        } else {
            extract_links(&html, url)
        };

        let content = self.cascade.extract_main_content(&html);
        let limit = self.config.max_content_per_page;
        page.content = match content.char_indices().nth(limit) {
            Some((cut, _)) => format!("{}...[truncated]", &content[..cut]),
            None => content,
        };
        page
    }

    /// Walk outward from `start_url`, nearest pages first, until
    /// `max_pages` pages were attempted or nothing is left to visit.
    pub async fn traverse(&self, start_url: &str) -> Result<TraversalReport, FetchError> {
        let start = Url::parse(start_url)
            .map_err(|e| FetchError::InvalidUrl(format!("{}: {}", start_url, e)))?;
        info!(start = %start_url, max_pages = self.config.max_pages, "traversal started");

        let visited = VisitedSet::new();
        let mut queued = HashSet::new();
        let mut queue = VecDeque::from([(start_url.to_string(), 0usize)]);
        queued.insert(normalize_url(start_url));
        let mut pages = Vec::new();

        while let Some((url, depth)) = queue.pop_front() {
            if pages.len() >= self.config.max_pages {
                break;
            }
            if depth > self.config.max_depth || !visited.claim(&url) {
                continue;
            }
            if depth > 0 && !self.config.delay_between_requests.is_zero() {
                tokio::time::sleep(self.config.delay_between_requests).await;
            }

            let page = self.visit(&url, depth).await;
            debug!(url = %url, depth, ok = page.succeeded(), "traversed page {}", pages.len() + 1);

            if page.succeeded() && depth < self.config.max_depth {
                for link in &page.links_found {
                    if queue.len() >= MAX_QUEUE {
                        break;
                    }
                    let key = normalize_url(link);
                    if visited.contains(link) || queued.contains(&key) {
                        continue;
                    }
                    if self.should_follow(link, &start) {
                        queued.insert(key);
                        queue.push_back((link.clone(), depth + 1));
                    }
                }
            }
            pages.push(page);
        }

        let report = TraversalReport::build(start_url, &self.config, &pages);
        info!(
            start = %start_url,
            fetched = report.pages_fetched,
            attempts = report.total_attempts,
            "traversal finished"
        );
        Ok(report)
    }
}
