//! Bing through its RSS output format.

use async_trait::async_trait;
use rss::Channel;
use tracing::debug;
use url::Url;

use super::{EngineContext, SearchEngine, SearchResult};
use crate::error::SearchError;
use crate::extract::page::normalize_whitespace;

const BING_SEARCH_URL: &str = "https://www.bing.com/search";
const MAX_COUNT: usize = 50;

pub struct BingEngine {
    ctx: EngineContext,
}

impl BingEngine {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }
}

/// Parse a Bing RSS feed. Items without a title or an http(s) link are
/// skipped and do not consume a rank.
pub fn parse_feed(feed: &str, num_results: usize) -> Vec<SearchResult> {
    let channel = match Channel::read_from(feed.as_bytes()) {
        Ok(channel) => channel,
        Err(e) => {
            debug!("bing feed did not parse: {}", e);
            return Vec::new();
        }
    };

    let mut results = Vec::new();
    for item in channel.items() {
        if results.len() >= num_results {
            break;
        }
        let title = normalize_whitespace(item.title().unwrap_or_default());
        let Some(link) = item.link().map(str::trim) else {
            continue;
        };
        if title.is_empty() || !(link.starts_with("http://") || link.starts_with("https://")) {
            continue;
        }
        let raw = item.description().unwrap_or_default();
        let mut result = SearchResult::new(
            "bing",
            results.len() + 1,
            title,
            link,
            normalize_whitespace(raw),
        );
        result.raw_snippet = Some(raw.to_string());
        results.push(result);
    }
    results
}

#[async_trait]
impl SearchEngine for BingEngine {
    fn name(&self) -> &'static str {
        "bing"
    }

    fn priority(&self) -> u8 {
        10
    }

    fn context(&self) -> &EngineContext {
        &self.ctx
    }

    fn request_url(&self, query: &str, num_results: usize) -> Result<String, SearchError> {
        let count = num_results.clamp(1, MAX_COUNT).to_string();
        Url::parse_with_params(
            BING_SEARCH_URL,
            &[("q", query), ("count", count.as_str()), ("format", "rss")],
        )
        .map(String::from)
        .map_err(|e| SearchError::InvalidQuery(e.to_string()))
    }

    fn parse(&self, body: &str, num_results: usize) -> Vec<SearchResult> {
        parse_feed(body, num_results)
    }
}
