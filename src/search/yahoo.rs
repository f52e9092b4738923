//! Yahoo web search HTML.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use url::Url;

use super::{parse_html_results, EngineContext, ResultLayout, SearchEngine, SearchResult};
use crate::error::SearchError;

const YAHOO_SEARCH_URL: &str = "https://search.yahoo.com/search";
const MAX_COUNT: usize = 50;

static LAYOUT: Lazy<ResultLayout> = Lazy::new(|| {
    ResultLayout::new(
        &["div.dd", "div.algo"],
        &["h3 a", "a"],
        &["div.compText", "span.st"],
    )
});

pub struct YahooEngine {
    ctx: EngineContext,
}

impl YahooEngine {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl SearchEngine for YahooEngine {
    fn name(&self) -> &'static str {
        "yahoo"
    }

    fn priority(&self) -> u8 {
        30
    }

    fn context(&self) -> &EngineContext {
        &self.ctx
    }

    fn request_url(&self, query: &str, num_results: usize) -> Result<String, SearchError> {
        let count = num_results.clamp(1, MAX_COUNT).to_string();
        Url::parse_with_params(
            YAHOO_SEARCH_URL,
            &[("p", query), ("n", count.as_str()), ("ei", "UTF-8"), ("fr", "yfp-t")],
        )
        .map(String::from)
        .map_err(|e| SearchError::InvalidQuery(e.to_string()))
    }

    fn parse(&self, body: &str, num_results: usize) -> Vec<SearchResult> {
        match Url::parse(YAHOO_SEARCH_URL) {
            Ok(base) => parse_html_results(self.name(), &LAYOUT, body, &base, num_results),
            Err(_) => Vec::new(),
        }
    }
}
