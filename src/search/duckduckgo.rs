//! DuckDuckGo through its JavaScript-free HTML interface.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use url::Url;

use super::{parse_html_results, EngineContext, ResultLayout, SearchEngine, SearchResult};
use crate::error::SearchError;

const DDG_HTML_URL: &str = "https://duckduckgo.com/html/";

static LAYOUT: Lazy<ResultLayout> = Lazy::new(|| {
    ResultLayout::new(
        &["div.result:not(.result--ad)", "div.web-result"],
        &["a.result__a", "a"],
        &[".result__snippet", ".snippet"],
    )
});

pub struct DuckDuckGoEngine {
    ctx: EngineContext,
}

impl DuckDuckGoEngine {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl SearchEngine for DuckDuckGoEngine {
    fn name(&self) -> &'static str {
        "duckduckgo"
    }

    fn priority(&self) -> u8 {
        20
    }

    fn context(&self) -> &EngineContext {
        &self.ctx
    }

    fn request_url(&self, query: &str, _num_results: usize) -> Result<String, SearchError> {
        Url::parse_with_params(
            DDG_HTML_URL,
            &[("q", query), ("kl", "us-en"), ("kp", "1"), ("t", "h_"), ("ia", "web")],
        )
        .map(String::from)
        .map_err(|e| SearchError::InvalidQuery(e.to_string()))
    }

    fn parse(&self, body: &str, num_results: usize) -> Vec<SearchResult> {
        match Url::parse(DDG_HTML_URL) {
            Ok(base) => parse_html_results(self.name(), &LAYOUT, body, &base, num_results),
            Err(_) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><body><div id="links">
        <div class="result results_links result--ad">
          <a class="result__a" href="https://ads.example/">Sponsored</a>
        </div>
        <div class="result results_links">
          <h2><a class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fwww.rust-lang.org%2F&amp;rut=1">Rust Programming Language</a></h2>
          <a class="result__snippet" href="x">A language empowering everyone.</a>
        </div>
        <div class="result results_links">
          <h2><a class="result__a" href="https://doc.rust-lang.org/book/">The Book</a></h2>
          <div class="snippet">Learn Rust.</div>
        </div>
    </div></body></html>"#;

    #[test]
    fn parses_html_results() {
        let base = Url::parse(DDG_HTML_URL).unwrap();
        let results = parse_html_results("duckduckgo", &LAYOUT, PAGE, &base, 10);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].title, "Rust Programming Language");
        assert!(results[0].url.starts_with("https://duckduckgo.com/l/?uddg="));
        assert_eq!(results[0].description, "A language empowering everyone.");
        assert_eq!(results[1].rank, 2);
        assert_eq!(results[1].description, "Learn Rust.");
    }

    #[test]
    fn falls_back_to_generic_families() {
        let html = r#"<ol><li class="b_algo"><h2><a href="https://tokio.rs/">Tokio</a></h2><p>Async runtime</p></li></ol>"#;
        let base = Url::parse(DDG_HTML_URL).unwrap();
        let results = parse_html_results("duckduckgo", &LAYOUT, html, &base, 5);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].url, "https://tokio.rs/");
        assert_eq!(results[0].source_engine, "duckduckgo");
    }
}
