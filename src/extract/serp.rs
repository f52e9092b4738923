//! Engine-agnostic result-page parsing.
//!
//! Search engines render several DOM shapes depending on experiment
//! cohort, so results are read through ordered selector "families". The
//! first family to match contributes first; later families only fill the
//! remaining slots, and a result URL is never taken twice.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use tracing::debug;
use url::Url;

use super::page::normalize_whitespace;
use crate::search::redirect::resolve_redirect;

/// One result row as it appears on the page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SerpHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

struct SelectorFamily {
    name: &'static str,
    container: Selector,
    title: Selector,
    snippet: Selector,
}

fn family(name: &'static str, container: &str, title: &str, snippet: &str) -> Option<SelectorFamily> {
    Some(SelectorFamily {
        name,
        container: Selector::parse(container).ok()?,
        title: Selector::parse(title).ok()?,
        snippet: Selector::parse(snippet).ok()?,
    })
}

static FAMILIES: Lazy<Vec<SelectorFamily>> = Lazy::new(|| {
    [
        family("google-hveid", "#search div[data-hveid]", "h3", ".VwiC3b"),
        family("google-rso", "#rso div[data-hveid]", "h3", "[data-sncf=\"1\"]"),
        family("google-g", ".g", "h3", "div[style*=\"webkit-line-clamp\"]"),
        family("google-jscontroller", "div[jscontroller][data-hveid]", "h3", "div[role=\"text\"]"),
        family("bing-algo", "li.b_algo", "h2 > a", "p"),
        family("ddg-result", "div.result", "a.result__a", ".result__snippet"),
        family("yahoo-algo", "div.algo", "h3", "div.compText"),
    ]
    .into_iter()
    .flatten()
    .collect()
});

static ALT_SNIPPETS: Lazy<Vec<Selector>> = Lazy::new(|| {
    [
        ".VwiC3b",
        "[data-sncf=\"1\"]",
        "div[style*=\"webkit-line-clamp\"]",
        "div[role=\"text\"]",
    ]
    .iter()
    .filter_map(|s| Selector::parse(s).ok())
    .collect()
});

static ANCHOR: Lazy<Option<Selector>> = Lazy::new(|| Selector::parse("a[href]").ok());
static DIV: Lazy<Option<Selector>> = Lazy::new(|| Selector::parse("div").ok());
static H3: Lazy<Option<Selector>> = Lazy::new(|| Selector::parse("h3").ok());
static HTTP_ANCHOR: Lazy<Option<Selector>> = Lazy::new(|| Selector::parse("a[href^=\"http\"]").ok());

/// Hosts whose own navigation links must never be taken as results.
const SEARCH_ENGINE_HOSTS: &[&str] = &["google.", "bing.com", "duckduckgo.com", "yahoo.com", "yimg.com"];

fn text_of(element: ElementRef<'_>) -> String {
    normalize_whitespace(&element.text().collect::<Vec<_>>().join(" "))
}

fn is_absolute_http(link: &str) -> bool {
    link.starts_with("http://") || link.starts_with("https://")
}

fn is_search_engine_link(link: &str) -> bool {
    Url::parse(link)
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
        .map_or(true, |host| SEARCH_ENGINE_HOSTS.iter().any(|h| host.contains(h)))
}

/// Link for a title element: itself or its nearest `<a>` ancestor, else
/// the first anchor in the container.
fn title_link(title: ElementRef<'_>, container: ElementRef<'_>) -> Option<String> {
    let own = std::iter::once(title)
        .chain(title.ancestors().filter_map(ElementRef::wrap))
        .find(|el| el.value().name() == "a")
        .and_then(|a| a.value().attr("href"));

    own.or_else(|| {
        container
            .select(ANCHOR.as_ref()?)
            .next()
            .and_then(|a| a.value().attr("href"))
    })
    .map(|href| href.trim().to_string())
}

fn snippet_for(container: ElementRef<'_>, primary: &Selector) -> String {
    if let Some(el) = container.select(primary).next() {
        return text_of(el);
    }
    for alt in ALT_SNIPPETS.iter() {
        if let Some(el) = container.select(alt).next() {
            return text_of(el);
        }
    }
    let (Some(div), Some(h3)) = (DIV.as_ref(), H3.as_ref()) else {
        return String::new();
    };
    container
        .select(div)
        .filter(|d| d.select(h3).next().is_none())
        .map(text_of)
        .find(|t| t.chars().count() > 20)
        .unwrap_or_default()
}

/// Text of the closest of three ancestors that says more than the title.
fn surrounding_text(anchor: ElementRef<'_>, title: &str) -> String {
    anchor
        .ancestors()
        .filter_map(ElementRef::wrap)
        .take(3)
        .map(text_of)
        .find(|t| t.chars().count() > 20 && t != title)
        .unwrap_or_default()
}

/// Parse up to `max_results` hits from any search result page.
pub fn extract_search_results(html: &str, max_results: usize) -> Vec<SerpHit> {
    if max_results == 0 {
        return Vec::new();
    }

    let document = Html::parse_document(html);
    let mut results = Vec::new();
    let mut seen = HashSet::new();

    for fam in FAMILIES.iter() {
        if results.len() >= max_results {
            break;
        }
        let before = results.len();
        for container in document.select(&fam.container) {
            if results.len() >= max_results {
                break;
            }
            let Some(title_el) = container.select(&fam.title).next() else {
                continue;
            };
            let title = text_of(title_el);
            let Some(link) = title_link(title_el, container) else {
                continue;
            };
            if title.is_empty() || !is_absolute_http(&link) || seen.contains(&link) {
                continue;
            }
            let snippet = snippet_for(container, &fam.snippet);
            seen.insert(link.clone());
            results.push(SerpHit {
                title,
                url: link,
                snippet,
            });
        }
        if results.len() > before {
            debug!(family = fam.name, found = results.len() - before, "selector family matched");
        }
    }

    if results.len() < max_results {
        if let Some(http_anchor) = HTTP_ANCHOR.as_ref() {
            for anchor in document.select(http_anchor) {
                if results.len() >= max_results {
                    break;
                }
                let Some(raw) = anchor.value().attr("href").map(str::trim) else {
                    continue;
                };
                let target = resolve_redirect(raw).unwrap_or_else(|| raw.to_string());
                if !is_absolute_http(&target)
                    || is_search_engine_link(&target)
                    || seen.contains(raw)
                    || seen.contains(&target)
                {
                    continue;
                }
                let title = text_of(anchor);
                if title.is_empty() {
                    continue;
                }
                let snippet = surrounding_text(anchor, &title);
                seen.insert(target.clone());
                results.push(SerpHit {
                    title,
                    url: target,
                    snippet,
                });
            }
        }
    }

    results.truncate(max_results);
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOGLE_PAGE: &str = r#"
        <div id="search">
          <div data-hveid="1"><a href="https://one.example/"><h3>One</h3></a><div class="VwiC3b">First snippet text</div></div>
          <div data-hveid="2"><a href="https://two.example/"><h3>Two</h3></a><div class="VwiC3b">Second snippet</div></div>
        </div>
        <div class="g"><a href="https://one.example/"><h3>One again</h3></a></div>
        <div class="g"><a href="https://three.example/"><h3>Three</h3></a>
          <div style="-webkit-line-clamp:2">Third snippet</div></div>
    "#;

    #[test]
    fn families_fill_in_order_without_duplicates() {
        let hits = extract_search_results(GOOGLE_PAGE, 10);
        let urls: Vec<&str> = hits.iter().map(|h| h.url.as_str()).collect();
        assert_eq!(urls[..3], ["https://one.example/", "https://two.example/", "https://three.example/"]);
        assert_eq!(hits[0].snippet, "First snippet text");
        assert_eq!(hits[2].snippet, "Third snippet");
    }

    #[test]
    fn first_family_wins_when_it_fills_the_page() {
        let hits = extract_search_results(GOOGLE_PAGE, 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[1].title, "Two");
    }

    #[test]
    fn bing_markup_is_recognised() {
        let html = r#"<ol id="b_results">
            <li class="b_algo"><h2><a href="https://rust-lang.org/">Rust</a></h2><p>A language</p></li>
            <li class="b_algo"><h2><a href="/relative">Skip me</a></h2><p>x</p></li>
        </ol>"#;
        let hits = extract_search_results(html, 5);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "Rust");
        assert_eq!(hits[0].snippet, "A language");
    }

    #[test]
    fn anchor_fallback_skips_engine_links() {
        let html = r#"<body>
            <a href="https://www.google.com/preferences">Settings</a>
            <div><p>Some surrounding description text <a href="https://site.example/page">Site page</a></p></div>
            <a href="https://duckduckgo.com/l/?uddg=https%3A%2F%2Fwrapped.example%2F">Wrapped</a>
        </body>"#;
        let hits = extract_search_results(html, 5);
        let urls: Vec<&str> = hits.iter().map(|h| h.url.as_str()).collect();
        assert_eq!(urls, vec!["https://site.example/page", "https://wrapped.example/"]);
        assert!(hits[0].snippet.contains("surrounding description"));
    }

    #[test]
    fn garbage_yields_nothing() {
        assert!(extract_search_results("<<not html", 5).is_empty());
        assert!(extract_search_results(GOOGLE_PAGE, 0).is_empty());
    }
}
