//! Page-level helpers: internal links, titles, structure snapshots and
//! URL normalisation.

use std::collections::{BTreeMap, HashSet};

use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use url::Url;
use utoipa::ToSchema;

static ANCHORS: Lazy<Option<Selector>> = Lazy::new(|| Selector::parse("a[href]").ok());
static BASE_HREF: Lazy<Option<Selector>> = Lazy::new(|| Selector::parse("base[href]").ok());
static TITLE: Lazy<Option<Selector>> = Lazy::new(|| Selector::parse("title").ok());
static H1: Lazy<Option<Selector>> = Lazy::new(|| Selector::parse("h1").ok());
static BODY: Lazy<Option<Selector>> = Lazy::new(|| Selector::parse("body").ok());
static MAIN: Lazy<Option<Selector>> = Lazy::new(|| Selector::parse("main").ok());

const SKIPPED_SCHEMES: &[&str] = &["javascript:", "mailto:", "tel:", "data:", "ftp:"];

/// Collapse every whitespace run to one space and trim the ends.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// First `max` characters, with `...` appended when something was cut.
pub fn preview(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// `host[:port]` of a URL, lowercased, ignoring the default port.
pub fn origin_host(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_ascii_lowercase();
    Some(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host,
    })
}

pub fn same_host(a: &Url, b: &Url) -> bool {
    matches!((origin_host(a), origin_host(b)), (Some(x), Some(y)) if x == y)
}

/// Canonical form used for deduplication: fragment dropped, trailing
/// slash removed except on the root path.
pub fn normalize_url(raw: &str) -> String {
    let Ok(mut url) = Url::parse(raw.trim()) else {
        return raw.trim().to_string();
    };
    url.set_fragment(None);

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }
    url.to_string()
}

fn document_base(document: &Html, page_url: &Url) -> Url {
    BASE_HREF
        .as_ref()
        .and_then(|sel| document.select(sel).next())
        .and_then(|base| base.value().attr("href"))
        .and_then(|href| page_url.join(href.trim()).ok())
        .unwrap_or_else(|| page_url.clone())
}

/// Same-host links of a page, resolved against `<base href>` (or the page
/// URL), fragments removed, deduplicated in document order.
pub fn extract_internal_links(html: &str, page_url: &str) -> Vec<String> {
    collect_links(html, page_url, true)
}

/// Like [`extract_internal_links`] but keeps links to any http(s) host.
pub fn extract_links(html: &str, page_url: &str) -> Vec<String> {
    collect_links(html, page_url, false)
}

fn collect_links(html: &str, page_url: &str, same_host_only: bool) -> Vec<String> {
    let Ok(page) = Url::parse(page_url) else {
        return Vec::new();
    };
    let Some(anchors) = ANCHORS.as_ref() else {
        return Vec::new();
    };

    let document = Html::parse_document(html);
    let base = document_base(&document, &page);
    let page_key = normalize_url(page.as_str());

    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for anchor in document.select(anchors) {
        let Some(href) = anchor.value().attr("href").map(str::trim) else {
            continue;
        };
        if href.is_empty() || href.starts_with('#') {
            continue;
        }
        let lowered = href.to_ascii_lowercase();
        if SKIPPED_SCHEMES.iter().any(|s| lowered.starts_with(s)) {
            continue;
        }

        let Ok(mut absolute) = base.join(href) else {
            continue;
        };
        if !matches!(absolute.scheme(), "http" | "https")
            || (same_host_only && !same_host(&absolute, &page))
        {
            continue;
        }
        absolute.set_fragment(None);

        let key = normalize_url(absolute.as_str());
        if key == page_key {
            continue;
        }
        if seen.insert(key) {
            links.push(absolute.to_string());
        }
    }
    links
}

/// `<title>`, falling back to the first `<h1>`; empty when neither exists.
pub fn extract_title(html: &str) -> String {
    let document = Html::parse_document(html);
    [&*TITLE, &*H1]
        .into_iter()
        .flatten()
        .filter_map(|sel| document.select(sel).next())
        .map(|el| normalize_whitespace(&el.text().collect::<String>()))
        .find(|t| !t.is_empty())
        .unwrap_or_default()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ChildElement {
    pub tag: String,
    pub classes: Vec<String>,
    pub text_preview: String,
}

/// Debug snapshot of a page's top-level layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct HtmlStructure {
    pub tag_name: String,
    pub classes: Vec<String>,
    pub id: String,
    pub data_attributes: BTreeMap<String, String>,
    pub child_elements: Vec<ChildElement>,
    pub text_length: usize,
}

fn classes_of(element: &ElementRef<'_>) -> Vec<String> {
    element.value().classes().map(str::to_string).collect()
}

impl HtmlStructure {
    pub fn capture(html: &str) -> Self {
        let document = Html::parse_document(html);
        let text_length = document.root_element().text().map(|t| t.chars().count()).sum();

        let focus = [&*BODY, &*MAIN]
            .into_iter()
            .flatten()
            .find_map(|sel| document.select(sel).next());

        let Some(element) = focus else {
            return Self {
                tag_name: "document".to_string(),
                text_length,
                ..Self::default()
            };
        };

        let data_attributes = element
            .value()
            .attrs()
            .filter(|(name, _)| name.starts_with("data-"))
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();

        let child_elements = element
            .children()
            .filter_map(ElementRef::wrap)
            .take(5)
            .map(|child| ChildElement {
                tag: child.value().name().to_string(),
                classes: classes_of(&child),
                text_preview: normalize_whitespace(&child.text().collect::<String>())
                    .chars()
                    .take(100)
                    .collect(),
            })
            .collect();

        Self {
            tag_name: element.value().name().to_string(),
            classes: classes_of(&element),
            id: element.value().id().unwrap_or_default().to_string(),
            data_attributes,
            child_elements,
            text_length,
        }
    }
}
