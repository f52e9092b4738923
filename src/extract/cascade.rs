//! Main-content extraction as an ordered list of fallback strategies.
//!
//! Every strategy either produces text long enough to be trusted or
//! yields `None`, in which case the next one runs. The cascade itself
//! never fails: when nothing works it returns an empty string.

use std::io::Cursor;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Node, Selector};
use tracing::{debug, warn};

use super::page::normalize_whitespace;

/// Minimum characters for a structural strategy to count as a success.
pub const MIN_CONTENT_LENGTH: usize = 100;
/// Minimum characters for the title-only fallback.
pub const MIN_TITLE_LENGTH: usize = 10;

/// Selectors probed for the main content region, most specific first.
pub const CONTENT_SELECTORS: &[&str] = &[
    "main",
    "[role=\"main\"]",
    ".main-content",
    ".content",
    ".post-content",
    ".article-content",
    "#content",
    "#main",
    ".entry-content",
    ".post-body",
    ".article-body",
];

/// Elements whose text never counts as page content.
pub const NON_CONTENT_TAGS: &[&str] = &["script", "style", "nav", "footer", "header", "aside", "menu"];

static CONTENT_SELECTOR_TABLE: Lazy<Vec<(&'static str, Selector)>> = Lazy::new(|| {
    CONTENT_SELECTORS
        .iter()
        .filter_map(|s| Selector::parse(s).ok().map(|sel| (*s, sel)))
        .collect()
});

static BODY: Lazy<Option<Selector>> = Lazy::new(|| Selector::parse("body").ok());
static TITLE: Lazy<Option<Selector>> = Lazy::new(|| Selector::parse("title").ok());

static COMMENT_RE: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").ok());
static SCRIPT_BLOCK_RE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").ok());
static STYLE_BLOCK_RE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?is)<style\b[^>]*>.*?</style\s*>").ok());
static TAG_RE: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"<[^>]+>").ok());

/// One way of turning HTML into main-content text.
pub trait ExtractionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Results must be strictly longer than this (in characters).
    fn min_length(&self) -> usize {
        MIN_CONTENT_LENGTH
    }

    fn attempt(&self, html: &str) -> Option<String>;
}

/// Optional richer extractor supplied by the surrounding application.
pub trait ContentUtilities: Send + Sync {
    /// Dedicated main-content heuristic.
    fn main_content(&self, html: &str) -> Option<String>;

    /// Whole page converted to markdown-ish text, boilerplate stripped.
    fn markdown(&self, html: &str) -> Option<String>;
}

fn long_enough(text: &str, min: usize) -> bool {
    text.chars().count() > min
}

// ============================================================================
// Stage 1: structured / markdown collaborator
// ============================================================================

/// `readability` for the main-content heuristic, `html2text` for markdown.
#[derive(Debug, Clone)]
pub struct ReadabilityUtilities {
    base_url: Option<reqwest::Url>,
    wrap_width: usize,
}

impl ReadabilityUtilities {
    pub fn new(base_url: reqwest::Url) -> Self {
        Self {
            base_url: Some(base_url),
            wrap_width: 100,
        }
    }

    /// Resolve relative links against the page's own URL when it is known.
    pub fn for_page(url: &str) -> Self {
        match reqwest::Url::parse(url) {
            Ok(base) => Self::new(base),
            Err(_) => Self::default(),
        }
    }
}

impl Default for ReadabilityUtilities {
    fn default() -> Self {
        Self {
            base_url: reqwest::Url::parse("http://localhost/").ok(),
            wrap_width: 100,
        }
    }
}

impl ContentUtilities for ReadabilityUtilities {
    fn main_content(&self, html: &str) -> Option<String> {
        let base_url = self.base_url.as_ref()?;
        let mut reader = Cursor::new(html.as_bytes());
        match readability::extractor::extract(&mut reader, base_url) {
            Ok(product) => {
                let text = normalize_whitespace(&product.text);
                (!text.is_empty()).then_some(text)
            }
            Err(e) => {
                debug!("readability failed: {}", e);
                None
            }
        }
    }

    fn markdown(&self, html: &str) -> Option<String> {
        let cleaned = strip_blocks(html);
        match html2text::from_read(Cursor::new(cleaned.as_bytes()), self.wrap_width) {
            Ok(text) => {
                let text = text.trim().to_string();
                (!text.is_empty()).then_some(text)
            }
            Err(e) => {
                debug!("html2text failed: {}", e);
                None
            }
        }
    }
}

pub struct StructuredStrategy {
    utilities: Arc<dyn ContentUtilities>,
}

impl StructuredStrategy {
    pub fn new(utilities: Arc<dyn ContentUtilities>) -> Self {
        Self { utilities }
    }
}

impl ExtractionStrategy for StructuredStrategy {
    fn name(&self) -> &'static str {
        "structured"
    }

    fn attempt(&self, html: &str) -> Option<String> {
        if let Some(main) = self.utilities.main_content(html) {
            if long_enough(&main, self.min_length()) {
                return Some(main);
            }
        }
        self.utilities.markdown(html)
    }
}

// ============================================================================
// Stage 2: fast selector pass over the parsed document
// ============================================================================

fn element_text(element: scraper::ElementRef<'_>) -> String {
    normalize_whitespace(&element.text().collect::<Vec<_>>().join(" "))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SelectorStrategy;

impl ExtractionStrategy for SelectorStrategy {
    fn name(&self) -> &'static str {
        "selector"
    }

    fn attempt(&self, html: &str) -> Option<String> {
        let document = Html::parse_document(html);

        for (name, selector) in CONTENT_SELECTOR_TABLE.iter() {
            if let Some(element) = document.select(selector).next() {
                let text = element_text(element);
                if long_enough(&text, self.min_length()) {
                    debug!(selector = *name, "content selector matched");
                    return Some(text);
                }
            }
        }

        let body = BODY.as_ref()?;
        document
            .select(body)
            .next()
            .map(element_text)
            .filter(|text| long_enough(text, self.min_length()))
    }
}

// ============================================================================
// Stage 3: tolerant selector pass over a pre-cleaned fragment
// ============================================================================

/// Remove comments, scripts and styles with regexes before parsing, so a
/// broken `<script>` cannot swallow the rest of the document.
fn strip_blocks(html: &str) -> String {
    let mut out = html.to_string();
    for re in [&*COMMENT_RE, &*SCRIPT_BLOCK_RE, &*STYLE_BLOCK_RE]
        .into_iter()
        .flatten()
    {
        out = re.replace_all(&out, " ").into_owned();
    }
    out
}

/// Same selector list, but every match is collected and the input is
/// parsed as a fragment, which tolerates missing `<html>`/`<body>` and
/// unbalanced markup.
#[derive(Debug, Clone, Copy, Default)]
pub struct TolerantSelectorStrategy;

impl ExtractionStrategy for TolerantSelectorStrategy {
    fn name(&self) -> &'static str {
        "tolerant-selector"
    }

    fn attempt(&self, html: &str) -> Option<String> {
        let fragment = Html::parse_fragment(&strip_blocks(html));

        CONTENT_SELECTOR_TABLE.iter().find_map(|(_, selector)| {
            let joined = fragment
                .select(selector)
                .map(element_text)
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join(" ");
            long_enough(&joined, self.min_length()).then_some(joined)
        })
    }
}

// ============================================================================
// Stage 4: body text with non-content elements dropped
// ============================================================================

fn is_non_content(node: &Node) -> bool {
    node.as_element()
        .map_or(false, |element| NON_CONTENT_TAGS.contains(&element.name()))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BodyCleanupStrategy;

impl ExtractionStrategy for BodyCleanupStrategy {
    fn name(&self) -> &'static str {
        "body-cleanup"
    }

    fn attempt(&self, html: &str) -> Option<String> {
        let document = Html::parse_document(html);
        let body = document.select(BODY.as_ref()?).next()?;

        let parts: Vec<&str> = body
            .descendants()
            .filter_map(|node| {
                let text = node.value().as_text()?;
                if node.ancestors().any(|a| is_non_content(a.value())) {
                    return None;
                }
                Some(&**text)
            })
            .collect();
        let text = normalize_whitespace(&parts.join(" "));
        long_enough(&text, self.min_length()).then_some(text)
    }
}

// ============================================================================
// Stage 5: raw regex tag strip
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct RegexStripStrategy;

impl ExtractionStrategy for RegexStripStrategy {
    fn name(&self) -> &'static str {
        "regex-strip"
    }

    fn attempt(&self, html: &str) -> Option<String> {
        let tag_re = TAG_RE.as_ref()?;
        let text = normalize_whitespace(&tag_re.replace_all(html, " "));
        long_enough(&text, self.min_length()).then_some(text)
    }
}

// ============================================================================
// Stage 6: title only
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct TitleStrategy;

impl ExtractionStrategy for TitleStrategy {
    fn name(&self) -> &'static str {
        "title"
    }

    fn min_length(&self) -> usize {
        MIN_TITLE_LENGTH
    }

    fn attempt(&self, html: &str) -> Option<String> {
        let document = Html::parse_document(html);
        document
            .select(TITLE.as_ref()?)
            .next()
            .map(element_text)
    }
}

// ============================================================================
// The cascade
// ============================================================================

pub struct ExtractionCascade {
    strategies: Vec<Box<dyn ExtractionStrategy>>,
}

impl ExtractionCascade {
    /// Stages 2 through 6; no structured collaborator.
    pub fn new() -> Self {
        Self {
            strategies: vec![
                Box::new(SelectorStrategy),
                Box::new(TolerantSelectorStrategy),
                Box::new(BodyCleanupStrategy),
                Box::new(RegexStripStrategy),
                Box::new(TitleStrategy),
            ],
        }
    }

    /// All six stages with `utilities` as the first one.
    pub fn with_utilities(utilities: Arc<dyn ContentUtilities>) -> Self {
        let mut cascade = Self::new();
        cascade
            .strategies
            .insert(0, Box::new(StructuredStrategy::new(utilities)));
        cascade
    }

    /// Custom strategy order.
    pub fn from_strategies(strategies: Vec<Box<dyn ExtractionStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// First strategy result that clears its threshold, or `""`.
    pub fn extract_main_content(&self, html: &str) -> String {
        if html.trim().is_empty() {
            return String::new();
        }

        for strategy in &self.strategies {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| strategy.attempt(html)));
            match outcome {
                Ok(Some(text)) if long_enough(&text, strategy.min_length()) => {
                    debug!(strategy = strategy.name(), chars = text.len(), "content extracted");
                    return text;
                }
                Ok(_) => {}
                Err(_) => warn!(strategy = strategy.name(), "extraction strategy panicked"),
            }
        }

        warn!("all content extraction strategies failed");
        String::new()
    }
}

impl Default for ExtractionCascade {
    fn default() -> Self {
        Self::with_utilities(Arc::new(ReadabilityUtilities::default()))
    }
}
