//! HTML to text: the main-content cascade, page helpers and result-page
//! parsing.

pub mod cascade;
pub mod page;
pub mod serp;

pub use cascade::{ContentUtilities, ExtractionCascade, ExtractionStrategy, ReadabilityUtilities};
pub use page::{extract_internal_links, extract_links, extract_title, normalize_url, preview, HtmlStructure};
pub use serp::{extract_search_results, SerpHit};
