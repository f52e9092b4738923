//! Web retrieval pipeline: multi-engine search, a bot-tolerant fetch
//! ladder with paywall and archive fallback, a main-content extraction
//! cascade and bounded same-host link following.

pub mod config;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod follow;
pub mod identity;
pub mod proxy;
pub mod retriever;
pub mod search;
pub mod traverse;

pub use config::Config;
pub use error::{ConfigError, FetchError, ProxyError, RetrieveError, SearchError};
pub use extract::{extract_search_results, ExtractionCascade};
pub use fetch::{FetchPolicy, Fetcher, PageFetcher};
pub use follow::{FollowLimits, LinkFollower, LinkedPage, VisitedSet};
pub use proxy::ProxyPool;
pub use retriever::Retriever;
pub use search::{MultiEngineSearch, MultiSearchOutcome, SearchEngine, SearchRequest, SearchResult};
pub use traverse::{TraversalConfig, TraversalReport, WebsiteTraverser};
