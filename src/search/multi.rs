//! Several engines behind one call: priority-ordered fallback, or every
//! engine at once with a per-engine report.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use url::Url;
use utoipa::ToSchema;

use super::{BingEngine, DuckDuckGoEngine, EngineContext, SearchEngine, SearchRequest, SearchResult, YahooEngine};
use crate::error::SearchError;

/// Query parameters that only track the click.
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "msclkid"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct EngineFailure {
    pub engine: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MultiSearchOutcome {
    pub query: String,
    pub results: Vec<SearchResult>,
    pub engines_tried: Vec<String>,
    /// Engines that answered but had nothing parsable
    #[serde(default)]
    pub empty_engines: Vec<String>,
    pub failures: Vec<EngineFailure>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EngineStatus {
    Success,
    NoResults,
    Failed,
}

/// One engine's share of an all-engines search.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EngineReport {
    pub engine: String,
    pub status: EngineStatus,
    pub count: usize,
    pub results: Vec<SearchResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[schema(value_type = String)]
    pub timestamp: DateTime<Utc>,
}

impl EngineReport {
    fn from_search(engine: &str, outcome: Result<Vec<SearchResult>, SearchError>) -> Self {
        let (status, results, error) = match outcome {
            Ok(results) if results.is_empty() => (EngineStatus::NoResults, results, None),
            Ok(results) => (EngineStatus::Success, results, None),
            Err(SearchError::NoResults { .. }) => (EngineStatus::NoResults, Vec::new(), None),
            Err(e) => (EngineStatus::Failed, Vec::new(), Some(e.to_string())),
        };
        Self {
            engine: engine.to_string(),
            status,
            count: results.len(),
            results,
            error,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AllEnginesSummary {
    pub query: String,
    pub engines_tested: usize,
    pub successful_engines: usize,
    /// Engines without results, whether they failed or came back empty
    pub failed_engines: usize,
    pub total_results: usize,
    pub extract_content: bool,
    pub follow_links: bool,
    pub max_depth: usize,
    #[schema(value_type = String)]
    pub timestamp: DateTime<Utc>,
}

/// Every engine's results side by side, in engine priority order.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AllEnginesOutcome {
    pub summary: AllEnginesSummary,
    pub engines: Vec<EngineReport>,
}

impl AllEnginesOutcome {
    pub fn report(&self, engine: &str) -> Option<&EngineReport> {
        self.engines.iter().find(|r| r.engine == engine)
    }
}

impl MultiSearchOutcome {
    /// The results, or `SearchError::Exhausted` when no engine produced any.
    pub fn into_result(self) -> Result<Vec<SearchResult>, SearchError> {
        if self.results.is_empty() {
            Err(SearchError::Exhausted { query: self.query })
        } else {
            Ok(self.results)
        }
    }
}

/// Key used to spot the same page listed by two engines.
pub fn dedupe_key(raw: &str) -> String {
    let Ok(mut url) = Url::parse(raw.trim()) else {
        return raw.trim().trim_end_matches('/').to_lowercase();
    };
    url.set_fragment(None);
    let path = url.path().trim_end_matches('/').to_string();
    url.set_path(&path);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| {
            let key = key.to_ascii_lowercase();
            !key.starts_with("utm_") && !TRACKING_PARAMS.contains(&key.as_str())
        })
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }

    url.to_string().trim_end_matches('/').to_lowercase()
}

pub struct MultiEngineSearch {
    engines: Vec<Arc<dyn SearchEngine>>,
}

impl MultiEngineSearch {
    /// Engines run in ascending `priority()`.
    pub fn new(mut engines: Vec<Arc<dyn SearchEngine>>) -> Self {
        engines.sort_by_key(|e| e.priority());
        Self { engines }
    }

    /// Bing RSS, DuckDuckGo HTML and Yahoo HTML sharing one context.
    pub fn with_defaults(ctx: EngineContext) -> Self {
        let engines: Vec<Arc<dyn SearchEngine>> = vec![
            Arc::new(BingEngine::new(ctx.clone())),
            Arc::new(DuckDuckGoEngine::new(ctx.clone())),
            Arc::new(YahooEngine::new(ctx)),
        ];
        Self::new(engines)
    }

    /// A search over the named engines only; unknown names are ignored.
    pub fn only(&self, names: &[String]) -> Self {
        let engines = self
            .engines
            .iter()
            .filter(|e| names.iter().any(|n| n.eq_ignore_ascii_case(e.name())))
            .cloned()
            .collect();
        Self { engines }
    }

    pub fn engine_names(&self) -> Vec<&'static str> {
        self.engines.iter().map(|e| e.name()).collect()
    }

    /// Try engines in order until `num_results` distinct results are
    /// collected. An engine's failure is recorded and the next one runs.
    pub async fn search(&self, request: &SearchRequest) -> MultiSearchOutcome {
        let mut outcome = MultiSearchOutcome {
            query: request.query.clone(),
            results: Vec::new(),
            engines_tried: Vec::new(),
            empty_engines: Vec::new(),
            failures: Vec::new(),
        };
        let mut seen = HashSet::new();

        for engine in &self.engines {
            if outcome.results.len() >= request.num_results {
                break;
            }
            outcome.engines_tried.push(engine.name().to_string());

            match engine.search(request).await {
                Ok(results) => {
                    let before = outcome.results.len();
                    for result in results {
                        if outcome.results.len() >= request.num_results {
                            break;
                        }
                        if seen.insert(dedupe_key(result.target_url())) {
                            outcome.results.push(result);
                        }
                    }
                    info!(
                        engine = engine.name(),
                        added = outcome.results.len() - before,
                        total = outcome.results.len(),
                        "engine contributed results"
                    );
                }
                Err(SearchError::NoResults { .. }) => {
                    info!(engine = engine.name(), query = %request.query, "engine had no results");
                    outcome.empty_engines.push(engine.name().to_string());
                }
                Err(e) => {
                    warn!(engine = engine.name(), query = %request.query, "engine failed: {}", e);
                    outcome.failures.push(EngineFailure {
                        engine: engine.name().to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        if outcome.results.is_empty() {
            warn!(query = %request.query, failures = outcome.failures.len(), "no engine produced results");
        }
        outcome
    }

    /// Run every engine concurrently and report each one separately.
    /// Results are not deduplicated across engines.
    pub async fn search_all(&self, request: &SearchRequest) -> AllEnginesOutcome {
        let outcomes = join_all(self.engines.iter().map(|engine| engine.search(request))).await;

        let engines: Vec<EngineReport> = self
            .engines
            .iter()
            .zip(outcomes)
            .map(|(engine, outcome)| {
                let report = EngineReport::from_search(engine.name(), outcome);
                match report.status {
                    EngineStatus::Success => info!(engine = engine.name(), count = report.count, "engine succeeded"),
                    EngineStatus::NoResults => warn!(engine = engine.name(), "engine returned no results"),
                    EngineStatus::Failed => warn!(
                        engine = engine.name(),
                        "engine failed: {}",
                        report.error.as_deref().unwrap_or_default()
                    ),
                }
                report
            })
            .collect();

        let successful_engines = engines.iter().filter(|r| r.status == EngineStatus::Success).count();
        let summary = AllEnginesSummary {
            query: request.query.clone(),
            engines_tested: engines.len(),
            successful_engines,
            failed_engines: engines.len() - successful_engines,
            total_results: engines.iter().map(|r| r.count).sum(),
            extract_content: request.extract_content,
            follow_links: request.follow_links,
            max_depth: request.max_depth,
            timestamp: Utc::now(),
        };
        info!(
            query = %request.query,
            successful = summary.successful_engines,
            total = summary.total_results,
            "all-engines search finished"
        );
        AllEnginesOutcome { summary, engines }
    }
}
