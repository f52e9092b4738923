//! Recursive same-host link following with fixed per-level budgets.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use futures::future::{join_all, BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;
use utoipa::ToSchema;

use crate::extract::cascade::ExtractionCascade;
use crate::extract::page::{extract_internal_links, extract_title, normalize_url, preview, same_host};
use crate::fetch::PageFetcher;

/// Levels below the origin page that may ever be fetched.
pub const MAX_FOLLOW_DEPTH: usize = 2;

/// URLs already claimed during one top-level retrieval call.
///
/// Cloning shares the set; create a new one per call.
#[derive(Debug, Clone, Default)]
pub struct VisitedSet {
    inner: Arc<Mutex<HashSet<String>>>,
}

impl VisitedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `url` as visited. Returns `false` if it already was.
    pub fn claim(&self, url: &str) -> bool {
        let key = normalize_url(url);
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key)
    }

    pub fn contains(&self, url: &str) -> bool {
        let key = normalize_url(url);
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(&key)
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fan-out allowance for one level below the origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct LevelBudget {
    /// Links fetched at this level
    pub fetch: usize,
    /// Fetched pages (first by link order) that recurse one level deeper
    pub expand: usize,
    /// Characters kept in each page's content preview
    pub preview_chars: usize,
}

/// Per-level budgets, fixed before any fetching starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowLimits {
    levels: Vec<LevelBudget>,
}

impl FollowLimits {
    /// At most `MAX_FOLLOW_DEPTH` levels are kept and the deepest one
    /// never expands.
    pub fn new(mut levels: Vec<LevelBudget>) -> Self {
        levels.truncate(MAX_FOLLOW_DEPTH);
        if let Some(last) = levels.last_mut() {
            last.expand = 0;
        }
        Self { levels }
    }

    pub fn levels(&self) -> &[LevelBudget] {
        &self.levels
    }

    /// Upper bound on fetched pages, origin included.
    pub fn max_pages(&self) -> usize {
        let mut total = 1;
        let mut parents = 1;
        for (i, level) in self.levels.iter().enumerate() {
            let fetched = parents * level.fetch;
            total += fetched;
            parents = match self.levels.get(i + 1) {
                Some(_) => parents * level.expand.min(level.fetch),
                None => 0,
            };
        }
        total
    }
}

impl Default for FollowLimits {
    /// 10 pages at depth 1, the first 3 of them expanded by 2 pages each.
    fn default() -> Self {
        Self::new(vec![
            LevelBudget {
                fetch: 10,
                expand: 3,
                preview_chars: 500,
            },
            LevelBudget {
                fetch: 2,
                expand: 0,
                preview_chars: 300,
            },
        ])
    }
}

/// One followed page. Failed fetches produce an entry with `error` set and
/// everything else empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct LinkedPage {
    pub url: String,
    pub title: String,
    pub content_preview: String,
    pub content_length: usize,
    pub internal_links: Vec<String>,
    /// Pages followed from this one, one level deeper
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub third_level: Option<BTreeMap<String, LinkedPage>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LinkedPage {
    fn failed(url: &str, reason: String) -> Self {
        Self {
            url: url.to_string(),
            error: Some(reason),
            ..Self::default()
        }
    }

    /// Number of pages in this subtree, this one included.
    pub fn page_count(&self) -> usize {
        1 + self
            .third_level
            .as_ref()
            .map_or(0, |children| children.values().map(LinkedPage::page_count).sum())
    }
}

pub struct LinkFollower {
    fetcher: Arc<dyn PageFetcher>,
    cascade: Arc<ExtractionCascade>,
    limits: FollowLimits,
}

impl LinkFollower {
    pub fn new(fetcher: Arc<dyn PageFetcher>, cascade: Arc<ExtractionCascade>) -> Self {
        Self {
            fetcher,
            cascade,
            limits: FollowLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: FollowLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn limits(&self) -> &FollowLimits {
        &self.limits
    }

    /// Follow `links` found on the already-fetched page `origin_url`.
    ///
    /// The origin itself should already be claimed in `visited`.
    pub async fn follow(
        &self,
        origin_url: &str,
        links: &[String],
        visited: &VisitedSet,
    ) -> BTreeMap<String, LinkedPage> {
        let Ok(origin) = Url::parse(origin_url) else {
            return BTreeMap::new();
        };
        visited.claim(origin_url);

        let pages = self
            .follow_level(&origin, links, self.limits.levels(), visited)
            .await;
        info!(
            origin = %origin_url,
            pages = pages.values().map(LinkedPage::page_count).sum::<usize>(),
            "link following finished"
        );
        pages
    }

    fn select<'l>(
        &self,
        origin: &Url,
        links: &'l [String],
        budget: usize,
        visited: &VisitedSet,
    ) -> Vec<&'l str> {
        let mut selected = Vec::new();
        for link in links {
            if selected.len() >= budget {
                break;
            }
            let on_host = Url::parse(link).map_or(false, |u| same_host(&u, origin));
            if on_host && visited.claim(link) {
                selected.push(link.as_str());
            }
        }
        selected
    }

    fn follow_level<'a>(
        &'a self,
        origin: &'a Url,
        links: &'a [String],
        budgets: &'a [LevelBudget],
        visited: &'a VisitedSet,
    ) -> BoxFuture<'a, BTreeMap<String, LinkedPage>> {
        async move {
            let Some((budget, deeper)) = budgets.split_first() else {
                return BTreeMap::new();
            };
            let selected = self.select(origin, links, budget.fetch, visited);
            debug!(
                depth = MAX_FOLLOW_DEPTH + 1 - budgets.len(),
                selected = selected.len(),
                "following links"
            );

            let tasks = selected.into_iter().enumerate().map(|(i, link)| {
                let next: &[LevelBudget] = if i < budget.expand { deeper } else { &[] };
                self.visit(origin, link, budget.preview_chars, next, visited)
            });

            join_all(tasks)
                .await
                .into_iter()
                .map(|page| (page.url.clone(), page))
                .collect()
        }
        .boxed()
    }

    async fn visit(
        &self,
        origin: &Url,
        link: &str,
        preview_chars: usize,
        deeper: &[LevelBudget],
        visited: &VisitedSet,
    ) -> LinkedPage {
        let html = match self.fetcher.fetch(link).await {
            Ok(html) => html,
            Err(e) => {
                debug!(url = %link, "linked page failed: {}", e);
                return LinkedPage::failed(link, e.to_string());
            }
        };

        let content = self.cascade.extract_main_content(&html);
        let internal_links = extract_internal_links(&html, link);
        let mut page = LinkedPage {
            url: link.to_string(),
            title: extract_title(&html),
            content_preview: preview(&content, preview_chars),
            content_length: content.chars().count(),
            internal_links,
            third_level: None,
            error: None,
        };

        if !deeper.is_empty() && !page.internal_links.is_empty() {
            let children = self
                .follow_level(origin, &page.internal_links, deeper, visited)
                .await;
            page.third_level = Some(children);
        }
        page
    }
}
