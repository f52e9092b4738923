//! Proxy pool: harvests public proxy lists, validates candidates and
//! hands out live proxies to the fetch ladder.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use once_cell::sync::Lazy;
use rand::seq::SliceRandom;
use regex::Regex;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::ProxyError;

/// Public proxy listings scraped for `ip:port` candidates.
pub const DEFAULT_PROXY_SOURCES: &[&str] = &[
    "https://free-proxy-list.net/",
    "https://www.sslproxies.org/",
    "https://api.proxyscrape.com/v2/?request=getproxies&protocol=http&timeout=5000&country=all",
];

/// Used when no source yields a live proxy.
pub const LOCAL_FALLBACK_PROXIES: &[&str] = &["127.0.0.1:8080", "127.0.0.1:3128"];

const ECHO_ENDPOINT: &str = "https://httpbin.org/ip";

static CANDIDATE_RE: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"\b(\d{1,3}(?:\.\d{1,3}){3})(?::|</td>\s*<td>)(\d{2,5})\b").ok()
});

/// Source of "now" for refresh decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Network side of the pool: listing download and liveness probe.
#[async_trait]
pub trait ProxyBackend: Send + Sync {
    async fn fetch_listing(&self, source: &str) -> Result<String, ProxyError>;

    /// `true` when a request through `proxy` reached the echo endpoint.
    async fn probe(&self, proxy: &str) -> bool;
}

pub struct HttpProxyBackend {
    client: Client,
    probe_url: String,
    probe_timeout: Duration,
}

impl HttpProxyBackend {
    pub fn new() -> Result<Self, ProxyError> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            probe_url: ECHO_ENDPOINT.to_string(),
            probe_timeout: Duration::from_secs(5),
        })
    }

    pub fn with_probe(mut self, url: impl Into<String>, timeout: Duration) -> Self {
        self.probe_url = url.into();
        self.probe_timeout = timeout;
        self
    }
}

#[async_trait]
impl ProxyBackend for HttpProxyBackend {
    async fn fetch_listing(&self, source: &str) -> Result<String, ProxyError> {
        let resp = self.client.get(source).send().await?;
        if !resp.status().is_success() {
            return Err(ProxyError::Source {
                source_url: source.to_string(),
                reason: format!("HTTP {}", resp.status()),
            });
        }
        Ok(resp.text().await?)
    }

    async fn probe(&self, proxy: &str) -> bool {
        let proxy = match reqwest::Proxy::all(format!("http://{}", proxy)) {
            Ok(p) => p,
            Err(_) => return false,
        };
        let client = match Client::builder()
            .proxy(proxy)
            .timeout(self.probe_timeout)
            .build()
        {
            Ok(c) => c,
            Err(_) => return false,
        };
        matches!(
            client.get(&self.probe_url).send().await,
            Ok(resp) if resp.status().is_success()
        )
    }
}

/// Pull every plausible `ip:port` pair out of a listing page.
pub fn extract_candidates(listing: &str) -> Vec<String> {
    let Some(re) = CANDIDATE_RE.as_ref() else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    re.captures_iter(listing)
        .filter_map(|caps| {
            let ip: Ipv4Addr = caps.get(1)?.as_str().parse().ok()?;
            let port: u16 = caps.get(2)?.as_str().parse().ok()?;
            if port == 0 || ip.is_unspecified() || ip.is_broadcast() {
                return None;
            }
            Some(format!("{}:{}", ip, port))
        })
        .filter(|candidate| seen.insert(candidate.clone()))
        .collect()
}

#[derive(Debug, Clone)]
pub struct ProxyPoolSettings {
    pub refresh_interval: Duration,
    pub min_count: usize,
    /// Wait between top-up attempts while the pool is below `min_count`
    pub retry_backoff: Duration,
    /// Candidates probed per refresh, across all sources
    pub max_candidates: usize,
    pub sources: Vec<String>,
}

impl Default for ProxyPoolSettings {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(30 * 60),
            min_count: 5,
            retry_backoff: Duration::from_secs(60),
            max_candidates: 40,
            sources: DEFAULT_PROXY_SOURCES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProxyEntry {
    pub address: String,
    pub validated_at: Option<DateTime<Utc>>,
    /// Entry comes from the hardcoded local list, never probed
    pub fallback: bool,
}

#[derive(Default)]
struct PoolState {
    entries: Vec<ProxyEntry>,
    last_refresh: Option<DateTime<Utc>>,
    last_attempt: Option<DateTime<Utc>>,
    refreshing: bool,
    rejected: HashSet<String>,
}

/// What one refresh has to do, decided under the lock.
struct RefreshPlan {
    stale: bool,
    skip: HashSet<String>,
    now: DateTime<Utc>,
}

/// Clears the in-flight flag even if the refresh future is dropped.
struct InFlight<'a>(&'a Mutex<PoolState>);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        lock(self.0).refreshing = false;
    }
}

fn lock(state: &Mutex<PoolState>) -> MutexGuard<'_, PoolState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    now.signed_duration_since(since).to_std().unwrap_or_default()
}

/// Process-wide proxy pool.
///
/// The state lock is only held for bookkeeping; listing downloads and
/// probes run outside it, and at most one refresh is in flight. Callers
/// arriving during a refresh get the current (possibly stale) entries.
pub struct ProxyPool {
    backend: Arc<dyn ProxyBackend>,
    clock: Arc<dyn Clock>,
    settings: ProxyPoolSettings,
    state: Mutex<PoolState>,
}

impl ProxyPool {
    pub fn new(
        backend: Arc<dyn ProxyBackend>,
        clock: Arc<dyn Clock>,
        settings: ProxyPoolSettings,
    ) -> Self {
        Self {
            backend,
            clock,
            settings,
            state: Mutex::new(PoolState::default()),
        }
    }

    /// Pool backed by the real network and wall clock.
    pub fn http(settings: ProxyPoolSettings) -> Result<Self, ProxyError> {
        Ok(Self::new(
            Arc::new(HttpProxyBackend::new()?),
            Arc::new(SystemClock),
            settings,
        ))
    }

    /// Up to `count` known proxies, refreshing the pool first when it is
    /// stale or too small. Never fails: the result may be empty or stale.
    pub async fn get_proxies(&self, count: usize) -> Vec<String> {
        self.refresh_if_needed().await;
        lock(&self.state)
            .entries
            .iter()
            .take(count)
            .map(|e| e.address.clone())
            .collect()
    }

    /// A random validated proxy as a proxy URL, or `None` when only the
    /// local fallback list is known.
    pub async fn select_proxy(&self) -> Option<String> {
        self.refresh_if_needed().await;
        let state = lock(&self.state);
        let live: Vec<&ProxyEntry> = state.entries.iter().filter(|e| !e.fallback).collect();
        live.choose(&mut rand::thread_rng())
            .map(|e| format!("http://{}", e.address))
    }

    /// Current entries without triggering a refresh.
    pub async fn snapshot(&self) -> Vec<ProxyEntry> {
        lock(&self.state).entries.clone()
    }

    fn is_stale(&self, state: &PoolState, now: DateTime<Utc>) -> bool {
        state
            .last_refresh
            .map_or(true, |at| elapsed(at, now) >= self.settings.refresh_interval)
    }

    fn plan_refresh(&self) -> Option<RefreshPlan> {
        let mut state = lock(&self.state);
        if state.refreshing {
            return None;
        }

        let now = self.clock.now();
        let stale = self.is_stale(&state, now);
        if !stale {
            let live = state.entries.iter().filter(|e| !e.fallback).count();
            if live >= self.settings.min_count {
                return None;
            }
            let backing_off = state
                .last_attempt
                .map_or(false, |at| elapsed(at, now) < self.settings.retry_backoff);
            if backing_off {
                return None;
            }
        }

        state.refreshing = true;
        state.last_attempt = Some(now);
        let skip = if stale {
            // New window: forget old verdicts and re-validate from scratch
            HashSet::new()
        } else {
            state
                .entries
                .iter()
                .filter(|e| !e.fallback)
                .map(|e| e.address.clone())
                .chain(state.rejected.iter().cloned())
                .collect()
        };
        Some(RefreshPlan { stale, skip, now })
    }

    async fn refresh_if_needed(&self) {
        let Some(plan) = self.plan_refresh() else {
            return;
        };
        let _in_flight = InFlight(&self.state);

        let candidates = self.harvest(&plan.skip).await;
        let verdicts = join_all(candidates.iter().map(|c| self.backend.probe(c))).await;
        self.apply(plan, candidates.into_iter().zip(verdicts));
    }

    /// Download every listing and keep new candidates, up to the cap.
    async fn harvest(&self, skip: &HashSet<String>) -> Vec<String> {
        let listings = join_all(self.settings.sources.iter().map(|s| self.backend.fetch_listing(s))).await;

        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        for (source, listing) in self.settings.sources.iter().zip(listings) {
            match listing {
                Ok(listing) => {
                    let found = extract_candidates(&listing);
                    debug!(source = %source, count = found.len(), "proxy candidates harvested");
                    candidates.extend(found.into_iter().filter(|c| !skip.contains(c) && seen.insert(c.clone())));
                }
                Err(e) => warn!(source = %source, "proxy source failed: {}", e),
            }
        }
        candidates.truncate(self.settings.max_candidates);
        candidates
    }

    fn apply(&self, plan: RefreshPlan, verdicts: impl Iterator<Item = (String, bool)>) {
        let mut state = lock(&self.state);
        if plan.stale {
            state.entries.clear();
            state.rejected.clear();
            state.last_refresh = Some(plan.now);
        } else {
            state.entries.retain(|e| !e.fallback);
        }

        let mut accepted = 0;
        for (candidate, alive) in verdicts {
            if !alive {
                state.rejected.insert(candidate);
            } else if !state.entries.iter().any(|e| e.address == candidate) {
                accepted += 1;
                state.entries.push(ProxyEntry {
                    address: candidate,
                    validated_at: Some(plan.now),
                    fallback: false,
                });
            }
        }

        if state.entries.is_empty() {
            warn!("no live proxies found, using local fallback list");
            state.entries = LOCAL_FALLBACK_PROXIES
                .iter()
                .map(|addr| ProxyEntry {
                    address: addr.to_string(),
                    validated_at: None,
                    fallback: true,
                })
                .collect();
        }

        info!(
            accepted,
            total = state.entries.len(),
            rejected = state.rejected.len(),
            "proxy pool refreshed"
        );
    }
}
