//! Single-URL retrieval as a strict escalation ladder:
//! bypass client (sometimes) -> plain client -> bypass client (if not yet
//! tried) -> archive mirrors, followed by a paywall/challenge check that
//! may swap in a clean archived copy.

#[cfg(feature = "browser")]
pub mod browser;
pub mod policy;
pub mod transport;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use rand::Rng;
use serde::Serialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::FetchError;
use crate::proxy::ProxyPool;
use policy::{archive_url, ContentPolicy, PaywallDetector, PolicyVerdict};
pub use transport::{HttpTransport, PageResponse, RequestProfile, StealthTransport, Transport};

/// Anything that can turn a URL into page content.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

/// Tunables of the fetch ladder.
#[derive(Debug, Clone)]
pub struct FetchPolicy {
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub bypass_probability: f64,
    pub batch_concurrency: usize,
    pub batch_timeout: Option<Duration>,
    pub paywall_indicators: Vec<String>,
    pub archive_mirrors: Vec<String>,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            min_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(3000),
            bypass_probability: 0.3,
            batch_concurrency: 8,
            batch_timeout: None,
            paywall_indicators: policy::DEFAULT_PAYWALL_INDICATORS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            archive_mirrors: policy::DEFAULT_ARCHIVE_MIRRORS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl FetchPolicy {
    /// No pacing delay; for tests and trusted internal targets.
    pub fn without_delay(mut self) -> Self {
        self.min_delay = Duration::ZERO;
        self.max_delay = Duration::ZERO;
        self
    }

    fn pick_delay(&self) -> Duration {
        if self.max_delay <= self.min_delay {
            return self.min_delay;
        }
        let min = self.min_delay.as_millis() as u64;
        let max = self.max_delay.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }

    fn roll_bypass(&self) -> bool {
        if self.bypass_probability.is_nan() {
            return false;
        }
        let p = self.bypass_probability.clamp(0.0, 1.0);
        rand::thread_rng().gen_bool(p)
    }
}

/// Which rung of the ladder produced the returned content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FetchStage {
    Bypass,
    Direct,
    Archive { mirror: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchedPage {
    pub url: String,
    pub final_url: String,
    pub content: String,
    pub stage: FetchStage,
    /// Verdict on the returned content
    pub verdict: PolicyVerdict,
}

/// The fetch orchestrator.
pub struct Fetcher {
    primary: Arc<dyn Transport>,
    bypass: Option<Arc<dyn Transport>>,
    proxies: Option<Arc<ProxyPool>>,
    policy: FetchPolicy,
    content_policy: ContentPolicy,
}

impl Fetcher {
    pub fn new(primary: Arc<dyn Transport>, policy: FetchPolicy) -> Self {
        let content_policy = ContentPolicy::new(PaywallDetector::new(&policy.paywall_indicators));
        Self {
            primary,
            bypass: None,
            proxies: None,
            policy,
            content_policy,
        }
    }

    /// Real reqwest transports: plain client plus the stealth bypass client.
    pub fn http(policy: FetchPolicy) -> Result<Self, FetchError> {
        let primary = Arc::new(HttpTransport::new(policy.connect_timeout)?);
        let bypass = Arc::new(StealthTransport::new(policy.connect_timeout)?);
        Ok(Self::new(primary, policy).with_bypass(bypass))
    }

    pub fn with_bypass(mut self, bypass: Arc<dyn Transport>) -> Self {
        self.bypass = Some(bypass);
        self
    }

    pub fn with_proxies(mut self, pool: Arc<ProxyPool>) -> Self {
        self.proxies = Some(pool);
        self
    }

    pub fn policy(&self) -> &FetchPolicy {
        &self.policy
    }

    async fn attempt(
        &self,
        transport: &dyn Transport,
        url: &str,
        profile: &RequestProfile,
    ) -> Option<PageResponse> {
        let outcome = transport.get(url, profile).await.and_then(|resp| {
            if !resp.is_success() {
                Err(FetchError::Status {
                    url: url.to_string(),
                    status: resp.status,
                })
            } else if resp.body.trim().is_empty() {
                Err(FetchError::EmptyBody { url: url.to_string() })
            } else {
                Ok(resp)
            }
        });
        match outcome {
            Ok(resp) => Some(resp),
            Err(e) => {
                debug!(transport = transport.name(), url = %url, "stage gave up: {}", e);
                None
            }
        }
    }

    /// Try each archive mirror in order; the first usable copy for which
    /// `accept` holds wins.
    async fn from_archives<F>(
        &self,
        url: &str,
        profile: &RequestProfile,
        accept: F,
    ) -> Option<(String, PageResponse)>
    where
        F: Fn(&PageResponse) -> bool,
    {
        for mirror in &self.policy.archive_mirrors {
            let target = archive_url(mirror, url);
            if let Some(resp) = self.attempt(self.primary.as_ref(), &target, profile).await {
                if accept(&resp) {
                    return Some((mirror.clone(), resp));
                }
                debug!(mirror = %mirror, url = %url, "archived copy rejected");
            }
        }
        None
    }

    /// Run the whole ladder and report which stage produced the content.
    pub async fn fetch_page(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl(format!("{}: {}", url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchError::InvalidUrl(url.to_string()));
        }

        // 1-2. identity, cookies and (maybe) a proxy
        let proxy = match &self.proxies {
            Some(pool) => pool.select_proxy().await,
            None => None,
        };
        let plain = RequestProfile::browser_like(self.policy.timeout);
        let profile = plain.clone().with_proxy(proxy);

        // 3. pacing
        let delay = self.policy.pick_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut fetched: Option<(FetchStage, PageResponse)> = None;

        // 4. bypass client first, sometimes
        let bypass_first = self.bypass.is_some() && self.policy.roll_bypass();
        if bypass_first {
            if let Some(bypass) = &self.bypass {
                fetched = self
                    .attempt(bypass.as_ref(), url, &profile)
                    .await
                    .map(|r| (FetchStage::Bypass, r));
            }
        }

        // 5. plain client, then the bypass client if it was not tried yet
        if fetched.is_none() {
            fetched = self
                .attempt(self.primary.as_ref(), url, &profile)
                .await
                .map(|r| (FetchStage::Direct, r));
        }
        if fetched.is_none() && !bypass_first {
            if let Some(bypass) = &self.bypass {
                fetched = self
                    .attempt(bypass.as_ref(), url, &profile)
                    .await
                    .map(|r| (FetchStage::Bypass, r));
            }
        }

        // 6. archives, plain client without proxy
        if fetched.is_none() {
            fetched = self
                .from_archives(url, &plain, |_| true)
                .await
                .map(|(mirror, r)| (FetchStage::Archive { mirror }, r));
        }

        // 8. nothing worked
        let Some((stage, resp)) = fetched else {
            warn!(url = %url, "every fetch stage failed");
            return Err(FetchError::Exhausted {
                url: url.to_string(),
            });
        };

        // 7. policy check; a clean archived copy replaces a blocked one
        let verdict = self.content_policy.check(&resp.body);
        if verdict.is_clean() {
            info!(url = %url, stage = ?stage, bytes = resp.body.len(), "fetched");
            return Ok(FetchedPage {
                url: url.to_string(),
                final_url: resp.final_url,
                content: resp.body,
                stage,
                verdict,
            });
        }

        info!(url = %url, verdict = ?verdict, "content blocked, trying archives");
        let clean_copy = self
            .from_archives(url, &plain, |r| self.content_policy.check(&r.body).is_clean())
            .await;

        Ok(match clean_copy {
            Some((mirror, archived)) => {
                info!(url = %url, mirror = %mirror, "blocked content replaced by archive copy");
                FetchedPage {
                    url: url.to_string(),
                    final_url: archived.final_url,
                    content: archived.body,
                    stage: FetchStage::Archive { mirror },
                    verdict: PolicyVerdict::Clean,
                }
            }
            None => {
                warn!(url = %url, verdict = ?verdict, "no clean archive copy, returning blocked content");
                FetchedPage {
                    url: url.to_string(),
                    final_url: resp.final_url,
                    content: resp.body,
                    stage,
                    verdict,
                }
            }
        })
    }

    /// Fetch many URLs with bounded concurrency. Results keep input order
    /// and failures stay per item; only the optional whole-batch timeout
    /// fails the call as a whole.
    pub async fn batch_fetch(
        &self,
        urls: &[String],
    ) -> Result<Vec<Result<String, FetchError>>, FetchError> {
        let concurrency = self.policy.batch_concurrency.max(1);
        let all = stream::iter(urls.iter().cloned())
            .map(|url| async move { self.fetch(&url).await })
            .buffered(concurrency)
            .collect::<Vec<_>>();

        match self.policy.batch_timeout {
            Some(after) => tokio::time::timeout(after, all).await.map_err(|_| {
                warn!(count = urls.len(), ?after, "batch timed out");
                FetchError::BatchTimeout {
                    count: urls.len(),
                    after,
                }
            }),
            None => Ok(all.await),
        }
    }
}

#[async_trait]
impl PageFetcher for Fetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        self.fetch_page(url).await.map(|page| page.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Canned responses by URL; unknown URLs fail.
    #[derive(Default)]
    struct ScriptedTransport {
        name: &'static str,
        responses: HashMap<String, (u16, String)>,
        timeouts: Vec<String>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        fn named(name: &'static str) -> Self {
            Self {
                name,
                ..Self::default()
            }
        }

        fn respond(mut self, url: &str, status: u16, body: &str) -> Self {
            self.responses.insert(url.to_string(), (status, body.to_string()));
            self
        }

        fn time_out(mut self, url: &str) -> Self {
            self.timeouts.push(url.to_string());
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn get(&self, url: &str, _profile: &RequestProfile) -> Result<PageResponse, FetchError> {
            self.calls.lock().unwrap().push(url.to_string());
            if self.timeouts.iter().any(|u| u == url) {
                return Err(FetchError::Timeout { url: url.to_string() });
            }
            match self.responses.get(url) {
                Some((status, body)) => Ok(PageResponse {
                    status: *status,
                    final_url: url.to_string(),
                    body: body.clone(),
                }),
                None => Err(FetchError::InvalidUrl(url.to_string())),
            }
        }
    }

    const PAGE: &str = "https://news.example/story";
    const MIRROR_A: &str = "https://mirror-a.example/?u=";
    const MIRROR_B: &str = "https://mirror-b.example/?u=";

    fn policy(bypass_probability: f64) -> FetchPolicy {
        FetchPolicy {
            bypass_probability,
            archive_mirrors: vec![MIRROR_A.to_string(), MIRROR_B.to_string()],
            ..FetchPolicy::default()
        }
        .without_delay()
    }

    fn mirror(prefix: &str) -> String {
        format!("{}{}", prefix, PAGE)
    }

    #[tokio::test]
    async fn clean_direct_content_is_returned() {
        let primary = Arc::new(ScriptedTransport::named("primary").respond(PAGE, 200, "open article"));
        let fetcher = Fetcher::new(primary.clone(), policy(0.0));
        let page = fetcher.fetch_page(PAGE).await.unwrap();
        assert_eq!(page.content, "open article");
        assert_eq!(page.stage, FetchStage::Direct);
        assert_eq!(primary.calls(), vec![PAGE.to_string()]);
    }

    #[tokio::test]
    async fn bypass_is_tried_first_when_rolled() {
        let primary = Arc::new(ScriptedTransport::named("primary").respond(PAGE, 200, "direct"));
        let bypass = Arc::new(ScriptedTransport::named("bypass").respond(PAGE, 200, "via bypass"));
        let fetcher = Fetcher::new(primary.clone(), policy(1.0)).with_bypass(bypass);
        assert_eq!(fetcher.fetch(PAGE).await.unwrap(), "via bypass");
        assert!(primary.calls().is_empty());
    }

    #[tokio::test]
    async fn archives_are_the_last_resort() {
        let primary = Arc::new(
            ScriptedTransport::named("primary")
                .respond(PAGE, 503, "unavailable")
                .respond(&mirror(MIRROR_A), 404, "")
                .respond(&mirror(MIRROR_B), 200, "archived article"),
        );
        let fetcher = Fetcher::new(primary, policy(0.0));
        let page = fetcher.fetch_page(PAGE).await.unwrap();
        assert_eq!(page.content, "archived article");
        assert_eq!(
            page.stage,
            FetchStage::Archive {
                mirror: MIRROR_B.to_string()
            }
        );
    }

    #[tokio::test]
    async fn paywalled_content_is_replaced_by_first_clean_archive() {
        let primary = Arc::new(
            ScriptedTransport::named("primary")
                .respond(PAGE, 200, "Subscribe to continue")
                .respond(&mirror(MIRROR_A), 200, "still a paywall here")
                .respond(&mirror(MIRROR_B), 200, "the full article"),
        );
        let fetcher = Fetcher::new(primary, policy(0.0));
        let page = fetcher.fetch_page(PAGE).await.unwrap();
        assert_eq!(page.content, "the full article");
        assert!(page.verdict.is_clean());
    }

    #[tokio::test]
    async fn blocked_content_survives_when_no_archive_is_clean() {
        let primary = Arc::new(ScriptedTransport::named("primary").respond(PAGE, 200, "paywall"));
        let fetcher = Fetcher::new(primary, policy(0.0));
        let page = fetcher.fetch_page(PAGE).await.unwrap();
        assert_eq!(page.content, "paywall");
        assert_eq!(page.verdict, PolicyVerdict::Paywalled);
    }

    #[tokio::test]
    async fn primary_timeout_falls_through_to_bypass() {
        let primary = Arc::new(ScriptedTransport::named("primary").time_out(PAGE));
        let bypass = Arc::new(ScriptedTransport::named("bypass").respond(PAGE, 200, "bypassed"));
        let fetcher = Fetcher::new(primary, policy(0.0)).with_bypass(bypass.clone());
        assert_eq!(fetcher.fetch(PAGE).await.unwrap(), "bypassed");
        assert_eq!(bypass.calls().len(), 1);
    }

    #[tokio::test]
    async fn exhaustion_names_the_url() {
        let primary = Arc::new(ScriptedTransport::named("primary"));
        let fetcher = Fetcher::new(primary, policy(0.0));
        let err = fetcher.fetch(PAGE).await.unwrap_err();
        assert!(matches!(err, FetchError::Exhausted { ref url } if url == PAGE));
        assert!(err.to_string().contains(PAGE));
    }

    #[tokio::test]
    async fn invalid_urls_are_rejected_up_front() {
        let primary = Arc::new(ScriptedTransport::named("primary"));
        let fetcher = Fetcher::new(primary.clone(), policy(0.0));
        assert!(matches!(
            fetcher.fetch("ftp://files.example/x").await,
            Err(FetchError::InvalidUrl(_))
        ));
        assert!(primary.calls().is_empty());
    }

    #[tokio::test]
    async fn batch_keeps_input_order_and_per_item_errors() {
        let primary = Arc::new(
            ScriptedTransport::named("primary")
                .respond("https://a.example/", 200, "A")
                .respond("https://c.example/", 200, "C"),
        );
        let fetcher = Fetcher::new(primary, policy(0.0));
        let urls = vec![
            "https://a.example/".to_string(),
            "https://b.example/".to_string(),
            "https://c.example/".to_string(),
        ];
        let results = fetcher.batch_fetch(&urls).await.unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_deref().ok(), Some("A"));
        assert!(results[1].is_err());
        assert_eq!(results[2].as_deref().ok(), Some("C"));
    }

    /// Answers every URL after `delay`.
    struct SlowTransport {
        delay: Duration,
    }

    #[async_trait]
    impl Transport for SlowTransport {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn get(&self, url: &str, _profile: &RequestProfile) -> Result<PageResponse, FetchError> {
            tokio::time::sleep(self.delay).await;
            Ok(PageResponse {
                status: 200,
                final_url: url.to_string(),
                body: "eventually".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn batch_timeout_fails_the_whole_group() {
        let slow = Arc::new(SlowTransport {
            delay: Duration::from_secs(5),
        });
        let policy = FetchPolicy {
            batch_timeout: Some(Duration::from_millis(50)),
            ..policy(0.0)
        };
        let fetcher = Fetcher::new(slow, policy);
        let urls = vec!["https://a.example/".to_string(), "https://b.example/".to_string()];

        let started = std::time::Instant::now();
        let err = fetcher.batch_fetch(&urls).await.unwrap_err();
        assert!(matches!(err, FetchError::BatchTimeout { count: 2, .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn batch_within_timeout_succeeds() {
        let slow = Arc::new(SlowTransport {
            delay: Duration::from_millis(5),
        });
        let policy = FetchPolicy {
            batch_timeout: Some(Duration::from_secs(5)),
            ..policy(0.0)
        };
        let fetcher = Fetcher::new(slow, policy);
        let results = fetcher.batch_fetch(&["https://a.example/".to_string()]).await.unwrap();
        assert_eq!(results[0].as_deref().ok(), Some("eventually"));
    }

    #[tokio::test]
    async fn blank_body_escalates_to_archives() {
        let primary = Arc::new(
            ScriptedTransport::named("primary")
                .respond(PAGE, 200, "   \n ")
                .respond(&mirror(MIRROR_A), 200, "archived article"),
        );
        let fetcher = Fetcher::new(primary, policy(0.0));
        let page = fetcher.fetch_page(PAGE).await.unwrap();
        assert_eq!(page.content, "archived article");
        assert_eq!(
            page.stage,
            FetchStage::Archive {
                mirror: MIRROR_A.to_string()
            }
        );
    }

    #[tokio::test]
    async fn nan_bypass_probability_never_rolls() {
        assert!(!policy(f64::NAN).roll_bypass());

        let primary = Arc::new(ScriptedTransport::named("primary").respond(PAGE, 200, "direct"));
        let bypass = Arc::new(ScriptedTransport::named("bypass").respond(PAGE, 200, "via bypass"));
        let fetcher = Fetcher::new(primary, policy(f64::NAN)).with_bypass(bypass.clone());
        assert_eq!(fetcher.fetch(PAGE).await.unwrap(), "direct");
        assert!(bypass.calls().is_empty());
    }

    #[test]
    fn delay_stays_within_bounds() {
        let policy = FetchPolicy {
            min_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(20),
            ..FetchPolicy::default()
        };
        for _ in 0..50 {
            let d = policy.pick_delay();
            assert!(d >= Duration::from_millis(10) && d <= Duration::from_millis(20));
        }
        assert_eq!(FetchPolicy::default().without_delay().pick_delay(), Duration::ZERO);
    }
}
