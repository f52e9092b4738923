//! Content-policy checks run on fetched pages: paywalls and bot challenges.

use serde::Serialize;

/// Indicators used when no configuration overrides them.
pub const DEFAULT_PAYWALL_INDICATORS: &[&str] = &[
    "subscribe",
    "paywall",
    "sign in to read",
    "become a member",
    "login to continue",
    "subscribers only",
    "subscriber-only",
    "for subscribers",
    "premium content",
    "exclusive content",
    "members only",
    "create a free account to continue",
    "register to continue reading",
    "to continue reading",
    "you have reached your free article limit",
    "free articles remaining",
    "already a subscriber",
    "unlock this article",
    "start your free trial",
];

/// Archive and cache services, used by prefixing the target URL.
pub const DEFAULT_ARCHIVE_MIRRORS: &[&str] = &[
    "https://archive.is/?url=",
    "https://12ft.io/proxy?q=",
    "https://webcache.googleusercontent.com/search?q=cache:",
];

/// Markers of interstitial pages only. Captcha widget names alone are not
/// enough: ordinary pages embed them in contact and login forms.
const CHALLENGE_PATTERNS: &[&str] = &[
    "prove you're not a robot",
    "prove your humanity",
    "verify you are human",
    "our systems have detected unusual traffic",
    "unusual traffic from your computer network",
    "checking your browser before accessing",
    "checking if the site connection is secure",
    "/cdn-cgi/challenge-platform/",
    "cf-challenge-running",
    "captcha-delivery.com",
    "px-captcha",
    "please enable javascript and cookies to continue",
];

/// Outcome of the policy checks on one page body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyVerdict {
    Clean,
    Paywalled,
    Challenge,
}

impl PolicyVerdict {
    pub fn is_clean(self) -> bool {
        matches!(self, PolicyVerdict::Clean)
    }
}

/// Case-insensitive substring match against a configurable indicator list.
#[derive(Debug, Clone)]
pub struct PaywallDetector {
    indicators: Vec<String>,
}

impl PaywallDetector {
    pub fn new<I, S>(indicators: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let indicators = indicators
            .into_iter()
            .map(|s| s.as_ref().trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        Self { indicators }
    }

    pub fn is_paywalled(&self, content: &str) -> bool {
        let lowered = content.to_lowercase();
        self.indicators.iter().any(|ind| lowered.contains(ind.as_str()))
    }

    pub fn indicators(&self) -> &[String] {
        &self.indicators
    }
}

impl Default for PaywallDetector {
    fn default() -> Self {
        Self::new(DEFAULT_PAYWALL_INDICATORS)
    }
}

/// Recognises captcha and interstitial pages served to suspected bots.
#[derive(Debug, Clone, Default)]
pub struct ChallengeDetector;

impl ChallengeDetector {
    pub fn is_challenge(&self, content: &str) -> bool {
        let lowered = content.to_lowercase();
        CHALLENGE_PATTERNS.iter().any(|p| lowered.contains(p))
    }
}

/// Both detectors, applied in one pass.
#[derive(Debug, Clone, Default)]
pub struct ContentPolicy {
    paywall: PaywallDetector,
    challenge: ChallengeDetector,
}

impl ContentPolicy {
    pub fn new(paywall: PaywallDetector) -> Self {
        Self {
            paywall,
            challenge: ChallengeDetector,
        }
    }

    pub fn check(&self, content: &str) -> PolicyVerdict {
        if self.challenge.is_challenge(content) {
            PolicyVerdict::Challenge
        } else if self.paywall.is_paywalled(content) {
            PolicyVerdict::Paywalled
        } else {
            PolicyVerdict::Clean
        }
    }
}

/// Build the archive URL for `url` behind a mirror prefix.
pub fn archive_url(mirror: &str, url: &str) -> String {
    format!("{}{}", mirror, url)
}
