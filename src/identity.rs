//! Client identity rotation: user agents, browser header sets and cookies.

use once_cell::sync::Lazy;
use rand::seq::SliceRandom;

const FALLBACK_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

static USER_AGENTS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        // Desktop Chrome / Edge
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36 Edg/124.0.2478.51",
        // Desktop Firefox
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:125.0) Gecko/20100101 Firefox/125.0",
        "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:124.0) Gecko/20100101 Firefox/124.0",
        // Desktop Safari
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
        // Mobile
        "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Mobile/15E148 Safari/604.1",
        "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.6367.82 Mobile Safari/537.36",
        "Mozilla/5.0 (Linux; Android 13; SM-S911B) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Mobile Safari/537.36",
    ]
});

/// Pick a user agent at random from the curated list.
pub fn select_identity() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(FALLBACK_USER_AGENT)
}

/// All user agents in the rotation.
pub fn user_agents() -> &'static [&'static str] {
    &USER_AGENTS
}

fn is_chromium(user_agent: &str) -> bool {
    user_agent.contains("Chrome/") && !user_agent.contains("Firefox/")
}

fn is_mobile(user_agent: &str) -> bool {
    user_agent.contains("Mobile")
}

/// A realistic browser header set matching the given user agent.
///
/// `Accept-Encoding` is left to the HTTP client so that responses are
/// transparently decompressed.
pub fn browser_headers(user_agent: &str) -> Vec<(String, String)> {
    let mut headers = vec![
        ("User-Agent", user_agent.to_string()),
        (
            "Accept",
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8"
                .to_string(),
        ),
        ("Accept-Language", "en-US,en;q=0.9".to_string()),
        ("DNT", "1".to_string()),
        ("Upgrade-Insecure-Requests", "1".to_string()),
        ("Sec-Fetch-Dest", "document".to_string()),
        ("Sec-Fetch-Mode", "navigate".to_string()),
        ("Sec-Fetch-Site", "none".to_string()),
        ("Sec-Fetch-User", "?1".to_string()),
        ("Cache-Control", "max-age=0".to_string()),
    ];

    // Client hints are only sent by Chromium browsers
    if is_chromium(user_agent) {
        headers.push((
            "Sec-CH-UA",
            r#""Chromium";v="124", "Google Chrome";v="124", "Not-A.Brand";v="99""#.to_string(),
        ));
        headers.push((
            "Sec-CH-UA-Mobile",
            if is_mobile(user_agent) { "?1" } else { "?0" }.to_string(),
        ));
        let platform = if user_agent.contains("Android") {
            "\"Android\""
        } else if user_agent.contains("Macintosh") {
            "\"macOS\""
        } else if user_agent.contains("Linux") {
            "\"Linux\""
        } else {
            "\"Windows\""
        };
        headers.push(("Sec-CH-UA-Platform", platform.to_string()));
    }

    headers
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}

/// Cookies sent with every page request.
///
/// `CONSENT`/`SOCS` pre-accept Google's consent interstitial, which
/// otherwise replaces cached pages and result pages with a cookie wall.
pub fn consent_cookies() -> Vec<(String, String)> {
    vec![
        (
            "CONSENT".to_string(),
            "YES+cb.20240101-00-p0.en+FX+410".to_string(),
        ),
        ("SOCS".to_string(), "CAESEwgDEgk0ODE3Nzk3MjQaAmVuIAEaBgiA_LyaBg".to_string()),
        ("euconsent-v2".to_string(), "accepted".to_string()),
    ]
}

/// Render cookies as a single `Cookie` header value.
pub fn cookie_header(cookies: &[(String, String)]) -> Option<String> {
    if cookies.is_empty() {
        return None;
    }
    Some(
        cookies
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join("; "),
    )
}
