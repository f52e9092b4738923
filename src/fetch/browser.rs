//! Headless Chrome transport for pages that refuse plain HTTP clients.

use std::ffi::OsStr;
use std::time::Duration;

use async_trait::async_trait;
use headless_chrome::protocol::cdp::Page::AddScriptToEvaluateOnNewDocument;
use headless_chrome::{Browser, LaunchOptions};
use tracing::{debug, warn};

use super::transport::{PageResponse, RequestProfile, Transport};
use crate::error::FetchError;

// Patches the usual automation tells before any page script runs.
const STEALTH_SCRIPT: &str = r#"
    Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
    Object.defineProperty(navigator, 'hardwareConcurrency', { get: () => 4 });
    Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });
    const getParameter = WebGLRenderingContext.prototype.getParameter;
    WebGLRenderingContext.prototype.getParameter = function(parameter) {
        if (parameter === 37445) return 'Intel Inc.';
        if (parameter === 37446) return 'Intel Iris OpenGL Engine';
        return getParameter.apply(this, [parameter]);
    };
    window.chrome = { runtime: {}, loadTimes: function() {}, csi: function() {}, app: {} };
    ['RTCPeerConnection', 'webkitRTCPeerConnection'].forEach(name => {
        if (window[name]) window[name] = undefined;
    });
"#;

/// Drives a fresh headless Chrome per request on the blocking pool.
#[derive(Debug, Clone)]
pub struct BrowserTransport {
    settle: Duration,
}

impl BrowserTransport {
    pub fn new() -> Self {
        Self {
            settle: Duration::from_secs(2),
        }
    }

    /// Time to let client-side rendering finish after `body` appears.
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }
}

impl Default for BrowserTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn render(
    url: &str,
    profile: &RequestProfile,
    settle: Duration,
) -> Result<PageResponse, anyhow::Error> {
    let ua_arg = format!("--user-agent={}", profile.user_agent);
    let proxy_arg = profile
        .proxy
        .as_ref()
        .map(|p| format!("--proxy-server={}", p));

    let mut args = vec![
        OsStr::new("--disable-blink-features=AutomationControlled"),
        OsStr::new("--no-sandbox"),
        OsStr::new("--disable-dev-shm-usage"),
        OsStr::new("--disable-infobars"),
        OsStr::new("--ignore-certificate-errors"),
        OsStr::new(&ua_arg),
    ];
    if let Some(proxy_arg) = &proxy_arg {
        args.push(OsStr::new(proxy_arg));
    }

    let browser = Browser::new(LaunchOptions {
        headless: true,
        window_size: Some((1920, 1080)),
        idle_browser_timeout: profile.timeout + settle,
        args,
        ..Default::default()
    })?;

    let tab = browser.new_tab()?;
    tab.set_default_timeout(profile.timeout);
    tab.call_method(AddScriptToEvaluateOnNewDocument {
        source: STEALTH_SCRIPT.to_string(),
        world_name: None,
        include_command_line_api: None,
        run_immediately: None,
    })?;

    tab.navigate_to(url)?;
    // Ads and trackers often keep the load event from firing
    if let Err(e) = tab.wait_for_element_with_custom_timeout("body", profile.timeout) {
        warn!(url = %url, "body wait timed out, reading whatever rendered: {}", e);
    }
    std::thread::sleep(settle);

    let body = tab.get_content()?;
    let final_url = tab.get_url();
    debug!(url = %url, bytes = body.len(), "browser rendered page");

    Ok(PageResponse {
        status: if body.trim().is_empty() { 204 } else { 200 },
        final_url,
        body,
    })
}

#[async_trait]
impl Transport for BrowserTransport {
    fn name(&self) -> &'static str {
        "browser"
    }

    async fn get(&self, url: &str, profile: &RequestProfile) -> Result<PageResponse, FetchError> {
        let url = url.to_string();
        let profile = profile.clone();
        let settle = self.settle;

        tokio::task::spawn_blocking(move || render(&url, &profile, settle))
            .await
            .map_err(|e| FetchError::Browser(e.to_string()))?
            .map_err(|e| FetchError::Browser(e.to_string()))
    }
}
