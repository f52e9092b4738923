//! HTTP transports used by the fetch ladder.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, COOKIE, REFERER};
use reqwest::{redirect, Client};
use tracing::{debug, warn};

use crate::error::FetchError;
use crate::identity;

/// Everything a transport needs to issue one request.
#[derive(Debug, Clone)]
pub struct RequestProfile {
    pub user_agent: String,
    pub headers: Vec<(String, String)>,
    pub cookies: Vec<(String, String)>,
    /// Proxy URL such as `http://10.0.0.1:3128`
    pub proxy: Option<String>,
    pub timeout: Duration,
}

impl RequestProfile {
    /// A rotated browser identity with consent cookies and no proxy.
    pub fn browser_like(timeout: Duration) -> Self {
        let user_agent = identity::select_identity().to_string();
        Self {
            headers: identity::browser_headers(&user_agent),
            cookies: identity::consent_cookies(),
            user_agent,
            proxy: None,
            timeout,
        }
    }

    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy;
        self
    }

    fn header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in &self.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    map.insert(name, value);
                }
                _ => debug!(header = %name, "skipping unencodable header"),
            }
        }
        if let Some(cookie) = identity::cookie_header(&self.cookies) {
            if let Ok(value) = HeaderValue::from_str(&cookie) {
                map.insert(COOKIE, value);
            }
        }
        map
    }
}

/// A fetched response, body already decoded to text.
#[derive(Debug, Clone)]
pub struct PageResponse {
    pub status: u16,
    pub final_url: String,
    pub body: String,
}

impl PageResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// One way of issuing an HTTP GET.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;

    async fn get(&self, url: &str, profile: &RequestProfile) -> Result<PageResponse, FetchError>;
}

// ============================================================================
// Client construction
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct ClientOptions {
    connect_timeout: Duration,
    cookie_store: bool,
}

fn build_client(options: ClientOptions, proxy: Option<&str>) -> Result<Client, FetchError> {
    let mut builder = Client::builder()
        .connect_timeout(options.connect_timeout)
        .redirect(redirect::Policy::limited(10))
        .danger_accept_invalid_certs(true)
        .cookie_store(options.cookie_store)
        .pool_max_idle_per_host(8);

    if let Some(proxy) = proxy {
        let proxy = reqwest::Proxy::all(proxy)
            .map_err(|e| FetchError::InvalidUrl(format!("proxy {}: {}", proxy, e)))?;
        builder = builder.proxy(proxy);
    }

    Ok(builder.build()?)
}

/// Pooled clients keyed by proxy; the direct client is created eagerly.
struct ClientCache {
    options: ClientOptions,
    direct: Client,
    proxied: Mutex<HashMap<String, Client>>,
}

impl ClientCache {
    fn new(options: ClientOptions) -> Result<Self, FetchError> {
        Ok(Self {
            direct: build_client(options, None)?,
            options,
            proxied: Mutex::new(HashMap::new()),
        })
    }

    fn client_for(&self, proxy: Option<&str>) -> Result<Client, FetchError> {
        let Some(proxy) = proxy else {
            return Ok(self.direct.clone());
        };

        let mut proxied = self
            .proxied
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(client) = proxied.get(proxy) {
            return Ok(client.clone());
        }
        let client = build_client(self.options, Some(proxy))?;
        proxied.insert(proxy.to_string(), client.clone());
        Ok(client)
    }
}

async fn send(
    client: &Client,
    url: &str,
    headers: HeaderMap,
    timeout: Duration,
) -> Result<PageResponse, FetchError> {
    let resp = client
        .get(url)
        .headers(headers)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| FetchError::from_reqwest(url, e))?;

    let status = resp.status().as_u16();
    let final_url = resp.url().to_string();
    let body = resp
        .text()
        .await
        .map_err(|e| FetchError::from_reqwest(url, e))?;

    Ok(PageResponse {
        status,
        final_url,
        body,
    })
}

// ============================================================================
// Plain client
// ============================================================================

/// Connection-pooled reqwest client: redirects followed, certificate
/// validation relaxed, headers and cookies taken from the profile.
pub struct HttpTransport {
    clients: ClientCache,
}

impl HttpTransport {
    pub fn new(connect_timeout: Duration) -> Result<Self, FetchError> {
        Ok(Self {
            clients: ClientCache::new(ClientOptions {
                connect_timeout,
                cookie_store: false,
            })?,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn get(&self, url: &str, profile: &RequestProfile) -> Result<PageResponse, FetchError> {
        let client = self.clients.client_for(profile.proxy.as_deref())?;
        send(&client, url, profile.header_map(), profile.timeout).await
    }
}

// ============================================================================
// Bot-bypass client
// ============================================================================

/// Browser-mimicking client: persistent cookie jar, a fresh identity per
/// request with matching client hints, and a search-engine referer.
pub struct StealthTransport {
    clients: ClientCache,
}

impl StealthTransport {
    pub fn new(connect_timeout: Duration) -> Result<Self, FetchError> {
        Ok(Self {
            clients: ClientCache::new(ClientOptions {
                connect_timeout,
                cookie_store: true,
            })?,
        })
    }
}

#[async_trait]
impl Transport for StealthTransport {
    fn name(&self) -> &'static str {
        "stealth"
    }

    async fn get(&self, url: &str, profile: &RequestProfile) -> Result<PageResponse, FetchError> {
        let client = self.clients.client_for(profile.proxy.as_deref())?;

        let user_agent = identity::select_identity();
        let mut stealth = profile.clone();
        stealth.user_agent = user_agent.to_string();
        stealth.headers = identity::browser_headers(user_agent);

        let mut headers = stealth.header_map();
        headers.insert(REFERER, HeaderValue::from_static("https://www.google.com/"));
        headers.insert(
            HeaderName::from_static("sec-fetch-site"),
            HeaderValue::from_static("cross-site"),
        );

        let response = send(&client, url, headers, profile.timeout).await?;
        if response.status == 403 || response.status == 503 {
            warn!(url = %url, status = response.status, "bypass client was refused");
        }
        Ok(response)
    }
}
