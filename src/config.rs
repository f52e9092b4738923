//! Runtime configuration read from the environment (and `.env`).

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::fetch::policy::{DEFAULT_ARCHIVE_MIRRORS, DEFAULT_PAYWALL_INDICATORS};
use crate::fetch::FetchPolicy;
use crate::proxy::ProxyPoolSettings;

#[derive(Debug, Clone)]
pub struct Config {
    /// Port the HTTP surface binds to
    pub port: u16,
    /// Whole-request timeout for every outbound fetch
    pub fetch_timeout: Duration,
    pub connect_timeout: Duration,
    /// Bounds of the randomized delay applied before each fetch
    pub min_delay: Duration,
    pub max_delay: Duration,
    /// Probability of trying the bot-bypass client before the plain one
    pub bypass_probability: f64,
    /// Maximum in-flight fetches for batch retrieval
    pub batch_concurrency: usize,
    /// Optional timeout covering a whole batch
    pub batch_timeout: Option<Duration>,
    pub use_proxies: bool,
    pub proxy_refresh: Duration,
    pub proxy_min_count: usize,
    pub paywall_indicators: Vec<String>,
    pub archive_mirrors: Vec<String>,
    /// Use headless Chrome as the bypass transport (`browser` feature)
    pub use_browser: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            fetch_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            min_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(3000),
            bypass_probability: 0.3,
            batch_concurrency: 8,
            batch_timeout: None,
            use_proxies: false,
            proxy_refresh: Duration::from_secs(1800),
            proxy_min_count: 5,
            paywall_indicators: DEFAULT_PAYWALL_INDICATORS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            archive_mirrors: DEFAULT_ARCHIVE_MIRRORS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            use_browser: false,
        }
    }
}

impl Config {
    /// Load `.env` (if present) and read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build a config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut paywall_indicators = defaults.paywall_indicators.clone();
        if let Some(extra) = get("PAYWALL_INDICATORS") {
            for indicator in split_list(&extra) {
                let indicator = indicator.to_lowercase();
                if !paywall_indicators.contains(&indicator) {
                    paywall_indicators.push(indicator);
                }
            }
        }

        let archive_mirrors = match get("ARCHIVE_MIRRORS") {
            Some(list) => split_list(&list),
            None => defaults.archive_mirrors.clone(),
        };

        let config = Self {
            port: parse_or("PORT", get("PORT"), defaults.port)?,
            fetch_timeout: Duration::from_secs(parse_or(
                "FETCH_TIMEOUT_SECS",
                get("FETCH_TIMEOUT_SECS"),
                defaults.fetch_timeout.as_secs(),
            )?),
            connect_timeout: Duration::from_secs(parse_or(
                "CONNECT_TIMEOUT_SECS",
                get("CONNECT_TIMEOUT_SECS"),
                defaults.connect_timeout.as_secs(),
            )?),
            min_delay: Duration::from_millis(parse_or(
                "FETCH_MIN_DELAY_MS",
                get("FETCH_MIN_DELAY_MS"),
                defaults.min_delay.as_millis() as u64,
            )?),
            max_delay: Duration::from_millis(parse_or(
                "FETCH_MAX_DELAY_MS",
                get("FETCH_MAX_DELAY_MS"),
                defaults.max_delay.as_millis() as u64,
            )?),
            bypass_probability: parse_or(
                "BYPASS_PROBABILITY",
                get("BYPASS_PROBABILITY"),
                defaults.bypass_probability,
            )?,
            batch_concurrency: parse_or(
                "BATCH_CONCURRENCY",
                get("BATCH_CONCURRENCY"),
                defaults.batch_concurrency,
            )?,
            batch_timeout: match get("BATCH_TIMEOUT_SECS") {
                Some(raw) => Some(Duration::from_secs(parse("BATCH_TIMEOUT_SECS", &raw)?)),
                None => None,
            },
            use_proxies: parse_flag("USE_PROXIES", get("USE_PROXIES"), defaults.use_proxies)?,
            proxy_refresh: Duration::from_secs(parse_or(
                "PROXY_REFRESH_SECS",
                get("PROXY_REFRESH_SECS"),
                defaults.proxy_refresh.as_secs(),
            )?),
            proxy_min_count: parse_or(
                "PROXY_MIN_COUNT",
                get("PROXY_MIN_COUNT"),
                defaults.proxy_min_count,
            )?,
            paywall_indicators,
            archive_mirrors,
            use_browser: parse_flag("USE_BROWSER", get("USE_BROWSER"), defaults.use_browser)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Check value ranges that parsing alone cannot catch.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.bypass_probability) {
            return Err(ConfigError::OutOfRange {
                name: "BYPASS_PROBABILITY".to_string(),
                min: 0.0,
                max: 1.0,
            });
        }
        if self.batch_concurrency == 0 {
            return Err(ConfigError::OutOfRange {
                name: "BATCH_CONCURRENCY".to_string(),
                min: 1.0,
                max: f64::from(u32::MAX),
            });
        }
        if self.min_delay > self.max_delay {
            return Err(ConfigError::Invalid {
                name: "FETCH_MIN_DELAY_MS".to_string(),
                value: format!(
                    "{} (greater than FETCH_MAX_DELAY_MS={})",
                    self.min_delay.as_millis(),
                    self.max_delay.as_millis()
                ),
            });
        }
        Ok(())
    }

    pub fn proxy_settings(&self) -> ProxyPoolSettings {
        ProxyPoolSettings {
            refresh_interval: self.proxy_refresh,
            min_count: self.proxy_min_count,
            ..ProxyPoolSettings::default()
        }
    }

    /// The fetch-ladder settings derived from this config.
    pub fn fetch_policy(&self) -> FetchPolicy {
        FetchPolicy {
            timeout: self.fetch_timeout,
            connect_timeout: self.connect_timeout,
            min_delay: self.min_delay,
            max_delay: self.max_delay,
            bypass_probability: self.bypass_probability,
            batch_concurrency: self.batch_concurrency,
            batch_timeout: self.batch_timeout,
            paywall_indicators: self.paywall_indicators.clone(),
            archive_mirrors: self.archive_mirrors.clone(),
        }
    }
}

fn parse<T: FromStr>(name: &str, raw: &str) -> Result<T, ConfigError> {
    raw.parse().map_err(|_| ConfigError::Invalid {
        name: name.to_string(),
        value: raw.to_string(),
    })
}

fn parse_or<T: FromStr>(name: &str, raw: Option<String>, default: T) -> Result<T, ConfigError> {
    match raw {
        Some(raw) => parse(name, &raw),
        None => Ok(default),
    }
}

fn parse_flag(name: &str, raw: Option<String>, default: bool) -> Result<bool, ConfigError> {
    match raw.as_deref().map(str::to_lowercase).as_deref() {
        None => Ok(default),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(other) => Err(ConfigError::Invalid {
            name: name.to_string(),
            value: other.to_string(),
        }),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
