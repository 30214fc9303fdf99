//! Normalized HTTP request/response models and the retry/backoff policy
//! shared by transport implementations.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Statuses considered transient and therefore retryable.
pub const TRANSIENT_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

pub fn is_transient_status(status: u16) -> bool {
    TRANSIENT_STATUSES.contains(&status)
}

/// Cap for a single backoff sleep.
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Maximum random jitter added to each backoff sleep.
pub const MAX_JITTER: Duration = Duration::from_secs(1);

/// An outbound request, fully resolved (no templates left).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "GET".to_string(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    pub fn post(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "POST".to_string(),
            headers: BTreeMap::new(),
            body: Some(body.into()),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Wall-clock timing of one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseTiming {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl ResponseTiming {
    pub fn between(started_at: DateTime<Utc>, finished_at: DateTime<Utc>) -> Self {
        let duration_ms = (finished_at - started_at).num_milliseconds().max(0) as u64;
        Self {
            started_at,
            finished_at,
            duration_ms,
        }
    }
}

/// A normalized response: lower-cased headers, post-redirect URL, timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
    /// Final URL after redirects.
    pub url: String,
    pub timing: ResponseTiming,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

/// Proxy settings for a transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// Per-client transport configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub base_url: Option<String>,
    pub timeout: Duration,
    /// Retries after the first attempt (3 retries = up to 4 attempts).
    pub retries: u32,
    pub retry_base_delay: Duration,
    pub default_headers: BTreeMap<String, String>,
    pub proxy: Option<ProxyConfig>,
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout: Duration::from_secs(30),
            retries: 3,
            retry_base_delay: Duration::from_millis(500),
            default_headers: BTreeMap::new(),
            proxy: None,
            user_agent: "Argus/0.1 (declarative scraper)".to_string(),
        }
    }
}

impl TransportConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.insert(name.into(), value.into());
        self
    }

    pub fn with_proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Apply serde-level overrides from a scrape configuration.
    pub fn apply(mut self, overrides: &HttpOverrides) -> Self {
        if let Some(ms) = overrides.timeout_ms {
            self.timeout = Duration::from_millis(ms);
        }
        if let Some(retries) = overrides.retries {
            self.retries = retries;
        }
        if let Some(ms) = overrides.retry_base_delay_ms {
            self.retry_base_delay = Duration::from_millis(ms);
        }
        for (name, value) in &overrides.headers {
            self.default_headers.insert(name.clone(), value.clone());
        }
        if let Some(proxy) = &overrides.proxy {
            self.proxy = Some(proxy.clone());
        }
        self
    }
}

/// Transport overrides as they appear in a scrape configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpOverrides {
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub retries: Option<u32>,
    #[serde(default)]
    pub retry_base_delay_ms: Option<u64>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub proxy: Option<ProxyConfig>,
}

/// Backoff for retry attempt `attempt` (0-indexed):
/// `min(base × 2^attempt + jitter(≤1s), 30s)`.
pub fn backoff_delay(attempt: u32, base: Duration) -> Duration {
    let exp = base.saturating_mul(2u32.saturating_pow(attempt.min(31)));
    let jitter = Duration::from_millis(rand_jitter_ms(MAX_JITTER.as_millis() as u64));
    std::cmp::min(exp.saturating_add(jitter), MAX_BACKOFF)
}

// ---------------------------------------------------------------------------
// Deterministic jitter based on std — avoids pulling in the `rand` crate.
// Uses a simple xorshift seeded from the current time.
// ---------------------------------------------------------------------------

pub(crate) fn rand_jitter_ms(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }
    // Seed from high-resolution clock — good enough for jitter, not crypto.
    let mut x = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    // xorshift64
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    x % max_ms
}
