use std::collections::BTreeMap;
use std::future::Future;

use chrono::Utc;
use reqwest::{Client, Method};
use url::Url;

use argus_core::error::ScrapeError;
use argus_core::http::{
    HttpRequest, HttpResponse, ResponseTiming, TransportConfig, backoff_delay, is_transient_status,
};
use argus_core::traits::{Transport, TransportFactory};

/// HTTP transport using reqwest.
///
/// Retries transient failures with exponential backoff and jitter, then
/// hands back a normalized response: lower-cased headers, post-redirect
/// URL, wall-clock timing. Any status below 500 resolves to the caller —
/// 4xx is considered caller-correctable.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
    config: TransportConfig,
}

impl ReqwestTransport {
    pub fn new(config: TransportConfig) -> Result<Self, ScrapeError> {
        let mut builder = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout);

        if let Some(proxy) = &config.proxy {
            let mut proxy_setup = reqwest::Proxy::all(proxy.url.as_str())
                .map_err(|e| ScrapeError::Network(format!("invalid proxy {}: {e}", proxy.url)))?;
            if let (Some(username), Some(password)) = (&proxy.username, &proxy.password) {
                proxy_setup = proxy_setup.basic_auth(username, password);
            }
            builder = builder.proxy(proxy_setup);
        }

        let client = builder
            .build()
            .map_err(|e| ScrapeError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    /// Resolve the request URL against the configured base address.
    fn resolve_url(&self, url: &str) -> Result<Url, ScrapeError> {
        if let Ok(absolute) = Url::parse(url) {
            return Ok(absolute);
        }
        match &self.config.base_url {
            Some(base) => Url::parse(base)
                .and_then(|base| base.join(url))
                .map_err(|e| ScrapeError::InvalidUrl(format!("{url}: {e}"))),
            None => Err(ScrapeError::InvalidUrl(url.to_string())),
        }
    }

    /// Issue the request once and normalize the outcome.
    async fn attempt(&self, request: HttpRequest) -> Result<HttpResponse, ScrapeError> {
        let url = self.resolve_url(&request.url)?;
        let method = Method::from_bytes(request.method.as_bytes()).map_err(|_| {
            ScrapeError::Transport {
                message: format!("invalid HTTP method '{}'", request.method),
                status: None,
                retryable: false,
            }
        })?;

        let mut builder = self.client.request(method, url);
        for (name, value) in &self.config.default_headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let started_at = Utc::now();
        let response = builder
            .send()
            .await
            .map_err(|e| self.classify_error(e))?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let mut headers = BTreeMap::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers.insert(name.as_str().to_ascii_lowercase(), value.to_string());
            }
        }
        let body = response
            .text()
            .await
            .map_err(|e| ScrapeError::Network(format!("failed to read response body: {e}")))?;
        let finished_at = Utc::now();

        Ok(HttpResponse {
            status,
            headers,
            body,
            url: final_url,
            timing: ResponseTiming::between(started_at, finished_at),
        })
    }

    fn classify_error(&self, e: reqwest::Error) -> ScrapeError {
        if e.is_timeout() {
            return ScrapeError::Timeout(self.config.timeout.as_secs());
        }
        if e.is_connect() {
            return ScrapeError::Network(format!("Connection failed: {e}"));
        }
        let message = e.to_string();
        let lowered = message.to_lowercase();
        // Connectivity failures without a response are worth retrying.
        let retryable = ["reset", "refused", "timed out", "dns", "unreachable"]
            .iter()
            .any(|needle| lowered.contains(needle));
        ScrapeError::Transport {
            message,
            status: None,
            retryable,
        }
    }
}

impl Transport for ReqwestTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, ScrapeError> {
        run_with_retry(
            self.config.retries,
            self.config.retry_base_delay,
            |attempt| {
                if attempt > 0 {
                    tracing::debug!(
                        url = %request.url,
                        %attempt,
                        "Retrying request"
                    );
                }
                self.attempt(request.clone())
            },
        )
        .await
    }
}

/// The transport retry loop, factored out of reqwest for testability.
///
/// `retries` is the number of retries after the first attempt. Retryable iff
/// a response arrived with a transient status, or no response arrived and
/// the error is a connectivity failure. Exhausting the budget raises with
/// the last error.
pub(crate) async fn run_with_retry<Fut>(
    retries: u32,
    base_delay: std::time::Duration,
    mut attempt_fn: impl FnMut(u32) -> Fut,
) -> Result<HttpResponse, ScrapeError>
where
    Fut: Future<Output = Result<HttpResponse, ScrapeError>>,
{
    let mut attempt = 0u32;
    loop {
        let last_error = match attempt_fn(attempt).await {
            Ok(response) => {
                if is_transient_status(response.status) {
                    ScrapeError::Transport {
                        message: format!("HTTP {} for {}", response.status, response.url),
                        status: Some(response.status),
                        retryable: true,
                    }
                } else if response.status >= 500 {
                    // Non-transient server error: raise without retrying.
                    return Err(ScrapeError::Transport {
                        message: format!("HTTP {} for {}", response.status, response.url),
                        status: Some(response.status),
                        retryable: false,
                    });
                } else {
                    return Ok(response);
                }
            }
            Err(e) if e.is_retryable() => e,
            Err(e) => return Err(e),
        };

        if attempt >= retries {
            return Err(last_error);
        }
        let delay = backoff_delay(attempt, base_delay);
        tracing::debug!(
            %attempt,
            delay_ms = %delay.as_millis(),
            error = %last_error,
            "Transient failure, backing off"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

/// Factory handing each job a transport built from its own configuration.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReqwestTransportFactory;

impl TransportFactory for ReqwestTransportFactory {
    type Transport = ReqwestTransport;

    fn create(&self, config: &TransportConfig) -> Result<ReqwestTransport, ScrapeError> {
        ReqwestTransport::new(config.clone())
    }
}
