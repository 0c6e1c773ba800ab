//! HTTP Client Implementation using Reqwest

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy},
};
use reqwest::Client;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

const USER_AGENT: &str = concat!("geonature-sync/", env!("CARGO_PKG_VERSION"));

/// Reqwest-based HTTP client
///
/// - Connection pooling via reqwest
/// - Retry with exponential backoff on transport errors, 429 and 5xx
/// - rustls TLS
///
/// Once retries are exhausted on a retryable status, the last response is
/// returned as-is so callers can classify it.
pub struct ReqwestHttpClient {
    client: Client,
}

impl ReqwestHttpClient {
    /// Create a new HTTP client with default configuration
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(30))
    }

    /// Create a new HTTP client with a custom request timeout
    pub fn with_timeout(timeout: Duration) -> Self {
        match Self::build_client(timeout) {
            Ok(client) => Self { client },
            Err(e) => {
                warn!(error = %e, "Falling back to default HTTP client configuration");
                Self {
                    client: Client::new(),
                }
            }
        }
    }

    /// Wrap an already configured reqwest client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn build_client(timeout: Duration) -> reqwest::Result<Client> {
        Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(10)
            .user_agent(USER_AGENT)
            .build()
    }

    fn convert_method(method: HttpMethod) -> reqwest::Method {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Head => reqwest::Method::HEAD,
        }
    }

    fn build_request(&self, request: HttpRequest) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .request(Self::convert_method(request.method), &request.url);

        for (key, value) in request.headers {
            req = req.header(key, value);
        }
        if let Some(body) = request.body {
            req = req.body(body);
        }
        if let Some(timeout) = request.timeout {
            req = req.timeout(timeout);
        }

        req
    }

    /// Collect headers, folding repeated names into one `\n`-separated value
    fn collect_headers(headers: &reqwest::header::HeaderMap) -> HashMap<String, String> {
        let mut collected: HashMap<String, String> = HashMap::new();
        for (name, value) in headers {
            let Ok(value) = value.to_str() else {
                continue;
            };
            collected
                .entry(name.to_string())
                .and_modify(|existing| {
                    existing.push('\n');
                    existing.push_str(value);
                })
                .or_insert_with(|| value.to_string());
        }
        collected
    }

    fn backoff(policy: &RetryPolicy, attempt: u32) -> Duration {
        if policy.use_exponential_backoff {
            let exponential = policy.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1));
            exponential.min(policy.max_delay)
        } else {
            policy.base_delay
        }
    }

    async fn execute_with_retry_internal(
        &self,
        request: HttpRequest,
        policy: RetryPolicy,
    ) -> Result<HttpResponse> {
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!(
                attempt = attempt,
                max_attempts = max_attempts,
                url = %request.url,
                "Executing HTTP request"
            );

            match self.build_request(request.clone()).send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    let retryable = status >= 500 || status == 429;

                    if retryable && attempt < max_attempts {
                        warn!(
                            status = status,
                            attempt = attempt,
                            "HTTP request failed with retryable status"
                        );
                    } else {
                        let headers = Self::collect_headers(response.headers());
                        let body = response
                            .bytes()
                            .await
                            .map_err(|e| BridgeError::OperationFailed(e.to_string()))?;

                        return Ok(HttpResponse {
                            status,
                            headers,
                            body,
                        });
                    }
                }
                Err(e) => {
                    warn!(error = %e, attempt = attempt, "HTTP request failed");

                    if attempt >= max_attempts {
                        return Err(if e.is_timeout() {
                            BridgeError::OperationFailed("Request timed out".to_string())
                        } else if e.is_connect() {
                            BridgeError::OperationFailed(format!("Connection failed: {}", e))
                        } else {
                            BridgeError::OperationFailed(e.to_string())
                        });
                    }
                }
            }

            let delay = Self::backoff(&policy, attempt);
            debug!(delay_ms = delay.as_millis() as u64, "Retrying after delay");
            sleep(delay).await;
        }
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.execute_with_retry(request, RetryPolicy::default())
            .await
    }

    async fn execute_with_retry(
        &self,
        request: HttpRequest,
        policy: RetryPolicy,
    ) -> Result<HttpResponse> {
        self.execute_with_retry_internal(request, policy).await
    }
}
