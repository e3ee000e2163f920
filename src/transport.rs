//! Outbound HTTP transport with bounded retry and optional proxy routing.
//!
//! Every request a backend makes, token exchange included, goes through an
//! [`HttpTransport`]. [`TransportBuilder`] wraps a base transport in a
//! [`RetryingTransport`]; the base is either injected by the caller or a
//! reqwest client built here with the configured proxy.

use crate::proxy::ProxyConfig;
use crate::{Result, VaultlinkError};
use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Request, Response, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Per-request timeout of the built-in client.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Sends a single HTTP request.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Sends `request` and returns the response, whatever its status.
    ///
    /// # Errors
    ///
    /// Network-level failures only. Non-2xx statuses are returned as responses.
    async fn execute(&self, request: Request) -> Result<Response>;
}

#[async_trait]
impl HttpTransport for reqwest::Client {
    async fn execute(&self, request: Request) -> Result<Response> {
        reqwest::Client::execute(self, request)
            .await
            .map_err(VaultlinkError::Http)
    }
}

/// Retry and backoff settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Wait before the first retry
    pub min_wait: Duration,
    /// Upper bound on any single wait
    pub max_wait: Duration,
    /// Randomize waits by 50-150%
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 4,
            min_wait: Duration::from_secs(1),
            max_wait: Duration::from_secs(30),
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// Wait before retry number `attempt` (0-based).
    ///
    /// A `Retry-After` header in seconds on a 429 or 503 response takes
    /// precedence over the exponential schedule. The result never exceeds
    /// `max_wait`.
    pub fn backoff(&self, attempt: u32, response: Option<&Response>) -> Duration {
        if let Some(wait) = response.and_then(retry_after) {
            return wait.min(self.max_wait);
        }

        let exponential = self.min_wait.as_secs_f64() * 2f64.powi(attempt.min(30) as i32);
        let capped = exponential.min(self.max_wait.as_secs_f64());
        let wait = if self.jitter {
            capped * (0.5 + fastrand::f64())
        } else {
            capped
        };

        Duration::from_secs_f64(wait).min(self.max_wait)
    }
}

fn retry_after(response: &Response) -> Option<Duration> {
    let status = response.status();
    if status != StatusCode::TOO_MANY_REQUESTS && status != StatusCode::SERVICE_UNAVAILABLE {
        return None;
    }
    let secs: u64 = response.headers().get(RETRY_AFTER)?.to_str().ok()?.trim().parse().ok()?;
    Some(Duration::from_secs(secs))
}

/// Statuses worth retrying: 429 and every 5xx except 501.
pub fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || (status.is_server_error() && status != StatusCode::NOT_IMPLEMENTED)
}

/// Wraps a transport with bounded retries.
///
/// When retries run out the last response or error is returned unchanged.
pub struct RetryingTransport {
    inner: Arc<dyn HttpTransport>,
    policy: RetryPolicy,
}

impl RetryingTransport {
    /// Creates a retrying wrapper around `inner`.
    pub fn new(inner: Arc<dyn HttpTransport>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    /// The active policy.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl HttpTransport for RetryingTransport {
    async fn execute(&self, request: Request) -> Result<Response> {
        let mut attempt = 0;
        let mut pending = request;

        loop {
            let replay = pending.try_clone();
            let method = pending.method().clone();
            let url = pending.url().clone();

            let outcome = self.inner.execute(pending).await;
            let retryable = match &outcome {
                Ok(response) => is_retryable_status(response.status()),
                Err(err) => err.is_retryable(),
            };
            if !retryable {
                return outcome;
            }

            let Some(next) = replay else {
                debug!(%method, %url, "request body cannot be replayed, not retrying");
                return outcome;
            };

            if attempt >= self.policy.max_retries {
                warn!(
                    %method,
                    %url,
                    attempts = attempt + 1,
                    "giving up after exhausting retries"
                );
                return outcome;
            }

            let delay = self.policy.backoff(attempt, outcome.as_ref().ok());
            match &outcome {
                Ok(response) => warn!(
                    %method,
                    %url,
                    status = response.status().as_u16(),
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "retrying after retryable status"
                ),
                Err(err) => warn!(
                    %method,
                    %url,
                    error = %err,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "retrying after transport error"
                ),
            }
            drop(outcome);

            tokio::time::sleep(delay).await;
            attempt += 1;
            pending = next;
        }
    }
}

/// Returns the User-Agent sent by the built-in client.
pub fn user_agent() -> String {
    format!("vaultlink/{}", env!("CARGO_PKG_VERSION"))
}

/// Builds the reqwest client used when no base transport is injected.
///
/// With a proxy configuration, the resolver is consulted for every request
/// rather than once at build time.
///
/// # Errors
///
/// A malformed proxy URL is a configuration error reported before any
/// request is attempted.
pub fn build_http_client(proxy: Option<&ProxyConfig>, timeout: Duration) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(user_agent());

    if let Some(proxy) = proxy {
        let resolver = proxy
            .resolver()
            .map_err(|e| e.context("failed to create proxy config"))?;
        builder = builder.proxy(reqwest::Proxy::custom(move |url| resolver.resolve(url)));
    }

    builder.build().map_err(VaultlinkError::Http)
}

/// Assembles the transport used by a backend.
///
/// ```
/// use vaultlink::transport::TransportBuilder;
///
/// let transport = TransportBuilder::new().build()?;
/// # Ok::<(), vaultlink::VaultlinkError>(())
/// ```
#[derive(Default)]
pub struct TransportBuilder {
    base: Option<Arc<dyn HttpTransport>>,
    proxy: Option<ProxyConfig>,
    policy: RetryPolicy,
    timeout: Option<Duration>,
}

impl TransportBuilder {
    /// Starts from the default policy (4 retries, 30s max wait, 5 min timeout).
    pub fn new() -> Self {
        Self::default()
    }

    /// Injects the base transport instead of building a reqwest client.
    pub fn with_base(mut self, base: Arc<dyn HttpTransport>) -> Self {
        self.base = Some(base);
        self
    }

    /// Routes requests through a proxy.
    pub fn with_proxy(mut self, proxy: Option<ProxyConfig>) -> Self {
        self.proxy = proxy;
        self
    }

    /// Overrides the retry policy.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Overrides the per-request timeout of the built-in client.
    ///
    /// An injected base transport owns its own timeout; combining the two is
    /// rejected by [`build`](Self::build).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Builds the retrying transport.
    ///
    /// # Errors
    ///
    /// - A malformed proxy URL.
    /// - A proxy combined with an injected base transport: the proxy can only
    ///   be installed on the built-in client, so this is rejected rather than
    ///   silently bypassing the proxy.
    /// - A timeout combined with an injected base transport.
    pub fn build(self) -> Result<Arc<dyn HttpTransport>> {
        if self.base.is_some() && self.timeout.is_some() {
            return Err(VaultlinkError::config(
                "a request timeout requires the built-in HTTP transport, not an injected one",
            ));
        }

        let base: Arc<dyn HttpTransport> = match (self.base, self.proxy) {
            (Some(_), Some(_)) => {
                return Err(VaultlinkError::config(
                    "proxy routing requires the built-in HTTP transport, not an injected one",
                ))
            }
            (Some(base), None) => base,
            (None, proxy) => Arc::new(build_http_client(
                proxy.as_ref(),
                self.timeout.unwrap_or(DEFAULT_TIMEOUT),
            )?),
        };

        Ok(Arc::new(RetryingTransport::new(base, self.policy)))
    }
}
