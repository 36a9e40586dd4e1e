//! Reachability checks for a freshly published tunnel URL.
//!
//! A probe is a `HEAD` request with a hard 5 second limit and no redirect
//! following. Statuses in `200..399` mean the tunnel serves traffic. For a
//! few statuses the relay serves its own error page, so a follow-up `GET`
//! reads the body to tell those apart from the user's application.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::redirect::Policy;
use reqwest::Client;
use tracing::{info, warn};

use crate::error::{ProbeError, Result, TunnelError};
use crate::retry::{retry, Failure, RetryConfig};

/// Hard limit for a single request.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default budget for [`ReachabilityProber::wait_for_tunnel_ready`].
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(30);

const MAX_PROBES: u32 = 10;
const PROBE_INTERVAL: Duration = Duration::from_secs(1);

/// Body marker of the relay's page for unknown tunnels.
pub const TUNNEL_NOT_FOUND_MARKER: &str = "404 TUNNEL NOT FOUND";

const USER_AGENT: &str = concat!("ci-tunnel/", env!("CARGO_PKG_VERSION"));

static UPSTREAM_TITLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<title>(\d{3})\s+([A-Z\s]+)</title>").expect("title regex is valid")
});

/// Parse a relay error page title such as `<title>502 BAD GATEWAY</title>`.
pub fn upstream_error(body: &str) -> Option<(u16, String)> {
    let caps = UPSTREAM_TITLE.captures(body)?;
    let code = caps[1].parse().ok()?;
    Some((code, caps[2].trim().to_string()))
}

/// Minimal HTTP surface the prober needs.
#[async_trait]
pub trait HttpProbe: Send + Sync {
    /// Issue a `HEAD` request and return the status code.
    async fn head(&self, url: &str) -> std::result::Result<u16, ProbeError>;

    /// Issue a `GET` request and return the body text.
    async fn body(&self, url: &str) -> std::result::Result<String, ProbeError>;
}

/// [`HttpProbe`] over a `reqwest` client that never follows redirects.
#[derive(Debug, Clone)]
pub struct ReqwestProbe {
    client: Client,
}

impl ReqwestProbe {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .redirect(Policy::none())
            .timeout(PROBE_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| TunnelError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

fn request_error(e: reqwest::Error) -> ProbeError {
    if e.is_timeout() {
        ProbeError::Timeout
    } else {
        ProbeError::Request(e.to_string())
    }
}

#[async_trait]
impl HttpProbe for ReqwestProbe {
    async fn head(&self, url: &str) -> std::result::Result<u16, ProbeError> {
        let resp = self.client.head(url).send().await.map_err(request_error)?;
        Ok(resp.status().as_u16())
    }

    async fn body(&self, url: &str) -> std::result::Result<String, ProbeError> {
        let resp = self.client.get(url).send().await.map_err(request_error)?;
        resp.text().await.map_err(request_error)
    }
}

/// Confirms a tunnel URL actually answers.
pub struct ReachabilityProber {
    http: Arc<dyn HttpProbe>,
    retry: RetryConfig,
}

impl ReachabilityProber {
    pub fn new(http: Arc<dyn HttpProbe>) -> Self {
        Self {
            http,
            retry: RetryConfig::new(DEFAULT_READY_TIMEOUT),
        }
    }

    /// Use the clock and sleeper of `retry` instead of tokio's.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Run one probe against `url`.
    pub async fn probe_once(&self, url: &str) -> std::result::Result<(), ProbeError> {
        let status = tokio::time::timeout(PROBE_TIMEOUT, self.http.head(url))
            .await
            .map_err(|_| ProbeError::Timeout)??;

        if (200..399).contains(&status) {
            return Ok(());
        }

        match status {
            404 => {
                if self.follow_up(url).await.contains(TUNNEL_NOT_FOUND_MARKER) {
                    Err(ProbeError::TunnelNotFound)
                } else {
                    Err(ProbeError::Status(status))
                }
            }
            400 | 502 => match upstream_error(&self.follow_up(url).await) {
                Some((code, title)) => Err(ProbeError::Upstream { code, title }),
                None => Err(ProbeError::Status(status)),
            },
            other => Err(ProbeError::Status(other)),
        }
    }

    // An unreadable body just means no marker.
    async fn follow_up(&self, url: &str) -> String {
        match tokio::time::timeout(PROBE_TIMEOUT, self.http.body(url)).await {
            Ok(Ok(body)) => body,
            _ => String::new(),
        }
    }

    /// Probe `url` up to 10 times, a second apart, within `budget`.
    ///
    /// Never fails: exhausting the retries is logged and reported as
    /// `false`.
    pub async fn verify_reachable(&self, url: &str, budget: Duration) -> bool {
        let config = self
            .retry
            .clone()
            .timeout(budget)
            .delay(PROBE_INTERVAL)
            .max_attempts(MAX_PROBES)
            .silent(false);

        let outcome = retry(
            || async { self.probe_once(url).await.map_err(Failure::Transient) },
            &config,
        )
        .await;

        match outcome {
            Ok(()) => {
                info!("Tunnel is reachable: {}", url);
                true
            }
            Err(err) => {
                if err.last.is_permanent() {
                    warn!("Relay does not know tunnel {}; the address may be stale", url);
                }
                warn!("Tunnel {} is not reachable: {}", url, err);
                false
            }
        }
    }

    /// Like [`verify_reachable`](Self::verify_reachable) but an unreachable
    /// tunnel is an error.
    pub async fn wait_for_tunnel_ready(&self, url: &str, timeout: Duration) -> Result<()> {
        if self.verify_reachable(url, timeout).await {
            Ok(())
        } else {
            Err(TunnelError::Unreachable(url.to_string()))
        }
    }
}
