//! Error types for tunnel creation, verification and teardown.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TunnelError>;

/// Errors raised while creating or verifying a tunnel.
///
/// Teardown never surfaces these to its caller; see
/// [`crate::tunnel::shutdown::cleanup`].
#[derive(Debug, Error)]
pub enum TunnelError {
    /// Invalid request or configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The tunnel binary could not be started or yielded no process id.
    #[error("Failed to start tunnel process: {0}")]
    Spawn(String),

    /// The tunnel process died before publishing an address.
    #[error("Tunnel process exited unexpectedly: {0}")]
    ProcessExited(String),

    /// Still waiting on the tunnel; worth another look.
    #[error("Tunnel not ready: {0}")]
    NotReady(String),

    /// No address appeared in the log before the deadline.
    #[error("Timeout waiting for tunnel to establish after {0}ms")]
    Timeout(u128),

    /// An address was published but never answered.
    #[error("Tunnel URL was generated but is not reachable: {0}")]
    Unreachable(String),

    /// A single reachability probe failed.
    #[error(transparent)]
    Probe(#[from] ProbeError),

    /// Reading or writing persisted cross-phase state failed.
    #[error("State error: {0}")]
    State(String),

    /// Signal delivery or liveness probing failed for a reason other than
    /// the process being gone.
    #[error("Process control error: {0}")]
    Signal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failure kinds of one reachability probe.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    /// The relay answered with its `404 TUNNEL NOT FOUND` page.
    #[error("Tunnel not found (404 TUNNEL NOT FOUND)")]
    TunnelNotFound,

    /// The relay answered with one of its own error pages.
    #[error("Tunnel returned upstream error {code}: {title}")]
    Upstream { code: u16, title: String },

    #[error("Tunnel returned status {0}")]
    Status(u16),

    #[error("Request timeout - tunnel not responding")]
    Timeout,

    #[error("Request failed: {0}")]
    Request(String),
}

impl ProbeError {
    /// Whether retrying this probe is pointless in practice.
    ///
    /// The retry loop still treats every probe failure as retryable; this is
    /// for callers that want to recognise a dead reserved address.
    pub fn is_permanent(&self) -> bool {
        matches!(self, ProbeError::TunnelNotFound)
    }
}
