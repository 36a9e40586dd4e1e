//! Recover the public address from the tunnel's log file.
//!
//! The tunnel binary announces its hostname in a line such as
//!
//! ```text
//! 2024/01/15 10:00:00 (http, us) abc123.loclx.io => [running]
//! ```
//!
//! The log keeps growing while we read it, so every poll re-reads the whole
//! file and matches against that snapshot.

use std::path::Path;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use tracing::{debug, info};

use crate::error::{Result, TunnelError};
use crate::process::ProcessControl;
use crate::retry::{retry, Failure, RetryConfig};
use crate::tunnel::types::TunnelAddress;

/// Domain suffix of every public tunnel hostname.
pub const TUNNEL_DOMAIN: &str = "loclx.io";

/// Default deadline for the address to show up.
pub const DEFAULT_ADDRESS_TIMEOUT: Duration = Duration::from_secs(30);

const POLL_INTERVAL: Duration = Duration::from_millis(500);

static HOSTNAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9-]+(?:\.[A-Za-z0-9-]+)*\.loclx\.io\b")
        .expect("hostname regex is valid")
});

/// Find the first public tunnel hostname in `text`.
pub fn extract_hostname(text: &str) -> Option<&str> {
    HOSTNAME_PATTERN.find(text).map(|m| m.as_str())
}

/// Polls a tunnel log until it names a public address.
pub struct AddressWatcher {
    control: Arc<dyn ProcessControl>,
    retry: RetryConfig,
}

impl AddressWatcher {
    pub fn new(control: Arc<dyn ProcessControl>) -> Self {
        Self {
            control,
            retry: RetryConfig::new(DEFAULT_ADDRESS_TIMEOUT),
        }
    }

    /// Use the clock and sleeper of `retry` instead of tokio's.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Wait until `log_path` names an address, `pid` dies, or `timeout`
    /// elapses.
    ///
    /// A dead process fails straight away with
    /// [`TunnelError::ProcessExited`]; running out of time fails with
    /// [`TunnelError::Timeout`].
    pub async fn wait_for_tunnel(
        &self,
        log_path: &Path,
        pid: u32,
        timeout: Duration,
    ) -> Result<TunnelAddress> {
        let config = self
            .retry
            .clone()
            .timeout(timeout)
            .delay(POLL_INTERVAL)
            .silent(true);

        let found = retry(|| self.poll(log_path, pid), &config).await;

        match found {
            Ok(address) => {
                info!("Tunnel address found: {}", address.url);
                Ok(address)
            }
            Err(err) if err.is_fatal() => Err(err.into_inner()),
            Err(err) => {
                debug!("Gave up waiting for tunnel address: {}", err);
                Err(TunnelError::Timeout(timeout.as_millis()))
            }
        }
    }

    async fn poll(
        &self,
        log_path: &Path,
        pid: u32,
    ) -> std::result::Result<TunnelAddress, Failure<TunnelError>> {
        let content = match tokio::fs::read(log_path).await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(TunnelError::Io(e).into()),
        };

        if let Some(hostname) = extract_hostname(&content) {
            return Ok(TunnelAddress::from_hostname(hostname));
        }

        match self.control.is_alive(pid) {
            Ok(true) => Err(TunnelError::NotReady("URL not found yet".into()).into()),
            Ok(false) => Err(Failure::Fatal(TunnelError::ProcessExited(format!(
                "pid {} is gone and {} names no tunnel address",
                pid,
                log_path.display()
            )))),
            // Inconclusive; keep waiting and let the deadline decide.
            Err(e) => {
                debug!("Liveness probe for pid {} failed: {}", pid, e);
                Err(TunnelError::NotReady("URL not found yet".into()).into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::process::testing::FakeProcess;
    use crate::retry::testing::SimulatedTime;

    fn watcher(control: Arc<FakeProcess>) -> (AddressWatcher, Arc<SimulatedTime>) {
        let time = SimulatedTime::new();
        let retry = RetryConfig::new(DEFAULT_ADDRESS_TIMEOUT)
            .clock(time.clone())
            .sleeper(time.clone());
        (AddressWatcher::new(control).with_retry(retry), time)
    }

    fn log_with(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", content).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_extract_hostname_from_running_line() {
        assert_eq!(
            extract_hostname("testXYZ.loclx.io => [running]"),
            Some("testXYZ.loclx.io")
        );
    }

    #[test]
    fn test_extract_hostname_from_full_log_line() {
        let line = "2024/01/15 10:00:00 (http, eu) my-app.eu.loclx.io => [running]";
        assert_eq!(extract_hostname(line), Some("my-app.eu.loclx.io"));
    }

    #[test]
    fn test_extract_hostname_inside_url() {
        let line = "Forwarding https://abc-123.loclx.io -> localhost:3000";
        assert_eq!(extract_hostname(line), Some("abc-123.loclx.io"));
    }

    #[test]
    fn test_extract_hostname_negative() {
        assert!(extract_hostname("").is_none());
        assert!(extract_hostname("starting tunnel...").is_none());
        assert!(extract_hostname("https://example.com").is_none());
        assert!(extract_hostname("abc.loclx.iox").is_none());
    }

    #[tokio::test]
    async fn test_wait_returns_logged_address() {
        let process = Arc::new(FakeProcess::stubborn());
        let (watcher, time) = watcher(process.clone());
        let log = log_with("booting\ntestXYZ.loclx.io => [running]\n");

        let address = watcher
            .wait_for_tunnel(log.path(), 42, DEFAULT_ADDRESS_TIMEOUT)
            .await
            .unwrap();

        assert_eq!(address.hostname, "testXYZ.loclx.io");
        assert_eq!(address.url, "https://testXYZ.loclx.io");
        assert!(time.sleeps().is_empty());
        assert_eq!(process.probes(), 0);
    }

    #[tokio::test]
    async fn test_wait_times_out_while_process_lives() {
        let process = Arc::new(FakeProcess::stubborn());
        let (watcher, time) = watcher(process);
        let log = log_with("connecting to relay...\n");

        let err = watcher
            .wait_for_tunnel(log.path(), 42, Duration::from_secs(30))
            .await
            .unwrap_err();

        assert!(matches!(err, TunnelError::Timeout(30_000)), "got: {:?}", err);
        assert!(err.to_string().contains("after 30000ms"));
        assert_eq!(time.elapsed(), Duration::from_secs(30));
        assert!(time.sleeps().iter().all(|d| *d == POLL_INTERVAL));
    }

    #[tokio::test]
    async fn test_wait_fails_fast_when_process_dies() {
        let process = Arc::new(FakeProcess::dead());
        let (watcher, time) = watcher(process.clone());
        let log = log_with("error: invalid access token\n");

        let err = watcher
            .wait_for_tunnel(log.path(), 42, Duration::from_secs(30))
            .await
            .unwrap_err();

        assert!(matches!(err, TunnelError::ProcessExited(_)), "got: {:?}", err);
        assert!(err.to_string().contains("exited unexpectedly"));
        assert!(time.sleeps().is_empty());
        assert_eq!(process.probes(), 1);
    }

    #[tokio::test]
    async fn test_missing_log_counts_as_not_ready() {
        let process = Arc::new(FakeProcess::stubborn());
        let (watcher, _time) = watcher(process);
        let dir = tempfile::tempdir().unwrap();

        let err = watcher
            .wait_for_tunnel(&dir.path().join("absent.log"), 42, Duration::from_secs(2))
            .await
            .unwrap_err();

        assert!(matches!(err, TunnelError::Timeout(2_000)), "got: {:?}", err);
    }

    #[tokio::test]
    async fn test_broken_probe_does_not_abort() {
        let process = Arc::new(FakeProcess::unprobeable());
        let (watcher, _time) = watcher(process.clone());
        let log = log_with("");

        let err = watcher
            .wait_for_tunnel(log.path(), 42, Duration::from_secs(1))
            .await
            .unwrap_err();

        assert!(matches!(err, TunnelError::Timeout(1_000)), "got: {:?}", err);
        assert_eq!(process.probes(), 3);
    }
}
