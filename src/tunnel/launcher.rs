//! Starts the LocalXpose binary and hands back a verified public URL.
//!
//! The tunnel process must outlive the job step that started it, so it is
//! spawned in its own process group, never killed on drop, and writes its
//! output straight into the log file. After
//! [`SpawnedTunnel::detach`] the only link left is its pid, which the
//! caller persists for a later [`crate::tunnel::shutdown`] phase.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::TunnelConfig;
use crate::error::{Result, TunnelError};
use crate::process::{ProcessControl, SystemProcessControl};
use crate::retry::RetryConfig;
use crate::tunnel::extract::{AddressWatcher, DEFAULT_ADDRESS_TIMEOUT};
use crate::tunnel::probe::{HttpProbe, ReachabilityProber, ReqwestProbe, DEFAULT_READY_TIMEOUT};
use crate::tunnel::sink::LogSink;
use crate::tunnel::types::{Protocol, TunnelAddress, TunnelRequest, TunnelResult};

/// Environment variable the tunnel binary reads its access token from.
pub const TOKEN_ENV: &str = "LX_ACCESS_TOKEN";

/// Timeouts and scratch location for one launch.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// Directory the log file is created in.
    pub scratch_dir: PathBuf,
    pub address_timeout: Duration,
    pub ready_timeout: Duration,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            scratch_dir: std::env::temp_dir(),
            address_timeout: DEFAULT_ADDRESS_TIMEOUT,
            ready_timeout: DEFAULT_READY_TIMEOUT,
        }
    }
}

impl From<&TunnelConfig> for LaunchOptions {
    fn from(config: &TunnelConfig) -> Self {
        Self {
            scratch_dir: config.scratch_dir.clone(),
            address_timeout: Duration::from_secs(config.address_timeout_secs),
            ready_timeout: Duration::from_secs(config.reachability_timeout_secs),
        }
    }
}

/// Command-line arguments for `request`. The token is never among them.
pub fn build_args(request: &TunnelRequest) -> Vec<String> {
    let mut args = vec![
        "tunnel".to_string(),
        request.protocol.to_string(),
        format!("--to={}", request.port),
    ];
    if let Some(ref region) = request.region {
        args.push(format!("--region={}", region));
    }
    if let Some(ref subdomain) = request.subdomain {
        args.push(format!("--subdomain={}", subdomain));
    }
    args
}

/// A tunnel process still tied to this launcher.
pub struct SpawnedTunnel {
    pid: u32,
    reaper: JoinHandle<()>,
}

impl SpawnedTunnel {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Give up lifetime responsibility for the process.
    ///
    /// The process keeps running after this launcher, and the program that
    /// owns it, are gone. Only the returned pid remains.
    pub fn detach(self) -> u32 {
        let SpawnedTunnel { pid, reaper } = self;
        drop(reaper);
        debug!("Detached tunnel process {}", pid);
        pid
    }
}

/// Creates tunnels with the LocalXpose binary.
pub struct TunnelLauncher {
    binary: PathBuf,
    options: LaunchOptions,
    control: Arc<dyn ProcessControl>,
    http: Arc<dyn HttpProbe>,
    retry: RetryConfig,
}

impl TunnelLauncher {
    /// Create a launcher for the binary at `binary`.
    pub fn new(binary: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            binary: binary.into(),
            options: LaunchOptions::default(),
            control: Arc::new(SystemProcessControl),
            http: Arc::new(ReqwestProbe::new()?),
            retry: RetryConfig::new(DEFAULT_ADDRESS_TIMEOUT),
        })
    }

    pub fn with_options(mut self, options: LaunchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_process_control(mut self, control: Arc<dyn ProcessControl>) -> Self {
        self.control = control;
        self
    }

    pub fn with_http_probe(mut self, http: Arc<dyn HttpProbe>) -> Self {
        self.http = http;
        self
    }

    /// Clock and sleeper used by every wait in the launch.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Start a tunnel for `request` and wait until it is publicly reachable.
    ///
    /// On success the process is detached and keeps running; persist the
    /// returned pid and log path for teardown. On failure the process is
    /// killed and its log is left in place for inspection.
    pub async fn create_tunnel(&self, request: &TunnelRequest) -> Result<TunnelResult> {
        let request = request.clone().validate()?;
        let mut sink = LogSink::create(&self.options.scratch_dir).await?;

        if request.protocol != Protocol::Http {
            warn!(
                "Protocol '{}' is not fully supported; only http is tested",
                request.protocol
            );
        }

        let spawned = self.spawn(&request, &sink)?;
        let pid = spawned.pid();
        info!(
            "Started tunnel process {} for port {} (log: {})",
            pid,
            request.port,
            sink.path().display()
        );

        let address = match self.establish(pid, sink.path()).await {
            Ok(address) => address,
            Err(e) => {
                sink.close();
                if let Err(kill_err) = self.control.kill(pid) {
                    debug!("Could not kill failed tunnel process {}: {}", pid, kill_err);
                }
                warn!(
                    "Tunnel creation failed, log kept at {}",
                    sink.path().display()
                );
                return Err(e);
            }
        };

        sink.close();
        let pid = spawned.detach();

        info!("Tunnel running at {}", address.url);
        Ok(TunnelResult {
            url: address.url,
            hostname: address.hostname,
            pid,
            log_path: sink.path().to_path_buf(),
        })
    }

    async fn establish(&self, pid: u32, log_path: &Path) -> Result<TunnelAddress> {
        let address = AddressWatcher::new(self.control.clone())
            .with_retry(self.retry.clone())
            .wait_for_tunnel(log_path, pid, self.options.address_timeout)
            .await?;

        ReachabilityProber::new(self.http.clone())
            .with_retry(self.retry.clone())
            .wait_for_tunnel_ready(&address.url, self.options.ready_timeout)
            .await?;

        Ok(address)
    }

    fn spawn(&self, request: &TunnelRequest, sink: &LogSink) -> Result<SpawnedTunnel> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(build_args(request));
        if let Some(ref token) = request.token {
            cmd.env(TOKEN_ENV, token);
        }

        // File handles, not pipes: a pipe would lose its reader when this
        // program exits and the tunnel's next write would kill it.
        let (stdout, stderr) = sink.child_stdio()?;
        cmd.stdin(Stdio::null());
        cmd.stdout(stdout);
        cmd.stderr(stderr);
        cmd.kill_on_drop(false);
        // Keep job-control signals aimed at us away from the tunnel.
        #[cfg(unix)]
        cmd.process_group(0);
        #[cfg(windows)]
        cmd.creation_flags(0x0000_0200); // CREATE_NEW_PROCESS_GROUP

        let mut child = cmd.spawn().map_err(|e| {
            TunnelError::Spawn(format!("{}: {}", self.binary.display(), e))
        })?;

        let pid = child
            .id()
            .ok_or_else(|| TunnelError::Spawn("no process id was assigned".into()))?;

        // Reaps the child if it exits while we are still around, so
        // liveness probes see it gone instead of a zombie.
        let reaper = tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => info!("Tunnel process {} exited: {}", pid, status),
                Err(e) => debug!("Waiting on tunnel process {} failed: {}", pid, e),
            }
        });

        Ok(SpawnedTunnel { pid, reaper })
    }
}
