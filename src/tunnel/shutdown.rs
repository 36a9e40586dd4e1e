//! Graduated teardown of a detached tunnel process.
//!
//! Runs in a job's post phase, where a failure must never fail the job:
//! every error is logged and swallowed. The escalation is
//!
//! ```text
//! probe ─ dead ─────────────────────────────▶ AlreadyStopped
//!   │ alive
//! SIGINT, wait 2s, probe ─ dead ────────────▶ Graceful
//!   │ alive
//! SIGTERM, wait 1s, probe ─ dead ───────────▶ Terminated
//!   │ alive
//! SIGKILL ──────────────────────────────────▶ ForceKilled
//! ```
//!
//! and the log file is removed afterwards whatever the outcome.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::process::{ProcessControl, SystemProcessControl};
use crate::retry::{Sleeper, TokioSleeper};
use crate::tunnel::types::TunnelHandle;

/// Dwell after the interrupt before probing again.
pub const INTERRUPT_DWELL: Duration = Duration::from_secs(2);

/// Dwell after the termination signal before probing again.
pub const TERMINATE_DWELL: Duration = Duration::from_secs(1);

/// Where the teardown state machine ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownOutcome {
    /// No pid was recorded.
    NoProcess,
    AlreadyStopped,
    /// Stopped after the interrupt.
    Graceful,
    /// Stopped after the termination signal.
    Terminated,
    ForceKilled,
    /// Probing or signalling failed; the process state is unknown.
    Failed,
}

impl fmt::Display for ShutdownOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ShutdownOutcome::NoProcess => "no tunnel process recorded",
            ShutdownOutcome::AlreadyStopped => "tunnel process already stopped",
            ShutdownOutcome::Graceful => "tunnel process terminated gracefully",
            ShutdownOutcome::Terminated => "tunnel process terminated after SIGTERM",
            ShutdownOutcome::ForceKilled => "tunnel process force-killed",
            ShutdownOutcome::Failed => "tunnel process state unknown",
        };
        f.write_str(text)
    }
}

/// Stops tunnel processes by pid and removes their logs.
pub struct ShutdownSequencer {
    control: Arc<dyn ProcessControl>,
    sleeper: Arc<dyn Sleeper>,
}

impl Default for ShutdownSequencer {
    fn default() -> Self {
        Self::new(Arc::new(SystemProcessControl))
    }
}

impl ShutdownSequencer {
    pub fn new(control: Arc<dyn ProcessControl>) -> Self {
        Self {
            control,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Stop `pid` (if any) and delete `log_path` (if any). Never fails.
    pub async fn cleanup(&self, pid: Option<u32>, log_path: Option<&Path>) -> ShutdownOutcome {
        let outcome = match pid {
            None => {
                info!("No tunnel process recorded, skipping shutdown");
                ShutdownOutcome::NoProcess
            }
            Some(pid) => match self.stop(pid).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!("Failed to stop tunnel process {}: {}", pid, e);
                    ShutdownOutcome::Failed
                }
            },
        };

        if let Some(path) = log_path {
            remove_log(path).await;
        }
        outcome
    }

    async fn stop(&self, pid: u32) -> Result<ShutdownOutcome> {
        if !self.control.is_alive(pid)? {
            info!("Tunnel process {} already stopped", pid);
            return Ok(ShutdownOutcome::AlreadyStopped);
        }

        info!("Stopping tunnel process {} with SIGINT", pid);
        if let Err(e) = self.control.interrupt(pid) {
            debug!("SIGINT to {} failed: {}", pid, e);
        }
        self.sleeper.sleep(INTERRUPT_DWELL).await;
        if !self.control.is_alive(pid)? {
            info!("Tunnel process {} terminated gracefully", pid);
            return Ok(ShutdownOutcome::Graceful);
        }

        info!("Tunnel process {} still running, sending SIGTERM", pid);
        if let Err(e) = self.control.terminate(pid) {
            debug!("SIGTERM to {} failed: {}", pid, e);
        }
        self.sleeper.sleep(TERMINATE_DWELL).await;
        if !self.control.is_alive(pid)? {
            info!("Tunnel process {} terminated after SIGTERM", pid);
            return Ok(ShutdownOutcome::Terminated);
        }

        if let Err(e) = self.control.kill(pid) {
            // It may have exited on its own since the last probe.
            if self.control.is_alive(pid)? {
                return Err(e);
            }
            debug!("SIGKILL to {} failed, process already gone: {}", pid, e);
            info!("Tunnel process {} terminated after SIGTERM", pid);
            return Ok(ShutdownOutcome::Terminated);
        }
        warn!(
            "Force-killed tunnel process {}; the relay may not have released a reserved subdomain",
            pid
        );
        Ok(ShutdownOutcome::ForceKilled)
    }
}

async fn remove_log(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Removed tunnel log {}", path.display()),
        Err(e) => debug!("Could not remove tunnel log {}: {}", path.display(), e),
    }
}

/// Tear down the tunnel behind `handle` with real signals.
pub async fn cleanup(handle: &TunnelHandle) -> ShutdownOutcome {
    ShutdownSequencer::default()
        .cleanup(Some(handle.pid), Some(&handle.log_path))
        .await
}
