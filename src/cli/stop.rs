//! `stop`: tear down whatever `start` recorded. Always succeeds.

use anyhow::Result;
use serde_json::json;
use tracing::{info, warn};

use ci_tunnel::config::TunnelConfig;
use ci_tunnel::state::{self, TunnelState};
use ci_tunnel::tunnel::{ShutdownOutcome, ShutdownSequencer};

/// Stop command.
pub(crate) async fn cmd_stop(config: &TunnelConfig) -> Result<()> {
    let outcome = stop_recorded(config, &ShutdownSequencer::default()).await;
    println!("{}", json!({ "status": "stopped", "outcome": outcome }));
    Ok(())
}

async fn stop_recorded(config: &TunnelConfig, sequencer: &ShutdownSequencer) -> ShutdownOutcome {
    let state_path = config.state_path();
    let recorded = match state::load(&state_path) {
        Ok(recorded) => recorded,
        Err(e) => {
            info!("No tunnel state to clean up: {}", e);
            TunnelState::default()
        }
    };

    let pid = recorded.process_id();
    if pid.is_none() {
        if let Some(ref raw) = recorded.pid {
            warn!("Ignoring recorded pid '{}': not a process id", raw);
        }
    }

    let outcome = sequencer.cleanup(pid, recorded.log_path.as_deref()).await;
    info!("Tunnel cleanup finished: {}", outcome);

    if let Err(e) = state::clear(&state_path) {
        warn!("Failed to remove {}: {}", state_path.display(), e);
    }
    outcome
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ci_tunnel::process::ProcessControl;

    use super::*;

    /// Every process is already gone.
    struct NothingRunning;

    impl ProcessControl for NothingRunning {
        fn is_alive(&self, _pid: u32) -> ci_tunnel::Result<bool> {
            Ok(false)
        }
        fn interrupt(&self, _pid: u32) -> ci_tunnel::Result<()> {
            Ok(())
        }
        fn terminate(&self, _pid: u32) -> ci_tunnel::Result<()> {
            Ok(())
        }
        fn kill(&self, _pid: u32) -> ci_tunnel::Result<()> {
            Ok(())
        }
    }

    fn config_in(dir: &tempfile::TempDir) -> TunnelConfig {
        TunnelConfig {
            scratch_dir: dir.path().to_path_buf(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_stop_without_state() {
        let dir = tempfile::tempdir().unwrap();
        let sequencer = ShutdownSequencer::new(Arc::new(NothingRunning));

        let outcome = stop_recorded(&config_in(&dir), &sequencer).await;
        assert_eq!(outcome, ShutdownOutcome::NoProcess);
    }

    #[tokio::test]
    async fn test_stop_with_garbage_pid_still_removes_log() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(&dir);
        let log = dir.path().join("loclx-1.log");
        std::fs::write(&log, "x").unwrap();
        state::save(
            &config.state_path(),
            &TunnelState {
                pid: Some("abc".into()),
                log_path: Some(log.clone()),
                ..Default::default()
            },
        )
        .unwrap();

        let sequencer = ShutdownSequencer::new(Arc::new(NothingRunning));
        let outcome = stop_recorded(&config, &sequencer).await;

        assert_eq!(outcome, ShutdownOutcome::NoProcess);
        assert!(!log.exists());
        assert!(!config.state_path().exists());
    }

    #[tokio::test]
    async fn test_stop_with_corrupt_state_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(&dir);
        std::fs::write(config.state_path(), "{{{").unwrap();

        let sequencer = ShutdownSequencer::new(Arc::new(NothingRunning));
        let outcome = stop_recorded(&config, &sequencer).await;

        assert_eq!(outcome, ShutdownOutcome::NoProcess);
        assert!(!config.state_path().exists());
    }

    #[tokio::test]
    async fn test_stop_recorded_dead_process() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(&dir);
        state::save(
            &config.state_path(),
            &TunnelState {
                pid: Some("4242".into()),
                ..Default::default()
            },
        )
        .unwrap();

        let sequencer = ShutdownSequencer::new(Arc::new(NothingRunning));
        let outcome = stop_recorded(&config, &sequencer).await;
        assert_eq!(outcome, ShutdownOutcome::AlreadyStopped);
    }
}
