//! Cross-phase record of a running tunnel.
//!
//! `start` and `stop` run as separate job steps, often separate processes,
//! so the pid and log path travel through a small JSON file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TunnelError};
use crate::tunnel::types::TunnelResult;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelState {
    /// Process id as text, the way it is handed between steps.
    #[serde(default)]
    pub pid: Option<String>,
    #[serde(default)]
    pub log_path: Option<PathBuf>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
}

impl TunnelState {
    /// Numeric pid, or `None` if absent or not a positive number.
    pub fn process_id(&self) -> Option<u32> {
        self.pid
            .as_deref()
            .and_then(|raw| raw.trim().parse::<u32>().ok())
            .filter(|pid| *pid > 0)
    }
}

impl From<&TunnelResult> for TunnelState {
    fn from(result: &TunnelResult) -> Self {
        Self {
            pid: Some(result.pid.to_string()),
            log_path: Some(result.log_path.clone()),
            url: Some(result.url.clone()),
            hostname: Some(result.hostname.clone()),
        }
    }
}

/// Write `state` to `path`, replacing any previous record atomically.
pub fn save(path: &Path, state: &TunnelState) -> Result<()> {
    let json = serde_json::to_string_pretty(state)
        .map_err(|e| TunnelError::State(format!("Failed to serialize state: {}", e)))?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

pub fn load(path: &Path) -> Result<TunnelState> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        TunnelError::State(format!("Failed to read {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&raw)
        .map_err(|e| TunnelError::State(format!("Failed to parse {}: {}", path.display(), e)))
}

/// Remove the record; a missing file is fine.
pub fn clear(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_result() -> TunnelResult {
        TunnelResult {
            url: "https://abc.loclx.io".into(),
            hostname: "abc.loclx.io".into(),
            pid: 4321,
            log_path: PathBuf::from("/tmp/loclx-1.log"),
        }
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        let state = TunnelState::from(&sample_result());

        save(&path, &state).unwrap();
        let loaded = load(&path).unwrap();

        assert_eq!(loaded, state);
        assert_eq!(loaded.process_id(), Some(4321));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_non_numeric_pid_is_none() {
        let state = TunnelState {
            pid: Some("not-a-pid".into()),
            ..Default::default()
        };
        assert_eq!(state.process_id(), None);
        assert_eq!(TunnelState::default().process_id(), None);
        let zero = TunnelState {
            pid: Some("0".into()),
            ..Default::default()
        };
        assert_eq!(zero.process_id(), None);
    }

    #[test]
    fn test_load_tolerates_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, r#"{"pid": "77"}"#).unwrap();

        let state = load(&path).unwrap();
        assert_eq!(state.process_id(), Some(77));
        assert!(state.log_path.is_none());
    }

    #[test]
    fn test_load_missing_file_is_state_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, TunnelError::State(_)), "got: {:?}", err);
    }

    #[test]
    fn test_clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        save(&path, &TunnelState::default()).unwrap();

        clear(&path).unwrap();
        clear(&path).unwrap();
        assert!(!path.exists());
    }
}
