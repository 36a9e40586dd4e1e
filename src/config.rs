//! Ambient settings: where the binary lives, where scratch files go, and
//! how long to wait.
//!
//! Settings come from an optional JSON file and are then overridden by
//! `CI_TUNNEL_*` environment variables.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TunnelError};

/// Environment override for [`TunnelConfig::binary`].
pub const BINARY_ENV: &str = "CI_TUNNEL_BINARY";
/// Environment override for [`TunnelConfig::scratch_dir`].
pub const SCRATCH_DIR_ENV: &str = "CI_TUNNEL_SCRATCH_DIR";
/// Environment override for [`TunnelConfig::state_file`].
pub const STATE_FILE_ENV: &str = "CI_TUNNEL_STATE_FILE";

const STATE_FILE_NAME: &str = "ci-tunnel-state.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// Path or name of the LocalXpose binary.
    pub binary: PathBuf,
    /// Directory for tunnel logs.
    pub scratch_dir: PathBuf,
    pub address_timeout_secs: u64,
    pub reachability_timeout_secs: u64,
    /// Where `start` records the pid and log path for `stop`. Defaults to a
    /// file inside `scratch_dir`.
    pub state_file: Option<PathBuf>,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("loclx"),
            scratch_dir: std::env::temp_dir(),
            address_timeout_secs: 30,
            reachability_timeout_secs: 30,
            state_file: None,
        }
    }
}

impl TunnelConfig {
    /// Load from `path` (or defaults) and apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            TunnelError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            TunnelError::Config(format!(
                "Failed to parse config file {}: {}",
                path.display(),
                e
            ))
        })
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(binary) = lookup(BINARY_ENV) {
            self.binary = PathBuf::from(binary);
        }
        if let Some(dir) = lookup(SCRATCH_DIR_ENV) {
            self.scratch_dir = PathBuf::from(dir);
        }
        if let Some(file) = lookup(STATE_FILE_ENV) {
            self.state_file = Some(PathBuf::from(file));
        }
    }

    /// Effective state file location.
    pub fn state_path(&self) -> PathBuf {
        self.state_file
            .clone()
            .unwrap_or_else(|| self.scratch_dir.join(STATE_FILE_NAME))
    }
}
