//! Append-only log file the tunnel process writes into.
//!
//! The tunnel's stdout and stderr are handles on this file rather than
//! pipes, so its output has somewhere to go after the launching program is
//! gone. Closing the sink drops only our own handle; the tunnel keeps
//! appending through its copies until it exits.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use chrono::Utc;
use tokio::fs::OpenOptions;
use tracing::debug;

use crate::error::{Result, TunnelError};

/// The tunnel log, owned by the launcher until [`LogSink::close`].
#[derive(Debug)]
pub struct LogSink {
    path: PathBuf,
    file: Option<File>,
}

impl LogSink {
    /// Create a fresh, timestamp-named log file in `dir`.
    pub async fn create(dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(dir).await?;
        let name = format!("loclx-{}.log", Utc::now().format("%Y%m%dT%H%M%S%.9f"));
        let path = dir.join(name);
        let file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(&path)
            .await?
            .into_std()
            .await;
        debug!("Tunnel log at {}", path.display());
        Ok(Self {
            path,
            file: Some(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Stdout and stderr for the child, both appending to this log.
    pub fn child_stdio(&self) -> Result<(Stdio, Stdio)> {
        let file = self
            .file
            .as_ref()
            .ok_or_else(|| TunnelError::Spawn("tunnel log is already closed".into()))?;
        Ok((
            Stdio::from(file.try_clone()?),
            Stdio::from(file.try_clone()?),
        ))
    }

    /// Release our handle. Output the tunnel writes later still lands in
    /// the file.
    pub fn close(&mut self) {
        if self.file.take().is_some() {
            debug!("Closed tunnel log {}", self.path.display());
        }
    }
}
