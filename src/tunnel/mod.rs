//! Tunnel lifecycle: launch, address discovery, verification, teardown.
//!
//! - [`launcher`] spawns the detached `loclx` process and drives the rest
//! - [`extract`] polls the process log for the public hostname
//! - [`probe`] confirms the hostname actually serves traffic
//! - [`shutdown`] stops the process by pid in a later phase
//!
//! # Usage
//!
//! ```rust,no_run
//! use ci_tunnel::config::TunnelConfig;
//! use ci_tunnel::tunnel::{cleanup, create_tunnel, TunnelRequest};
//!
//! # async fn example() -> ci_tunnel::error::Result<()> {
//! let config = TunnelConfig::default();
//! let tunnel = create_tunnel(&config, &TunnelRequest::new(8080)).await?;
//! println!("Public URL: {}", tunnel.url);
//! cleanup(&tunnel.handle()).await;
//! # Ok(())
//! # }
//! ```

pub mod extract;
pub mod launcher;
pub mod probe;
pub mod shutdown;
pub mod sink;
pub mod types;

pub use extract::{extract_hostname, AddressWatcher};
pub use launcher::{LaunchOptions, TunnelLauncher};
pub use probe::{HttpProbe, ReachabilityProber, ReqwestProbe};
pub use shutdown::{cleanup, ShutdownOutcome, ShutdownSequencer};
pub use types::{Protocol, TunnelAddress, TunnelHandle, TunnelRequest, TunnelResult};

use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::TunnelConfig;
use crate::error::{Result, TunnelError};

/// Create a tunnel using the binary and timeouts from `config`.
pub async fn create_tunnel(config: &TunnelConfig, request: &TunnelRequest) -> Result<TunnelResult> {
    ensure_binary(&config.binary)?;
    info!("Using tunnel binary {}", config.binary.display());

    TunnelLauncher::new(config.binary.clone())?
        .with_options(LaunchOptions::from(config))
        .create_tunnel(request)
        .await
}

/// Fail early with a readable message when the binary cannot be found.
///
/// Bare names are looked up on `PATH`; anything with a directory component
/// must exist as given.
fn ensure_binary(binary: &Path) -> Result<()> {
    let found = if binary.components().count() > 1 {
        binary.is_file()
    } else {
        find_on_path(binary).is_some()
    };
    if found {
        Ok(())
    } else {
        Err(TunnelError::Config(format!(
            "Tunnel binary '{}' not found. Install LocalXpose or set CI_TUNNEL_BINARY",
            binary.display()
        )))
    }
}

/// First `PATH` entry holding a file called `name` (or `name.exe` on
/// Windows).
fn find_on_path(name: &Path) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var).find_map(|dir| {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
        let exe = candidate.with_extension("exe");
        (cfg!(windows) && exe.is_file()).then_some(exe)
    })
}
