//! `check`: one-off reachability check.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use ci_tunnel::tunnel::{ReachabilityProber, ReqwestProbe};

/// Check command.
pub(crate) async fn cmd_check(url: &str, timeout_secs: u64) -> Result<()> {
    let http = ReqwestProbe::new().with_context(|| "Failed to build HTTP client")?;
    let prober = ReachabilityProber::new(Arc::new(http));

    if prober
        .verify_reachable(url, Duration::from_secs(timeout_secs))
        .await
    {
        println!("reachable");
        Ok(())
    } else {
        println!("unreachable");
        anyhow::bail!("{} is not reachable", url)
    }
}
