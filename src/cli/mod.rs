//! Command-line surface: `start`, `stop` and `check`.

mod check;
mod start;
mod stop;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::warn;

use ci_tunnel::config::TunnelConfig;

/// Expose a local port from a CI job through a LocalXpose tunnel.
#[derive(Debug, Parser)]
#[command(name = "ci-tunnel", version, about)]
pub(crate) struct Cli {
    /// JSON config file.
    #[arg(long, global = true, env = "CI_TUNNEL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Debug logging, including the tunnel's own output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Start a tunnel and record it for `stop`.
    Start(StartArgs),
    /// Stop the recorded tunnel. Never fails.
    Stop,
    /// Check whether a URL is reachable.
    Check {
        #[arg(long)]
        url: String,
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,
    },
}

#[derive(Debug, Args)]
pub(crate) struct StartArgs {
    /// Local port to expose.
    #[arg(long)]
    pub port: u16,

    /// http, https, tcp or tls.
    #[arg(long, default_value = "http")]
    pub protocol: String,

    /// Relay region code.
    #[arg(long)]
    pub region: Option<String>,

    /// Reserved subdomain.
    #[arg(long)]
    pub subdomain: Option<String>,

    /// Environment variable holding the access token.
    #[arg(long, default_value = ci_tunnel::tunnel::launcher::TOKEN_ENV)]
    pub token_env: String,
}

pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Start(args) => {
            let config = TunnelConfig::load(cli.config.as_deref())
                .with_context(|| "Failed to load configuration")?;
            start::cmd_start(&config, args).await
        }
        Command::Stop => {
            let config = TunnelConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
                warn!("Falling back to default configuration: {}", e);
                TunnelConfig::default()
            });
            stop::cmd_stop(&config).await
        }
        Command::Check { url, timeout_secs } => check::cmd_check(&url, timeout_secs).await,
    }
}
