//! `start`: create the tunnel and record it for the post step.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::warn;

use ci_tunnel::config::TunnelConfig;
use ci_tunnel::state::{self, TunnelState};
use ci_tunnel::tunnel::{cleanup, create_tunnel, Protocol, TunnelRequest, TunnelResult};

use super::StartArgs;

/// Machine-readable outcome printed on stdout.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub(crate) enum StartReport {
    Running {
        url: String,
        hostname: String,
        pid: u32,
        log_path: PathBuf,
    },
    Failed {
        message: String,
    },
}

impl From<&TunnelResult> for StartReport {
    fn from(result: &TunnelResult) -> Self {
        StartReport::Running {
            url: result.url.clone(),
            hostname: result.hostname.clone(),
            pid: result.pid,
            log_path: result.log_path.clone(),
        }
    }
}

fn print_report(report: &StartReport) {
    match serde_json::to_string(report) {
        Ok(json) => println!("{}", json),
        Err(e) => warn!("Failed to render status: {}", e),
    }
}

fn build_request(args: StartArgs) -> Result<TunnelRequest> {
    let protocol: Protocol = args.protocol.parse()?;
    Ok(TunnelRequest {
        port: args.port,
        protocol,
        region: args.region,
        subdomain: args.subdomain,
        token: std::env::var(&args.token_env).ok(),
    })
}

/// Start command.
pub(crate) async fn cmd_start(config: &TunnelConfig, args: StartArgs) -> Result<()> {
    let request = build_request(args)?;

    let result = match create_tunnel(config, &request).await {
        Ok(result) => result,
        Err(e) => {
            print_report(&StartReport::Failed {
                message: e.to_string(),
            });
            return Err(e).context("Tunnel creation failed");
        }
    };

    let state_path = config.state_path();
    if let Err(e) = state::save(&state_path, &TunnelState::from(&result)) {
        // Nobody could stop it later, so stop it now.
        cleanup(&result.handle()).await;
        let message = format!("Failed to record tunnel state: {}", e);
        print_report(&StartReport::Failed {
            message: message.clone(),
        });
        anyhow::bail!(message);
    }

    print_report(&StartReport::from(&result));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(protocol: &str) -> StartArgs {
        StartArgs {
            port: 3000,
            protocol: protocol.into(),
            region: Some("us".into()),
            subdomain: None,
            token_env: "CI_TUNNEL_TEST_TOKEN_THAT_IS_NOT_SET".into(),
        }
    }

    #[test]
    fn test_build_request() {
        let request = build_request(args("TCP")).unwrap();
        assert_eq!(request.port, 3000);
        assert_eq!(request.protocol, Protocol::Tcp);
        assert_eq!(request.region.as_deref(), Some("us"));
        assert!(request.token.is_none());
    }

    #[test]
    fn test_build_request_rejects_unknown_protocol() {
        let err = build_request(args("udp")).unwrap_err();
        assert!(err.to_string().contains("Unknown tunnel protocol"), "got: {}", err);
    }

    #[test]
    fn test_running_report_shape() {
        let result = TunnelResult {
            url: "https://abc.loclx.io".into(),
            hostname: "abc.loclx.io".into(),
            pid: 99,
            log_path: PathBuf::from("/tmp/loclx.log"),
        };
        let json = serde_json::to_value(StartReport::from(&result)).unwrap();
        assert_eq!(json["status"], "running");
        assert_eq!(json["url"], "https://abc.loclx.io");
        assert_eq!(json["pid"], 99);
    }

    #[test]
    fn test_failed_report_shape() {
        let json = serde_json::to_value(StartReport::Failed {
            message: "boom".into(),
        })
        .unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["message"], "boom");
    }
}
