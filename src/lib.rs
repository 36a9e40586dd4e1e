//! # ci-tunnel
//!
//! Expose a local port from a CI job through a LocalXpose tunnel.
//!
//! One job step starts the `loclx` binary, reads its log until a public
//! `*.loclx.io` hostname appears, and checks that the URL answers. The
//! process is left running and its pid recorded; a later step stops it
//! with escalating signals and removes the log.
//!
//! ```rust,no_run
//! use ci_tunnel::tunnel::{cleanup, TunnelLauncher, TunnelRequest};
//!
//! # async fn example() -> ci_tunnel::error::Result<()> {
//! let launcher = TunnelLauncher::new("loclx")?;
//! let tunnel = launcher
//!     .create_tunnel(&TunnelRequest::new(8080).region("eu"))
//!     .await?;
//! println!("Public URL: {}", tunnel.url);
//!
//! // ...later, in the post step:
//! cleanup(&tunnel.handle()).await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod process;
pub mod retry;
pub mod state;
pub mod tunnel;

pub use error::{ProbeError, Result, TunnelError};
