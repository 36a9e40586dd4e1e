//! Tunnel request and result types.
//!
//! A [`TunnelRequest`] goes in, a [`TunnelResult`] comes out, and the
//! [`TunnelHandle`] inside it is all teardown needs later.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TunnelError};

/// Tunnel protocol passed to the tunnel binary.
///
/// Only `http` is exercised end to end; the others are forwarded as-is
/// with a warning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Http,
    Https,
    Tcp,
    Tls,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
            Protocol::Tcp => "tcp",
            Protocol::Tls => "tls",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = TunnelError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Protocol::Http),
            "https" => Ok(Protocol::Https),
            "tcp" => Ok(Protocol::Tcp),
            "tls" => Ok(Protocol::Tls),
            other => Err(TunnelError::Config(format!(
                "Unknown tunnel protocol '{}'. Supported: http, https, tcp, tls",
                other
            ))),
        }
    }
}

/// What to expose and how.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelRequest {
    /// Local port to forward to.
    pub port: u16,
    #[serde(default)]
    pub protocol: Protocol,
    /// Relay region code, e.g. `us` or `eu`.
    #[serde(default)]
    pub region: Option<String>,
    /// Reserved subdomain; requires an authorised token.
    #[serde(default)]
    pub subdomain: Option<String>,
    /// Access token, handed to the child through its environment only.
    #[serde(default, skip_serializing)]
    pub token: Option<String>,
}

impl TunnelRequest {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            ..Default::default()
        }
    }

    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn subdomain(mut self, subdomain: impl Into<String>) -> Self {
        self.subdomain = Some(subdomain.into());
        self
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Reject unusable requests and drop blank optional fields.
    pub fn validate(mut self) -> Result<Self> {
        if self.port == 0 {
            return Err(TunnelError::Config(
                "Tunnel port must be between 1 and 65535".into(),
            ));
        }
        self.region = non_blank(self.region);
        self.subdomain = non_blank(self.subdomain);
        self.token = non_blank(self.token);
        Ok(self)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl fmt::Debug for TunnelRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelRequest")
            .field("port", &self.port)
            .field("protocol", &self.protocol)
            .field("region", &self.region)
            .field("subdomain", &self.subdomain)
            .field("token", &self.token.as_ref().map(|_| "***"))
            .finish()
    }
}

/// The only link to a detached tunnel process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelHandle {
    pub pid: u32,
    pub log_path: PathBuf,
}

/// A live, verified tunnel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelResult {
    pub url: String,
    pub hostname: String,
    pub pid: u32,
    pub log_path: PathBuf,
}

impl TunnelResult {
    pub fn handle(&self) -> TunnelHandle {
        TunnelHandle {
            pid: self.pid,
            log_path: self.log_path.clone(),
        }
    }
}

/// Public address recovered from the tunnel log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelAddress {
    pub url: String,
    pub hostname: String,
}

impl TunnelAddress {
    pub fn from_hostname(hostname: impl Into<String>) -> Self {
        let hostname = hostname.into();
        Self {
            url: format!("https://{}", hostname),
            hostname,
        }
    }
}
