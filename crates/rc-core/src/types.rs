//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Options every generated ssh command carries.
///
/// The host key changes on every VM, so it is never recorded and the randomart
/// is shown for comparison against the printed fingerprint instead.
pub const SSH_COMMON_OPTIONS: &str = "-o UserKnownHostsFile=/dev/null -o VisualHostKey=yes";

/// Which tunnel client exposes the SSH port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelKind {
    /// ngrok TCP tunnel
    #[default]
    Ngrok,
    /// Cloudflare Argo Tunnel (cloudflared)
    Argo,
}

impl fmt::Display for TunnelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelKind::Ngrok => write!(f, "ngrok"),
            TunnelKind::Argo => write!(f, "argo"),
        }
    }
}

impl FromStr for TunnelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ngrok" => Ok(TunnelKind::Ngrok),
            "argo" | "argotunnel" | "cloudflared" => Ok(TunnelKind::Argo),
            other => Err(format!(
                "unknown tunnel '{}' (expected 'ngrok' or 'argo')",
                other
            )),
        }
    }
}

/// An established tunnel, as far as an SSH client needs to know
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelDescriptor {
    /// Backend that produced this tunnel
    pub kind: TunnelKind,
    /// Externally reachable host name
    pub hostname: String,
    /// Externally reachable port; `None` means port 22 through a proxy command
    pub port: Option<u16>,
    /// ssh options needed to reach the host, including the common ones
    pub ssh_options: String,
}

impl TunnelDescriptor {
    /// Build the ssh command line for `user`, with `extra` options in front of
    /// the destination (e.g. a port forward).
    pub fn ssh_command(&self, user: &str, extra: &str) -> String {
        let mut parts = vec!["ssh".to_string(), self.ssh_options.clone()];
        if !extra.is_empty() {
            parts.push(extra.to_string());
        }
        if let Some(port) = self.port {
            parts.push(format!("-p {}", port));
        }
        parts.push(format!("{}@{}", user, self.hostname));
        parts.join(" ")
    }
}

/// Stage of the provisioning sequence, used to name where a run failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Preflight,
    Packages,
    HostIdentity,
    Mount,
    Tunnel,
    Desktop,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Preflight => write!(f, "pre-flight checks"),
            Stage::Packages => write!(f, "package provisioning"),
            Stage::HostIdentity => write!(f, "host identity setup"),
            Stage::Mount => write!(f, "drive mount"),
            Stage::Tunnel => write!(f, "tunnel setup"),
            Stage::Desktop => write!(f, "desktop setup"),
        }
    }
}

/// Result handed back to the caller of a setup routine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionOutcome {
    /// Whether provisioning ran to completion
    pub success: bool,
    /// Human-readable instructions or guidance
    pub message: String,
}

impl ProvisionOutcome {
    /// Provisioning finished; `message` holds the connection instructions
    pub fn completed(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    /// A pre-flight check stopped the run before anything was changed
    pub fn declined(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}
