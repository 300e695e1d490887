//! Tunnel configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::serde_utils::duration_secs;
use crate::readiness::ReadinessPolicy;
use crate::types::TunnelKind;

/// Which tunnel to use and how to drive it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    pub kind: TunnelKind,
    pub ngrok: NgrokConfig,
    pub argo: ArgoConfig,
}

/// ngrok settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NgrokConfig {
    /// Auth token from the ngrok dashboard (prompted for when absent)
    pub authtoken: Option<String>,

    /// Region code such as `us` or `jp` (prompted for when absent)
    pub region: Option<String>,

    /// Polling of the local API after the client starts
    pub warmup: ReadinessPolicy,
}

impl Default for NgrokConfig {
    fn default() -> Self {
        Self {
            authtoken: None,
            region: None,
            warmup: ReadinessPolicy::with_timeout(Duration::from_secs(2)),
        }
    }
}

/// Cloudflare Argo Tunnel settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArgoConfig {
    /// Local port for cloudflared's metrics server
    pub metrics_port: u16,

    /// How many times to look for the public hostname
    pub hostname_attempts: u32,

    /// Pause between hostname lookups, in seconds
    #[serde(with = "duration_secs")]
    pub hostname_interval: Duration,

    /// Polling until the metrics server answers
    pub warmup: ReadinessPolicy,
}

impl Default for ArgoConfig {
    fn default() -> Self {
        Self {
            metrics_port: 49589,
            hostname_attempts: 20,
            hostname_interval: Duration::from_secs(10),
            warmup: ReadinessPolicy::with_timeout(Duration::from_secs(4)),
        }
    }
}
