//! Cloudflare Argo quick tunnel
//!
//! `cloudflared tunnel --url ssh://localhost:22` registers a random
//! `*.trycloudflare.com` hostname. The hostname is read from cloudflared's
//! metrics server, which only starts answering once the client is connected.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use rc_core::config::ArgoConfig;
use rc_core::readiness::poll_until;
use rc_core::session::set_mode;
use rc_core::traits::{BackgroundProcess, CommandSpec, HttpClient};
use rc_core::{ProvisionSession, TunnelDescriptor, TunnelKind, SSH_COMMON_OPTIONS};

use crate::error::TunnelError;

pub const CLOUDFLARED_DOWNLOAD_URL: &str =
    "https://github.com/cloudflare/cloudflared/releases/download/2023.8.2/cloudflared-linux-amd64";

/// Metric line carrying the public hostname
pub const HOSTNAME_MARKER: &str = "cloudflared_tunnel_user_hostnames_counts{userHostname=\"https://";

/// The client reaches the tunnel through cloudflared as well
pub const PROXY_COMMAND_OPTION: &str = "-oProxyCommand=\"cloudflared access ssh --hostname %h\"";

#[derive(Debug, Deserialize)]
struct QuickTunnel {
    #[serde(default)]
    hostname: String,
}

fn metrics_url(port: u16, path: &str) -> String {
    format!("http://localhost:{}/{}", port, path)
}

/// Hostname from a `/quicktunnel` response, if it has been assigned yet
pub fn parse_quicktunnel(body: &str) -> Option<String> {
    serde_json::from_str::<QuickTunnel>(body)
        .ok()
        .map(|t| t.hostname)
        .filter(|h| !h.is_empty())
}

/// Hostname from the Prometheus text served at `/metrics`
pub fn extract_user_hostname(metrics: &str) -> Option<String> {
    let start = metrics.find(HOSTNAME_MARKER)? + HOSTNAME_MARKER.len();
    let end = metrics[start..].find('"')?;
    let hostname = &metrics[start..start + end];
    (!hostname.is_empty()).then(|| hostname.to_string())
}

fn exited(process: &mut dyn BackgroundProcess, log: &Path) -> Result<(), TunnelError> {
    match process.try_exit()? {
        Some(code) => Err(TunnelError::ClientExited {
            client: "cloudflared",
            code,
            log: log.to_path_buf(),
        }),
        None => Ok(()),
    }
}

/// One look at the metrics server; fails if the client has already exited
async fn probe_metrics(
    http: &dyn HttpClient,
    url: &str,
    exited: Result<(), TunnelError>,
) -> Result<Option<()>, TunnelError> {
    exited?;
    match http.get_text(url).await {
        Ok(_) => Ok(Some(())),
        Err(e) => {
            tracing::trace!("cloudflared metrics not up yet: {}", e);
            Ok(None)
        }
    }
}

/// Ask cloudflared for the tunnel's hostname, structured endpoint first
async fn lookup_hostname(http: &dyn HttpClient, port: u16) -> Option<String> {
    match http.get_text(&metrics_url(port, "quicktunnel")).await {
        Ok(body) => {
            if let Some(hostname) = parse_quicktunnel(&body) {
                return Some(hostname);
            }
        }
        Err(e) => tracing::debug!("quicktunnel query failed: {}", e),
    }

    match http.get_text(&metrics_url(port, "metrics")).await {
        Ok(body) => extract_user_hostname(&body),
        Err(e) => {
            tracing::debug!("metrics query failed: {}", e);
            None
        }
    }
}

/// Download and start cloudflared, then wait for the tunnel's hostname
pub async fn start(
    session: &ProvisionSession<'_>,
    config: &ArgoConfig,
) -> Result<TunnelDescriptor, TunnelError> {
    tracing::info!("Downloading cloudflared");
    let binary = session
        .download(CLOUDFLARED_DOWNLOAD_URL, "cloudflared")
        .await?;
    set_mode(&binary, 0o755).map_err(|source| TunnelError::Io {
        path: binary.clone(),
        source,
    })?;

    let log = session.work_path("cloudflared.log");
    let spec = CommandSpec::new(binary.to_string_lossy())
        .args(["tunnel", "--url", "ssh://localhost:22", "--logfile"])
        .path_arg(&log)
        .arg("--metrics")
        .arg(format!("localhost:{}", config.metrics_port));
    let mut process = session.runner.spawn(&spec)?;

    let metrics = metrics_url(config.metrics_port, "metrics");
    poll_until(&config.warmup, || {
        let status = exited(process.as_mut(), &log);
        probe_metrics(session.http, &metrics, status)
    })
    .await?
    .ok_or(TunnelError::NotReady {
        client: "cloudflared",
        waited: config.warmup.timeout,
    })?;

    tracing::info!(
        "Waiting up to {:?} for the Argo Tunnel hostname",
        hostname_budget(config)
    );
    let hostname = wait_for_hostname(session.http, process.as_mut(), &log, config).await?;
    Ok(TunnelDescriptor {
        kind: TunnelKind::Argo,
        hostname,
        port: None,
        ssh_options: format!("{} {}", SSH_COMMON_OPTIONS, PROXY_COMMAND_OPTION),
    })
}

/// The hostname shows up some time after the metrics server; retry at a fixed
/// interval up to the configured number of attempts.
async fn wait_for_hostname(
    http: &dyn HttpClient,
    process: &mut dyn BackgroundProcess,
    log: &Path,
    config: &ArgoConfig,
) -> Result<String, TunnelError> {
    for attempt in 1..=config.hostname_attempts {
        exited(process, log)?;
        if let Some(hostname) = lookup_hostname(http, config.metrics_port).await {
            return Ok(hostname);
        }
        tracing::debug!(
            "No Argo hostname yet (attempt {}/{})",
            attempt,
            config.hostname_attempts
        );
        if attempt < config.hostname_attempts {
            tokio::time::sleep(config.hostname_interval).await;
        }
    }

    Err(TunnelError::HostnameUnresolved {
        attempts: config.hostname_attempts,
    })
}

/// Total time spent looking for the hostname before giving up
pub fn hostname_budget(config: &ArgoConfig) -> Duration {
    config.hostname_interval * config.hostname_attempts.saturating_sub(1)
}
