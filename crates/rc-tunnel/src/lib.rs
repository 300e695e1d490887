//! rc-tunnel: Exposing the VM's SSH port to the internet
//!
//! Two backends are supported: an ngrok TCP tunnel, which yields a host and
//! port, and a Cloudflare Argo quick tunnel, which yields a hostname reached
//! through `cloudflared access ssh` on the client side.

pub mod argo;
pub mod error;
pub mod ngrok;

pub use error::TunnelError;

use rc_core::config::TunnelConfig;
use rc_core::{ProvisionSession, TunnelDescriptor, TunnelKind};

/// ngrok account parameters
#[derive(Clone, PartialEq, Eq)]
pub struct NgrokAuth {
    pub authtoken: String,
    pub region: String,
}

impl std::fmt::Debug for NgrokAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NgrokAuth")
            .field("authtoken", &"<redacted>")
            .field("region", &self.region)
            .finish()
    }
}

/// Which tunnel to open, with the parameters it needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelRequest {
    pub kind: TunnelKind,
    /// Required for ngrok, ignored for Argo
    pub ngrok: Option<NgrokAuth>,
}

impl TunnelRequest {
    pub fn ngrok(authtoken: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            kind: TunnelKind::Ngrok,
            ngrok: Some(NgrokAuth {
                authtoken: authtoken.into(),
                region: region.into(),
            }),
        }
    }

    pub fn argo() -> Self {
        Self {
            kind: TunnelKind::Argo,
            ngrok: None,
        }
    }
}

/// Start the requested tunnel client and wait until its public address is known
///
/// # Arguments
/// * `session` - Used to download the client and to poll its local endpoints
/// * `request` - Tunnel kind, plus token and region for ngrok
/// * `config` - Readiness budgets and ports for both clients
///
/// # Returns
/// The public host and port that forward to the local sshd.
///
/// # Errors
/// * `TunnelError::MissingAuthToken` - ngrok was requested without a token
/// * `TunnelError::ClientExited` - the client quit while starting
/// * `TunnelError::NotReady` / `HostnameUnresolved` - the address never showed up
pub async fn establish(
    session: &ProvisionSession<'_>,
    request: &TunnelRequest,
    config: &TunnelConfig,
) -> Result<TunnelDescriptor, TunnelError> {
    let tunnel = match request.kind {
        TunnelKind::Ngrok => {
            let auth = request.ngrok.as_ref().ok_or(TunnelError::MissingAuthToken)?;
            ngrok::start(session, auth, &config.ngrok).await?
        }
        TunnelKind::Argo => argo::start(session, &config.argo).await?,
    };

    tracing::info!("{} tunnel is up at {}", tunnel.kind, tunnel.hostname);
    Ok(tunnel)
}
