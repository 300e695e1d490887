//! The provisioning sequence behind `remocolab sshd` and `remocolab vnc`
//!
//! Pre-flight checks run first and may decline the run without touching the
//! system. After that every step is awaited in order and the first failure
//! aborts the rest, reported as a [`StageFailure`] naming the step.

use std::error::Error as StdError;
use std::fmt::Write as _;

use rc_core::config::RemocolabConfig;
use rc_core::credentials::{Credentials, VncPasswords};
use rc_core::{ProvisionOutcome, ProvisionSession, Stage, TunnelDescriptor, TunnelKind};
use rc_provision::{
    bind_mount, detect_gpu, plan_mount, setup_desktop, setup_host_identity, GpuStatus,
    HostOptions, MountPlan, PackageTransaction,
};
use rc_tunnel::ngrok::{validate_region, NGROK_REGIONS};
use rc_tunnel::{establish, TunnelRequest};

use crate::output::{print_info, print_warning};
use crate::prompt::Prompter;

/// Packages sshd needs
const SSH_PACKAGES: &[&str] = &["openssh-server"];

/// Local port TurboVNC's first display listens on
pub const VNC_PORT: u16 = 5901;

const SCISSORS: &str = "✂️";

/// Where to get the client side of an Argo tunnel
const CLOUDFLARED_DOWNLOAD_PAGE: &str =
    "https://developers.cloudflare.com/cloudflare-one/connections/connect-networks/downloads/";

/// Everything the sequence runs against
#[derive(Clone, Copy)]
pub struct Environment<'a> {
    pub session: ProvisionSession<'a>,
    pub prompter: &'a dyn Prompter,
    pub config: &'a RemocolabConfig,
}

/// Directory of the mounted drive to expose in the user's home
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountRequest {
    /// Mount point name inside the home directory
    pub target_name: String,
    /// Directory on the drive, relative to its root
    pub source_subdir: String,
}

/// Options of one setup run; unset values fall back to the configuration
#[derive(Debug, Clone, Default)]
pub struct SetupRequest {
    pub tunnel: Option<TunnelKind>,
    /// Ask before continuing on a VM without a usable GPU
    pub check_gpu: bool,
    pub mount: Option<MountRequest>,
    /// Public-key only login instead of generated passwords
    pub public_key: Option<String>,
    pub ngrok_authtoken: Option<String>,
    pub ngrok_region: Option<String>,
}

/// A provisioning step failed; the steps after it were not run
#[derive(Debug, thiserror::Error)]
#[error("{stage} failed: {source}")]
pub struct StageFailure {
    pub stage: Stage,
    #[source]
    pub source: Box<dyn StdError + Send + Sync>,
}

impl StageFailure {
    fn at<E>(stage: Stage) -> impl FnOnce(E) -> StageFailure
    where
        E: StdError + Send + Sync + 'static,
    {
        move |e| StageFailure {
            stage,
            source: Box::new(e),
        }
    }
}

/// Result of the pre-flight checks
enum Preflight {
    Proceed {
        gpu: GpuStatus,
        mount: Option<MountPlan>,
        tunnel: TunnelRequest,
    },
    Declined(String),
}

/// Provision sshd and the tunnel
///
/// # Returns
/// * `ProvisionOutcome::declined` - a pre-flight check said no and nothing on
///   the system was touched
/// * `ProvisionOutcome::completed` - everything is running; the message holds
///   the connection instructions
///
/// A failing stage is reported as [`StageFailure`] naming that stage.
pub async fn setup_sshd(
    env: &Environment<'_>,
    request: &SetupRequest,
) -> Result<ProvisionOutcome, StageFailure> {
    run_setup(env, request, false).await
}

/// Provision sshd, the tunnel and a TurboVNC desktop
pub async fn setup_vnc(
    env: &Environment<'_>,
    request: &SetupRequest,
) -> Result<ProvisionOutcome, StageFailure> {
    run_setup(env, request, true).await
}

async fn run_setup(
    env: &Environment<'_>,
    request: &SetupRequest,
    with_desktop: bool,
) -> Result<ProvisionOutcome, StageFailure> {
    let (gpu, mount, tunnel_request) = match preflight(env, request, with_desktop).await? {
        Preflight::Proceed { gpu, mount, tunnel } => (gpu, mount, tunnel),
        Preflight::Declined(message) => {
            tracing::info!("Setup declined during pre-flight checks");
            return Ok(ProvisionOutcome::declined(message));
        }
    };

    let session = &env.session;
    let config = env.config;
    let user = config.user_name.as_str();

    tracing::info!("Provisioning packages");
    provision_packages(session, config, mount.is_some())
        .await
        .map_err(StageFailure::at(Stage::Packages))?;

    tracing::info!("Setting up host identity");
    let host = setup_host_identity(
        session,
        &HostOptions {
            user_name: user,
            public_key: request.public_key.as_deref(),
            keep_alive_interval: config.keep_alive_interval,
        },
    )
    .await
    .map_err(StageFailure::at(Stage::HostIdentity))?;
    let mut credentials = host.credentials;

    if let Some(plan) = &mount {
        tracing::info!("Mounting {:?}", plan.source);
        bind_mount(session, user, plan)
            .await
            .map_err(StageFailure::at(Stage::Mount))?;
    }

    tracing::info!("Starting {} tunnel", tunnel_request.kind);
    let tunnel = establish(session, &tunnel_request, &config.tunnel)
        .await
        .map_err(StageFailure::at(Stage::Tunnel))?;

    if with_desktop {
        tracing::info!("Setting up the VNC desktop");
        let vnc = setup_desktop(session, &config.desktop, user, &gpu)
            .await
            .map_err(StageFailure::at(Stage::Desktop))?;
        credentials.vnc = Some(vnc);
    }

    let message = compose_message(&host.fingerprint, &credentials, &tunnel, user);
    Ok(ProvisionOutcome::completed(message))
}

/// Checks that can still stop the run before anything is changed
async fn preflight(
    env: &Environment<'_>,
    request: &SetupRequest,
    with_desktop: bool,
) -> Result<Preflight, StageFailure> {
    let config = env.config;
    let prompt_err = StageFailure::at::<std::io::Error>;

    let gpu = if request.check_gpu || with_desktop {
        detect_gpu(env.session.runner, &config.weak_gpu_models).await
    } else {
        GpuStatus::Absent
    };

    if request.check_gpu {
        let warning = match &gpu {
            GpuStatus::Absent => Some("This is not a runtime with GPU".to_string()),
            GpuStatus::Weak(model) => Some(format!(
                "Warning! GPU of your assigned virtual machine is {}.\n\
                 You might get better GPU by reseting the runtime.",
                model
            )),
            GpuStatus::Available(model) => {
                tracing::info!("GPU: {}", model);
                None
            }
        };
        if let Some(warning) = warning {
            print_warning(&warning);
            let proceed = env
                .prompter
                .confirm("Do you want to continue? [y/n]")
                .map_err(prompt_err(Stage::Preflight))?;
            if !proceed {
                return Ok(Preflight::Declined(warning));
            }
        }
    }

    let mount = match &request.mount {
        Some(m) => match plan_mount(
            env.session.layout,
            &config.mount_root,
            &config.user_name,
            &m.source_subdir,
            &m.target_name,
        ) {
            Ok(plan) => Some(plan),
            Err(e) => return Ok(Preflight::Declined(e.to_string())),
        },
        None => None,
    };

    let kind = request.tunnel.unwrap_or(config.tunnel.kind);
    let tunnel = match kind {
        TunnelKind::Argo => TunnelRequest::argo(),
        TunnelKind::Ngrok => {
            let token = match request
                .ngrok_authtoken
                .clone()
                .or_else(|| config.tunnel.ngrok.authtoken.clone())
            {
                Some(token) => token,
                None => env
                    .prompter
                    .ask("Copy&paste your tunnel authtoken from https://dashboard.ngrok.com/auth")
                    .map_err(prompt_err(Stage::Preflight))?,
            };
            let token = token.trim().to_string();
            if token.is_empty() {
                return Ok(Preflight::Declined(
                    "An ngrok authtoken is required to open the tunnel".to_string(),
                ));
            }

            let region = match request
                .ngrok_region
                .clone()
                .or_else(|| config.tunnel.ngrok.region.clone())
            {
                Some(region) => region,
                None => env
                    .prompter
                    .ask(&region_question())
                    .map_err(prompt_err(Stage::Preflight))?,
            };
            let region = region.trim().to_string();
            if let Err(e) = validate_region(&region) {
                return Ok(Preflight::Declined(e.to_string()));
            }

            TunnelRequest::ngrok(token, region)
        }
    };

    Ok(Preflight::Proceed { gpu, mount, tunnel })
}

fn region_question() -> String {
    let mut question = String::from("Select your ngrok region:\n");
    for (code, name) in NGROK_REGIONS {
        let _ = writeln!(question, "{} - {}", code, name);
    }
    question.push_str("Enter the region code:");
    question
}

/// Remove GPU kernel-module packages that break upgrades on this image, bring
/// the system up to date and install sshd (and bindfs when mounting).
async fn provision_packages(
    session: &ProvisionSession<'_>,
    config: &RemocolabConfig,
    mounting: bool,
) -> Result<(), rc_provision::PackageError> {
    let mut tx = PackageTransaction::new(*session);

    let prefixes: Vec<&str> = config.gpu_package_prefixes.iter().map(String::as_str).collect();
    let removed = tx.remove_matching(&prefixes).await?;
    if !removed.is_empty() {
        print_info(&format!("Removing {}", removed.join(", ")));
    }
    tx.commit().await?;

    tx.refresh_and_upgrade().await?;
    if config.unminimize {
        tx.restore_minimized_system().await?;
    }

    tx.install(SSH_PACKAGES).await?;
    if mounting {
        tx.install(&["bindfs"]).await?;
    }
    tx.commit().await
}

fn scissors_line() -> String {
    SCISSORS.repeat(24)
}

/// Connection instructions shown once everything is up
pub fn compose_message(
    fingerprint: &str,
    credentials: &Credentials,
    tunnel: &TunnelDescriptor,
    user: &str,
) -> String {
    let cut = scissors_line();
    let mut msg = String::new();

    let _ = writeln!(msg, "ECDSA key fingerprint of host:");
    let _ = writeln!(msg, "{}", fingerprint.trim_end());

    if let (Some(root), Some(user_pw)) = (&credentials.root_password, &credentials.user_password) {
        let _ = writeln!(msg, "{}", cut);
        let _ = writeln!(msg, "root password: {}", root);
        let _ = writeln!(msg, "{} password: {}", user, user_pw);
        let _ = writeln!(msg, "{}", cut);
    }

    if let Some(VncPasswords {
        password,
        view_only_password,
    }) = &credentials.vnc
    {
        let _ = writeln!(msg, "{}", cut);
        let _ = writeln!(msg, "VNC password: {}", password);
        let _ = writeln!(msg, "VNC view only password: {}", view_only_password);
        let _ = writeln!(msg, "{}", cut);
    }

    if tunnel.kind == TunnelKind::Argo {
        let _ = writeln!(msg, "---");
        let _ = writeln!(
            msg,
            "cloudflared must be installed on the client machine: {}",
            CLOUDFLARED_DOWNLOAD_PAGE
        );
    }

    let _ = writeln!(msg, "---");
    let _ = writeln!(msg, "Command to connect to the ssh server:");
    let _ = writeln!(msg, "{}", cut);
    let _ = writeln!(msg, "{}", tunnel.ssh_command(user, ""));
    let _ = writeln!(msg, "{}", cut);

    let _ = writeln!(msg, "---");
    let _ = writeln!(msg, "If you use VNC:");
    let _ = writeln!(msg, "{}", cut);
    let forward = format!("-L {0}:localhost:{0}", VNC_PORT);
    let _ = writeln!(msg, "{}", tunnel.ssh_command(user, &forward));
    let _ = writeln!(msg, "{}", cut);

    msg
}
