//! `remocolab sshd` and `remocolab vnc`

use std::io::IsTerminal;
use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;

use rc_core::exec::SystemRunner;
use rc_core::http::ReqwestClient;
use rc_core::traits::{LogProgress, ProgressReporter};
use rc_core::{ProvisionSession, TunnelKind};

use crate::commands::load_effective_config;
use crate::orchestrator::{setup_sshd, setup_vnc, Environment, MountRequest, SetupRequest};
use crate::output::{print_success, print_warning, TerminalProgress};
use crate::prompt::StdinPrompter;

/// Options shared by `sshd` and `vnc`
#[derive(Args, Debug, Clone, Default)]
pub struct SetupArgs {
    /// Tunnel exposing sshd: ngrok or argo (overrides config)
    #[arg(long, value_name = "KIND")]
    pub tunnel: Option<TunnelKind>,

    /// ngrok region: us, eu, ap, au, sa, jp or in (asked for when missing)
    #[arg(long)]
    pub region: Option<String>,

    /// ngrok authtoken (asked for when missing)
    #[arg(long, env = "NGROK_AUTHTOKEN", hide_env_values = true)]
    pub ngrok_token: Option<String>,

    /// Mount point name in the user's home for a directory of the mounted drive
    #[arg(long, value_name = "NAME")]
    pub mount_to: Option<String>,

    /// Directory on the mounted drive to expose (default: the whole drive)
    #[arg(long, value_name = "SUBDIR", requires = "mount_to")]
    pub mount_from: Option<String>,

    /// Only allow this public key to log in; no passwords are set
    #[arg(long, value_name = "KEY|@FILE")]
    pub public_key: Option<String>,
}

/// The key itself, or the contents of the file named after `@`
pub fn read_public_key(arg: &str) -> Result<String> {
    match arg.strip_prefix('@') {
        Some(file) => std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read public key file: {}", file)),
        None => Ok(arg.to_string()),
    }
}

/// Turn command-line options into a setup request
pub fn build_request(args: &SetupArgs, check_gpu: bool) -> Result<SetupRequest> {
    let public_key = args
        .public_key
        .as_deref()
        .map(read_public_key)
        .transpose()?;

    let mount = args.mount_to.as_ref().map(|target| MountRequest {
        target_name: target.clone(),
        source_subdir: args.mount_from.clone().unwrap_or_default(),
    });

    Ok(SetupRequest {
        tunnel: args.tunnel,
        check_gpu,
        mount,
        public_key,
        ngrok_authtoken: args.ngrok_token.clone(),
        ngrok_region: args.region.clone(),
    })
}

/// Run the setup against this machine.
///
/// Returns `false` when a pre-flight check declined the run.
pub async fn setup_command(
    config_path: Option<&Path>,
    args: &SetupArgs,
    check_gpu: bool,
    with_desktop: bool,
    quiet: bool,
) -> Result<bool> {
    let config = load_effective_config(config_path)?;
    let request = build_request(args, check_gpu)?;

    let runner = SystemRunner::new();
    let http = ReqwestClient::new().context("Failed to create HTTP client")?;
    // Redrawing a line only makes sense on a terminal
    let progress: Box<dyn ProgressReporter> = if quiet || !std::io::stderr().is_terminal() {
        Box::new(LogProgress)
    } else {
        Box::new(TerminalProgress)
    };
    let layout = config.layout();
    let prompter = StdinPrompter;

    let env = Environment {
        session: ProvisionSession::new(&runner, &http, progress.as_ref(), &layout, &config.work_dir),
        prompter: &prompter,
        config: &config,
    };

    let outcome = if with_desktop {
        setup_vnc(&env, &request).await
    } else {
        setup_sshd(&env, &request).await
    }?;

    if outcome.success {
        print_success("Setup complete");
        println!("{}", outcome.message);
    } else {
        print_warning(&outcome.message);
    }
    Ok(outcome.success)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_public_key_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("id_ed25519.pub");
        std::fs::write(&path, "ssh-ed25519 AAAA me@laptop\n").unwrap();

        let key = read_public_key(&format!("@{}", path.display())).unwrap();

        assert_eq!(key, "ssh-ed25519 AAAA me@laptop\n");
        assert_eq!(read_public_key("ssh-rsa BBBB").unwrap(), "ssh-rsa BBBB");
        assert!(read_public_key("@/nonexistent/key.pub").is_err());
    }

    #[test]
    fn test_build_request_mounts_whole_drive_by_default() {
        let args = SetupArgs {
            mount_to: Some("drive".to_string()),
            tunnel: Some(TunnelKind::Argo),
            ..SetupArgs::default()
        };

        let request = build_request(&args, true).unwrap();

        assert!(request.check_gpu);
        assert_eq!(request.tunnel, Some(TunnelKind::Argo));
        assert_eq!(
            request.mount,
            Some(MountRequest {
                target_name: "drive".to_string(),
                source_subdir: String::new(),
            })
        );
    }
}
