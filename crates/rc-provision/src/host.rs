//! SSH host identity and login account setup
//!
//! Regenerates host keys (the VM image ships with shared ones), hardens
//! sshd_config, creates the login user and gives it either fresh passwords or
//! an authorized public key.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use rc_core::credentials::Credentials;
use rc_core::session::{set_mode, write_private};
use rc_core::traits::CommandSpec;
use rc_core::{ProvisionSession, SystemLayout};

use crate::error::HostError;

/// Key types accepted in an authorized_keys line
const PUBLIC_KEY_TYPES: &[&str] = &[
    "ssh-ed25519",
    "ssh-rsa",
    "ssh-dss",
    "ecdsa-sha2-nistp256",
    "ecdsa-sha2-nistp384",
    "ecdsa-sha2-nistp521",
    "sk-ssh-ed25519@openssh.com",
    "sk-ecdsa-sha2-nistp256@openssh.com",
];

/// What to set up
#[derive(Debug, Clone)]
pub struct HostOptions<'a> {
    pub user_name: &'a str,
    /// When present, the only way in: password authentication is disabled
    pub public_key: Option<&'a str>,
    pub keep_alive_interval: u32,
}

/// Result of the host identity step
#[derive(Debug, Clone)]
pub struct HostIdentity {
    /// `ssh-keygen -lv` output for the ECDSA host key, randomart included
    pub fingerprint: String,
    /// Passwords set for root and the user; empty in public-key mode
    pub credentials: Credentials,
}

/// Whether `name` is one of the host key files `ssh-keygen -A` creates
pub fn is_host_key_file(name: &str) -> bool {
    name.starts_with("ssh_host_") && (name.ends_with("_key") || name.ends_with("_key.pub"))
}

/// Lines appended to sshd_config
pub fn sshd_directives(key_only: bool, keep_alive_interval: u32) -> String {
    let mut directives = format!("\n\nClientAliveInterval {}\n", keep_alive_interval);
    if key_only {
        directives.push_str("PasswordAuthentication no\n");
    }
    directives
}

/// Check that `key` is a single OpenSSH public key line and return it trimmed
pub fn validate_public_key(key: &str) -> Result<String, HostError> {
    let key = key.trim();
    if key.is_empty() || key.contains('\n') {
        return Err(HostError::InvalidPublicKey(
            "expected exactly one key line".to_string(),
        ));
    }

    let mut parts = key.split_whitespace();
    let key_type = parts.next().unwrap_or_default();
    let blob = parts.next().unwrap_or_default();

    if !PUBLIC_KEY_TYPES.contains(&key_type) {
        return Err(HostError::InvalidPublicKey(format!(
            "unsupported key type '{}'",
            key_type
        )));
    }
    let blob_ok = !blob.is_empty()
        && blob
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '/' || c == '=');
    if !blob_ok {
        return Err(HostError::InvalidPublicKey(
            "key data is not base64".to_string(),
        ));
    }

    Ok(key.to_string())
}

/// Delete the image's host keys and generate new ones
pub async fn regenerate_host_keys(session: &ProvisionSession<'_>) -> Result<(), HostError> {
    let ssh_dir = session.layout.ssh_dir();
    if let Ok(entries) = fs::read_dir(&ssh_dir) {
        for entry in entries.flatten() {
            let name = entry.file_name();
            if is_host_key_file(&name.to_string_lossy()) {
                tracing::debug!("Removing old host key {:?}", entry.path());
                fs::remove_file(entry.path()).map_err(|source| HostError::Write {
                    path: entry.path(),
                    source,
                })?;
            }
        }
    }

    let mut spec = CommandSpec::new("ssh-keygen").arg("-A");
    if session.layout.root() != Path::new("/") {
        spec = spec.arg("-f").path_arg(session.layout.root());
    }
    session.runner.run(&spec).await?;
    tracing::info!("Generated new SSH host keys");
    Ok(())
}

/// Fingerprint and randomart of the ECDSA host key
pub async fn host_fingerprint(session: &ProvisionSession<'_>) -> Result<String, HostError> {
    let spec = CommandSpec::new("ssh-keygen")
        .arg("-lvf")
        .path_arg(session.layout.host_key_pub());
    let output = session.runner.run(&spec).await?;
    Ok(output.stdout_str())
}

/// Append `directives` to sshd_config
pub fn append_sshd_config(layout: &SystemLayout, directives: &str) -> Result<(), HostError> {
    let path = layout.sshd_config();
    let write_err = |source| HostError::Write {
        path: path.clone(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(write_err)?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(write_err)?;
    file.write_all(directives.as_bytes()).map_err(write_err)?;
    Ok(())
}

/// Create the login user with a home directory and sudo rights
pub async fn create_user(session: &ProvisionSession<'_>, user: &str) -> Result<(), HostError> {
    session
        .runner
        .run(&CommandSpec::new("useradd").args(["-s", "/bin/bash", "-m", user]))
        .await?;
    session
        .runner
        .run(&CommandSpec::new("usermod").args(["-aG", "sudo", user]))
        .await?;
    tracing::info!("Created user {}", user);
    Ok(())
}

/// Set `user`'s password through chpasswd
pub async fn set_password(
    session: &ProvisionSession<'_>,
    user: &str,
    password: &str,
) -> Result<(), HostError> {
    let spec = CommandSpec::new("chpasswd").stdin(format!("{}:{}\n", user, password));
    session.runner.run(&spec).await?;
    Ok(())
}

/// Install `key` as the only authorized key of `user`
pub async fn install_authorized_key(
    session: &ProvisionSession<'_>,
    user: &str,
    key: &str,
) -> Result<(), HostError> {
    let ssh_dir = session.layout.home(user).join(".ssh");
    let keys_path = ssh_dir.join("authorized_keys");
    let write_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source: std::io::Error| HostError::Write { path, source }
    };

    fs::create_dir_all(&ssh_dir).map_err(write_err(&ssh_dir))?;
    set_mode(&ssh_dir, 0o700).map_err(write_err(&ssh_dir))?;
    write_private(&keys_path, format!("{}\n", key), 0o600).map_err(write_err(&keys_path))?;

    let owner = format!("{0}:{0}", user);
    session
        .runner
        .run(&CommandSpec::new("chown").args(["-R", owner.as_str()]).path_arg(&ssh_dir))
        .await?;
    tracing::info!("Installed public key for {}", user);
    Ok(())
}

/// Let `user` use sudo without a password (it has none in public-key mode)
pub fn grant_passwordless_sudo(layout: &SystemLayout, user: &str) -> Result<(), HostError> {
    let dir = layout.sudoers_dir();
    let path = dir.join(user);
    let write_err = |source| HostError::Write {
        path: path.clone(),
        source,
    };

    fs::create_dir_all(&dir).map_err(write_err)?;
    write_private(&path, format!("{} ALL=(ALL:ALL) NOPASSWD:ALL\n", user), 0o440)
        .map_err(write_err)?;
    Ok(())
}

pub async fn restart_sshd(session: &ProvisionSession<'_>) -> Result<(), HostError> {
    session
        .runner
        .run(&CommandSpec::new("service").args(["ssh", "restart"]))
        .await?;
    Ok(())
}

/// Run the whole host identity step.
///
/// Host keys are regenerated before anything else, so the fingerprint shown
/// to the user always belongs to this VM. sshd is restarted last.
///
/// # Arguments
/// * `session` - Command runner and file layout of the machine
/// * `options` - Account name, keep-alive interval and optional public key
///
/// # Returns
/// The host key fingerprint plus, in password mode, the generated root and
/// user passwords. In public-key mode the credentials are empty and the user
/// gets passwordless sudo instead.
///
/// # Errors
/// `HostError::InvalidPublicKey` before any change is made if the key is
/// malformed; otherwise the first failing command or file write.
pub async fn setup_host_identity(
    session: &ProvisionSession<'_>,
    options: &HostOptions<'_>,
) -> Result<HostIdentity, HostError> {
    let public_key = options.public_key.map(validate_public_key).transpose()?;

    regenerate_host_keys(session).await?;
    append_sshd_config(
        session.layout,
        &sshd_directives(public_key.is_some(), options.keep_alive_interval),
    )?;
    let fingerprint = host_fingerprint(session).await?;

    create_user(session, options.user_name).await?;

    let credentials = match &public_key {
        Some(key) => {
            install_authorized_key(session, options.user_name, key).await?;
            grant_passwordless_sudo(session.layout, options.user_name)?;
            Credentials::default()
        }
        None => {
            let credentials = Credentials::generate_account_passwords();
            if let (Some(root), Some(user)) =
                (&credentials.root_password, &credentials.user_password)
            {
                set_password(session, "root", root).await?;
                set_password(session, options.user_name, user).await?;
            }
            credentials
        }
    };

    restart_sshd(session).await?;

    Ok(HostIdentity {
        fingerprint,
        credentials,
    })
}
