//! Locations of the system files remocolab touches
//!
//! All paths hang off a configurable root (`/` on a real VM) so the whole
//! workflow can be pointed at a scratch directory.

use std::path::{Path, PathBuf};

/// Resolves system paths under a root directory
#[derive(Debug, Clone)]
pub struct SystemLayout {
    root: PathBuf,
}

impl Default for SystemLayout {
    fn default() -> Self {
        Self::new("/")
    }
}

impl SystemLayout {
    /// Create a layout rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root itself
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Join an absolute system path onto the root
    pub fn path(&self, absolute: impl AsRef<Path>) -> PathBuf {
        let rel = absolute
            .as_ref()
            .strip_prefix("/")
            .unwrap_or_else(|_| absolute.as_ref());
        self.root.join(rel)
    }

    pub fn ssh_dir(&self) -> PathBuf {
        self.path("/etc/ssh")
    }

    pub fn sshd_config(&self) -> PathBuf {
        self.path("/etc/ssh/sshd_config")
    }

    /// Public half of the host key whose fingerprint is shown to the user
    pub fn host_key_pub(&self) -> PathBuf {
        self.path("/etc/ssh/ssh_host_ecdsa_key.pub")
    }

    pub fn sudoers_dir(&self) -> PathBuf {
        self.path("/etc/sudoers.d")
    }

    pub fn home(&self, user: &str) -> PathBuf {
        self.path("/home").join(user)
    }

    pub fn xorg_conf(&self) -> PathBuf {
        self.path("/etc/X11/xorg.conf")
    }

    pub fn vnc_security_conf(&self) -> PathBuf {
        self.path("/etc/turbovncserver-security.conf")
    }

    /// ngrok v2 stores the auth token here once `ngrok authtoken` has run
    pub fn ngrok_config(&self) -> PathBuf {
        self.path("/root/.ngrok2/ngrok.yml")
    }
}
