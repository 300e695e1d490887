//! Fresh random credentials for each provisioning run
//!
//! Nothing here is persisted: passwords live in memory until they have been
//! shown to the user once.

use rand::rngs::OsRng;
use rand::Rng;
use std::fmt;

/// URL-safe alphabet, the same one base64url uses
const URL_SAFE: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// Length of account passwords (32 random bytes, base64url encoded)
pub const TOKEN_LEN: usize = 43;

/// TurboVNC only looks at the first 8 characters of a password
pub const VNC_PASSWORD_LEN: usize = 8;

/// Generate a url-safe random token of `len` characters from the OS RNG
pub fn generate_token(len: usize) -> String {
    let mut rng = OsRng;
    (0..len)
        .map(|_| URL_SAFE[rng.gen_range(0..URL_SAFE.len())] as char)
        .collect()
}

/// Generate an account password
pub fn generate_password() -> String {
    generate_token(TOKEN_LEN)
}

/// Passwords for the VNC session
#[derive(Clone, PartialEq, Eq)]
pub struct VncPasswords {
    /// Full-control password
    pub password: String,
    /// View-only password
    pub view_only_password: String,
}

impl VncPasswords {
    /// Generate a fresh, distinct pair
    pub fn generate() -> Self {
        let password = generate_token(VNC_PASSWORD_LEN);
        let mut view_only_password = generate_token(VNC_PASSWORD_LEN);
        while view_only_password == password {
            view_only_password = generate_token(VNC_PASSWORD_LEN);
        }
        Self {
            password,
            view_only_password,
        }
    }

    /// Input expected by `vncpasswd -f`: password, then view-only password
    pub fn vncpasswd_input(&self) -> String {
        format!("{}\n{}\n", self.password, self.view_only_password)
    }
}

impl fmt::Debug for VncPasswords {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VncPasswords")
            .field("password", &"<redacted>")
            .field("view_only_password", &"<redacted>")
            .finish()
    }
}

/// Everything secret generated during one run
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub root_password: Option<String>,
    pub user_password: Option<String>,
    pub vnc: Option<VncPasswords>,
}

impl Credentials {
    /// Fresh root and user passwords (password authentication mode)
    pub fn generate_account_passwords() -> Self {
        let root_password = generate_password();
        let mut user_password = generate_password();
        while user_password == root_password {
            user_password = generate_password();
        }
        Self {
            root_password: Some(root_password),
            user_password: Some(user_password),
            vnc: None,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("Credentials")
            .field("root_password", &redact(&self.root_password))
            .field("user_password", &redact(&self.user_password))
            .field("vnc", &self.vnc)
            .finish()
    }
}
