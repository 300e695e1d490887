//! Configuration management for remocolab

mod desktop;
pub mod serde_utils;
mod tunnel;

pub use desktop::DesktopConfig;
pub use tunnel::{ArgoConfig, NgrokConfig, TunnelConfig};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::layout::SystemLayout;

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("remocolab")
}

/// Get the default configuration file path
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.toml")
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemocolabConfig {
    /// Name of the non-root account created for remote logins
    pub user_name: String,

    /// `ClientAliveInterval` written to sshd_config, in seconds
    pub keep_alive_interval: u32,

    /// Scratch directory for downloads and tunnel logs
    pub work_dir: PathBuf,

    /// Prefix for every system path (`/` outside of tests)
    pub system_root: PathBuf,

    /// Where the external drive is mounted by the notebook
    pub mount_root: PathBuf,

    /// Installed packages starting with these are removed before upgrading
    pub gpu_package_prefixes: Vec<String>,

    /// GPU models that trigger a "reset the runtime" warning
    pub weak_gpu_models: Vec<String>,

    /// Restore the man pages and docs stripped from the minimized image
    pub unminimize: bool,

    pub tunnel: TunnelConfig,

    pub desktop: DesktopConfig,
}

impl Default for RemocolabConfig {
    fn default() -> Self {
        Self {
            user_name: "colab".to_string(),
            keep_alive_interval: 120,
            work_dir: dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("remocolab"),
            system_root: PathBuf::from("/"),
            mount_root: PathBuf::from("/content/drive/MyDrive"),
            gpu_package_prefixes: vec![
                "nvidia-dkms".to_string(),
                "nvidia-kernel-common".to_string(),
            ],
            weak_gpu_models: vec!["Tesla K80".to_string()],
            unminimize: true,
            tunnel: TunnelConfig::default(),
            desktop: DesktopConfig::default(),
        }
    }
}

impl RemocolabConfig {
    /// Layout of the system this configuration provisions
    pub fn layout(&self) -> SystemLayout {
        SystemLayout::new(&self.system_root)
    }

    /// Reject values that would make provisioning do something odd
    pub fn validate(&self) -> Result<(), ConfigError> {
        let name_ok = !self.user_name.is_empty()
            && self
                .user_name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
            && !self.user_name.starts_with('-');
        if !name_ok {
            return Err(ConfigError::Invalid(format!(
                "user_name '{}' is not a valid login name",
                self.user_name
            )));
        }
        if self.user_name == "root" {
            return Err(ConfigError::Invalid(
                "user_name must not be root".to_string(),
            ));
        }
        if self.tunnel.argo.hostname_attempts == 0 {
            return Err(ConfigError::Invalid(
                "tunnel.argo.hostname_attempts must be at least 1".to_string(),
            ));
        }
        self.tunnel.ngrok.warmup.validate("tunnel.ngrok.warmup")?;
        self.tunnel.argo.warmup.validate("tunnel.argo.warmup")?;
        self.desktop.validate()
    }
}

/// Load configuration from a file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

    let config: T = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to a file
pub fn save_config<T: serde::Serialize>(path: &Path, config: &T) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ConfigError::Invalid(format!("Failed to create config dir: {}", e)))?;
    }

    std::fs::write(path, content)
        .map_err(|e| ConfigError::Invalid(format!("Failed to write config: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TunnelKind;
    use std::time::Duration;

    #[test]
    fn test_defaults_roundtrip_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = RemocolabConfig::default();
        save_config(&path, &config).unwrap();
        let loaded: RemocolabConfig = load_config(&path).unwrap();

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
user_name = "student"

[tunnel]
kind = "argo"

[tunnel.argo]
hostname_attempts = 5
hostname_interval = 3
"#,
        )
        .unwrap();

        let config: RemocolabConfig = load_config(&path).unwrap();
        assert_eq!(config.user_name, "student");
        assert_eq!(config.keep_alive_interval, 120);
        assert_eq!(config.tunnel.kind, TunnelKind::Argo);
        assert_eq!(config.tunnel.argo.hostname_attempts, 5);
        assert_eq!(config.tunnel.argo.hostname_interval, Duration::from_secs(3));
        assert_eq!(config.tunnel.argo.metrics_port, 49589);
    }

    #[test]
    fn test_missing_file() {
        let err = load_config::<RemocolabConfig>(Path::new("/nonexistent/remocolab.toml"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_validate_rejects_bad_user() {
        let mut config = RemocolabConfig::default();
        assert!(config.validate().is_ok());

        config.user_name = "root".to_string();
        assert!(config.validate().is_err());

        config.user_name = "Bad Name".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_backoff_multiplier() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[tunnel.ngrok.warmup]
multiplier = -1.0
"#,
        )
        .unwrap();

        let config: RemocolabConfig = load_config(&path).unwrap();
        let err = config.validate().unwrap_err();

        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(err.to_string().contains("tunnel.ngrok.warmup.multiplier"));

        let mut config = RemocolabConfig::default();
        config.tunnel.argo.warmup.multiplier = f64::NAN;
        assert!(config.validate().is_err());
    }
}
