//! Remote desktop configuration

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Pinned package versions and display settings for the VNC desktop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DesktopConfig {
    pub libjpeg_turbo_version: String,
    pub virtualgl_version: String,
    pub turbovnc_version: String,

    /// SourceForge mirror serving the three packages above
    pub mirror: String,

    /// Base URL for NVIDIA datacenter driver installers
    pub nvidia_download_base: String,

    /// Size of the virtual screen, `WIDTHxHEIGHT`
    pub virtual_screen: String,
}

impl Default for DesktopConfig {
    fn default() -> Self {
        Self {
            libjpeg_turbo_version: "2.0.3".to_string(),
            virtualgl_version: "2.6.2".to_string(),
            turbovnc_version: "2.2.3".to_string(),
            mirror: "https://svwh.dl.sourceforge.net/project".to_string(),
            nvidia_download_base: "https://us.download.nvidia.com/tesla".to_string(),
            virtual_screen: "1920x1200".to_string(),
        }
    }
}

impl DesktopConfig {
    pub fn libjpeg_turbo_url(&self) -> String {
        format!(
            "{0}/libjpeg-turbo/{1}/libjpeg-turbo-official_{1}_amd64.deb",
            self.mirror, self.libjpeg_turbo_version
        )
    }

    pub fn virtualgl_url(&self) -> String {
        format!(
            "{0}/virtualgl/{1}/virtualgl_{1}_amd64.deb",
            self.mirror, self.virtualgl_version
        )
    }

    pub fn turbovnc_url(&self) -> String {
        format!(
            "{0}/turbovnc/{1}/turbovnc_{1}_amd64.deb",
            self.mirror, self.turbovnc_version
        )
    }

    /// Installer matching a loaded kernel module version
    pub fn nvidia_driver_url(&self, driver_version: &str) -> String {
        format!(
            "{0}/{1}/NVIDIA-Linux-x86_64-{1}.run",
            self.nvidia_download_base, driver_version
        )
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid = self
            .virtual_screen
            .split_once('x')
            .map(|(w, h)| w.parse::<u32>().is_ok() && h.parse::<u32>().is_ok())
            .unwrap_or(false);
        if !valid {
            return Err(ConfigError::Invalid(format!(
                "desktop.virtual_screen '{}' is not WIDTHxHEIGHT",
                self.virtual_screen
            )));
        }
        Ok(())
    }
}
