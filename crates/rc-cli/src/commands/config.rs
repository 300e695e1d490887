//! Config command implementations

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::output::{print_error, print_info, print_success};
use rc_core::config::{self, RemocolabConfig};

/// The file `-c` names, or the default location
pub fn resolve_config_path(config_path: Option<&Path>) -> PathBuf {
    config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(config::default_config_path)
}

/// Load and validate the configuration.
///
/// A missing file at the default location means defaults; a missing file
/// named explicitly with `-c` is an error.
pub fn load_effective_config(config_path: Option<&Path>) -> Result<RemocolabConfig> {
    let path = resolve_config_path(config_path);

    let config = if config_path.is_some() || path.exists() {
        config::load_config::<RemocolabConfig>(&path)
            .with_context(|| format!("Failed to load config file: {:?}", path))?
    } else {
        tracing::debug!("No config file at {:?}, using defaults", path);
        RemocolabConfig::default()
    };

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Show the effective configuration
pub fn config_show(config_path: Option<&Path>) -> Result<()> {
    let path = resolve_config_path(config_path);
    let config = load_effective_config(config_path)?;

    if path.exists() {
        print_info(&format!("Configuration file: {:?}", path));
    } else {
        print_info(&format!("No configuration file at {:?}, showing defaults", path));
    }
    println!();
    println!(
        "{}",
        toml::to_string_pretty(&config).context("Failed to serialize configuration")?
    );
    Ok(())
}

/// Show the config file path
pub fn config_path(config_path: Option<&Path>) -> Result<()> {
    println!("{}", resolve_config_path(config_path).display());
    Ok(())
}

/// Write the default configuration
pub fn config_init(config_path: Option<&Path>, force: bool) -> Result<()> {
    let path = resolve_config_path(config_path);

    if path.exists() && !force {
        print_error(&format!("Config file already exists: {:?}", path));
        print_info("Use --force to overwrite");
        return Ok(());
    }

    config::save_config(&path, &RemocolabConfig::default())
        .with_context(|| format!("Failed to write config file: {:?}", path))?;
    print_success(&format!("Created configuration file: {:?}", path));
    Ok(())
}
