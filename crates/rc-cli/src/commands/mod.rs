//! CLI command implementations

mod config;
mod setup;

pub use config::{config_init, config_path, config_show, load_effective_config, resolve_config_path};
pub use setup::{build_request, read_public_key, setup_command, SetupArgs};
