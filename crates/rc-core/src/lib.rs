//! rc-core: Core abstractions and configuration for remocolab
//!
//! This crate provides the seam between provisioning logic and the operating
//! system (commands, HTTP, progress, file locations), plus shared types,
//! credential generation, readiness polling and configuration.

pub mod config;
pub mod credentials;
pub mod error;
pub mod exec;
pub mod http;
pub mod layout;
pub mod readiness;
pub mod session;
pub mod traits;
pub mod types;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use error::{CommandError, ConfigError, HttpError};
pub use layout::SystemLayout;
pub use session::ProvisionSession;
pub use types::{ProvisionOutcome, Stage, TunnelDescriptor, TunnelKind, SSH_COMMON_OPTIONS};
