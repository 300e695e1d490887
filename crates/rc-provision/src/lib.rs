//! rc-provision: System provisioning steps for remocolab
//!
//! Each step works through a [`rc_core::ProvisionSession`], so it can run
//! against the real system or against the mock seam in tests.

pub mod desktop;
pub mod error;
pub mod gpu;
pub mod host;
pub mod mount;
pub mod packages;

pub use desktop::setup_desktop;
pub use error::{DesktopError, HostError, MountError, PackageError};
pub use gpu::{detect_gpu, GpuStatus};
pub use host::{setup_host_identity, HostIdentity, HostOptions};
pub use mount::{bind_mount, plan_mount, MountPlan};
pub use packages::PackageTransaction;
