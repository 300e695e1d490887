//! Error types for the provisioning steps

use std::path::PathBuf;
use thiserror::Error;

use rc_core::{CommandError, HttpError};

/// Package manager errors
#[derive(Error, Debug)]
pub enum PackageError {
    /// The package database could not be queried
    #[error("Package query failed: {0}")]
    Query(#[source] CommandError),

    /// apt-get failed; nothing is rolled back
    #[error("Package transaction failed: {0}")]
    Transaction(#[source] CommandError),

    /// A local package file is missing
    #[error("Package file not found: {0:?}")]
    MissingFile(PathBuf),
}

/// SSH host identity and user setup errors
#[derive(Error, Debug)]
pub enum HostError {
    #[error(transparent)]
    Command(#[from] CommandError),

    /// The supplied public key is not an OpenSSH public key line
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Failed to write {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// External drive mount errors
#[derive(Error, Debug)]
pub enum MountError {
    /// The drive itself is not mounted in the notebook
    #[error("{0:?} does not exist. Mount your drive in the notebook first.")]
    RootNotMounted(PathBuf),

    /// The requested directory does not exist on the drive
    #[error("{0:?} does not exist on the mounted drive")]
    SourceNotFound(PathBuf),

    /// The requested directory resolves outside the drive
    #[error("{requested:?} resolves to {resolved:?}, which is outside {root:?}")]
    OutsideRoot {
        requested: String,
        resolved: PathBuf,
        root: PathBuf,
    },

    #[error("{0:?} is not a directory")]
    NotADirectory(PathBuf),

    /// The mount point name inside the home directory is unusable
    #[error("Invalid mount point name '{0}': use a plain directory name")]
    InvalidTarget(String),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Remote desktop provisioning errors
#[derive(Error, Debug)]
pub enum DesktopError {
    #[error(transparent)]
    Package(#[from] PackageError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Download(#[from] HttpError),

    /// nvidia-smi answered with something unexpected
    #[error("Unexpected GPU query result: {0}")]
    GpuQuery(String),

    /// xorg.conf has no Device section to bind to the seat
    #[error("No Device section found in {0:?}")]
    NoDeviceSection(PathBuf),

    /// Xorg quit right after starting
    #[error("Xorg exited with {code}; see {log:?}")]
    XorgExited { code: i32, log: PathBuf },

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
