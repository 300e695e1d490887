//! Tunnel errors

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use rc_core::{CommandError, HttpError};

/// Errors while starting a tunnel client or reading its address
#[derive(Error, Debug)]
pub enum TunnelError {
    /// The client process died before the tunnel was up
    #[error("{client} exited with code {code} before the tunnel was established (see {log:?})")]
    ClientExited {
        client: &'static str,
        code: i32,
        log: PathBuf,
    },

    /// The client's local endpoint never answered
    #[error("{client} did not become ready within {waited:?}")]
    NotReady {
        client: &'static str,
        waited: Duration,
    },

    /// cloudflared never reported its public hostname
    #[error("Could not get the hostname of the Argo Tunnel after {attempts} attempts")]
    HostnameUnresolved { attempts: u32 },

    /// ngrok reported a public URL that is not `tcp://host:port`
    #[error("Unexpected public URL from ngrok: {0}")]
    InvalidPublicUrl(String),

    #[error("Unknown ngrok region '{0}' (expected one of: {1})")]
    InvalidRegion(String, String),

    /// ngrok cannot start without an auth token
    #[error("An ngrok authtoken is required")]
    MissingAuthToken,

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("Failed to unpack {path:?}: {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
