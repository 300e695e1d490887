//! The provisioning session handed to every step
//!
//! Bundles the OS seam (commands, HTTP, progress) with the file layout and
//! scratch directory, so no step reaches for global state.

use std::path::{Path, PathBuf};

use crate::error::HttpError;
use crate::layout::SystemLayout;
use crate::traits::{CommandRunner, HttpClient, ProgressReporter};

/// Everything a provisioning step needs to touch the system
#[derive(Clone, Copy)]
pub struct ProvisionSession<'a> {
    pub runner: &'a dyn CommandRunner,
    pub http: &'a dyn HttpClient,
    pub progress: &'a dyn ProgressReporter,
    pub layout: &'a SystemLayout,
    /// Scratch directory for downloads and logs
    pub work_dir: &'a Path,
}

impl<'a> ProvisionSession<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        http: &'a dyn HttpClient,
        progress: &'a dyn ProgressReporter,
        layout: &'a SystemLayout,
        work_dir: &'a Path,
    ) -> Self {
        Self {
            runner,
            http,
            progress,
            layout,
            work_dir,
        }
    }

    /// Path of `name` inside the scratch directory
    pub fn work_path(&self, name: &str) -> PathBuf {
        self.work_dir.join(name)
    }

    /// Download `url` into the scratch directory as `name`
    pub async fn download(&self, url: &str, name: &str) -> Result<PathBuf, HttpError> {
        let dest = self.work_path(name);
        std::fs::create_dir_all(self.work_dir).map_err(|source| HttpError::Write {
            path: self.work_dir.to_path_buf(),
            source,
        })?;
        self.http.download(url, &dest).await?;
        Ok(dest)
    }
}

/// Write `contents` to `path`, creating the file with `mode` so it is never
/// readable by others, not even briefly. An existing file is truncated and
/// has its mode reset.
pub fn write_private(path: &Path, contents: impl AsRef<[u8]>, mode: u32) -> std::io::Result<()> {
    use std::io::Write;

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    let mut file = options.open(path)?;
    set_mode(path, mode)?;
    file.write_all(contents.as_ref())
}

/// Set Unix permission bits on `path`
pub fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    {
        let _ = (path, mode);
    }
    Ok(())
}
