//! Exposing a directory of the notebook's mounted drive in the user's home
//!
//! The drive is mounted by the notebook as root; bindfs re-exposes one of its
//! directories owned by the login user. Because a typo here could expose the
//! wrong directory, the source is resolved and confined to the drive first.

use std::fs;
use std::path::{Component, Path, PathBuf};

use rc_core::traits::CommandSpec;
use rc_core::{ProvisionSession, SystemLayout};

use crate::error::MountError;

/// A validated bind-mount
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPlan {
    /// Canonical directory on the drive
    pub source: PathBuf,
    /// Mount point inside the user's home
    pub target: PathBuf,
}

/// The mount point must be a plain directory name inside the home directory
pub fn validate_target_name(name: &str) -> Result<(), MountError> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(MountError::InvalidTarget(name.to_string())),
    }
}

/// Resolve `subdir` under `mount_root`, refusing anything that ends up outside
/// of it (`..`, absolute paths, symlinks) or is not an existing directory.
pub fn resolve_mount_source(mount_root: &Path, subdir: &str) -> Result<PathBuf, MountError> {
    let root = fs::canonicalize(mount_root)
        .map_err(|_| MountError::RootNotMounted(mount_root.to_path_buf()))?;

    let requested = root.join(subdir);
    let resolved = match fs::canonicalize(&requested) {
        Ok(path) => path,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(MountError::SourceNotFound(requested))
        }
        Err(source) => {
            return Err(MountError::Io {
                path: requested,
                source,
            })
        }
    };

    if !resolved.starts_with(&root) {
        return Err(MountError::OutsideRoot {
            requested: subdir.to_string(),
            resolved,
            root,
        });
    }
    if !resolved.is_dir() {
        return Err(MountError::NotADirectory(resolved));
    }
    Ok(resolved)
}

/// Validate both ends of a bind-mount before anything is provisioned
///
/// # Arguments
/// * `mount_root` - Where the notebook mounted the drive
/// * `source_subdir` - Directory on the drive; empty for the whole drive
/// * `target_name` - Plain directory name created in the user's home
///
/// # Returns
/// A [`MountPlan`] whose source is canonical and inside `mount_root`.
pub fn plan_mount(
    layout: &SystemLayout,
    mount_root: &Path,
    user: &str,
    source_subdir: &str,
    target_name: &str,
) -> Result<MountPlan, MountError> {
    validate_target_name(target_name)?;
    let source = resolve_mount_source(mount_root, source_subdir)?;
    Ok(MountPlan {
        source,
        target: layout.home(user).join(target_name),
    })
}

/// Create the mount point and bind the drive directory onto it as `user`
///
/// # Arguments
/// * `session` - Runs `chown` and `bindfs`
/// * `user` - Owner of the mount point; bindfs maps files to this account
/// * `plan` - Source and target checked earlier by [`plan_mount`]
///
/// # Errors
/// `MountError::Io` if the mount point cannot be created, or the command
/// error if `chown` or `bindfs` fails.
pub async fn bind_mount(
    session: &ProvisionSession<'_>,
    user: &str,
    plan: &MountPlan,
) -> Result<(), MountError> {
    fs::create_dir_all(&plan.target).map_err(|source| MountError::Io {
        path: plan.target.clone(),
        source,
    })?;

    let owner = format!("{0}:{0}", user);
    session
        .runner
        .run(&CommandSpec::new("chown").arg(&owner).path_arg(&plan.target))
        .await?;
    session
        .runner
        .run(
            &CommandSpec::new("bindfs")
                .args(["-u", user, "-g", user])
                .path_arg(&plan.source)
                .path_arg(&plan.target),
        )
        .await?;

    tracing::info!("Mounted {:?} at {:?}", plan.source, plan.target);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rc_core::mock::{MockHttp, MockRunner};
    use rc_core::traits::NoopProgress;

    fn drive() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("drive");
        fs::create_dir_all(root.join("projects/thesis")).unwrap();
        fs::write(root.join("notes.txt"), "hi").unwrap();
        fs::create_dir_all(dir.path().join("secrets")).unwrap();
        (dir, root)
    }

    #[test]
    fn test_inside_and_existing_is_accepted() {
        let (_dir, root) = drive();
        let resolved = resolve_mount_source(&root, "projects/thesis").unwrap();
        assert_eq!(resolved, fs::canonicalize(root.join("projects/thesis")).unwrap());

        // Whole drive
        assert!(resolve_mount_source(&root, "").is_ok());
    }

    #[test]
    fn test_outside_root_is_rejected() {
        let (_dir, root) = drive();

        let err = resolve_mount_source(&root, "../secrets").unwrap_err();
        assert!(matches!(err, MountError::OutsideRoot { .. }));

        let abs = _dir.path().join("secrets");
        let err = resolve_mount_source(&root, abs.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, MountError::OutsideRoot { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_is_rejected() {
        let (dir, root) = drive();
        std::os::unix::fs::symlink(dir.path().join("secrets"), root.join("link")).unwrap();

        let err = resolve_mount_source(&root, "link").unwrap_err();
        assert!(matches!(err, MountError::OutsideRoot { .. }));
    }

    #[test]
    fn test_missing_and_non_directories() {
        let (dir, root) = drive();

        assert!(matches!(
            resolve_mount_source(&root, "nope").unwrap_err(),
            MountError::SourceNotFound(_)
        ));
        assert!(matches!(
            resolve_mount_source(&root, "notes.txt").unwrap_err(),
            MountError::NotADirectory(_)
        ));
        assert!(matches!(
            resolve_mount_source(&dir.path().join("unmounted"), "x").unwrap_err(),
            MountError::RootNotMounted(_)
        ));
    }

    #[test]
    fn test_target_names() {
        assert!(validate_target_name("drive").is_ok());
        assert!(validate_target_name("My Drive").is_ok());
        assert!(validate_target_name("").is_err());
        assert!(validate_target_name("..").is_err());
        assert!(validate_target_name("a/b").is_err());
        assert!(validate_target_name("/abs").is_err());
    }

    #[tokio::test]
    async fn test_bind_mount_runs_bindfs() {
        let (dir, root) = drive();
        let layout = SystemLayout::new(dir.path().join("sys"));
        let plan = plan_mount(&layout, &root, "colab", "projects", "drive").unwrap();
        let runner = MockRunner::new();
        let http = MockHttp::new();
        let session = ProvisionSession::new(&runner, &http, &NoopProgress, &layout, dir.path());

        bind_mount(&session, "colab", &plan).await.unwrap();

        assert!(plan.target.is_dir());
        let bindfs = runner.calls_matching(&["bindfs", "-u", "colab", "-g", "colab"]);
        assert_eq!(bindfs.len(), 1);
        assert_eq!(
            bindfs[0].args[4..],
            [
                plan.source.to_string_lossy().to_string(),
                plan.target.to_string_lossy().to_string()
            ]
        );
    }
}
