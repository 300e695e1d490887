//! apt package provisioning
//!
//! A [`PackageTransaction`] collects install and removal marks and applies
//! them with a single apt-get invocation, so the package manager's own
//! all-or-nothing behaviour covers the whole batch.

use std::path::Path;

use rc_core::traits::CommandSpec;
use rc_core::ProvisionSession;

use crate::error::PackageError;

/// Extra options making every apt-get run non-interactive and machine-readable
const APT_OPTIONS: &[&str] = &[
    "-y",
    "-o",
    "APT::Status-Fd=1",
    "-o",
    "Dpkg::Options::=--force-confdef",
    "-o",
    "Dpkg::Options::=--force-confold",
];

/// One line of apt's `APT::Status-Fd` protocol
#[derive(Debug, Clone, PartialEq)]
pub enum AptStatus {
    /// `dlstatus:<item>:<percent>:<description>`
    Fetch { percent: f32, detail: String },
    /// `pmstatus:<package>:<percent>:<description>`
    Install { percent: f32, detail: String },
    /// `pmerror:<package>:<percent>:<message>`
    Error { package: String, detail: String },
}

/// Parse a status line; ordinary apt output yields `None`
pub fn parse_status_line(line: &str) -> Option<AptStatus> {
    let mut fields = line.trim_end().splitn(4, ':');
    let kind = fields.next()?;
    let subject = fields.next()?;
    let percent = fields.next()?.parse::<f32>().ok();
    let detail = fields.next().unwrap_or_default().to_string();

    match kind {
        "dlstatus" => Some(AptStatus::Fetch {
            percent: percent?,
            detail,
        }),
        "pmstatus" => Some(AptStatus::Install {
            percent: percent?,
            detail,
        }),
        "pmerror" => Some(AptStatus::Error {
            package: subject.to_string(),
            detail,
        }),
        _ => None,
    }
}

/// Per-architecture status of a single package, one per line
const STATUS_FORMAT: &str = "-f=${db:Status-Status}\\n";

/// Whether any architecture of a package is installed, given `STATUS_FORMAT`
/// output. Multi-arch packages print one status per architecture.
pub fn reports_installed(statuses: &str) -> bool {
    statuses.lines().any(|status| status.trim() == "installed")
}

/// Installed package names from `dpkg-query -W -f='${Package} ${db:Status-Status}\n'`
pub fn parse_installed_list(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let (name, status) = line.trim().split_once(' ')?;
            (status.trim() == "installed").then(|| name.to_string())
        })
        .collect()
}

/// Packages whose name starts with any of `prefixes`
pub fn select_by_prefix(installed: &[String], prefixes: &[&str]) -> Vec<String> {
    installed
        .iter()
        .filter(|name| prefixes.iter().any(|p| name.starts_with(p)))
        .cloned()
        .collect()
}

fn apt_get(args: &[&str]) -> CommandSpec {
    CommandSpec::new("apt-get")
        .env("DEBIAN_FRONTEND", "noninteractive")
        .args(APT_OPTIONS.iter().copied())
        .args(args.iter().copied())
}

/// Pending package changes for one provisioning session
pub struct PackageTransaction<'a> {
    session: ProvisionSession<'a>,
    to_install: Vec<String>,
    to_remove: Vec<String>,
}

impl<'a> PackageTransaction<'a> {
    pub fn new(session: ProvisionSession<'a>) -> Self {
        Self {
            session,
            to_install: Vec::new(),
            to_remove: Vec::new(),
        }
    }

    /// Packages marked for installation
    pub fn pending_installs(&self) -> &[String] {
        &self.to_install
    }

    /// Packages marked for removal
    pub fn pending_removals(&self) -> &[String] {
        &self.to_remove
    }

    /// Refresh the package indexes and apply available upgrades
    pub async fn refresh_and_upgrade(&mut self) -> Result<(), PackageError> {
        tracing::info!("Refreshing package indexes");
        self.run_apt(apt_get(&["update"])).await?;

        tracing::info!("Upgrading installed packages");
        self.run_apt(apt_get(&["upgrade"])).await?;
        self.session.progress.transaction_complete();
        Ok(())
    }

    /// Whether `name` is currently installed
    pub async fn is_installed(&self, name: &str) -> Result<bool, PackageError> {
        let spec = CommandSpec::new("dpkg-query")
            .args(["-W", STATUS_FORMAT, name]);
        let output = self
            .session
            .runner
            .output(&spec)
            .await
            .map_err(PackageError::Query)?;

        // dpkg-query exits non-zero for packages it has never heard of
        Ok(output.success() && reports_installed(&output.stdout_str()))
    }

    /// Mark packages for installation, skipping the ones already present
    pub async fn install(&mut self, names: &[&str]) -> Result<(), PackageError> {
        for name in names {
            if self.is_installed(name).await? {
                tracing::info!("{} is already installed", name);
            } else if !self.to_install.iter().any(|n| n == name) {
                tracing::info!("Install {}", name);
                self.to_install.push(name.to_string());
            }
        }
        Ok(())
    }

    /// Install a downloaded `.deb` and its dependencies right away
    pub async fn install_local_package(&mut self, path: &Path) -> Result<(), PackageError> {
        if !path.is_file() {
            return Err(PackageError::MissingFile(path.to_path_buf()));
        }
        // apt-get only treats the argument as a file when it contains a slash
        let arg = if path.is_absolute() {
            path.to_string_lossy().into_owned()
        } else {
            format!("./{}", path.display())
        };

        tracing::info!("Installing local package {}", arg);
        self.run_apt(apt_get(&["install", &arg])).await?;
        self.session.progress.transaction_complete();
        Ok(())
    }

    /// Every installed package name
    pub async fn installed_packages(&self) -> Result<Vec<String>, PackageError> {
        let spec = CommandSpec::new("dpkg-query")
            .args(["-W", "-f=${Package} ${db:Status-Status}\\n"]);
        let output = self
            .session
            .runner
            .run(&spec)
            .await
            .map_err(PackageError::Query)?;
        Ok(parse_installed_list(&output.stdout_str()))
    }

    /// Mark for removal every installed package starting with one of `prefixes`
    pub async fn remove_matching(&mut self, prefixes: &[&str]) -> Result<Vec<String>, PackageError> {
        let installed = self.installed_packages().await?;
        let selected = select_by_prefix(&installed, prefixes);

        for name in &selected {
            tracing::info!("Remove {}", name);
            if !self.to_remove.contains(name) {
                self.to_remove.push(name.clone());
            }
        }
        Ok(selected)
    }

    /// Apply every pending mark in one apt-get transaction
    pub async fn commit(&mut self) -> Result<(), PackageError> {
        if self.to_install.is_empty() && self.to_remove.is_empty() {
            tracing::debug!("Nothing to commit");
            return Ok(());
        }

        // `name-` asks apt-get install to remove that package instead
        let mut args = vec!["install".to_string()];
        args.extend(self.to_install.iter().cloned());
        args.extend(self.to_remove.iter().map(|name| format!("{}-", name)));
        let args: Vec<&str> = args.iter().map(String::as_str).collect();

        tracing::info!(
            "Committing package changes ({} to install, {} to remove)",
            self.to_install.len(),
            self.to_remove.len()
        );
        self.run_apt(apt_get(&args)).await?;

        self.to_install.clear();
        self.to_remove.clear();
        self.session.progress.transaction_complete();
        Ok(())
    }

    /// Put back the man pages and docs stripped from a minimized image
    pub async fn restore_minimized_system(&mut self) -> Result<(), PackageError> {
        let spec = CommandSpec::new("unminimize")
            .env("DEBIAN_FRONTEND", "noninteractive")
            .stdin("y\n");
        match self.session.runner.run(&spec).await {
            Ok(_) => Ok(()),
            Err(rc_core::CommandError::Spawn { .. }) => {
                tracing::info!("unminimize not available, image is not minimized");
                Ok(())
            }
            Err(e) => Err(PackageError::Transaction(e)),
        }
    }

    async fn run_apt(&self, spec: CommandSpec) -> Result<(), PackageError> {
        let progress = self.session.progress;
        let mut on_line = |line: &str| match parse_status_line(line) {
            Some(AptStatus::Fetch { percent, detail }) => progress.fetch_progress(percent, &detail),
            Some(AptStatus::Install { percent, detail }) => {
                progress.install_progress(percent, &detail)
            }
            Some(AptStatus::Error { package, detail }) => {
                tracing::warn!("{}: {}", package, detail)
            }
            None => tracing::trace!("apt: {}", line),
        };

        tracing::debug!("exec: {}", spec);
        self.session
            .runner
            .run_streaming(&spec, &mut on_line)
            .await
            .and_then(|output| output.check(&spec))
            .map(|_| ())
            .map_err(PackageError::Transaction)
    }
}

impl Drop for PackageTransaction<'_> {
    fn drop(&mut self) {
        if !self.to_install.is_empty() || !self.to_remove.is_empty() {
            tracing::warn!(
                "Package transaction dropped with uncommitted changes: install {:?}, remove {:?}",
                self.to_install,
                self.to_remove
            );
        }
    }
}
