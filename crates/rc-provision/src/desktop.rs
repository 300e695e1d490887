//! VNC desktop provisioning
//!
//! TurboVNC serves an XFCE session; with a GPU attached, VirtualGL renders
//! OpenGL on a headless Xorg server that drives the NVIDIA card.

use std::fs;
use std::path::Path;
use std::time::Duration;

use regex::Regex;

use rc_core::config::DesktopConfig;
use rc_core::credentials::VncPasswords;
use rc_core::session::{set_mode, write_private};
use rc_core::traits::{BackgroundProcess, CommandSpec};
use rc_core::{ProvisionSession, SystemLayout};

use crate::error::DesktopError;
use crate::gpu::{self, GpuStatus};
use crate::packages::PackageTransaction;

/// Only local (tunnelled) connections, no web viewer, no X11 over TCP
pub const VNC_SECURITY_POLICY: &str = "no-remote-connections\nno-httpd\nno-x11-tcp-connections\n";

/// Seat Xorg binds the GPU to; there is no /dev/tty0 to take over on the VM
pub const XORG_SEAT: &str = "seat-1";

const TURBOVNC_BIN: &str = "/opt/TurboVNC/bin";
const VGLSERVER_CONFIG: &str = "/opt/VirtualGL/bin/vglserver_config";

/// Time Xorg gets to fail on a bad BusID or driver mismatch
const XORG_SETTLE: Duration = Duration::from_secs(2);

/// Add a `MatchSeat` line to the first Device section of an xorg.conf.
/// Returns `None` when there is no Device section.
pub fn patch_xorg_device_section(conf: &str, seat: &str) -> Option<String> {
    let device = Regex::new(r#"(?s)(Section "Device".*?)(EndSection)"#).ok()?;
    if !device.is_match(conf) {
        return None;
    }
    let replacement = format!("${{1}}    MatchSeat      \"{}\"\n${{2}}", seat);
    Some(device.replacen(conf, 1, replacement.as_str()).into_owned())
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> DesktopError {
    let path = path.to_path_buf();
    move |source| DesktopError::Io { path, source }
}

/// Restrict TurboVNC to local connections
pub fn write_vnc_security_policy(layout: &SystemLayout) -> Result<(), DesktopError> {
    let path = layout.vnc_security_conf();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_error(parent))?;
    }
    fs::write(&path, VNC_SECURITY_POLICY).map_err(io_error(&path))
}

/// Install libjpeg-turbo, VirtualGL, TurboVNC and XFCE
pub async fn install_desktop_packages(
    session: &ProvisionSession<'_>,
    config: &DesktopConfig,
) -> Result<(), DesktopError> {
    let debs = [
        (config.libjpeg_turbo_url(), "libjpeg-turbo.deb"),
        (config.virtualgl_url(), "virtualgl.deb"),
        (config.turbovnc_url(), "turbovnc.deb"),
    ];

    let mut paths = Vec::with_capacity(debs.len());
    for (url, name) in &debs {
        paths.push(session.download(url, name).await?);
    }

    let mut tx = PackageTransaction::new(*session);
    for path in &paths {
        tx.install_local_package(path).await?;
    }
    tx.install(&["xfce4", "xfce4-terminal"]).await?;
    tx.commit().await?;
    Ok(())
}

/// Install the userspace part of the NVIDIA driver matching the loaded kernel
/// module and configure Xorg for headless rendering through VirtualGL.
pub async fn install_gpu_stack(
    session: &ProvisionSession<'_>,
    config: &DesktopConfig,
) -> Result<(), DesktopError> {
    // The kernel module is loaded by the host and cannot be replaced, so the
    // userspace driver has to match it exactly
    let version = gpu::driver_version(session.runner).await?;
    tracing::info!("Installing NVIDIA userspace driver {}", version);

    let installer = session
        .download(&config.nvidia_driver_url(&version), "nvidia.run")
        .await?;
    set_mode(&installer, 0o755).map_err(io_error(&installer))?;
    session
        .runner
        .run(
            &CommandSpec::new(installer.to_string_lossy())
                .args(["--no-kernel-module", "--ui=none"])
                .stdin("1\n"),
        )
        .await?;

    let bus_id = gpu::xorg_bus_id(session.runner).await?;
    let xorg_conf = session.layout.xorg_conf();
    session
        .runner
        .run(
            &CommandSpec::new("nvidia-xconfig")
                .args([
                    "-a".to_string(),
                    "--allow-empty-initial-configuration".to_string(),
                    format!("--virtual={}", config.virtual_screen),
                    "--busid".to_string(),
                    bus_id,
                ])
                .arg(format!("--output-xconfig={}", xorg_conf.display())),
        )
        .await?;

    let conf = fs::read_to_string(&xorg_conf).map_err(io_error(&xorg_conf))?;
    let patched = patch_xorg_device_section(&conf, XORG_SEAT)
        .ok_or_else(|| DesktopError::NoDeviceSection(xorg_conf.clone()))?;
    fs::write(&xorg_conf, patched).map_err(io_error(&xorg_conf))?;

    session
        .runner
        .run(&CommandSpec::new(VGLSERVER_CONFIG).args(["-config", "+s", "+f"]))
        .await?;
    Ok(())
}

/// Start Xorg on the GPU; it tolerates the missing mouse and never touches a VT
pub fn start_xorg(session: &ProvisionSession<'_>) -> Result<Box<dyn BackgroundProcess>, DesktopError> {
    let spec = CommandSpec::new("Xorg")
        .args([
            "-seat",
            XORG_SEAT,
            "-allowMouseOpenFail",
            "-novtswitch",
            "-nolisten",
            "tcp",
        ])
        .log_file(session.work_path("xorg.log"));
    Ok(session.runner.spawn(&spec)?)
}

/// Give Xorg a moment, then fail if it has already gone away
pub async fn ensure_xorg_running(
    session: &ProvisionSession<'_>,
    xorg: &mut dyn BackgroundProcess,
) -> Result<(), DesktopError> {
    tokio::time::sleep(XORG_SETTLE).await;
    match xorg.try_exit()? {
        Some(code) => Err(DesktopError::XorgExited {
            code,
            log: session.work_path("xorg.log"),
        }),
        None => {
            tracing::info!("Xorg is running on {}", XORG_SEAT);
            Ok(())
        }
    }
}

/// Set VNC passwords for `user`, disable the screensaver and start TurboVNC
pub async fn start_vnc_session(
    session: &ProvisionSession<'_>,
    user: &str,
) -> Result<VncPasswords, DesktopError> {
    let passwords = VncPasswords::generate();
    let home = session.layout.home(user);
    let vnc_dir = home.join(".vnc");
    let passwd_path = vnc_dir.join("passwd");

    let encoded = session
        .runner
        .run(
            &CommandSpec::new(format!("{}/vncpasswd", TURBOVNC_BIN))
                .arg("-f")
                .stdin(passwords.vncpasswd_input()),
        )
        .await?
        .stdout;

    fs::create_dir_all(&vnc_dir).map_err(io_error(&vnc_dir))?;
    write_private(&passwd_path, &encoded, 0o600).map_err(io_error(&passwd_path))?;

    let screensaver = home.join(".xscreensaver");
    fs::write(&screensaver, "mode: off\n").map_err(io_error(&screensaver))?;

    let owner = format!("{0}:{0}", user);
    session
        .runner
        .run(
            &CommandSpec::new("chown")
                .args(["-R", owner.as_str()])
                .path_arg(&vnc_dir)
                .path_arg(&screensaver),
        )
        .await?;

    session
        .runner
        .run(&CommandSpec::new(format!("{}/vncserver", TURBOVNC_BIN)).as_user(user))
        .await?;
    tracing::info!("VNC server started for {}", user);

    Ok(passwords)
}

/// Run the whole desktop step
///
/// # Arguments
/// * `config` - Package versions and the virtual screen size
/// * `user` - Account that owns the VNC session
/// * `gpu` - With a GPU present the NVIDIA driver, Xorg and VirtualGL are
///   set up too
///
/// # Returns
/// The full-control and view-only VNC passwords.
pub async fn setup_desktop(
    session: &ProvisionSession<'_>,
    config: &DesktopConfig,
    user: &str,
    gpu: &GpuStatus,
) -> Result<VncPasswords, DesktopError> {
    install_desktop_packages(session, config).await?;
    write_vnc_security_policy(session.layout)?;

    if gpu.is_present() {
        install_gpu_stack(session, config).await?;
        let mut xorg = start_xorg(session)?;
        ensure_xorg_running(session, xorg.as_mut()).await?;
    } else {
        tracing::info!("No GPU, skipping hardware-accelerated rendering");
    }

    start_vnc_session(session, user).await
}
