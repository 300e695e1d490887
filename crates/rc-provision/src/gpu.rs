//! GPU detection through nvidia-smi

use rc_core::traits::{CommandRunner, CommandSpec};

use crate::error::DesktopError;

/// What the VM was given
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GpuStatus {
    /// No NVIDIA GPU (or no working driver)
    Absent,
    /// A GPU known to be markedly slower than the usual assignment
    Weak(String),
    Available(String),
}

impl GpuStatus {
    pub fn is_present(&self) -> bool {
        !matches!(self, GpuStatus::Absent)
    }
}

fn query(field: &str) -> CommandSpec {
    CommandSpec::new("nvidia-smi")
        .arg(format!("--query-gpu={}", field))
        .arg("--format=csv,noheader")
}

/// Classify the first line of `nvidia-smi --query-gpu=name` output
pub fn classify_gpu(name: &str, weak_models: &[String]) -> GpuStatus {
    let name = name.lines().next().unwrap_or_default().trim();
    if name.is_empty() {
        GpuStatus::Absent
    } else if weak_models.iter().any(|m| m == name) {
        GpuStatus::Weak(name.to_string())
    } else {
        GpuStatus::Available(name.to_string())
    }
}

/// Ask nvidia-smi which GPU is attached
pub async fn detect_gpu(runner: &dyn CommandRunner, weak_models: &[String]) -> GpuStatus {
    match runner.output(&query("name")).await {
        Ok(output) if output.success() => classify_gpu(&output.stdout_str(), weak_models),
        Ok(output) => {
            tracing::debug!("nvidia-smi exited with {:?}", output.code);
            GpuStatus::Absent
        }
        Err(e) => {
            tracing::debug!("nvidia-smi unavailable: {}", e);
            GpuStatus::Absent
        }
    }
}

/// Version of the driver whose kernel module is loaded
pub async fn driver_version(runner: &dyn CommandRunner) -> Result<String, DesktopError> {
    let output = runner.run(&query("driver_version")).await?;
    let version = output.stdout_str().lines().next().unwrap_or_default().trim().to_string();
    let valid = !version.is_empty()
        && version.chars().all(|c| c.is_ascii_digit() || c == '.');
    if !valid {
        return Err(DesktopError::GpuQuery(format!(
            "driver version '{}'",
            version
        )));
    }
    Ok(version)
}

/// PCI bus id of the GPU in Xorg's `PCI:bus:device:function` form
pub async fn xorg_bus_id(runner: &dyn CommandRunner) -> Result<String, DesktopError> {
    let output = runner.run(&query("pci.bus_id")).await?;
    let raw = output.stdout_str();
    let first = raw.lines().next().unwrap_or_default().trim();
    to_xorg_bus_id(first).ok_or_else(|| DesktopError::GpuQuery(format!("PCI bus id '{}'", first)))
}

/// Convert nvidia-smi's `DOMAIN:BUS:DEVICE.FUNCTION` (hex) into Xorg's
/// decimal `PCI:BUS:DEVICE:FUNCTION`
pub fn to_xorg_bus_id(bus_id: &str) -> Option<String> {
    let mut parts = bus_id.rsplitn(3, ':');
    let device_function = parts.next()?;
    let bus = parts.next()?;
    let (device, function) = device_function.split_once('.')?;

    let bus = u32::from_str_radix(bus, 16).ok()?;
    let device = u32::from_str_radix(device, 16).ok()?;
    let function = u32::from_str_radix(function, 16).ok()?;
    Some(format!("PCI:{}:{}:{}", bus, device, function))
}
