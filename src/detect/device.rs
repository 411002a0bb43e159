use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anyhow::{anyhow, Result};

/// Compute device the detector runs on. Chosen once at startup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComputeDevice {
    Cuda,
    Mps,
    Cpu,
}

impl fmt::Display for ComputeDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ComputeDevice::Cuda => "cuda",
            ComputeDevice::Mps => "mps",
            ComputeDevice::Cpu => "cpu",
        };
        f.write_str(name)
    }
}

/// Configured device preference.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DevicePreference {
    #[default]
    Auto,
    Cuda,
    Mps,
    Cpu,
}

impl FromStr for DevicePreference {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(DevicePreference::Auto),
            "cuda" | "gpu" => Ok(DevicePreference::Cuda),
            "mps" => Ok(DevicePreference::Mps),
            "cpu" => Ok(DevicePreference::Cpu),
            other => Err(anyhow!(
                "unknown device '{}' (expected auto, cuda, mps or cpu)",
                other
            )),
        }
    }
}

/// Accelerators visible to this process.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeviceCapabilities {
    pub cuda: bool,
    pub mps: bool,
}

impl DeviceCapabilities {
    pub fn cpu_only() -> Self {
        Self::default()
    }

    /// Probe the host once.
    ///
    /// CUDA counts as present when an NVIDIA device node exists or
    /// `CUDA_VISIBLE_DEVICES` names at least one device. MPS is present on
    /// Apple silicon macOS builds.
    pub fn probe() -> Self {
        let visible = std::env::var("CUDA_VISIBLE_DEVICES")
            .map(|v| {
                let v = v.trim();
                !v.is_empty() && v != "-1"
            })
            .unwrap_or(false);
        let cuda = visible || Path::new("/dev/nvidia0").exists();
        let mps = cfg!(all(target_os = "macos", target_arch = "aarch64"));
        Self { cuda, mps }
    }
}

impl ComputeDevice {
    /// Resolve a preference against the probed capabilities.
    ///
    /// `Auto` prefers CUDA, then MPS, then CPU. An explicit accelerator that
    /// is not present is a startup error.
    pub fn select(preference: DevicePreference, caps: DeviceCapabilities) -> Result<Self> {
        match preference {
            DevicePreference::Auto => Ok(if caps.cuda {
                ComputeDevice::Cuda
            } else if caps.mps {
                ComputeDevice::Mps
            } else {
                ComputeDevice::Cpu
            }),
            DevicePreference::Cuda if caps.cuda => Ok(ComputeDevice::Cuda),
            DevicePreference::Mps if caps.mps => Ok(ComputeDevice::Mps),
            DevicePreference::Cpu => Ok(ComputeDevice::Cpu),
            other => Err(anyhow!("requested device {:?} is not available", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_prefers_cuda_then_mps_then_cpu() -> Result<()> {
        let both = DeviceCapabilities {
            cuda: true,
            mps: true,
        };
        let mps_only = DeviceCapabilities {
            cuda: false,
            mps: true,
        };
        assert_eq!(
            ComputeDevice::select(DevicePreference::Auto, both)?,
            ComputeDevice::Cuda
        );
        assert_eq!(
            ComputeDevice::select(DevicePreference::Auto, mps_only)?,
            ComputeDevice::Mps
        );
        assert_eq!(
            ComputeDevice::select(DevicePreference::Auto, DeviceCapabilities::cpu_only())?,
            ComputeDevice::Cpu
        );
        Ok(())
    }

    #[test]
    fn explicit_missing_accelerator_is_an_error() {
        let caps = DeviceCapabilities::cpu_only();
        assert!(ComputeDevice::select(DevicePreference::Cuda, caps).is_err());
        assert!(ComputeDevice::select(DevicePreference::Mps, caps).is_err());
        assert_eq!(
            ComputeDevice::select(DevicePreference::Cpu, caps).unwrap(),
            ComputeDevice::Cpu
        );
    }

    #[test]
    fn parses_preferences() {
        assert_eq!(
            "AUTO".parse::<DevicePreference>().unwrap(),
            DevicePreference::Auto
        );
        assert_eq!(
            "gpu".parse::<DevicePreference>().unwrap(),
            DevicePreference::Cuda
        );
        assert!("tpu".parse::<DevicePreference>().is_err());
        assert_eq!(ComputeDevice::Mps.to_string(), "mps");
    }
}
