//! Load device resolution.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::config::{locate_config_file, RunConfig};
use crate::error::{Error, Result};

/// Target device shards are deserialized for.
///
/// NPY shards are always materialised in host memory; the device is carried
/// through so the run records where the encoder expected the tensors to live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Device {
    Cpu,
    Cuda(Option<usize>),
    Mps,
}

impl Device {
    pub fn is_host(&self) -> bool {
        matches!(self, Device::Cpu)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => f.write_str("cpu"),
            Device::Cuda(None) => f.write_str("cuda"),
            Device::Cuda(Some(idx)) => write!(f, "cuda:{}", idx),
            Device::Mps => f.write_str("mps"),
        }
    }
}

impl FromStr for Device {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "cpu" => return Ok(Device::Cpu),
            "cuda" | "gpu" => return Ok(Device::Cuda(None)),
            "mps" => return Ok(Device::Mps),
            _ => {}
        }

        if let Some(idx) = normalized.strip_prefix("cuda:") {
            let idx = idx.parse::<usize>().map_err(|_| {
                Error::Configuration(format!("Invalid CUDA device index in '{}'", s))
            })?;
            return Ok(Device::Cuda(Some(idx)));
        }

        Err(Error::Configuration(format!("Unknown device '{}'", s)))
    }
}

/// Resolve the load device.
///
/// An explicit device wins. Otherwise `general.device` is read from the
/// explicit config file or the single config file found in `input_dir`.
pub fn resolve_device(
    explicit: Option<&Device>,
    config_path: Option<&Path>,
    input_dir: &Path,
) -> Result<Device> {
    if let Some(device) = explicit {
        return Ok(device.clone());
    }

    let path = locate_config_file(config_path, input_dir)?.ok_or_else(|| {
        Error::Configuration(format!(
            "No device given and no config file found in {}",
            input_dir.display()
        ))
    })?;

    let config = RunConfig::load(&path)?;
    let device = config.device().ok_or_else(|| {
        Error::Configuration(format!("{} has no general.device field", path.display()))
    })?;
    device.parse()
}
