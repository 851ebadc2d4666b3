//! Compute device selection.
//!
//! The device is an explicit configuration value threaded through synthesis
//! construction. Only the CPU backend exists; an accelerator request degrades
//! to CPU with a warning since placement affects speed, not results.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("unknown device '{0}' (expected cpu or accelerator)")]
    Unknown(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    #[default]
    Cpu,
    Accelerator,
}

impl Device {
    pub fn is_available(self) -> bool {
        matches!(self, Device::Cpu)
    }

    /// Resolve a requested device to one this build can run on.
    pub fn resolve(self) -> Device {
        if self.is_available() {
            return self;
        }
        warn!(requested = %self, "requested device is not available in this build; using cpu");
        Device::Cpu
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Accelerator => write!(f, "accelerator"),
        }
    }
}

impl FromStr for Device {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(Device::Cpu),
            "accelerator" | "gpu" | "cuda" => Ok(Device::Accelerator),
            _ => Err(DeviceError::Unknown(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accelerator_falls_back_to_cpu() {
        assert_eq!(Device::Accelerator.resolve(), Device::Cpu);
        assert_eq!(Device::Cpu.resolve(), Device::Cpu);
        assert!(!Device::Accelerator.is_available());
        assert!(Device::Cpu.is_available());
    }

    #[test]
    fn test_parse() {
        assert_eq!("GPU".parse::<Device>().unwrap(), Device::Accelerator);
        assert_eq!("tpu".parse::<Device>(), Err(DeviceError::Unknown("tpu".into())));
        assert_eq!(
            DeviceError::Unknown("tpu".into()).to_string(),
            "unknown device 'tpu' (expected cpu or accelerator)"
        );
    }
}
