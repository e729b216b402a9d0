// rust/mirror-core/src/device.rs

//! Device naming and discovery.
//!
//! Devices are addressed with fully-qualified names of the form
//! `/job:localhost/replica:0/task:0/device:CPU:0`. Short forms such as
//! `/CPU:0` or `GPU:1` are accepted on input and normalized on output.
//!
//! Discovery goes through the [`DevicePlatform`] trait so that the strategy
//! never talks to hardware directly. [`VirtualPlatform`] exposes a fixed set
//! of logical devices per type and is what tests and the demo binary use.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::PlatformConfig;
use crate::error::{Result, StrategyError};

/// Job name used for devices owned by the current (single) client.
pub const LOCAL_JOB: &str = "localhost";

/// Kind of accelerator a device belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Cpu,
    Gpu,
    Tpu,
}

impl DeviceType {
    /// Device types in descending order of preference.
    pub const PREFERENCE: [DeviceType; 3] = [DeviceType::Tpu, DeviceType::Gpu, DeviceType::Cpu];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Cpu => "CPU",
            DeviceType::Gpu => "GPU",
            DeviceType::Tpu => "TPU",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceType {
    type Err = StrategyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(DeviceType::Cpu),
            "gpu" => Ok(DeviceType::Gpu),
            "tpu" => Ok(DeviceType::Tpu),
            _ => Err(StrategyError::invalid_device(s, "unknown device type")),
        }
    }
}

/// A fully-qualified device name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceSpec {
    job: String,
    replica: u32,
    task: u32,
    device_type: DeviceType,
    index: u32,
}

impl DeviceSpec {
    /// Creates a device owned by the local job.
    pub fn local(device_type: DeviceType, index: u32) -> Self {
        Self {
            job: LOCAL_JOB.to_string(),
            replica: 0,
            task: 0,
            device_type,
            index,
        }
    }

    pub fn job(&self) -> &str {
        &self.job
    }

    pub fn replica(&self) -> u32 {
        self.replica
    }

    pub fn task(&self) -> u32 {
        self.task
    }

    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    pub fn index(&self) -> u32 {
        self.index
    }
}

impl fmt::Display for DeviceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "/job:{}/replica:{}/task:{}/device:{}:{}",
            self.job, self.replica, self.task, self.device_type, self.index
        )
    }
}

impl FromStr for DeviceSpec {
    type Err = StrategyError;

    /// Parses `/CPU:0`, `CPU:0`, `/device:GPU:1` or a fully-qualified name.
    fn from_str(s: &str) -> Result<Self> {
        let mut job = LOCAL_JOB.to_string();
        let mut replica = 0;
        let mut task = 0;
        let mut device = None;

        for part in s.trim().split('/').filter(|p| !p.is_empty()) {
            if let Some(value) = part.strip_prefix("job:") {
                if value.is_empty() {
                    return Err(StrategyError::invalid_device(s, "empty job name"));
                }
                job = value.to_string();
            } else if let Some(value) = part.strip_prefix("replica:") {
                replica = parse_index(s, value)?;
            } else if let Some(value) = part.strip_prefix("task:") {
                task = parse_index(s, value)?;
            } else {
                let value = part.strip_prefix("device:").unwrap_or(part);
                if device.is_some() {
                    return Err(StrategyError::invalid_device(s, "more than one device component"));
                }
                device = Some(parse_device(s, value)?);
            }
        }

        let (device_type, index) =
            device.ok_or_else(|| StrategyError::invalid_device(s, "missing device component"))?;

        Ok(Self {
            job,
            replica,
            task,
            device_type,
            index,
        })
    }
}

fn parse_index(spec: &str, value: &str) -> Result<u32> {
    value
        .parse()
        .map_err(|_| StrategyError::invalid_device(spec, format!("'{}' is not an index", value)))
}

fn parse_device(spec: &str, value: &str) -> Result<(DeviceType, u32)> {
    let (kind, index) = value
        .split_once(':')
        .ok_or_else(|| StrategyError::invalid_device(spec, "expected TYPE:INDEX"))?;
    let device_type = kind
        .parse()
        .map_err(|_| StrategyError::invalid_device(spec, format!("unknown device type '{}'", kind)))?;
    Ok((device_type, parse_index(spec, index)?))
}

/// Source of the logical devices visible to this process.
pub trait DevicePlatform: Send + Sync {
    /// Devices of the given type, in index order.
    fn logical_devices(&self, device_type: DeviceType) -> Vec<DeviceSpec>;

    /// The most capable device type with at least one visible device.
    ///
    /// Falls back to [`DeviceType::Cpu`] when nothing is visible.
    fn preferred_device_type(&self) -> DeviceType {
        DeviceType::PREFERENCE
            .into_iter()
            .find(|ty| !self.logical_devices(*ty).is_empty())
            .unwrap_or(DeviceType::Cpu)
    }
}

/// Host platform exposing a configurable number of logical devices per type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualPlatform {
    cpu_devices: u32,
    gpu_devices: u32,
    tpu_devices: u32,
}

impl VirtualPlatform {
    /// A platform with a single CPU.
    pub fn host() -> Self {
        Self {
            cpu_devices: 1,
            gpu_devices: 0,
            tpu_devices: 0,
        }
    }

    pub fn from_config(config: &PlatformConfig) -> Self {
        Self {
            cpu_devices: config.cpu_devices,
            gpu_devices: config.gpu_devices,
            tpu_devices: config.tpu_devices,
        }
    }

    /// Replaces the logical device count for one device type.
    #[must_use]
    pub fn with_logical_devices(mut self, device_type: DeviceType, count: u32) -> Self {
        match device_type {
            DeviceType::Cpu => self.cpu_devices = count,
            DeviceType::Gpu => self.gpu_devices = count,
            DeviceType::Tpu => self.tpu_devices = count,
        }
        self
    }

    pub fn device_count(&self, device_type: DeviceType) -> u32 {
        match device_type {
            DeviceType::Cpu => self.cpu_devices,
            DeviceType::Gpu => self.gpu_devices,
            DeviceType::Tpu => self.tpu_devices,
        }
    }
}

impl Default for VirtualPlatform {
    fn default() -> Self {
        Self::host()
    }
}

impl DevicePlatform for VirtualPlatform {
    fn logical_devices(&self, device_type: DeviceType) -> Vec<DeviceSpec> {
        (0..self.device_count(device_type))
            .map(|index| DeviceSpec::local(device_type, index))
            .collect()
    }
}
