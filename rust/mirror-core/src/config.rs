// rust/mirror-core/src/config.rs

//! Configuration management for the mirrored strategy.
//!
//! This module provides configuration parsing from TOML files, environment
//! variable overrides, and validation of configuration values.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

use crate::device::{DeviceSpec, DeviceType};
use crate::error::{Result, StrategyError};
use crate::mesh::DEFAULT_BATCH_DIM;

// Top-level strategy configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub mesh: MeshConfig,
    pub platform: PlatformConfig,
    pub dataset: DatasetConfig,
}

/// Mesh construction options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Name of the single mesh dimension replicas are laid out along.
    pub batch_dim_name: String,
    /// Explicit device names; empty means "all devices of the preferred type".
    pub devices: Vec<String>,
    /// Device type to use instead of the platform's preferred one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_type: Option<DeviceType>,
}

/// Logical devices exposed by the host platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    pub cpu_devices: u32,
    pub gpu_devices: u32,
    pub tpu_devices: u32,
}

// Input pipeline options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    // Number of elements buffered by prefetch stages added by the strategy.
    pub prefetch_buffer_size: usize,
    // How long a consumer waits on an empty prefetch queue before failing.
    pub prefetch_timeout_ms: u64,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            batch_dim_name: DEFAULT_BATCH_DIM.to_string(),
            devices: Vec::new(),
            device_type: None,
        }
    }
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            cpu_devices: 1,
            gpu_devices: 0,
            tpu_devices: 0,
        }
    }
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            prefetch_buffer_size: 2,
            prefetch_timeout_ms: 30_000,
        }
    }
}

impl MeshConfig {
    /// Parses the explicit device list, if one was given.
    pub fn explicit_devices(&self) -> Result<Option<Vec<DeviceSpec>>> {
        if self.devices.is_empty() {
            return Ok(None);
        }
        self.devices
            .iter()
            .map(|d| d.parse())
            .collect::<Result<Vec<_>>>()
            .map(Some)
    }
}

impl FromStr for StrategyConfig {
    type Err = StrategyError;

    /// Parse configuration from a TOML string.
    fn from_str(s: &str) -> Result<Self> {
        toml::from_str(s)
            .map_err(|e| StrategyError::config_with_source("failed to parse TOML config", e))
    }
}

impl StrategyConfig {
    // Load configuration from a TOML file.
    //
    // # Errors
    //
    // Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            StrategyError::storage_with_source(path, "failed to read config file", e)
        })?;
        let config: Self = content.parse()?;
        config.validate()?;
        Ok(config)
    }

    // Apply environment variable overrides.
    //
    // Environment variables are prefixed with `MIRROR_` and use underscores
    // to separate nested fields. For example:
    // - `MIRROR_MESH_BATCH_DIM_NAME` overrides `mesh.batch_dim_name`
    // - `MIRROR_MESH_DEVICES` overrides `mesh.devices` (comma-separated)
    // - `MIRROR_PLATFORM_GPU_DEVICES` overrides `platform.gpu_devices`
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        // Mesh overrides
        if let Ok(val) = std::env::var("MIRROR_MESH_BATCH_DIM_NAME") {
            self.mesh.batch_dim_name = val;
        }
        if let Ok(val) = std::env::var("MIRROR_MESH_DEVICES") {
            self.mesh.devices = val
                .split(',')
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(String::from)
                .collect();
        }
        if let Ok(val) = std::env::var("MIRROR_MESH_DEVICE_TYPE") {
            if let Ok(v) = val.parse() {
                self.mesh.device_type = Some(v);
            }
        }

        // Platform overrides
        if let Ok(val) = std::env::var("MIRROR_PLATFORM_CPU_DEVICES") {
            if let Ok(v) = val.parse() {
                self.platform.cpu_devices = v;
            }
        }
        if let Ok(val) = std::env::var("MIRROR_PLATFORM_GPU_DEVICES") {
            if let Ok(v) = val.parse() {
                self.platform.gpu_devices = v;
            }
        }
        if let Ok(val) = std::env::var("MIRROR_PLATFORM_TPU_DEVICES") {
            if let Ok(v) = val.parse() {
                self.platform.tpu_devices = v;
            }
        }

        // Dataset overrides
        if let Ok(val) = std::env::var("MIRROR_DATASET_PREFETCH_BUFFER_SIZE") {
            if let Ok(v) = val.parse() {
                self.dataset.prefetch_buffer_size = v;
            }
        }
        if let Ok(val) = std::env::var("MIRROR_DATASET_PREFETCH_TIMEOUT_MS") {
            if let Ok(v) = val.parse() {
                self.dataset.prefetch_timeout_ms = v;
            }
        }

        self
    }

    // Validate all configuration values.
    //
    // # Errors
    //
    // Returns an error if any configuration value is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.mesh.batch_dim_name.is_empty() {
            return Err(StrategyError::config(
                "mesh.batch_dim_name must not be empty",
            ));
        }
        self.mesh.explicit_devices().map_err(|e| {
            StrategyError::config_with_source("mesh.devices contains an invalid device", e)
        })?;

        let total = self
            .platform
            .cpu_devices
            .checked_add(self.platform.gpu_devices)
            .and_then(|n| n.checked_add(self.platform.tpu_devices))
            .ok_or_else(|| StrategyError::config("platform device counts overflow"))?;
        if total == 0 {
            return Err(StrategyError::config(
                "platform must expose at least one device",
            ));
        }

        if self.dataset.prefetch_timeout_ms == 0 {
            return Err(StrategyError::config(
                "dataset.prefetch_timeout_ms must be greater than 0",
            ));
        }

        Ok(())
    }
}
