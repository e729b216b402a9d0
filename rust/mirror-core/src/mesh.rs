// rust/mirror-core/src/mesh.rs

//! Logical device meshes.
//!
//! A [`Mesh`] arranges a set of devices into a named, multi-dimensional grid.
//! Global device ids enumerate every device in the grid in row-major order;
//! local device ids name the subset owned by this client, paired one-to-one
//! with the local device names.

use std::collections::HashSet;

use crate::device::{DeviceSpec, DeviceType};
use crate::error::{Result, StrategyError};

/// Name of the mesh dimension used for data parallelism.
pub const DEFAULT_BATCH_DIM: &str = "batch";

/// A named mesh dimension.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MeshDimension {
    name: String,
    size: usize,
}

impl MeshDimension {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

/// A logical device mesh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mesh {
    dims: Vec<MeshDimension>,
    global_device_ids: Vec<usize>,
    local_device_ids: Vec<usize>,
    local_devices: Vec<DeviceSpec>,
}

impl Mesh {
    /// Creates a mesh.
    ///
    /// `global_device_ids` is the row-major flattening of a `shape`-shaped id
    /// grid. `local_device_ids[i]` is the global id of `local_devices[i]`.
    ///
    /// # Errors
    ///
    /// Returns [`StrategyError::Mesh`] if names and sizes disagree in length,
    /// a name is empty or repeated, a size is zero, the id grid does not
    /// match the shape, ids repeat, a local id is not a global id, local ids
    /// and devices disagree in length, or local devices mix device types.
    pub fn new<S: Into<String>>(
        dim_names: impl IntoIterator<Item = S>,
        shape: &[usize],
        global_device_ids: Vec<usize>,
        local_device_ids: Vec<usize>,
        local_devices: Vec<DeviceSpec>,
    ) -> Result<Self> {
        let names: Vec<String> = dim_names.into_iter().map(Into::into).collect();
        if names.len() != shape.len() {
            return Err(StrategyError::mesh(format!(
                "{} dimension name(s) given for a shape of rank {}",
                names.len(),
                shape.len()
            )));
        }
        if names.is_empty() {
            return Err(StrategyError::mesh("a mesh needs at least one dimension"));
        }

        let mut seen = HashSet::with_capacity(names.len());
        let mut dims = Vec::with_capacity(names.len());
        for (name, &size) in names.into_iter().zip(shape) {
            if name.is_empty() {
                return Err(StrategyError::mesh("mesh dimension names must be non-empty"));
            }
            if size == 0 {
                return Err(StrategyError::mesh(format!(
                    "mesh dimension '{}' must have size > 0",
                    name
                )));
            }
            if !seen.insert(name.clone()) {
                return Err(StrategyError::mesh(format!(
                    "mesh dimension '{}' appears more than once",
                    name
                )));
            }
            dims.push(MeshDimension { name, size });
        }

        let size: usize = dims.iter().map(|d| d.size).product();
        if global_device_ids.len() != size {
            return Err(StrategyError::mesh(format!(
                "mesh has {} global device id(s), but its shape {:?} implies {}",
                global_device_ids.len(),
                shape,
                size
            )));
        }

        let global: HashSet<usize> = global_device_ids.iter().copied().collect();
        if global.len() != global_device_ids.len() {
            return Err(StrategyError::mesh("global device ids must be unique"));
        }

        let mut local = HashSet::with_capacity(local_device_ids.len());
        for id in &local_device_ids {
            if !global.contains(id) {
                return Err(StrategyError::mesh(format!(
                    "local device id {} is not a global device id",
                    id
                )));
            }
            if !local.insert(*id) {
                return Err(StrategyError::mesh(format!(
                    "local device id {} appears more than once",
                    id
                )));
            }
        }

        if local_device_ids.len() != local_devices.len() {
            return Err(StrategyError::mesh(format!(
                "{} local device id(s) but {} local device(s)",
                local_device_ids.len(),
                local_devices.len()
            )));
        }

        if let Some(first) = local_devices.first() {
            let device_type = first.device_type();
            if let Some(other) = local_devices.iter().find(|d| d.device_type() != device_type) {
                return Err(StrategyError::mesh(format!(
                    "mesh devices must share one device type, found {} and {}",
                    device_type,
                    other.device_type()
                )));
            }
        }

        Ok(Self {
            dims,
            global_device_ids,
            local_device_ids,
            local_devices,
        })
    }

    /// Dimension names in order.
    pub fn dim_names(&self) -> Vec<&str> {
        self.dims.iter().map(MeshDimension::name).collect()
    }

    pub fn dims(&self) -> &[MeshDimension] {
        &self.dims
    }

    /// Size of each dimension.
    pub fn shape(&self) -> Vec<usize> {
        self.dims.iter().map(MeshDimension::size).collect()
    }

    /// Number of dimensions.
    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    /// Total number of devices in the mesh.
    pub fn size(&self) -> usize {
        self.global_device_ids.len()
    }

    /// Size of the named dimension, if the mesh has it.
    pub fn dim_size(&self, name: &str) -> Option<usize> {
        self.dims.iter().find(|d| d.name == name).map(|d| d.size)
    }

    pub fn contains_dim(&self, name: &str) -> bool {
        self.dim_size(name).is_some()
    }

    pub fn num_local_devices(&self) -> usize {
        self.local_devices.len()
    }

    pub fn local_devices(&self) -> &[DeviceSpec] {
        &self.local_devices
    }

    pub fn local_device_ids(&self) -> &[usize] {
        &self.local_device_ids
    }

    pub fn global_device_ids(&self) -> &[usize] {
        &self.global_device_ids
    }

    /// Device type shared by the local devices, if there are any.
    pub fn device_type(&self) -> Option<DeviceType> {
        self.local_devices.first().map(DeviceSpec::device_type)
    }
}

/// Creates a single-client mesh over `devices`.
///
/// Device ids are assigned `0..n` in the order given and every device is
/// local.
pub fn create_mesh<S: AsRef<str>>(dims: &[(S, usize)], devices: Vec<DeviceSpec>) -> Result<Mesh> {
    let ids: Vec<usize> = (0..devices.len()).collect();
    let shape: Vec<usize> = dims.iter().map(|(_, size)| *size).collect();
    Mesh::new(
        dims.iter().map(|(name, _)| name.as_ref().to_string()),
        &shape,
        ids.clone(),
        ids,
        devices,
    )
}
