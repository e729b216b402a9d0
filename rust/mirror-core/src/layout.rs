// rust/mirror-core/src/layout.rs

//! Tensor layouts.
//!
//! A [`Layout`] maps every axis of a tensor either to a mesh dimension, in
//! which case the axis is split evenly across the devices along that
//! dimension, or to nothing, in which case the axis is replicated.

use std::collections::HashSet;
use std::fmt;

use crate::error::{Result, StrategyError};
use crate::mesh::Mesh;

/// Placement of one tensor axis.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ShardingSpec {
    /// Every device holds the full axis.
    Unsharded,
    /// The axis is split across the named mesh dimension.
    Sharded(String),
}

impl fmt::Display for ShardingSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShardingSpec::Unsharded => f.write_str("unsharded"),
            ShardingSpec::Sharded(dim) => f.write_str(dim),
        }
    }
}

/// How a tensor of a fixed rank is placed on a mesh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    specs: Vec<ShardingSpec>,
    mesh: Mesh,
}

impl Layout {
    /// Creates a layout, checking that every sharded axis names a distinct
    /// mesh dimension.
    pub fn new(specs: Vec<ShardingSpec>, mesh: Mesh) -> Result<Self> {
        let mut used = HashSet::new();
        for spec in &specs {
            if let ShardingSpec::Sharded(dim) = spec {
                if !mesh.contains_dim(dim) {
                    return Err(StrategyError::layout(format!(
                        "mesh has no dimension '{}' (dimensions: {:?})",
                        dim,
                        mesh.dim_names()
                    )));
                }
                if !used.insert(dim.as_str()) {
                    return Err(StrategyError::layout(format!(
                        "mesh dimension '{}' shards more than one axis",
                        dim
                    )));
                }
            }
        }
        Ok(Self { specs, mesh })
    }

    /// A layout that replicates a rank-`rank` tensor on every device.
    pub fn replicated(mesh: Mesh, rank: usize) -> Self {
        Self {
            specs: vec![ShardingSpec::Unsharded; rank],
            mesh,
        }
    }

    /// A layout that splits the leading axis across `batch_dim` and
    /// replicates the rest.
    pub fn batch_sharded(mesh: Mesh, batch_dim: &str, rank: usize) -> Result<Self> {
        if rank == 0 {
            return Err(StrategyError::layout("a batch-sharded layout needs rank >= 1"));
        }
        let mut specs = vec![ShardingSpec::Unsharded; rank];
        specs[0] = ShardingSpec::Sharded(batch_dim.to_string());
        Self::new(specs, mesh)
    }

    pub fn rank(&self) -> usize {
        self.specs.len()
    }

    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    pub fn sharding_specs(&self) -> &[ShardingSpec] {
        &self.specs
    }

    pub fn is_fully_replicated(&self) -> bool {
        self.specs.iter().all(|s| *s == ShardingSpec::Unsharded)
    }

    /// Number of pieces `axis` is split into; `1` for replicated axes.
    pub fn num_shards(&self, axis: usize) -> usize {
        match self.specs.get(axis) {
            Some(ShardingSpec::Sharded(dim)) => self.mesh.dim_size(dim).unwrap_or(1),
            _ => 1,
        }
    }

    /// Indices of the sharded axes.
    pub fn sharded_axes(&self) -> impl Iterator<Item = usize> + '_ {
        self.specs
            .iter()
            .enumerate()
            .filter(|(_, s)| matches!(s, ShardingSpec::Sharded(_)))
            .map(|(axis, _)| axis)
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let specs: Vec<String> = self.specs.iter().map(ToString::to_string).collect();
        let dims: Vec<String> = self
            .mesh
            .dims()
            .iter()
            .map(|d| format!("{}={}", d.name(), d.size()))
            .collect();
        write!(f, "sharding_specs:{}, mesh:|{}|", specs.join(","), dims.join(","))
    }
}
