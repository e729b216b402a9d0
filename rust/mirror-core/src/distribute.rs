// rust/mirror-core/src/distribute.rs

//! Distributed input pipelines.
//!
//! A [`DistributedDataset`] regroups the elements of a host dataset into
//! global batches and places every component on the mesh with a layout that
//! shards the leading axis across the batch dimension. Each local device
//! receives `global_batch_size / num_replicas` rows.

use std::time::Duration;

use crate::dataset::{Dataset, DatasetIterator, TensorSpec};
use crate::error::{Result, StrategyError};
use crate::layout::Layout;
use crate::mesh::Mesh;
use crate::tensor::{pack, DTensor, Tensor};

/// What a dataset function learns about the pipeline it is building.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputContext {
    num_input_pipelines: usize,
    input_pipeline_id: usize,
    num_replicas_in_sync: usize,
}

impl InputContext {
    pub fn new(num_input_pipelines: usize, input_pipeline_id: usize, num_replicas_in_sync: usize) -> Self {
        Self {
            num_input_pipelines,
            input_pipeline_id,
            num_replicas_in_sync,
        }
    }

    pub fn num_input_pipelines(&self) -> usize {
        self.num_input_pipelines
    }

    pub fn input_pipeline_id(&self) -> usize {
        self.input_pipeline_id
    }

    pub fn num_replicas_in_sync(&self) -> usize {
        self.num_replicas_in_sync
    }

    /// Splits a global batch size evenly across replicas.
    ///
    /// # Errors
    ///
    /// Returns [`StrategyError::UnsupportedDatasetShape`] if `global_batch_size`
    /// is not divisible by the number of replicas.
    pub fn per_replica_batch_size(&self, global_batch_size: usize) -> Result<usize> {
        if self.num_replicas_in_sync == 0 || global_batch_size % self.num_replicas_in_sync != 0 {
            return Err(StrategyError::unsupported_dataset(format!(
                "global batch size {} is not divisible by num_replicas_in_sync {}",
                global_batch_size, self.num_replicas_in_sync
            )));
        }
        Ok(global_batch_size / self.num_replicas_in_sync)
    }
}

/// Options for datasets built with `distribute_datasets_from_function`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputOptions {
    /// Global batches to prefetch after distribution; `None` adds no stage.
    pub prefetch_buffer_size: Option<usize>,
    /// Producer stall limit for that prefetch stage.
    pub prefetch_timeout: Option<Duration>,
}

/// One global batch: one batch-sharded [`DTensor`] per element component.
#[derive(Debug, Clone, PartialEq)]
pub struct DistributedElement(Vec<DTensor>);

impl DistributedElement {
    pub fn components(&self) -> &[DTensor] {
        &self.0
    }

    pub fn into_components(self) -> Vec<DTensor> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A dataset whose elements are global batches placed on a mesh.
#[derive(Debug, Clone)]
pub struct DistributedDataset {
    dataset: Dataset,
    mesh: Mesh,
    batch_dim: String,
    global_batch_size: usize,
}

impl DistributedDataset {
    /// Regroups `dataset` into global batches of `global_batch_size` rows.
    ///
    /// Trailing rows that do not fill a whole global batch are dropped.
    pub(crate) fn new(
        dataset: &Dataset,
        mesh: Mesh,
        batch_dim: &str,
        global_batch_size: usize,
    ) -> Result<Self> {
        let dim_size = mesh.dim_size(batch_dim).ok_or_else(|| {
            StrategyError::mesh(format!(
                "mesh has no dimension '{}' (dimensions: {:?})",
                batch_dim,
                mesh.dim_names()
            ))
        })?;
        let num_replicas = mesh.num_local_devices();
        if num_replicas != dim_size {
            return Err(StrategyError::mesh(format!(
                "mesh dimension '{}' spans {} device(s) but only {} are local",
                batch_dim, dim_size, num_replicas
            )));
        }
        if global_batch_size == 0 || global_batch_size % num_replicas != 0 {
            return Err(StrategyError::unsupported_dataset(format!(
                "global batch size {} must be a positive multiple of the {} replicas on mesh dimension '{}'",
                global_batch_size, num_replicas, batch_dim
            )));
        }

        let dataset = dataset.unbatch().batch(global_batch_size, true)?;
        Ok(Self {
            dataset,
            mesh,
            batch_dim: batch_dim.to_string(),
            global_batch_size,
        })
    }

    pub(crate) fn with_prefetch(self, options: &InputOptions) -> Self {
        match options.prefetch_buffer_size {
            Some(buffer_size) => {
                let dataset = match options.prefetch_timeout {
                    Some(timeout) => self.dataset.prefetch_with_timeout(buffer_size, timeout),
                    None => self.dataset.prefetch(buffer_size),
                };
                Self { dataset, ..self }
            }
            None => self,
        }
    }

    pub fn global_batch_size(&self) -> usize {
        self.global_batch_size
    }

    pub fn num_replicas(&self) -> usize {
        self.mesh.num_local_devices()
    }

    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    /// Static description of each global-batch component.
    pub fn element_spec(&self) -> Vec<TensorSpec> {
        self.dataset.element_spec()
    }

    /// The host pipeline producing global batches.
    pub fn host_dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn iter(&self) -> DistributedIterator {
        DistributedIterator {
            inner: self.dataset.iter(),
            mesh: self.mesh.clone(),
            batch_dim: self.batch_dim.clone(),
            num_replicas: self.num_replicas(),
        }
    }
}

impl<'a> IntoIterator for &'a DistributedDataset {
    type Item = Result<DistributedElement>;
    type IntoIter = DistributedIterator;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the global batches of a [`DistributedDataset`].
pub struct DistributedIterator {
    inner: DatasetIterator,
    mesh: Mesh,
    batch_dim: String,
    num_replicas: usize,
}

impl DistributedIterator {
    /// Returns the next global batch, `Ok(None)` once the dataset is exhausted.
    pub fn next_element(&mut self) -> Result<Option<DistributedElement>> {
        self.next().transpose()
    }

    fn place(&self, component: Tensor) -> Result<DTensor> {
        let layout = Layout::batch_sharded(self.mesh.clone(), &self.batch_dim, component.rank())?;
        let shards = component.split(self.num_replicas)?;
        pack(shards, layout)
    }
}

impl Iterator for DistributedIterator {
    type Item = Result<DistributedElement>;

    fn next(&mut self) -> Option<Self::Item> {
        let element = match self.inner.next()? {
            Ok(element) => element,
            Err(e) => return Some(Err(e)),
        };
        let placed = element
            .into_components()
            .into_iter()
            .map(|component| self.place(component))
            .collect::<Result<Vec<_>>>()
            .map(DistributedElement);
        Some(placed)
    }
}
