// rust/mirror-core/src/strategy.rs

//! Synchronous data-parallel training on a one-dimensional device mesh.
//!
//! [`MirroredStrategy`] replicates every variable on each device of its mesh
//! and splits each global input batch evenly across those devices.
//!
//! Variables are created through explicit scope guards instead of ambient
//! global state:
//!
//! ```ignore
//! use mirror_core::{MirroredStrategy, VirtualPlatform, DeviceType};
//!
//! let platform = VirtualPlatform::host().with_logical_devices(DeviceType::Cpu, 2);
//! let strategy = MirroredStrategy::new(None, None, &platform)?;
//!
//! let weights = {
//!     let scope = strategy.scope();
//!     scope.create_variable("weights", vec![1.0f32, 2.0])
//! };
//! assert!(strategy.variable_created_in_scope(&weights));
//! ```

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, info};

use crate::config::StrategyConfig;
use crate::dataset::{compute_batch_size, Dataset};
use crate::device::{DevicePlatform, DeviceSpec, DeviceType};
use crate::distribute::{DistributedDataset, InputContext, InputOptions};
use crate::error::{Result, StrategyError};
use crate::layout::Layout;
use crate::mesh::{create_mesh, Mesh, DEFAULT_BATCH_DIM};
use crate::reduce::{reduce_values, ReduceOp};
use crate::tensor::{unpack, DTensor, Tensor};
use crate::variable::{InitialValue, Variable, VariableId};

/// Replicates variables and shards input across a 1-D mesh.
#[derive(Debug)]
pub struct MirroredStrategy {
    mesh: Mesh,
    batch_dim: String,
    input_options: InputOptions,
    /// Variables created through a scope of this instance.
    created: Mutex<HashSet<VariableId>>,
}

impl MirroredStrategy {
    /// Creates a strategy from a mesh, a device list, or neither.
    ///
    /// With neither, the mesh spans every logical device of the platform's
    /// preferred type.
    ///
    /// # Errors
    ///
    /// Returns [`StrategyError::ConflictingConfiguration`] if both `mesh` and
    /// `devices` are given, and [`StrategyError::InvalidMeshShape`] if the
    /// mesh is not one-dimensional.
    pub fn new(
        mesh: Option<Mesh>,
        devices: Option<Vec<DeviceSpec>>,
        platform: &dyn DevicePlatform,
    ) -> Result<Self> {
        Self::build(mesh, devices, platform, None, DEFAULT_BATCH_DIM, InputOptions::default())
    }

    /// Creates a strategy on an existing mesh.
    pub fn with_mesh(mesh: Mesh) -> Result<Self> {
        Self::from_mesh(mesh, InputOptions::default())
    }

    /// Creates a strategy on a mesh built from device names such as `/GPU:0`.
    pub fn with_devices<S: AsRef<str>>(devices: &[S]) -> Result<Self> {
        let devices = devices
            .iter()
            .map(|d| d.as_ref().parse())
            .collect::<Result<Vec<DeviceSpec>>>()?;
        let mesh = default_mesh(DEFAULT_BATCH_DIM, devices)?;
        Self::from_mesh(mesh, InputOptions::default())
    }

    /// Creates a strategy from configuration.
    ///
    /// Explicit `mesh.devices` win over the platform; otherwise the mesh spans
    /// the devices of `mesh.device_type`, or of the preferred type if unset.
    pub fn from_config(config: &StrategyConfig, platform: &dyn DevicePlatform) -> Result<Self> {
        config.validate()?;
        let input_options = InputOptions {
            prefetch_buffer_size: (config.dataset.prefetch_buffer_size > 0)
                .then_some(config.dataset.prefetch_buffer_size),
            prefetch_timeout: Some(Duration::from_millis(config.dataset.prefetch_timeout_ms)),
        };
        Self::build(
            None,
            config.mesh.explicit_devices()?,
            platform,
            config.mesh.device_type,
            &config.mesh.batch_dim_name,
            input_options,
        )
    }

    fn build(
        mesh: Option<Mesh>,
        devices: Option<Vec<DeviceSpec>>,
        platform: &dyn DevicePlatform,
        device_type: Option<DeviceType>,
        batch_dim: &str,
        input_options: InputOptions,
    ) -> Result<Self> {
        let mesh = match (mesh, devices) {
            (Some(_), Some(_)) => {
                return Err(StrategyError::conflicting(
                    "Mesh and devices can not be provided at the same time",
                ))
            }
            (Some(mesh), None) => mesh,
            (None, Some(devices)) => default_mesh(batch_dim, devices)?,
            (None, None) => {
                let device_type = device_type.unwrap_or_else(|| platform.preferred_device_type());
                let devices = platform.logical_devices(device_type);
                debug!(%device_type, count = devices.len(), "using all visible devices");
                default_mesh(batch_dim, devices)?
            }
        };
        Self::from_mesh(mesh, input_options)
    }

    fn from_mesh(mesh: Mesh, input_options: InputOptions) -> Result<Self> {
        if mesh.ndim() != 1 {
            return Err(StrategyError::invalid_mesh_shape(mesh.ndim()));
        }
        if mesh.num_local_devices() != mesh.size() {
            return Err(StrategyError::mesh(format!(
                "MirroredStrategy needs every mesh device to be local, found {} of {}",
                mesh.num_local_devices(),
                mesh.size()
            )));
        }
        let batch_dim = mesh
            .dim_names()
            .first()
            .map(|name| name.to_string())
            .ok_or_else(|| StrategyError::invalid_mesh_shape(0))?;

        info!(
            batch_dim = %batch_dim,
            num_replicas = mesh.num_local_devices(),
            device_type = ?mesh.device_type(),
            "created mirrored strategy"
        );

        Ok(Self {
            mesh,
            batch_dim,
            input_options,
            created: Mutex::new(HashSet::new()),
        })
    }

    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    /// Name of the mesh dimension input batches are split across.
    pub fn batch_dim(&self) -> &str {
        &self.batch_dim
    }

    pub fn num_replicas_in_sync(&self) -> usize {
        self.mesh.num_local_devices()
    }

    pub fn extended(&self) -> MirroredExtended<'_> {
        MirroredExtended { strategy: self }
    }

    /// Opens a scope in which variables are replicated on this strategy's mesh.
    pub fn scope(&self) -> StrategyScope<'_> {
        debug!(batch_dim = %self.batch_dim, "entering strategy scope");
        StrategyScope { strategy: self }
    }

    /// Whether `variable` was created through a scope of this strategy.
    pub fn variable_created_in_scope(&self, variable: &Variable) -> bool {
        self.registry().contains(&variable.id())
    }

    /// Opens a scope whose variables take exactly the layout of `variable`.
    ///
    /// # Errors
    ///
    /// Returns [`StrategyError::Layout`] if `variable` is not placed on this
    /// strategy's mesh.
    pub fn colocate_vars_with(&self, variable: &Variable) -> Result<ColocationScope<'_>> {
        let layout = variable
            .layout()
            .filter(|layout| *layout.mesh() == self.mesh)
            .cloned()
            .ok_or_else(|| {
                StrategyError::layout(format!(
                    "variable '{}' is not placed on this strategy's mesh",
                    variable.name()
                ))
            })?;
        debug!(variable = variable.name(), %layout, "entering colocation scope");
        Ok(ColocationScope {
            strategy: self,
            layout,
        })
    }

    /// Distributes a dataset that is already batched at the global batch size.
    ///
    /// Every element of the result is a global batch whose components are
    /// split along the leading axis, one shard per local device. A trailing
    /// batch smaller than the global batch size is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`StrategyError::UnsupportedDatasetShape`] if the batch size of
    /// `dataset` is not statically known or does not divide evenly across
    /// replicas.
    pub fn experimental_distribute_dataset(&self, dataset: &Dataset) -> Result<DistributedDataset> {
        let global_batch_size = compute_batch_size(dataset).ok_or_else(|| {
            StrategyError::unsupported_dataset(
                "MirroredStrategy requires a static batch size for the dataset; \
                 batch it with a fixed batch size before distributing",
            )
        })?;
        info!(
            global_batch_size,
            num_replicas = self.num_replicas_in_sync(),
            pipeline = %dataset.describe(),
            "distributing dataset"
        );
        DistributedDataset::new(dataset, self.mesh.clone(), &self.batch_dim, global_batch_size)
    }

    /// Builds the input pipeline with `dataset_fn` and distributes it.
    ///
    /// `dataset_fn` must return a dataset batched at the per-replica batch
    /// size; the global batch size is that times the number of replicas.
    pub fn distribute_datasets_from_function<F>(
        &self,
        dataset_fn: F,
        options: Option<InputOptions>,
    ) -> Result<DistributedDataset>
    where
        F: FnOnce(&InputContext) -> Result<Dataset>,
    {
        let num_replicas = self.num_replicas_in_sync();
        let context = InputContext::new(1, 0, num_replicas);
        let dataset = dataset_fn(&context)?;

        let local_batch_size = compute_batch_size(&dataset).ok_or_else(|| {
            StrategyError::unsupported_dataset(
                "MirroredStrategy requires a static batch size for the dataset returned by the dataset function",
            )
        })?;
        let global_batch_size = local_batch_size * num_replicas;
        info!(
            local_batch_size,
            global_batch_size,
            pipeline = %dataset.describe(),
            "distributing dataset from function"
        );

        let options = options.unwrap_or(self.input_options);
        Ok(
            DistributedDataset::new(&dataset, self.mesh.clone(), &self.batch_dim, global_batch_size)?
                .with_prefetch(&options),
        )
    }

    /// Not supported; use [`MirroredStrategy::experimental_distribute_dataset`].
    pub fn make_dataset_iterator(&self, _dataset: &Dataset) -> Result<DistributedDataset> {
        Err(StrategyError::deprecated(
            "make_dataset_iterator",
            "experimental_distribute_dataset",
        ))
    }

    /// Not supported; use [`MirroredStrategy::distribute_datasets_from_function`].
    pub fn make_input_fn_iterator<F>(&self, _input_fn: F) -> Result<DistributedDataset>
    where
        F: FnOnce(&InputContext) -> Result<Dataset>,
    {
        Err(StrategyError::deprecated(
            "make_input_fn_iterator",
            "distribute_datasets_from_function",
        ))
    }

    /// Combines the per-replica components of `value` into one host tensor.
    ///
    /// # Errors
    ///
    /// Returns [`StrategyError::Layout`] if `value` is not placed on this
    /// strategy's mesh.
    pub fn reduce(&self, op: ReduceOp, value: &DTensor) -> Result<Tensor> {
        if *value.layout().mesh() != self.mesh {
            return Err(StrategyError::layout(format!(
                "cannot reduce a tensor with layout {} on this strategy's mesh",
                value.layout()
            )));
        }
        debug!(%op, shape = ?value.shape(), "reducing across replicas");
        reduce_values(op, &unpack(value))
    }

    fn register(&self, variable: &Variable) {
        self.registry().insert(variable.id());
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, HashSet<VariableId>> {
        self.created.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn default_mesh(batch_dim: &str, devices: Vec<DeviceSpec>) -> Result<Mesh> {
    let count = devices.len();
    create_mesh(&[(batch_dim, count)], devices)
}

/// Strategy details that are not part of the replica-facing API.
#[derive(Debug, Clone, Copy)]
pub struct MirroredExtended<'a> {
    strategy: &'a MirroredStrategy,
}

impl<'a> MirroredExtended<'a> {
    /// Devices that run the model, in mesh order.
    pub fn worker_devices(&self) -> &'a [DeviceSpec] {
        self.strategy.mesh.local_devices()
    }

    /// Devices that hold variables, in mesh order.
    pub fn parameter_devices(&self) -> &'a [DeviceSpec] {
        self.strategy.mesh.local_devices()
    }

    pub fn variable_created_in_scope(&self, variable: &Variable) -> bool {
        self.strategy.variable_created_in_scope(variable)
    }

    pub fn colocate_vars_with(&self, variable: &Variable) -> Result<ColocationScope<'a>> {
        self.strategy.colocate_vars_with(variable)
    }

    /// Always false: the mesh is owned by a single client.
    pub fn in_multi_worker_mode(&self) -> bool {
        false
    }
}

/// Guard returned by [`MirroredStrategy::scope`].
#[derive(Debug)]
pub struct StrategyScope<'a> {
    strategy: &'a MirroredStrategy,
}

impl<'a> StrategyScope<'a> {
    pub fn strategy(&self) -> &'a MirroredStrategy {
        self.strategy
    }

    /// Creates a variable replicated on every device of the mesh.
    pub fn create_variable(&self, name: impl Into<String>, init: impl Into<InitialValue>) -> Variable {
        let variable = Variable::replicated(name, init.into(), self.strategy.mesh.clone());
        self.strategy.register(&variable);
        debug!(
            variable = variable.name(),
            id = %variable.id(),
            shape = ?variable.shape(),
            "created replicated variable"
        );
        variable
    }
}

impl Drop for StrategyScope<'_> {
    fn drop(&mut self) {
        debug!(batch_dim = %self.strategy.batch_dim, "leaving strategy scope");
    }
}

/// Guard returned by [`MirroredStrategy::colocate_vars_with`].
#[derive(Debug)]
pub struct ColocationScope<'a> {
    strategy: &'a MirroredStrategy,
    layout: Layout,
}

impl ColocationScope<'_> {
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Creates a variable with the colocated layout.
    ///
    /// # Errors
    ///
    /// Returns [`StrategyError::Layout`] if the initial value's rank differs
    /// from the colocated layout.
    pub fn create_variable(
        &self,
        name: impl Into<String>,
        init: impl Into<InitialValue>,
    ) -> Result<Variable> {
        let variable = Variable::with_layout(name, init.into(), self.layout.clone())?;
        self.strategy.register(&variable);
        debug!(variable = variable.name(), id = %variable.id(), "created colocated variable");
        Ok(variable)
    }
}

impl Drop for ColocationScope<'_> {
    fn drop(&mut self) {
        debug!(layout = %self.layout, "leaving colocation scope");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::TensorSpec;
    use crate::device::VirtualPlatform;
    use crate::tensor::DType;
    use ndarray::{ArrayD, IxDyn};

    fn two_device_mesh(device_type: DeviceType) -> Mesh {
        let devices = (0..2).map(|i| DeviceSpec::local(device_type, i)).collect();
        Mesh::new(["batch"], &[2], vec![0, 1], vec![0, 1], devices).unwrap()
    }

    fn strategy() -> MirroredStrategy {
        MirroredStrategy::with_mesh(two_device_mesh(DeviceType::Cpu)).unwrap()
    }

    fn images_and_labels() -> Dataset {
        Dataset::from_tensors((Tensor::full(&[8, 8, 3], 1.0), Tensor::full(&[1], 0.0)))
            .repeat(None)
    }

    #[test]
    fn test_variable_creation_from_each_initial_value() {
        let strategy = strategy();
        let scope = strategy.scope();
        let expected = Tensor::from(vec![1.0f32, 2.0]);

        let inits: Vec<InitialValue> = vec![
            vec![1.0f32, 2.0].into(),
            ArrayD::from_shape_vec(IxDyn(&[2]), vec![1.0f32, 2.0]).unwrap().into(),
            Tensor::from(vec![1.0f32, 2.0]).into(),
            InitialValue::from_fn(|| vec![1.0f32, 2.0]),
            InitialValue::from_fn(|| ArrayD::from_shape_vec(IxDyn(&[2]), vec![1.0f32, 2.0]).unwrap()),
            InitialValue::from_fn(|| Tensor::from(vec![1.0f32, 2.0])),
        ];
        for init in inits {
            let v = scope.create_variable("v", init);
            assert_eq!(v.read_value(), &expected);
            let layout = v.layout().unwrap();
            assert!(layout.is_fully_replicated());
            assert_eq!(layout.mesh(), strategy.mesh());
            assert_eq!(unpack(&v.to_dtensor().unwrap()).len(), 2);
        }
    }

    #[test]
    fn test_mesh_and_replicas() {
        let strategy = strategy();
        assert_eq!(strategy.mesh(), &two_device_mesh(DeviceType::Cpu));
        assert_eq!(strategy.batch_dim(), "batch");
        assert_eq!(strategy.num_replicas_in_sync(), 2);
    }

    #[test]
    fn test_worker_and_parameter_devices() {
        let strategy = strategy();
        let extended = strategy.extended();
        assert_eq!(extended.worker_devices().len(), 2);
        assert_eq!(extended.worker_devices(), strategy.mesh().local_devices());
        assert_eq!(extended.parameter_devices(), strategy.mesh().local_devices());
        assert!(!extended.in_multi_worker_mode());
    }

    #[test]
    fn test_variable_created_in_scope() {
        let strategy1 = strategy();
        let v1 = strategy1.scope().create_variable("v1", vec![1.0f32, 2.0]);

        let v2 = Variable::new("v2", vec![1.0f32, 2.0]);

        let strategy2 = strategy();
        let v3 = {
            let scope = strategy2.scope();
            scope.create_variable("v3", vec![1.0f32, 2.0])
        };

        assert!(strategy1.variable_created_in_scope(&v1));
        assert!(!strategy1.variable_created_in_scope(&v2));
        assert!(!strategy1.variable_created_in_scope(&v3));
        assert!(strategy2.extended().variable_created_in_scope(&v3));
    }

    #[test]
    fn test_clone_shares_identity_not_value() {
        let strategy = strategy();
        let original = strategy.scope().create_variable("v", vec![1.0f32, 2.0]);
        let mut copy = original.clone();
        copy.assign(vec![5.0f32, 6.0]).unwrap();

        assert_eq!(copy.id(), original.id());
        assert!(strategy.variable_created_in_scope(&copy));
        assert_eq!(original.read_value(), &Tensor::from(vec![1.0f32, 2.0]));
        drop(original);
        assert!(strategy.variable_created_in_scope(&copy));
    }

    #[test]
    fn test_colocate_vars_with() {
        let strategy = strategy();
        let scope = strategy.scope();
        let v1 = scope.create_variable("v1", vec![1.0f32, 2.0]);
        let v2 = {
            let colocated = strategy.extended().colocate_vars_with(&v1).unwrap();
            colocated.create_variable("v2", vec![2.0f32, 3.0]).unwrap()
        };

        assert_eq!(v1.layout(), v2.layout());
        assert!(strategy.variable_created_in_scope(&v2));
    }

    #[test]
    fn test_colocate_rejects_foreign_variables() {
        let strategy = strategy();
        let outside = Variable::new("outside", vec![1.0f32]);
        assert!(strategy.colocate_vars_with(&outside).is_err());

        let colocated = strategy
            .colocate_vars_with(&strategy.scope().create_variable("v", vec![1.0f32]))
            .unwrap();
        let err = colocated.create_variable("w", Tensor::full(&[1, 1], 0.0)).unwrap_err();
        assert!(matches!(err, StrategyError::Layout { .. }));
    }

    #[test]
    fn test_invalid_mesh_shape() {
        let devices = (0..2).map(|i| DeviceSpec::local(DeviceType::Cpu, i)).collect();
        let mesh_2d = Mesh::new(["batch", "model"], &[2, 1], vec![0, 1], vec![0, 1], devices).unwrap();
        let err = MirroredStrategy::with_mesh(mesh_2d).unwrap_err();
        assert!(matches!(err, StrategyError::InvalidMeshShape { ndim: 2 }));
        assert_eq!(
            err.to_string(),
            "The mesh for MirroredStrategy must be 1D, received: 2D"
        );
    }

    #[test]
    fn test_partially_local_mesh_rejected() {
        let devices = (0..2).map(|i| DeviceSpec::local(DeviceType::Cpu, i)).collect();
        let mesh = Mesh::new(["batch"], &[4], vec![0, 1, 2, 3], vec![0, 1], devices).unwrap();
        let err = MirroredStrategy::with_mesh(mesh).unwrap_err();
        assert!(matches!(err, StrategyError::Mesh { .. }));
    }

    #[test]
    fn test_explicit_device_list() {
        for device_type in ["CPU", "GPU", "TPU"] {
            let devices: Vec<String> = (0..2).map(|i| format!("/{}:{}", device_type, i)).collect();
            let strategy = MirroredStrategy::with_devices(&devices).unwrap();
            let mesh = strategy.mesh();
            assert_eq!(mesh.num_local_devices(), 2);
            assert_eq!(mesh.shape(), vec![2]);
            assert_eq!(mesh.dim_names(), vec!["batch"]);
            assert_eq!(
                mesh.local_devices()[0].to_string(),
                format!("/job:localhost/replica:0/task:0/device:{}:0", device_type)
            );
            assert_eq!(
                mesh.local_devices()[1].to_string(),
                format!("/job:localhost/replica:0/task:0/device:{}:1", device_type)
            );
        }
    }

    #[test]
    fn test_implicit_device_list_uses_preferred_type() {
        let platform = VirtualPlatform::host()
            .with_logical_devices(DeviceType::Cpu, 4)
            .with_logical_devices(DeviceType::Gpu, 2);
        let strategy = MirroredStrategy::new(None, None, &platform).unwrap();
        let mesh = strategy.mesh();
        assert_eq!(mesh.num_local_devices(), 2);
        assert_eq!(mesh.shape(), vec![2]);
        assert_eq!(
            mesh.local_devices()[0].to_string(),
            "/job:localhost/replica:0/task:0/device:GPU:0"
        );
        assert_eq!(
            mesh.local_devices()[1].to_string(),
            "/job:localhost/replica:0/task:0/device:GPU:1"
        );
    }

    #[test]
    fn test_mesh_with_device_list() {
        let devices: Vec<DeviceSpec> = vec!["/CPU:0".parse().unwrap(), "/CPU:1".parse().unwrap()];
        let mesh = create_mesh(&[("batch", 2)], devices.clone()).unwrap();
        let err = MirroredStrategy::new(Some(mesh), Some(devices), &VirtualPlatform::host()).unwrap_err();
        assert!(matches!(err, StrategyError::ConflictingConfiguration { .. }));
        assert!(err
            .to_string()
            .contains("Mesh and devices can not be provided at the same time"));
    }

    #[test]
    fn test_from_config() {
        let config: StrategyConfig = r#"
[mesh]
batch_dim_name = "replica"
device_type = "cpu"

[platform]
cpu_devices = 4
gpu_devices = 2
"#
        .parse()
        .unwrap();
        let strategy = MirroredStrategy::from_config(&config, &VirtualPlatform::from_config(&config.platform)).unwrap();
        assert_eq!(strategy.batch_dim(), "replica");
        assert_eq!(strategy.num_replicas_in_sync(), 4);
        assert_eq!(strategy.mesh().device_type(), Some(DeviceType::Cpu));
    }

    #[test]
    fn test_create_batched_dataset() {
        let strategy = strategy();
        let global_batch_size = 8;
        let dataset = images_and_labels().batch(global_batch_size, false).unwrap().prefetch(2);

        let distributed = strategy.experimental_distribute_dataset(&dataset).unwrap();
        let element = distributed.iter().next().unwrap().unwrap();
        let (images, labels) = (&element.components()[0], &element.components()[1]);
        assert_eq!(images.shape(), &[global_batch_size, 8, 8, 3]);
        assert_eq!(labels.shape(), &[global_batch_size, 1]);

        assert_eq!(unpack(images).len(), strategy.mesh().num_local_devices());
        assert_eq!(unpack(labels).len(), strategy.mesh().num_local_devices());
        assert_eq!(unpack(images)[0].shape(), &[4, 8, 8, 3]);
    }

    #[test]
    fn test_uneven_batched_dataset() {
        let strategy = strategy();
        let dataset = Dataset::from_generator(
            || vec![Tensor::from(vec![1i64, 2, 3]), Tensor::from(vec![1i64, 2])],
            vec![TensorSpec::unknown(DType::Int64)],
        )
        .repeat(None);

        let err = strategy.experimental_distribute_dataset(&dataset).unwrap_err();
        assert!(matches!(err, StrategyError::UnsupportedDatasetShape { .. }));
        assert!(err.to_string().contains("requires a static batch size"));
    }

    #[test]
    fn test_partial_trailing_batch_is_dropped() {
        let strategy = strategy();
        let dataset = Dataset::from_tensors((Tensor::full(&[8, 8, 3], 1.0), Tensor::full(&[1], 0.0)))
            .repeat(Some(30))
            .batch(8, false)
            .unwrap()
            .prefetch(2);

        let distributed = strategy.experimental_distribute_dataset(&dataset).unwrap();
        let batches: Vec<usize> = distributed
            .iter()
            .map(|e| e.unwrap().components()[0].shape()[0])
            .collect();
        assert_eq!(batches, vec![8, 8, 8]);
    }

    #[test]
    fn test_deprecated_strategy_methods() {
        let strategy = strategy();
        let dataset = images_and_labels();

        let err = strategy.make_dataset_iterator(&dataset).unwrap_err();
        assert!(err.to_string().contains("only available in the V1 API"));

        let err = strategy
            .make_input_fn_iterator(|_| Ok(dataset.clone()))
            .unwrap_err();
        assert!(matches!(err, StrategyError::DeprecatedApi { .. }));
        assert!(err.to_string().contains("only available in the V1 API"));
    }

    #[test]
    fn test_distribute_dataset_from_fn() {
        let strategy = strategy();
        let local_batch_size = 4;
        let global_batch_size = 8;

        let distributed = strategy
            .distribute_datasets_from_function(
                |ctx| {
                    assert_eq!(ctx.num_replicas_in_sync(), 2);
                    assert_eq!(ctx.per_replica_batch_size(global_batch_size)?, local_batch_size);
                    Ok(images_and_labels().batch(local_batch_size, true)?.prefetch(2))
                },
                None,
            )
            .unwrap();
        assert_eq!(distributed.global_batch_size(), global_batch_size);

        let element = distributed.iter().next().unwrap().unwrap();
        let (images, labels) = (&element.components()[0], &element.components()[1]);
        assert_eq!(images.shape(), &[global_batch_size, 8, 8, 3]);
        assert_eq!(labels.shape(), &[global_batch_size, 1]);

        let unpacked = unpack(images);
        assert_eq!(unpacked.len(), strategy.mesh().num_local_devices());
        assert_eq!(unpacked[0].shape(), &[local_batch_size, 8, 8, 3]);
        assert_eq!(unpacked[1].shape(), &[local_batch_size, 8, 8, 3]);
    }

    #[test]
    fn test_dataset_fn_without_static_batch() {
        let strategy = strategy();
        let err = strategy
            .distribute_datasets_from_function(|_| Ok(images_and_labels()), None)
            .unwrap_err();
        assert!(matches!(err, StrategyError::UnsupportedDatasetShape { .. }));
    }

    #[test]
    fn test_reduce_across_replicas() {
        let strategy = strategy();
        let v = strategy.scope().create_variable("v", vec![1.0f32, 2.0]);
        let replicated = v.to_dtensor().unwrap();
        assert_eq!(
            strategy.reduce(ReduceOp::Sum, &replicated).unwrap(),
            Tensor::from(vec![2.0f32, 4.0])
        );
        assert_eq!(
            strategy.reduce(ReduceOp::Mean, &replicated).unwrap(),
            Tensor::from(vec![1.0f32, 2.0])
        );

        let other = MirroredStrategy::with_mesh(two_device_mesh(DeviceType::Gpu)).unwrap();
        assert!(other.reduce(ReduceOp::Sum, &replicated).is_err());
    }
}
