// rust/mirror-core/src/tensor.rs

//! Host tensors and their distributed counterparts.
//!
//! [`Tensor`] is a dense host array. [`DTensor`] is a global tensor placed on
//! a mesh according to a [`Layout`], stored as one component per local device.
//! [`pack`] and [`unpack`] convert between the two views.

use std::fmt;

use ndarray::{Array1, ArrayD, ArrayViewD, Axis, Dimension, IxDyn};

use crate::error::{Result, StrategyError};
use crate::layout::Layout;

/// Element type of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    Float32,
    Int64,
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DType::Float32 => f.write_str("float32"),
            DType::Int64 => f.write_str("int64"),
        }
    }
}

/// A dense host tensor.
#[derive(Debug, Clone, PartialEq)]
pub enum Tensor {
    Float32(ArrayD<f32>),
    Int64(ArrayD<i64>),
}

impl Tensor {
    /// Creates a float tensor of the given shape.
    pub fn from_shape_vec(shape: &[usize], values: Vec<f32>) -> Result<Self> {
        ArrayD::from_shape_vec(IxDyn(shape), values)
            .map(Tensor::Float32)
            .map_err(|e| StrategyError::tensor(e.to_string()))
    }

    /// Creates a float tensor of the given shape with every element set to `value`.
    pub fn full(shape: &[usize], value: f32) -> Self {
        Tensor::Float32(ArrayD::from_elem(IxDyn(shape), value))
    }

    /// Creates a float tensor whose element at a flat row-major position is `f(position)`.
    pub fn from_fn(shape: &[usize], f: impl Fn(usize) -> f32) -> Self {
        Tensor::Float32(ArrayD::from_shape_fn(IxDyn(shape), |index| {
            let position = index
                .slice()
                .iter()
                .zip(shape)
                .fold(0, |acc, (&i, &dim)| acc * dim + i);
            f(position)
        }))
    }

    pub fn dtype(&self) -> DType {
        match self {
            Tensor::Float32(_) => DType::Float32,
            Tensor::Int64(_) => DType::Int64,
        }
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            Tensor::Float32(a) => a.shape(),
            Tensor::Int64(a) => a.shape(),
        }
    }

    pub fn rank(&self) -> usize {
        self.shape().len()
    }

    pub fn len(&self) -> usize {
        self.shape().iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_f32(&self) -> Option<&ArrayD<f32>> {
        match self {
            Tensor::Float32(a) => Some(a),
            Tensor::Int64(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<&ArrayD<i64>> {
        match self {
            Tensor::Int64(a) => Some(a),
            Tensor::Float32(_) => None,
        }
    }

    /// The `index`-th slice along the leading axis.
    pub fn index_axis0(&self, index: usize) -> Result<Tensor> {
        let leading = self.leading_dim()?;
        if index >= leading {
            return Err(StrategyError::tensor(format!(
                "index {} out of range for leading dimension {}",
                index, leading
            )));
        }
        Ok(match self {
            Tensor::Float32(a) => Tensor::Float32(a.index_axis(Axis(0), index).to_owned()),
            Tensor::Int64(a) => Tensor::Int64(a.index_axis(Axis(0), index).to_owned()),
        })
    }

    /// Splits along the leading axis into `parts` equal pieces.
    pub fn split(&self, parts: usize) -> Result<Vec<Tensor>> {
        let leading = self.leading_dim()?;
        if parts == 0 || leading % parts != 0 {
            return Err(StrategyError::tensor(format!(
                "cannot split leading dimension {} into {} equal part(s)",
                leading, parts
            )));
        }
        if leading == 0 {
            return Ok(vec![self.clone(); parts]);
        }
        let chunk = leading / parts;
        Ok(match self {
            Tensor::Float32(a) => a
                .axis_chunks_iter(Axis(0), chunk)
                .map(|c| Tensor::Float32(c.to_owned()))
                .collect(),
            Tensor::Int64(a) => a
                .axis_chunks_iter(Axis(0), chunk)
                .map(|c| Tensor::Int64(c.to_owned()))
                .collect(),
        })
    }

    /// Stacks same-shaped tensors along a new leading axis.
    pub fn stack(tensors: &[Tensor]) -> Result<Tensor> {
        match common_dtype(tensors)? {
            DType::Float32 => stack_views(float_views(tensors)).map(Tensor::Float32),
            DType::Int64 => stack_views(int_views(tensors)).map(Tensor::Int64),
        }
    }

    /// Concatenates tensors along the existing leading axis.
    pub fn concat(tensors: &[Tensor]) -> Result<Tensor> {
        match common_dtype(tensors)? {
            DType::Float32 => concat_views(float_views(tensors)).map(Tensor::Float32),
            DType::Int64 => concat_views(int_views(tensors)).map(Tensor::Int64),
        }
    }

    fn leading_dim(&self) -> Result<usize> {
        self.shape()
            .first()
            .copied()
            .ok_or_else(|| StrategyError::tensor("scalar tensors have no leading axis"))
    }
}

impl From<Vec<f32>> for Tensor {
    fn from(values: Vec<f32>) -> Self {
        Tensor::Float32(Array1::from(values).into_dyn())
    }
}

impl From<&[f32]> for Tensor {
    fn from(values: &[f32]) -> Self {
        Tensor::from(values.to_vec())
    }
}

impl From<Vec<i64>> for Tensor {
    fn from(values: Vec<i64>) -> Self {
        Tensor::Int64(Array1::from(values).into_dyn())
    }
}

impl From<ArrayD<f32>> for Tensor {
    fn from(array: ArrayD<f32>) -> Self {
        Tensor::Float32(array)
    }
}

impl From<ArrayD<i64>> for Tensor {
    fn from(array: ArrayD<i64>) -> Self {
        Tensor::Int64(array)
    }
}

fn common_dtype(tensors: &[Tensor]) -> Result<DType> {
    let first = tensors
        .first()
        .ok_or_else(|| StrategyError::tensor("cannot combine an empty list of tensors"))?;
    let dtype = first.dtype();
    if let Some(other) = tensors.iter().find(|t| t.dtype() != dtype) {
        return Err(StrategyError::tensor(format!(
            "mixed dtypes {} and {}",
            dtype,
            other.dtype()
        )));
    }
    Ok(dtype)
}

fn float_views(tensors: &[Tensor]) -> Vec<ArrayViewD<'_, f32>> {
    tensors.iter().filter_map(Tensor::as_f32).map(|a| a.view()).collect()
}

fn int_views(tensors: &[Tensor]) -> Vec<ArrayViewD<'_, i64>> {
    tensors.iter().filter_map(Tensor::as_i64).map(|a| a.view()).collect()
}

fn stack_views<T: Clone>(views: Vec<ArrayViewD<'_, T>>) -> Result<ArrayD<T>> {
    ndarray::stack(Axis(0), &views).map_err(|e| StrategyError::tensor(format!("stack: {}", e)))
}

fn concat_views<T: Clone>(views: Vec<ArrayViewD<'_, T>>) -> Result<ArrayD<T>> {
    if views.iter().any(|v| v.ndim() == 0) {
        return Err(StrategyError::tensor("cannot concatenate scalar tensors"));
    }
    ndarray::concatenate(Axis(0), &views)
        .map_err(|e| StrategyError::tensor(format!("concat: {}", e)))
}

/// A global tensor placed on a mesh, held as one component per local device.
#[derive(Debug, Clone, PartialEq)]
pub struct DTensor {
    layout: Layout,
    components: Vec<Tensor>,
    shape: Vec<usize>,
}

impl DTensor {
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Global shape.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        // `pack` rejects empty component lists.
        self.components[0].dtype()
    }

    pub fn num_components(&self) -> usize {
        self.components.len()
    }

    /// Assembles the full global value on the host.
    ///
    /// Replicated axes take the first component; a single sharded leading
    /// axis is concatenated in device order.
    pub fn to_global(&self) -> Result<Tensor> {
        if self.layout.is_fully_replicated() {
            return Ok(self.components[0].clone());
        }
        if self.layout.sharded_axes().any(|axis| axis != 0) {
            return Err(StrategyError::layout(
                "only layouts sharded on the leading axis can be assembled on the host",
            ));
        }
        Tensor::concat(&self.components)
    }
}

/// Places per-device `components` onto the mesh of `layout`.
///
/// # Errors
///
/// Returns [`StrategyError::Layout`] if the number of components differs from
/// the number of local devices, ranks disagree with the layout, or component
/// shapes and dtypes are not uniform.
pub fn pack(components: Vec<Tensor>, layout: Layout) -> Result<DTensor> {
    let expected = layout.mesh().num_local_devices();
    if components.is_empty() || components.len() != expected {
        return Err(StrategyError::layout(format!(
            "expected {} component(s), one per local device, got {}",
            expected,
            components.len()
        )));
    }

    let first = &components[0];
    if first.rank() != layout.rank() {
        return Err(StrategyError::layout(format!(
            "component rank {} does not match layout rank {}",
            first.rank(),
            layout.rank()
        )));
    }
    if let Some(other) = components
        .iter()
        .find(|c| c.shape() != first.shape() || c.dtype() != first.dtype())
    {
        return Err(StrategyError::layout(format!(
            "components must share shape and dtype, found {:?}/{} and {:?}/{}",
            first.shape(),
            first.dtype(),
            other.shape(),
            other.dtype()
        )));
    }

    let shape = first
        .shape()
        .iter()
        .enumerate()
        .map(|(axis, &size)| size * layout.num_shards(axis))
        .collect();

    Ok(DTensor {
        layout,
        components,
        shape,
    })
}

/// Returns the per-device components of `tensor` in mesh device order.
pub fn unpack(tensor: &DTensor) -> Vec<Tensor> {
    tensor.components.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceSpec, DeviceType};
    use crate::mesh::{create_mesh, Mesh};

    fn mesh(n: u32) -> Mesh {
        let devices = (0..n).map(|i| DeviceSpec::local(DeviceType::Cpu, i)).collect();
        create_mesh(&[("batch", n as usize)], devices).unwrap()
    }

    #[test]
    fn test_from_vec() {
        let t = Tensor::from(vec![1.0, 2.0]);
        assert_eq!(t.shape(), &[2]);
        assert_eq!(t.dtype(), DType::Float32);

        let t = Tensor::from(vec![1i64, 2, 3]);
        assert_eq!(t.shape(), &[3]);
        assert_eq!(t.dtype(), DType::Int64);
    }

    #[test]
    fn test_stack_and_index() {
        let a = Tensor::full(&[2, 3], 1.0);
        let b = Tensor::full(&[2, 3], 2.0);
        let stacked = Tensor::stack(&[a.clone(), b.clone()]).unwrap();
        assert_eq!(stacked.shape(), &[2, 2, 3]);
        assert_eq!(stacked.index_axis0(0).unwrap(), a);
        assert_eq!(stacked.index_axis0(1).unwrap(), b);
        assert!(stacked.index_axis0(2).is_err());
    }

    #[test]
    fn test_stack_rejects_mismatched_shapes() {
        let a = Tensor::full(&[2], 1.0);
        let b = Tensor::full(&[3], 1.0);
        assert!(Tensor::stack(&[a, b]).is_err());
    }

    #[test]
    fn test_stack_rejects_mixed_dtypes() {
        let a = Tensor::from(vec![1.0f32]);
        let b = Tensor::from(vec![1i64]);
        let err = Tensor::stack(&[a, b]).unwrap_err();
        assert!(err.to_string().contains("mixed dtypes"));
    }

    #[test]
    fn test_split() {
        let t = Tensor::from_fn(&[8, 2], |i| i as f32);
        let parts = t.split(2).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].shape(), &[4, 2]);
        assert_eq!(parts[1].as_f32().unwrap()[&[0, 0][..]], 8.0);
        assert!(t.split(3).is_err());
        assert!(Tensor::full(&[], 1.0).split(1).is_err());
    }

    #[test]
    fn test_pack_unpack_batch_sharded() {
        let mesh = mesh(2);
        let layout = Layout::batch_sharded(mesh, "batch", 2).unwrap();
        let parts = Tensor::from_fn(&[8, 3], |i| i as f32).split(2).unwrap();

        let packed = pack(parts.clone(), layout).unwrap();
        assert_eq!(packed.shape(), &[8, 3]);
        assert_eq!(unpack(&packed), parts);
        assert_eq!(packed.to_global().unwrap(), Tensor::from_fn(&[8, 3], |i| i as f32));
    }

    #[test]
    fn test_pack_replicated_keeps_shape() {
        let mesh = mesh(2);
        let layout = Layout::replicated(mesh, 1);
        let value = Tensor::from(vec![1.0, 2.0]);
        let packed = pack(vec![value.clone(), value.clone()], layout).unwrap();
        assert_eq!(packed.shape(), &[2]);
        assert_eq!(packed.to_global().unwrap(), value);
    }

    #[test]
    fn test_pack_requires_one_component_per_device() {
        let layout = Layout::replicated(mesh(2), 1);
        let err = pack(vec![Tensor::from(vec![1.0])], layout).unwrap_err();
        assert!(err.to_string().contains("one per local device"));
    }

    #[test]
    fn test_pack_rejects_rank_mismatch() {
        let layout = Layout::replicated(mesh(1), 2);
        assert!(pack(vec![Tensor::from(vec![1.0])], layout).is_err());
    }
}
