// rust/mirror-core/src/variable.rs

//! Model variables.
//!
//! A [`Variable`] holds one host value. Variables created through a
//! strategy scope also carry the [`Layout`] they are placed with and can be
//! viewed as a [`DTensor`] with one identical component per device.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use ndarray::ArrayD;

use crate::error::{Result, StrategyError};
use crate::layout::Layout;
use crate::mesh::Mesh;
use crate::tensor::{pack, DTensor, DType, Tensor};

static NEXT_VARIABLE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariableId(u64);

impl VariableId {
    fn next() -> Self {
        Self(NEXT_VARIABLE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for VariableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "var{}", self.0)
    }
}

/// The initial value of a variable: either a value or a deferred initializer.
pub enum InitialValue {
    Value(Tensor),
    Callable(Box<dyn FnOnce() -> Tensor + Send>),
}

impl InitialValue {
    /// A deferred initializer, run once when the variable is created.
    pub fn from_fn<F, T>(f: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
        T: Into<Tensor>,
    {
        InitialValue::Callable(Box::new(move || f().into()))
    }

    fn resolve(self) -> Tensor {
        match self {
            InitialValue::Value(tensor) => tensor,
            InitialValue::Callable(f) => f(),
        }
    }
}

impl fmt::Debug for InitialValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitialValue::Value(tensor) => f.debug_tuple("Value").field(tensor).finish(),
            InitialValue::Callable(_) => f.write_str("Callable(..)"),
        }
    }
}

impl From<Tensor> for InitialValue {
    fn from(tensor: Tensor) -> Self {
        InitialValue::Value(tensor)
    }
}

impl From<Vec<f32>> for InitialValue {
    fn from(values: Vec<f32>) -> Self {
        InitialValue::Value(values.into())
    }
}

impl From<Vec<i64>> for InitialValue {
    fn from(values: Vec<i64>) -> Self {
        InitialValue::Value(values.into())
    }
}

impl From<ArrayD<f32>> for InitialValue {
    fn from(array: ArrayD<f32>) -> Self {
        InitialValue::Value(array.into())
    }
}

/// A named, mutable tensor value.
///
/// Identity is fixed at creation: a clone keeps the same [`VariableId`], so a
/// strategy reports it as created in its scope, but the clone holds its own
/// copy of the value and `assign` on one is not seen by the other. A strategy
/// keeps the ids it created for as long as the strategy lives, even after
/// every handle to the variable is dropped.
#[derive(Debug, Clone)]
pub struct Variable {
    id: VariableId,
    name: String,
    layout: Option<Layout>,
    value: Tensor,
}

impl Variable {
    /// Creates a variable that is not placed on any mesh.
    pub fn new(name: impl Into<String>, init: impl Into<InitialValue>) -> Self {
        Self::build(name.into(), init.into())
    }

    /// Creates a variable placed with `layout`.
    ///
    /// # Errors
    ///
    /// Returns [`StrategyError::Layout`] if the rank of the initial value does
    /// not match the layout.
    pub(crate) fn with_layout(
        name: impl Into<String>,
        init: InitialValue,
        layout: Layout,
    ) -> Result<Self> {
        let variable = Self::build(name.into(), init);
        if variable.value.rank() != layout.rank() {
            return Err(StrategyError::layout(format!(
                "variable '{}' has rank {} but layout has rank {}",
                variable.name,
                variable.value.rank(),
                layout.rank()
            )));
        }
        Ok(Self {
            layout: Some(layout),
            ..variable
        })
    }

    /// Creates a variable replicated on every device of `mesh`.
    pub(crate) fn replicated(name: impl Into<String>, init: InitialValue, mesh: Mesh) -> Self {
        let variable = Self::build(name.into(), init);
        let layout = Layout::replicated(mesh, variable.value.rank());
        Self {
            layout: Some(layout),
            ..variable
        }
    }

    fn build(name: String, init: InitialValue) -> Self {
        Self {
            id: VariableId::next(),
            name,
            layout: None,
            value: init.resolve(),
        }
    }

    pub fn id(&self) -> VariableId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Layout on the strategy mesh, `None` for variables created outside any scope.
    pub fn layout(&self) -> Option<&Layout> {
        self.layout.as_ref()
    }

    pub fn shape(&self) -> &[usize] {
        self.value.shape()
    }

    pub fn dtype(&self) -> DType {
        self.value.dtype()
    }

    pub fn read_value(&self) -> &Tensor {
        &self.value
    }

    /// Replaces the value, keeping shape and dtype fixed.
    pub fn assign(&mut self, value: impl Into<Tensor>) -> Result<()> {
        let value = value.into();
        if value.dtype() != self.value.dtype() || value.shape() != self.value.shape() {
            return Err(StrategyError::tensor(format!(
                "cannot assign {} {:?} to variable '{}' of {} {:?}",
                value.dtype(),
                value.shape(),
                self.name,
                self.value.dtype(),
                self.value.shape()
            )));
        }
        self.value = value;
        Ok(())
    }

    /// The variable as a distributed tensor, one copy per local device.
    ///
    /// # Errors
    ///
    /// Returns [`StrategyError::Layout`] if the variable has no layout.
    pub fn to_dtensor(&self) -> Result<DTensor> {
        let layout = self.layout.clone().ok_or_else(|| {
            StrategyError::layout(format!("variable '{}' is not placed on a mesh", self.name))
        })?;
        let components = vec![self.value.clone(); layout.mesh().num_local_devices()];
        pack(components, layout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceSpec, DeviceType};
    use crate::mesh::create_mesh;

    fn layout(rank: usize) -> Layout {
        let devices = (0..2).map(|i| DeviceSpec::local(DeviceType::Cpu, i)).collect();
        let mesh = create_mesh(&[("batch", 2)], devices).unwrap();
        Layout::replicated(mesh, rank)
    }

    #[test]
    fn test_ids_are_unique() {
        let a = Variable::new("a", vec![1.0f32]);
        let b = Variable::new("a", vec![1.0f32]);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_value_and_callable_agree() {
        let eager = Variable::new("v", vec![1.0f32, 2.0]);
        let deferred = Variable::new("v", InitialValue::from_fn(|| vec![1.0f32, 2.0]));
        assert_eq!(eager.read_value(), deferred.read_value());
        assert!(eager.layout().is_none());
    }

    #[test]
    fn test_assign_checks_shape_and_dtype() {
        let mut v = Variable::new("v", vec![1.0f32, 2.0]);
        v.assign(vec![3.0f32, 4.0]).unwrap();
        assert_eq!(v.read_value(), &Tensor::from(vec![3.0f32, 4.0]));

        assert!(v.assign(vec![1.0f32]).is_err());
        assert!(v.assign(vec![1i64, 2]).is_err());
    }

    #[test]
    fn test_with_layout_checks_rank() {
        let v = Variable::with_layout("v", vec![1.0f32, 2.0].into(), layout(1)).unwrap();
        assert_eq!(v.layout(), Some(&layout(1)));

        let err = Variable::with_layout("v", vec![1.0f32].into(), layout(2)).unwrap_err();
        assert!(matches!(err, StrategyError::Layout { .. }));
    }

    #[test]
    fn test_to_dtensor_replicates() {
        let v = Variable::with_layout("v", vec![1.0f32, 2.0].into(), layout(1)).unwrap();
        let dtensor = v.to_dtensor().unwrap();
        assert_eq!(dtensor.shape(), &[2]);
        assert_eq!(dtensor.num_components(), 2);

        assert!(Variable::new("v", vec![1.0f32]).to_dtensor().is_err());
    }
}
