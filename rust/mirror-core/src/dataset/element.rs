// rust/mirror-core/src/dataset/element.rs

use crate::error::{Result, StrategyError};
use crate::tensor::{DType, Tensor};

/// One element of a dataset: a fixed-arity tuple of tensors.
#[derive(Debug, Clone, PartialEq)]
pub struct Element(Vec<Tensor>);

impl Element {
    pub fn new(components: Vec<Tensor>) -> Self {
        Self(components)
    }

    pub fn components(&self) -> &[Tensor] {
        &self.0
    }

    pub fn into_components(self) -> Vec<Tensor> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Stacks each component across `elements` along a new leading axis.
    pub fn stack(elements: &[Element]) -> Result<Element> {
        let first = elements
            .first()
            .ok_or_else(|| StrategyError::tensor("cannot batch zero elements"))?;
        if let Some(other) = elements.iter().find(|e| e.len() != first.len()) {
            return Err(StrategyError::tensor(format!(
                "cannot batch elements with {} and {} components",
                first.len(),
                other.len()
            )));
        }

        let components = (0..first.len())
            .map(|i| {
                let column: Vec<Tensor> = elements.iter().map(|e| e.0[i].clone()).collect();
                Tensor::stack(&column)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Element(components))
    }
}

impl From<Tensor> for Element {
    fn from(tensor: Tensor) -> Self {
        Self(vec![tensor])
    }
}

impl From<Vec<Tensor>> for Element {
    fn from(components: Vec<Tensor>) -> Self {
        Self(components)
    }
}

impl From<(Tensor, Tensor)> for Element {
    fn from((a, b): (Tensor, Tensor)) -> Self {
        Self(vec![a, b])
    }
}

/// Static description of one element component.
///
/// `shape` is `None` when even the rank is unknown; individual dimensions are
/// `None` when only their size is unknown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorSpec {
    pub dtype: DType,
    pub shape: Option<Vec<Option<usize>>>,
}

impl TensorSpec {
    /// A spec with unknown rank.
    pub fn unknown(dtype: DType) -> Self {
        Self { dtype, shape: None }
    }

    /// A fully-known spec.
    pub fn of(tensor: &Tensor) -> Self {
        Self {
            dtype: tensor.dtype(),
            shape: Some(tensor.shape().iter().copied().map(Some).collect()),
        }
    }

    pub fn rank(&self) -> Option<usize> {
        self.shape.as_ref().map(Vec::len)
    }

    /// Size of the leading dimension, if statically known.
    pub fn leading_dim(&self) -> Option<usize> {
        self.shape.as_ref().and_then(|s| s.first().copied().flatten())
    }

    pub(crate) fn batched(&self, batch: Option<usize>) -> Self {
        Self {
            dtype: self.dtype,
            shape: self.shape.as_ref().map(|s| {
                let mut shape = Vec::with_capacity(s.len() + 1);
                shape.push(batch);
                shape.extend_from_slice(s);
                shape
            }),
        }
    }

    pub(crate) fn unbatched(&self) -> Self {
        Self {
            dtype: self.dtype,
            shape: self.shape.as_ref().map(|s| s.iter().skip(1).copied().collect()),
        }
    }

    /// Whether `tensor` is compatible with this spec.
    pub fn is_compatible_with(&self, tensor: &Tensor) -> bool {
        if tensor.dtype() != self.dtype {
            return false;
        }
        match &self.shape {
            None => true,
            Some(shape) => {
                shape.len() == tensor.rank()
                    && shape
                        .iter()
                        .zip(tensor.shape())
                        .all(|(expected, actual)| expected.map_or(true, |e| e == *actual))
            }
        }
    }
}
