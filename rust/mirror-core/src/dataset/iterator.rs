// rust/mirror-core/src/dataset/iterator.rs

use super::element::{Element, TensorSpec};
use super::pipeline::Dataset;
use crate::error::{Result, StrategyError};

/// Type-erased element stream produced by one pipeline stage.
pub type BoxedIter = Box<dyn Iterator<Item = Result<Element>> + Send>;

/// An iterator over the elements of a [`Dataset`].
///
/// Yields `Err` at most once; iteration ends after the first error.
pub struct DatasetIterator {
    inner: BoxedIter,
    failed: bool,
}

impl DatasetIterator {
    pub(crate) fn new(inner: BoxedIter) -> Self {
        Self {
            inner,
            failed: false,
        }
    }

    /// Returns the next element, `Ok(None)` once the dataset is exhausted.
    pub fn next_element(&mut self) -> Result<Option<Element>> {
        self.next().transpose()
    }

    pub(crate) fn into_boxed(self) -> BoxedIter {
        Box::new(self)
    }
}

impl Iterator for DatasetIterator {
    type Item = Result<Element>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let item = self.inner.next();
        if matches!(item, Some(Err(_))) {
            self.failed = true;
        }
        item
    }
}

/// Checks generator output against its declared specs.
pub(crate) struct CheckedIter {
    pub(crate) inner: Box<dyn Iterator<Item = Element> + Send>,
    pub(crate) specs: Vec<TensorSpec>,
}

impl Iterator for CheckedIter {
    type Item = Result<Element>;

    fn next(&mut self) -> Option<Self::Item> {
        let element = self.inner.next()?;
        if element.len() != self.specs.len() {
            return Some(Err(StrategyError::dataset(
                "from_generator",
                format!(
                    "generator yielded {} component(s), expected {}",
                    element.len(),
                    self.specs.len()
                ),
            )));
        }
        for (tensor, spec) in element.components().iter().zip(&self.specs) {
            if !spec.is_compatible_with(tensor) {
                return Some(Err(StrategyError::dataset(
                    "from_generator",
                    format!(
                        "generator yielded {} tensor of shape {:?}, incompatible with {:?}",
                        tensor.dtype(),
                        tensor.shape(),
                        spec
                    ),
                )));
            }
        }
        Some(Ok(element))
    }
}

/// Replays its input `count` times, or forever when `count` is `None`.
pub(crate) struct RepeatIter {
    input: Dataset,
    current: DatasetIterator,
    remaining: Option<usize>,
    produced_this_epoch: bool,
}

impl RepeatIter {
    pub(crate) fn new(input: Dataset, count: Option<usize>) -> Self {
        let current = input.iter();
        Self {
            input,
            current,
            remaining: count,
            produced_this_epoch: false,
        }
    }
}

impl Iterator for RepeatIter {
    type Item = Result<Element>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.remaining == Some(0) {
                return None;
            }
            match self.current.next() {
                Some(item) => {
                    self.produced_this_epoch = true;
                    return Some(item);
                }
                None => {
                    if let Some(ref mut remaining) = self.remaining {
                        *remaining -= 1;
                    }
                    // An empty epoch would otherwise spin forever.
                    if !self.produced_this_epoch {
                        return None;
                    }
                    self.produced_this_epoch = false;
                    self.current = self.input.iter();
                }
            }
        }
    }
}

/// Groups consecutive elements into batches.
pub(crate) struct BatchIter {
    pub(crate) input: DatasetIterator,
    pub(crate) batch_size: usize,
    pub(crate) drop_remainder: bool,
}

impl Iterator for BatchIter {
    type Item = Result<Element>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut pending = Vec::with_capacity(self.batch_size);
        while pending.len() < self.batch_size {
            match self.input.next() {
                Some(Ok(element)) => pending.push(element),
                Some(Err(e)) => return Some(Err(e)),
                None => break,
            }
        }

        if pending.is_empty() {
            return None;
        }
        if pending.len() < self.batch_size && self.drop_remainder {
            tracing::warn!(
                partial = pending.len(),
                batch_size = self.batch_size,
                "dropping partial batch"
            );
            return None;
        }
        Some(Element::stack(&pending))
    }
}

/// Splits every element along its leading axis.
pub(crate) struct UnbatchIter {
    pub(crate) input: DatasetIterator,
    pub(crate) current: Option<Element>,
    pub(crate) index: usize,
    pub(crate) len: usize,
}

impl UnbatchIter {
    fn leading_dim(element: &Element) -> Result<usize> {
        let mut leading = None;
        for tensor in element.components() {
            let dim = tensor.shape().first().copied().ok_or_else(|| {
                StrategyError::dataset("unbatch", "cannot unbatch a scalar component")
            })?;
            match leading {
                None => leading = Some(dim),
                Some(existing) if existing != dim => {
                    return Err(StrategyError::dataset(
                        "unbatch",
                        format!("components disagree on batch size: {} vs {}", existing, dim),
                    ));
                }
                Some(_) => {}
            }
        }
        leading.ok_or_else(|| StrategyError::dataset("unbatch", "element has no components"))
    }
}

impl Iterator for UnbatchIter {
    type Item = Result<Element>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(ref element) = self.current {
                if self.index < self.len {
                    let index = self.index;
                    self.index += 1;
                    let row = element
                        .components()
                        .iter()
                        .map(|t| t.index_axis0(index))
                        .collect::<Result<Vec<_>>>()
                        .map(Element::new);
                    return Some(row);
                }
            }

            let element = match self.input.next()? {
                Ok(element) => element,
                Err(e) => return Some(Err(e)),
            };
            match Self::leading_dim(&element) {
                Ok(len) => {
                    self.len = len;
                    self.index = 0;
                    self.current = Some(element);
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Tensor;

    fn counting(n: usize) -> Dataset {
        let values: Vec<f32> = (0..n).map(|i| i as f32).collect();
        Dataset::from_tensor_slices(Tensor::from(values))
    }

    fn scalars(iter: DatasetIterator) -> Vec<f32> {
        iter.map(|e| {
            let e = e.unwrap();
            e.components()[0].as_f32().unwrap().iter().copied().next().unwrap()
        })
        .collect()
    }

    #[test]
    fn test_repeat_finite() {
        let ds = counting(3).repeat(Some(2));
        assert_eq!(scalars(ds.iter()), vec![0.0, 1.0, 2.0, 0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_repeat_zero() {
        assert_eq!(counting(3).repeat(Some(0)).iter().count(), 0);
    }

    #[test]
    fn test_repeat_of_empty_terminates() {
        assert_eq!(counting(0).repeat(None).iter().count(), 0);
    }

    #[test]
    fn test_batch_keeps_partial() {
        let ds = counting(5).batch(2, false).unwrap();
        let shapes: Vec<Vec<usize>> = ds
            .iter()
            .map(|e| e.unwrap().components()[0].shape().to_vec())
            .collect();
        assert_eq!(shapes, vec![vec![2], vec![2], vec![1]]);
    }

    #[test]
    fn test_batch_drop_remainder() {
        let ds = counting(5).batch(2, true).unwrap();
        assert_eq!(ds.iter().count(), 2);
    }

    #[test]
    fn test_unbatch_inverts_batch() {
        let ds = counting(6).batch(4, false).unwrap().unbatch();
        assert_eq!(scalars(ds.iter()), vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_unbatch_scalar_fails() {
        let ds = counting(2).unbatch();
        let mut iter = ds.iter();
        assert!(iter.next_element().is_err());
        assert!(iter.next_element().unwrap().is_none());
    }

    #[test]
    fn test_generator_checks_dtype() {
        let ds = Dataset::from_generator(
            || vec![Tensor::from(vec![1.0f32])].into_iter(),
            vec![TensorSpec::unknown(crate::tensor::DType::Int64)],
        );
        let err = ds.iter().next().unwrap().unwrap_err();
        assert!(err.to_string().contains("incompatible"));
    }
}
