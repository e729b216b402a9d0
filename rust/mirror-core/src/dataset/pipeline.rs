// rust/mirror-core/src/dataset/pipeline.rs

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::element::{Element, TensorSpec};
use super::iterator::{BatchIter, CheckedIter, DatasetIterator, RepeatIter, UnbatchIter};
use super::prefetch::{PrefetchingIterator, DEFAULT_PREFETCH_TIMEOUT};
use crate::error::{Result, StrategyError};

type GeneratorFn = dyn Fn() -> Box<dyn Iterator<Item = Element> + Send> + Send + Sync;

/// One stage of an input pipeline.
pub(crate) enum Stage {
    Tensors {
        element: Element,
    },
    Generator {
        generator: Arc<GeneratorFn>,
        specs: Vec<TensorSpec>,
    },
    Repeat {
        input: Dataset,
        count: Option<usize>,
    },
    Take {
        input: Dataset,
        count: usize,
    },
    Batch {
        input: Dataset,
        batch_size: usize,
        drop_remainder: bool,
    },
    Unbatch {
        input: Dataset,
    },
    Prefetch {
        input: Dataset,
        buffer_size: usize,
        timeout: Duration,
    },
}

impl Stage {
    fn name(&self) -> &'static str {
        match self {
            Stage::Tensors { .. } => "from_tensors",
            Stage::Generator { .. } => "from_generator",
            Stage::Repeat { .. } => "repeat",
            Stage::Take { .. } => "take",
            Stage::Batch { .. } => "batch",
            Stage::Unbatch { .. } => "unbatch",
            Stage::Prefetch { .. } => "prefetch",
        }
    }

    fn input(&self) -> Option<&Dataset> {
        match self {
            Stage::Tensors { .. } | Stage::Generator { .. } => None,
            Stage::Repeat { input, .. }
            | Stage::Take { input, .. }
            | Stage::Batch { input, .. }
            | Stage::Unbatch { input }
            | Stage::Prefetch { input, .. } => Some(input),
        }
    }
}

/// An immutable, re-iterable description of an input pipeline.
///
/// Cloning is cheap; every call to [`Dataset::iter`] starts a fresh pass.
#[derive(Clone)]
pub struct Dataset {
    stage: Arc<Stage>,
}

impl Dataset {
    fn from_stage(stage: Stage) -> Self {
        Self {
            stage: Arc::new(stage),
        }
    }

    pub(crate) fn stage(&self) -> &Stage {
        &self.stage
    }

    /// A dataset holding exactly one element.
    pub fn from_tensors(element: impl Into<Element>) -> Self {
        Self::from_stage(Stage::Tensors {
            element: element.into(),
        })
    }

    /// A dataset of the slices of `element` along its leading axis.
    pub fn from_tensor_slices(element: impl Into<Element>) -> Self {
        Self::from_tensors(element).unbatch()
    }

    /// A dataset whose elements are produced by calling `generator` once per pass.
    ///
    /// Every yielded element is checked against `specs`.
    pub fn from_generator<F, I>(generator: F, specs: Vec<TensorSpec>) -> Self
    where
        F: Fn() -> I + Send + Sync + 'static,
        I: IntoIterator + 'static,
        I::Item: Into<Element>,
        I::IntoIter: Send,
    {
        let generator: Arc<GeneratorFn> = Arc::new(move || {
            Box::new(generator().into_iter().map(Into::<Element>::into))
                as Box<dyn Iterator<Item = Element> + Send>
        });
        Self::from_stage(Stage::Generator { generator, specs })
    }

    /// Repeats this dataset `count` times, or indefinitely for `None`.
    pub fn repeat(&self, count: Option<usize>) -> Self {
        Self::from_stage(Stage::Repeat {
            input: self.clone(),
            count,
        })
    }

    /// The first `count` elements of this dataset.
    pub fn take(&self, count: usize) -> Self {
        Self::from_stage(Stage::Take {
            input: self.clone(),
            count,
        })
    }

    /// Stacks consecutive elements into batches of `batch_size`.
    ///
    /// # Errors
    ///
    /// Returns an error if `batch_size` is zero.
    pub fn batch(&self, batch_size: usize, drop_remainder: bool) -> Result<Self> {
        if batch_size == 0 {
            return Err(StrategyError::dataset("batch", "batch size must be greater than 0"));
        }
        Ok(Self::from_stage(Stage::Batch {
            input: self.clone(),
            batch_size,
            drop_remainder,
        }))
    }

    /// Splits every element along its leading axis.
    pub fn unbatch(&self) -> Self {
        Self::from_stage(Stage::Unbatch {
            input: self.clone(),
        })
    }

    /// Produces up to `buffer_size` elements ahead on a background thread.
    pub fn prefetch(&self, buffer_size: usize) -> Self {
        self.prefetch_with_timeout(buffer_size, DEFAULT_PREFETCH_TIMEOUT)
    }

    /// Like [`Dataset::prefetch`], failing if the producer stalls for `timeout`.
    pub fn prefetch_with_timeout(&self, buffer_size: usize, timeout: Duration) -> Self {
        Self::from_stage(Stage::Prefetch {
            input: self.clone(),
            buffer_size,
            timeout,
        })
    }

    /// Static description of each element component.
    pub fn element_spec(&self) -> Vec<TensorSpec> {
        match self.stage() {
            Stage::Tensors { element } => element.components().iter().map(TensorSpec::of).collect(),
            Stage::Generator { specs, .. } => specs.clone(),
            Stage::Repeat { input, .. } | Stage::Take { input, .. } | Stage::Prefetch { input, .. } => {
                input.element_spec()
            }
            Stage::Batch {
                input,
                batch_size,
                drop_remainder,
            } => {
                let batch = drop_remainder.then_some(*batch_size);
                input.element_spec().iter().map(|s| s.batched(batch)).collect()
            }
            Stage::Unbatch { input } => input.element_spec().iter().map(TensorSpec::unbatched).collect(),
        }
    }

    /// Starts a fresh pass over the dataset.
    pub fn iter(&self) -> DatasetIterator {
        let inner: super::iterator::BoxedIter = match self.stage() {
            Stage::Tensors { element } => Box::new(std::iter::once(Ok(element.clone()))),
            Stage::Generator { generator, specs } => Box::new(CheckedIter {
                inner: generator(),
                specs: specs.clone(),
            }),
            Stage::Repeat { input, count } => Box::new(RepeatIter::new(input.clone(), *count)),
            Stage::Take { input, count } => Box::new(input.iter().take(*count)),
            Stage::Batch {
                input,
                batch_size,
                drop_remainder,
            } => Box::new(BatchIter {
                input: input.iter(),
                batch_size: *batch_size,
                drop_remainder: *drop_remainder,
            }),
            Stage::Unbatch { input } => Box::new(UnbatchIter {
                input: input.iter(),
                current: None,
                index: 0,
                len: 0,
            }),
            Stage::Prefetch {
                input,
                buffer_size,
                timeout,
            } => Box::new(PrefetchingIterator::new(
                input.iter().into_boxed(),
                *buffer_size,
                *timeout,
            )),
        };
        DatasetIterator::new(inner)
    }

    /// Stage names from the source to this stage.
    pub fn describe(&self) -> String {
        let mut names = vec![self.stage().name()];
        let mut current = self.stage().input();
        while let Some(input) = current {
            names.push(input.stage().name());
            current = input.stage().input();
        }
        names.reverse();
        names.join(" -> ")
    }
}

impl fmt::Debug for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dataset")
            .field("pipeline", &self.describe())
            .finish()
    }
}

impl<'a> IntoIterator for &'a Dataset {
    type Item = Result<Element>;
    type IntoIter = DatasetIterator;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Statically known batch size of `dataset`, if any.
///
/// Looks through stages that keep the batch dimension intact (`repeat`,
/// `take`, `prefetch`) for the closest `batch`. Pipelines without a batch
/// stage, or whose last batching was undone by `unbatch`, have no static
/// batch size.
pub fn compute_batch_size(dataset: &Dataset) -> Option<usize> {
    match dataset.stage() {
        Stage::Batch { batch_size, .. } => Some(*batch_size),
        Stage::Repeat { input, .. } | Stage::Take { input, .. } | Stage::Prefetch { input, .. } => {
            compute_batch_size(input)
        }
        Stage::Tensors { .. } | Stage::Generator { .. } | Stage::Unbatch { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::{DType, Tensor};

    fn images_and_labels() -> Dataset {
        Dataset::from_tensors((Tensor::full(&[8, 8, 3], 1.0), Tensor::full(&[1], 0.0)))
    }

    #[test]
    fn test_from_tensors_single_element() {
        let ds = images_and_labels();
        let elements: Vec<Element> = ds.iter().map(Result::unwrap).collect();
        assert_eq!(elements.len(), 1);
        assert_eq!(elements[0].components()[0].shape(), &[8, 8, 3]);
    }

    #[test]
    fn test_dataset_is_reiterable() {
        let ds = images_and_labels().repeat(Some(3));
        assert_eq!(ds.iter().count(), 3);
        assert_eq!(ds.iter().count(), 3);
    }

    #[test]
    fn test_batched_pipeline_shapes() {
        let ds = images_and_labels().repeat(None).batch(8, false).unwrap().prefetch(2);
        let element = ds.iter().next().unwrap().unwrap();
        assert_eq!(element.components()[0].shape(), &[8, 8, 8, 3]);
        assert_eq!(element.components()[1].shape(), &[8, 1]);
    }

    #[test]
    fn test_take_limits_infinite_dataset() {
        let ds = images_and_labels().repeat(None).take(5);
        assert_eq!(ds.iter().count(), 5);
    }

    #[test]
    fn test_batch_rejects_zero() {
        assert!(images_and_labels().batch(0, false).is_err());
    }

    #[test]
    fn test_element_spec() {
        let ds = images_and_labels().repeat(None).batch(4, true).unwrap();
        let specs = ds.element_spec();
        assert_eq!(specs[0].shape, Some(vec![Some(4), Some(8), Some(8), Some(3)]));

        let ds = images_and_labels().repeat(None).batch(4, false).unwrap();
        assert_eq!(ds.element_spec()[1].shape, Some(vec![None, Some(1)]));
        assert_eq!(ds.unbatch().element_spec()[1].shape, Some(vec![Some(1)]));
    }

    #[test]
    fn test_compute_batch_size() {
        let base = images_and_labels().repeat(None);
        assert_eq!(compute_batch_size(&base), None);

        let batched = base.batch(8, false).unwrap().prefetch(2);
        assert_eq!(compute_batch_size(&batched), Some(8));
        assert_eq!(compute_batch_size(&batched.take(3)), Some(8));
        assert_eq!(compute_batch_size(&batched.unbatch()), None);

        let generated = Dataset::from_generator(
            || vec![Tensor::from(vec![1i64, 2, 3]), Tensor::from(vec![1i64, 2])],
            vec![TensorSpec::unknown(DType::Int64)],
        )
        .repeat(None);
        assert_eq!(compute_batch_size(&generated), None);
    }

    #[test]
    fn test_generator_yields_elements_each_pass() {
        let ds = Dataset::from_generator(
            || vec![Tensor::from(vec![1i64, 2, 3]), Tensor::from(vec![1i64, 2])],
            vec![TensorSpec::unknown(DType::Int64)],
        );
        assert_eq!(ds.iter().count(), 2);
        assert_eq!(ds.iter().count(), 2);
    }

    #[test]
    fn test_describe() {
        let ds = images_and_labels().repeat(None).batch(2, false).unwrap().prefetch(1);
        assert_eq!(ds.describe(), "from_tensors -> repeat -> batch -> prefetch");
        assert!(format!("{:?}", ds).contains("prefetch"));
    }
}
