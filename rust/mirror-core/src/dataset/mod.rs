// rust/mirror-core/src/dataset/mod.rs

//! Host-side input pipelines.
//!
//! A [`Dataset`] is an immutable chain of stages (`from_tensors`,
//! `from_generator`, `repeat`, `take`, `batch`, `unbatch`, `prefetch`) that
//! can be iterated any number of times. Elements are tuples of
//! [`Tensor`](crate::tensor::Tensor)s.
//!
//! # Example
//!
//! ```ignore
//! use mirror_core::dataset::{compute_batch_size, Dataset};
//! use mirror_core::tensor::Tensor;
//!
//! let images = Tensor::full(&[8, 8, 3], 1.0);
//! let labels = Tensor::full(&[1], 0.0);
//! let dataset = Dataset::from_tensors((images, labels))
//!     .repeat(None)
//!     .batch(8, false)?
//!     .prefetch(2);
//!
//! assert_eq!(compute_batch_size(&dataset), Some(8));
//! for element in dataset.iter().take(2) {
//!     let element = element?;
//!     // element.components()[0] has shape [8, 8, 8, 3]
//! }
//! ```

mod element;
mod iterator;
mod pipeline;
mod prefetch;

pub use element::{Element, TensorSpec};
pub use iterator::{BoxedIter, DatasetIterator};
pub use pipeline::{compute_batch_size, Dataset};
pub use prefetch::{PrefetchingIterator, DEFAULT_PREFETCH_TIMEOUT};
