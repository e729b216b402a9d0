// rust/mirror-core/src/lib.rs

//! Mirrored Strategy - Core Library
//!
//! This crate provides synchronous data-parallel training primitives over a
//! one-dimensional device mesh: device and mesh descriptions, tensor
//! layouts, host input pipelines, and the `MirroredStrategy` that ties them
//! together.

pub mod config;
pub mod error;

// Re-export commonly used types for convenience
pub use config::StrategyConfig;
pub use error::{Result, StrategyError};

pub mod device;
pub mod mesh;
pub use device::{DevicePlatform, DeviceSpec, DeviceType, VirtualPlatform};
pub use mesh::{create_mesh, Mesh};

pub mod layout;
pub mod tensor;
pub use layout::{Layout, ShardingSpec};
pub use tensor::{pack, unpack, DTensor, DType, Tensor};

pub mod dataset;
pub use dataset::{compute_batch_size, Dataset, Element, TensorSpec};

pub mod distribute;
pub use distribute::{DistributedDataset, DistributedElement, InputContext, InputOptions};

pub mod reduce;
pub use reduce::ReduceOp;

pub mod variable;
pub use variable::{InitialValue, Variable, VariableId};

pub mod strategy;
pub use strategy::{ColocationScope, MirroredExtended, MirroredStrategy, StrategyScope};
