// rust/mirror-core/src/error.rs

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StrategyError {

    #[error("The mesh for MirroredStrategy must be 1D, received: {ndim}D")]
    InvalidMeshShape {
        ndim: usize,
    },

    #[error("Conflicting configuration: {message}")]
    ConflictingConfiguration {
        message: String,
    },

    #[error("Unsupported dataset shape: {message}")]
    UnsupportedDatasetShape {
        message: String,
    },

    #[error("`{method}` is only available in the V1 API; use `{replacement}` instead")]
    DeprecatedApi {
        method: &'static str,
        replacement: &'static str,
    },

    #[error("Mesh error: {message}")]
    Mesh {
        message: String,
    },

    #[error("Invalid device specification '{spec}': {message}")]
    InvalidDevice {
        spec: String,
        message: String,
    },

    #[error("Layout error: {message}")]
    Layout {
        message: String,
    },

    #[error("Tensor error: {message}")]
    Tensor {
        message: String,
    },

    #[error("Dataset '{name}' error: {message}")]
    Dataset {
        name: String,
        message: String,
    },

    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Storage error at '{path}': {message}")]
    Storage {
        path: PathBuf,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },
}

pub type Result<T> = std::result::Result<T, StrategyError>;

// Convenience constructors
impl StrategyError {

    pub fn invalid_mesh_shape(ndim: usize) -> Self {
        Self::InvalidMeshShape { ndim }
    }

    pub fn conflicting(message: impl Into<String>) -> Self {
        Self::ConflictingConfiguration {
            message: message.into(),
        }
    }

    pub fn unsupported_dataset(message: impl Into<String>) -> Self {
        Self::UnsupportedDatasetShape {
            message: message.into(),
        }
    }

    pub fn deprecated(method: &'static str, replacement: &'static str) -> Self {
        Self::DeprecatedApi { method, replacement }
    }

    pub fn mesh(message: impl Into<String>) -> Self {
        Self::Mesh {
            message: message.into(),
        }
    }

    pub fn invalid_device(spec: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidDevice {
            spec: spec.into(),
            message: message.into(),
        }
    }

    pub fn layout(message: impl Into<String>) -> Self {
        Self::Layout {
            message: message.into(),
        }
    }

    pub fn tensor(message: impl Into<String>) -> Self {
        Self::Tensor {
            message: message.into(),
        }
    }

    pub fn dataset(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Dataset {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn storage_with_source(
        path: impl Into<PathBuf>,
        message: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Self::Storage {
            path: path.into(),
            message: message.into(),
            source: Some(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_mesh_shape_names_dimensionality() {
        let err = StrategyError::invalid_mesh_shape(2);
        assert_eq!(
            err.to_string(),
            "The mesh for MirroredStrategy must be 1D, received: 2D"
        );
    }

    #[test]
    fn test_deprecated_message_points_to_replacement() {
        let err = StrategyError::deprecated(
            "make_dataset_iterator",
            "experimental_distribute_dataset",
        );
        let message = err.to_string();
        assert!(message.contains("only available in the V1 API"));
        assert!(message.contains("experimental_distribute_dataset"));
    }

    #[test]
    fn test_config_with_source_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err = StrategyError::config_with_source("bad config", io);
        assert!(std::error::Error::source(&err).is_some());
    }
}
