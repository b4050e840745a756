//! Loader errors
//!
//! Apart from `define`, which fails synchronously, every error reaches the
//! caller as a rejection reason wrapped in `Value::Error`.

use mloader_promise::Value;
use thiserror::Error;

use crate::graph::GraphError;

/// Errors raised by the loader
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoaderError {
    /// A named module was defined twice
    #[error("Module {0} is already defined")]
    DuplicateModuleDefinition(String),

    /// Nothing declared or fetched for an identifier
    #[error("Unable to resolve module: {0}")]
    UnresolvedIdentifier(String),

    /// A module can reach itself through its dependencies
    #[error("Circular dependency detected: {}", .0.join(" -> "))]
    CircularDependency(Vec<String>),

    /// Malformed descriptor
    #[error("Invalid module definition: {0}")]
    InvalidDefinition(String),

    /// The transport could not deliver a module
    #[error("Failed to fetch {id}: {reason}")]
    Transport {
        /// Requested identifier
        id: String,
        /// Transport-specific reason
        reason: String,
    },
}

impl From<GraphError> for LoaderError {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::CircularDependency(path) => LoaderError::CircularDependency(path),
            GraphError::ModuleNotFound(id) => LoaderError::UnresolvedIdentifier(id),
        }
    }
}

impl From<LoaderError> for Value {
    fn from(err: LoaderError) -> Self {
        Value::error(err)
    }
}
