//! Error taxonomy shared across the pipeline
//!
//! Only [`MirrorError::ConfigInvalid`] ends a run; it is raised before any
//! service is dispatched. Every other variant is scoped to one service or one
//! dependency coordinate and is logged or recorded in the classification
//! tables by whoever catches it.

use crate::build::BuildError;
use crate::cache::CacheError;
use crate::config::ConfigError;
use crate::coordinate::Coordinate;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(#[from] ConfigError),

    #[error("Project {0} not found in hosted repository")]
    ProjectNotFound(String),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("Fetch of {url} failed: {message}")]
    FetchTransient { url: String, message: String },

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl MirrorError {
    /// Whether this error must stop the whole run
    pub fn is_fatal(&self) -> bool {
        matches!(self, MirrorError::ConfigInvalid(_))
    }
}

/// Failure of one coordinate inside a service's dependency resolution.
#[derive(Debug)]
pub struct CoordinateError {
    pub coordinate: Coordinate,
    pub error: MirrorError,
}

impl std::fmt::Display for CoordinateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.coordinate, self.error)
    }
}
