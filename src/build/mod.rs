//! Containerized service builds
//!
//! A build locates the descriptor in an extracted source tree, derives the
//! build image and command from it, runs the build tool inside the image and
//! collects the image and build scripts into the service directory.

pub mod descriptor;
pub mod executor;
pub mod mirror;
pub mod runtime;

use std::path::PathBuf;
use thiserror::Error;

pub use descriptor::{BuildDescriptor, DescriptorError};
pub use executor::{BuildExecutor, BuildOutcome, BuildSettings, MirrorPolicy};
pub use runtime::{ContainerRuntime, DockerRuntime, RunInvocation, RunOutput};

/// Main build script that must sit next to the descriptor.
pub const BUILD_FILE: &str = "build.gradle";
pub const SETTINGS_FILE: &str = "settings.gradle";

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("No {name} found under {root}")]
    DescriptorNotFound { name: String, root: PathBuf },

    #[error("Build file {0} not found, not a Gradle service")]
    BuildFileMissing(PathBuf),

    #[error("Descriptor incomplete: {0}")]
    DescriptorIncomplete(#[from] DescriptorError),

    #[error("Build in {image} failed with exit code {exit_code}{}", retry_note(.retried))]
    BuildFailed {
        image: String,
        exit_code: i64,
        retried: bool,
    },

    #[error("Container runtime error: {0}")]
    Runtime(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BuildError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BuildError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn runtime(error: anyhow::Error) -> Self {
        BuildError::Runtime(format!("{:#}", error))
    }
}

fn retry_note(retried: &bool) -> &'static str {
    if *retried {
        " after mirror retry"
    } else {
        ""
    }
}

/// File-name-safe form of an image reference: `- ,:./` become `_`.
pub fn sanitize_image_name(image: &str) -> String {
    image
        .chars()
        .map(|c| match c {
            '-' | ' ' | ',' | ':' | '.' | '/' => '_',
            other => other,
        })
        .collect()
}
