//! Fleet processing pipeline
//!
//! The [`Orchestrator`] dispatches services with bounded parallelism; each
//! service walks the stages of [`ServiceProcessor`] until it is done or fails.
//! A failed service is cleaned up and logged while its siblings continue.

pub mod orchestrator;
pub mod packaging;
pub mod service;

use anyhow::{Context, Result};
use serde::Serialize;
use std::fmt;

pub use orchestrator::{prepare_output, Orchestrator, RunOptions, RunSummary};
pub use packaging::ServiceLayout;
pub use service::{ServiceOutcome, ServiceProcessor, ServiceSettings, SkipReason};

/// Steps a service goes through, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Lookup,
    Fetching,
    Building,
    ExtractingDeps,
    Downloading,
    Packaging,
    Uploading,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Lookup => "lookup",
            Stage::Fetching => "fetching",
            Stage::Building => "building",
            Stage::ExtractingDeps => "extracting_deps",
            Stage::Downloading => "downloading",
            Stage::Packaging => "packaging",
            Stage::Uploading => "uploading",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runs filesystem-heavy work off the async workers.
pub(crate) async fn blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .context("Blocking task did not complete")?
}
