//! Per-service state machine
//!
//! `Lookup -> Fetching -> Building -> ExtractingDeps -> Downloading ->
//! Packaging -> Uploading? -> Done`. Any stage error ends the service as
//! failed after its partial output has been removed.

use super::packaging::{self, ServiceLayout};
use super::{blocking, Stage};
use crate::archive;
use crate::build::runtime::TOOL_CACHE_DIR;
use crate::build::BuildExecutor;
use crate::error::MirrorError;
use crate::hosted::{ProjectIndex, ProjectRef, SharedRepository};
use crate::progress::{NoOpHandler, ProgressEvent, ProgressHandler};
use crate::resolve::{harvest, DependencyResolver};
use crate::results::ResultSet;
use crate::upload::ArtifactUploader;
use anyhow::Context;
use serde::Serialize;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Why a service was not processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Its output archive is already present
    ArchiveExists,
    /// No hosted project has the service's path
    UnknownProject,
}

/// Terminal state of one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ServiceOutcome {
    Done {
        archive: PathBuf,
        uploaded: bool,
        dependency_errors: usize,
    },
    Skipped {
        reason: SkipReason,
    },
    Failed {
        stage: Stage,
        error: String,
    },
}

impl ServiceOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, ServiceOutcome::Done { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ServiceOutcome::Failed { .. })
    }
}

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub output_dir: PathBuf,
    pub branch: String,
    pub archive_format: String,
}

struct StageFailure {
    stage: Stage,
    error: MirrorError,
}

/// Carries services through their stages. Shared by all service tasks.
pub struct ServiceProcessor {
    settings: ServiceSettings,
    repository: SharedRepository,
    projects: ProjectIndex,
    builder: BuildExecutor,
    resolver: Arc<DependencyResolver>,
    uploader: Option<Arc<dyn ArtifactUploader>>,
    results: ResultSet,
    progress: Arc<dyn ProgressHandler>,
}

impl ServiceProcessor {
    pub fn new(
        settings: ServiceSettings,
        repository: SharedRepository,
        projects: ProjectIndex,
        builder: BuildExecutor,
        resolver: Arc<DependencyResolver>,
        results: ResultSet,
    ) -> Self {
        Self {
            settings,
            repository,
            projects,
            builder,
            resolver,
            uploader: None,
            results,
            progress: Arc::new(NoOpHandler),
        }
    }

    pub fn with_uploader(mut self, uploader: Option<Arc<dyn ArtifactUploader>>) -> Self {
        self.uploader = uploader;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressHandler>) -> Self {
        self.progress = progress;
        self
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    pub fn layout(&self, service: &str) -> ServiceLayout {
        ServiceLayout::new(
            &self.settings.output_dir,
            service,
            &self.settings.archive_format,
        )
    }

    /// Runs one service to its terminal state. Never fails the caller.
    pub async fn process(&self, service: &str) -> ServiceOutcome {
        let start = Instant::now();
        self.progress.on_progress(&ProgressEvent::ServiceStarted {
            service: service.to_string(),
        });

        let Some(project) = self.projects.get(service) else {
            let reason = MirrorError::ProjectNotFound(service.to_string());
            warn!(service, "{}", reason);
            self.results.record_unknown_project(service);
            self.progress.on_progress(&ProgressEvent::ServiceSkipped {
                service: service.to_string(),
                reason: reason.to_string(),
            });
            return ServiceOutcome::Skipped {
                reason: SkipReason::UnknownProject,
            };
        };
        debug!(service, project_id = project.id, path = %project.path, "Found project");

        let layout = self.layout(service);
        match self.run_stages(service, project, &layout).await {
            Ok(outcome) => {
                self.progress.on_progress(&ProgressEvent::ServiceComplete {
                    service: service.to_string(),
                    duration: start.elapsed(),
                });
                outcome
            }
            Err(StageFailure { stage, error }) => {
                layout.cleanup();
                let error = format!("{:#}", anyhow::Error::from(error));
                self.progress.on_progress(&ProgressEvent::ServiceFailed {
                    service: service.to_string(),
                    stage,
                    error: error.clone(),
                });
                ServiceOutcome::Failed { stage, error }
            }
        }
    }

    async fn run_stages(
        &self,
        service: &str,
        project: &ProjectRef,
        layout: &ServiceLayout,
    ) -> Result<ServiceOutcome, StageFailure> {
        self.stage(service, Stage::Fetching, self.fetch(project, layout))
            .await?;

        let build = self
            .stage(service, Stage::Building, async {
                self.builder
                    .build(&layout.workspace(), &layout.service_dir())
                    .await
                    .map_err(MirrorError::from)
            })
            .await?;
        let tool_cache = build.descriptor_dir.join(TOOL_CACHE_DIR);

        let coordinates = self
            .stage(service, Stage::ExtractingDeps, async {
                let cache = tool_cache.clone();
                blocking(move || Ok(harvest(&cache)))
                    .await
                    .map_err(MirrorError::from)
            })
            .await?;

        let errors = self
            .stage(service, Stage::Downloading, async {
                Ok::<_, MirrorError>(
                    self.resolver
                        .resolve(coordinates, &layout.deps_sources(), service)
                        .await,
                )
            })
            .await?;

        let archive = self
            .stage(service, Stage::Packaging, async {
                packaging::finalize_async(layout.clone(), tool_cache.clone())
                    .await
                    .map_err(MirrorError::from)
            })
            .await?;

        let uploaded = match &self.uploader {
            Some(uploader) => {
                self.stage(service, Stage::Uploading, async {
                    packaging::publish(uploader.as_ref(), &archive)
                        .await
                        .map_err(MirrorError::from)
                })
                .await?;
                true
            }
            None => false,
        };

        Ok(ServiceOutcome::Done {
            archive,
            uploaded,
            dependency_errors: errors.len(),
        })
    }

    async fn stage<T>(
        &self,
        service: &str,
        stage: Stage,
        work: impl Future<Output = Result<T, MirrorError>>,
    ) -> Result<T, StageFailure> {
        self.progress.on_progress(&ProgressEvent::StageStarted {
            service: service.to_string(),
            stage,
        });
        let start = Instant::now();
        match work.await {
            Ok(value) => {
                self.progress.on_progress(&ProgressEvent::StageComplete {
                    service: service.to_string(),
                    stage,
                    duration: start.elapsed(),
                });
                Ok(value)
            }
            Err(error) => Err(StageFailure { stage, error }),
        }
    }

    /// Downloads the configured branch and unpacks it into the workspace.
    async fn fetch(&self, project: &ProjectRef, layout: &ServiceLayout) -> Result<(), MirrorError> {
        let format = &self.settings.archive_format;
        let data = self
            .repository
            .fetch_archive(project.id, format, &self.settings.branch)
            .await
            .with_context(|| {
                format!(
                    "Failed to fetch {} at {}",
                    project.path, self.settings.branch
                )
            })?;

        let snapshot = layout.source_snapshot();
        tokio::fs::create_dir_all(&self.settings.output_dir)
            .await
            .with_context(|| format!("Failed to create {}", self.settings.output_dir.display()))?;
        tokio::fs::write(&snapshot, &data)
            .await
            .with_context(|| format!("Failed to write {}", snapshot.display()))?;
        debug!(archive = %snapshot.display(), size = data.len(), "Saved source snapshot");

        let workspace = layout.workspace();
        blocking(move || archive::unpack(&data, &workspace)).await?;
        Ok(())
    }
}
