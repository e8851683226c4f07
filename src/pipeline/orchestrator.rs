use super::service::{ServiceOutcome, ServiceProcessor, ServiceSettings, SkipReason};
use crate::build::{BuildExecutor, BuildSettings, DockerRuntime};
use crate::cache::CacheManager;
use crate::config::{Credentials, MirrorConfig};
use crate::error::MirrorError;
use crate::hosted::{GitlabClient, ProjectIndex, SharedRepository};
use crate::progress::{LoggingHandler, ProgressEvent, ProgressHandler};
use crate::resolve::{self, DependencyResolver, InternalNamespace, ResolverSettings};
use crate::results::{dedup, ResultSet};
use crate::upload::{ArtifactUploader, NexusUploader};
use crate::util::run_bounded;
use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

/// Operator actions applied before a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Remove the output directory first
    pub force: bool,
    /// Remove the content cache first
    pub clear_cache: bool,
}

/// Terminal state of every listed service.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub services: BTreeMap<String, ServiceOutcome>,
}

impl RunSummary {
    fn select(&self, keep: impl Fn(&ServiceOutcome) -> bool) -> Vec<&str> {
        self.services
            .iter()
            .filter(|(_, outcome)| keep(outcome))
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn processed(&self) -> Vec<&str> {
        self.select(ServiceOutcome::is_done)
    }

    pub fn failed(&self) -> Vec<&str> {
        self.select(ServiceOutcome::is_failed)
    }

    pub fn skipped(&self) -> Vec<&str> {
        self.select(|o| matches!(o, ServiceOutcome::Skipped { .. }))
    }

    pub fn is_success(&self) -> bool {
        self.failed().is_empty()
    }
}

fn remove_dir(dir: &Path) -> Result<(), MirrorError> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(anyhow::Error::new(e)
            .context(format!("Could not delete {}", dir.display()))
            .into()),
    }
}

/// Applies `--force`/`--clear-cache` and creates the output and cache roots.
pub fn prepare_output(config: &MirrorConfig, options: &RunOptions) -> Result<(), MirrorError> {
    config.validate_clear_cache(options.clear_cache)?;

    if options.force {
        info!(dir = %config.output_dir.display(), "Removing previous output");
        remove_dir(&config.output_dir)?;
    }
    let cache_root = config.cache_root();
    if options.clear_cache {
        if let Some(root) = &cache_root {
            info!(dir = %root.display(), "Clearing cache");
            CacheManager::new(root).clear()?;
        }
    }

    fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("Error creating output dir {}", config.output_dir.display()))?;
    if let Some(root) = &cache_root {
        debug!(dir = %root.display(), "Cache directory");
        fs::create_dir_all(root)
            .with_context(|| format!("Error creating cache dir {}", root.display()))?;
    }
    Ok(())
}

pub struct Orchestrator {
    config: MirrorConfig,
    processor: Arc<ServiceProcessor>,
    results: ResultSet,
    progress: Arc<dyn ProgressHandler>,
}

impl Orchestrator {
    pub fn new(config: MirrorConfig, processor: ServiceProcessor, results: ResultSet) -> Self {
        Self {
            config,
            processor: Arc::new(processor),
            results,
            progress: Arc::new(LoggingHandler),
        }
    }

    /// Wires the hosted repository, container runtime, resolver and uploader
    /// from a validated configuration.
    pub async fn connect(config: MirrorConfig, credentials: &Credentials) -> Result<Self, MirrorError> {
        let token = credentials.git_token()?;
        let repository: SharedRepository = Arc::new(GitlabClient::new(
            &config.gitlab_api_host,
            token,
            config.skip_tls_verify,
        )?);

        let services = ProjectIndex::load(repository.as_ref(), &config.group_id)
            .await
            .context("Failed to list service projects")?;
        if services.is_empty() {
            return Err(anyhow!(
                "Failed to retrieve any projects in group {}, check group_id",
                config.group_id
            )
            .into());
        }
        let deps = ProjectIndex::load(repository.as_ref(), &config.deps_group_id)
            .await
            .context("Failed to list dependency projects")?;
        info!(
            services = services.len(),
            dependencies = deps.len(),
            "Loaded project indexes"
        );

        let http = resolve::http_client(&config)?;
        let results = ResultSet::new();
        let progress: Arc<dyn ProgressHandler> = Arc::new(LoggingHandler);

        let resolver = DependencyResolver::new(
            http.clone(),
            repository.clone(),
            results.clone(),
            ResolverSettings::from_config(&config),
        )
        .with_namespace(InternalNamespace {
            group: config.internal_namespace.clone(),
            index: services.clone(),
            bare_version_tags: false,
        })
        .with_namespace(InternalNamespace {
            group: config.deps_namespace.clone(),
            index: deps,
            bare_version_tags: true,
        })
        .with_cache(config.cache_root().map(CacheManager::new));

        let runtime = Arc::new(DockerRuntime::connect()?);
        let builder = BuildExecutor::new(runtime, BuildSettings::from_config(&config));

        let uploader = config.upload_to_nexus.then(|| {
            Arc::new(NexusUploader::new(
                http,
                &config.nexus_url,
                &config.nexus_path,
                credentials.nexus_user.as_deref().unwrap_or_default(),
                credentials.nexus_pass.as_deref().unwrap_or_default(),
            )) as Arc<dyn ArtifactUploader>
        });

        let settings = ServiceSettings {
            output_dir: config.output_dir.clone(),
            branch: config.branch.clone(),
            archive_format: config.archive_format.clone(),
        };
        let processor = ServiceProcessor::new(
            settings,
            repository,
            services,
            builder,
            Arc::new(resolver),
            results.clone(),
        )
        .with_uploader(uploader)
        .with_progress(progress.clone());

        Ok(Self {
            config,
            processor: Arc::new(processor),
            results,
            progress,
        })
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressHandler>) -> Self {
        self.progress = progress;
        self
    }

    pub fn results(&self) -> &ResultSet {
        &self.results
    }

    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    /// Processes every listed service. Services whose archive already exists
    /// are skipped before dispatch.
    pub async fn run(&self) -> RunSummary {
        let start = Instant::now();
        let started_at = Utc::now();
        let run_id = Uuid::new_v4().to_string();
        let services = dedup(&self.config.service_list);
        info!(run_id = %run_id, "Starting run");
        self.progress.on_progress(&ProgressEvent::RunStarted {
            services: services.len(),
        });

        let mut outcomes = BTreeMap::new();
        let mut pending = Vec::new();
        for service in services {
            if self.config.service_archive(&service).exists() {
                self.progress.on_progress(&ProgressEvent::ServiceSkipped {
                    service: service.clone(),
                    reason: "already processed".to_string(),
                });
                outcomes.insert(
                    service,
                    ServiceOutcome::Skipped {
                        reason: SkipReason::ArchiveExists,
                    },
                );
            } else {
                pending.push(service);
            }
        }

        let finished = run_bounded(self.config.max_parallelism, pending, |service| {
            let processor = Arc::clone(&self.processor);
            async move {
                let outcome = processor.process(&service).await;
                (service, outcome)
            }
        })
        .await;
        outcomes.extend(finished);

        let summary = RunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            services: outcomes,
        };
        self.progress.on_progress(&ProgressEvent::RunComplete {
            processed: summary.processed().len(),
            failed: summary.failed().len(),
            total_time: start.elapsed(),
        });
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn config(output: &Path, cache: Option<PathBuf>) -> MirrorConfig {
        let mut config = MirrorConfig::from_json(
            r#"{
                "gitlab_api_host": "https://git.local/api/v4",
                "output_dir": "out",
                "service_list": ["billing"],
                "group_id": "1",
                "deps_group_id": "2",
                "branch": "master",
                "archive_format": "tar.gz",
                "maven_url": "https://repo.local/maven",
                "plugins_url": "https://repo.local/plugins",
                "max_parallelism": 2
            }"#,
        )
        .unwrap();
        config.output_dir = output.to_path_buf();
        config.cache = cache.is_some();
        config.cache_dir = cache;
        config
    }

    fn summary(entries: Vec<(&str, ServiceOutcome)>) -> RunSummary {
        RunSummary {
            run_id: "r".to_string(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            services: entries
                .into_iter()
                .map(|(name, outcome)| (name.to_string(), outcome))
                .collect(),
        }
    }

    #[test]
    fn test_prepare_output_force_and_clear_cache() {
        let tmp = TempDir::new().unwrap();
        let output = tmp.path().join("out");
        let cache = tmp.path().join("cache");
        fs::create_dir_all(output.join("old")).unwrap();
        fs::create_dir_all(cache.join("g/a/1")).unwrap();

        let config = config(&output, Some(cache.clone()));
        prepare_output(
            &config,
            &RunOptions {
                force: true,
                clear_cache: true,
            },
        )
        .unwrap();

        assert!(output.is_dir());
        assert!(!output.join("old").exists());
        assert!(cache.is_dir());
        assert!(!cache.join("g").exists());
    }

    #[test]
    fn test_prepare_output_keeps_existing_without_force() {
        let tmp = TempDir::new().unwrap();
        let output = tmp.path().join("out");
        fs::create_dir_all(output.join("old")).unwrap();

        prepare_output(&config(&output, None), &RunOptions::default()).unwrap();
        assert!(output.join("old").exists());
    }

    #[test]
    fn test_clear_cache_requires_cache() {
        let tmp = TempDir::new().unwrap();
        let err = prepare_output(
            &config(tmp.path(), None),
            &RunOptions {
                force: false,
                clear_cache: true,
            },
        )
        .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_summary_selection() {
        let summary = summary(vec![
            (
                "a",
                ServiceOutcome::Done {
                    archive: PathBuf::from("a.tar.gz"),
                    uploaded: false,
                    dependency_errors: 0,
                },
            ),
            (
                "b",
                ServiceOutcome::Failed {
                    stage: crate::pipeline::Stage::Building,
                    error: "exit 1".to_string(),
                },
            ),
            (
                "c",
                ServiceOutcome::Skipped {
                    reason: SkipReason::ArchiveExists,
                },
            ),
        ]);
        assert_eq!(summary.processed(), vec!["a"]);
        assert_eq!(summary.failed(), vec!["b"]);
        assert_eq!(summary.skipped(), vec!["c"]);
        assert!(!summary.is_success());
    }
}
