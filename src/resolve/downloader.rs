//! Per-coordinate dependency download and classification

use super::listing::parse_links;
use crate::cache::{CacheError, CacheManager, MarkerScan};
use crate::checksum::{wants_sidecar, write_sidecar};
use crate::config::MirrorConfig;
use crate::coordinate::Coordinate;
use crate::error::{CoordinateError, MirrorError};
use crate::hosted::{ProjectIndex, ProjectRef, SharedRepository};
use crate::results::{Bucket, ResultSet};
use crate::util::run_bounded;
use anyhow::Context;
use rand::Rng;
use reqwest::{Client, StatusCode};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, trace, warn};

/// Wait before the single retry of a failed download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub min: Duration,
    /// Upper bound (exclusive) of the random extra wait
    pub jitter: Duration,
}

impl RetryPolicy {
    pub fn from_secs(min: u64, jitter: u64) -> Self {
        Self {
            min: Duration::from_secs(min),
            jitter: Duration::from_secs(jitter),
        }
    }

    /// No wait at all.
    pub fn immediate() -> Self {
        Self::from_secs(0, 0)
    }

    pub fn delay(&self) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let extra = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..jitter_ms)
        };
        self.min + Duration::from_millis(extra)
    }
}

/// A group namespace whose coordinates are projects in the hosted repository.
#[derive(Debug, Clone)]
pub struct InternalNamespace {
    pub group: String,
    pub index: ProjectIndex,
    /// Whether a bare `<version>` tag matches besides `v<version>`
    pub bare_version_tags: bool,
}

impl InternalNamespace {
    fn accepts(&self, tag: &str, version: &str) -> bool {
        tag.strip_prefix('v') == Some(version) || (self.bare_version_tags && tag == version)
    }
}

#[derive(Debug, Clone)]
pub struct ResolverSettings {
    pub maven_url: String,
    pub plugins_url: String,
    pub archive_format: String,
    pub parallelism: usize,
    pub retry: RetryPolicy,
}

impl ResolverSettings {
    pub fn from_config(config: &MirrorConfig) -> Self {
        Self {
            maven_url: config.maven_url.clone(),
            plugins_url: config.plugins_url.clone(),
            archive_format: config.archive_format.clone(),
            parallelism: config.max_parallelism,
            retry: RetryPolicy::from_secs(config.retry_min_secs, config.retry_jitter_secs),
        }
    }
}

enum Listing {
    Found { base: String, links: Vec<String> },
    /// Neither repository knows the coordinate
    Unknown,
    /// The primary repository failed for another reason
    Unavailable,
}

enum Fetched {
    Saved,
    Missing(StatusCode),
}

fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path)
}

pub struct DependencyResolver {
    http: Client,
    repository: SharedRepository,
    namespaces: Vec<InternalNamespace>,
    cache: Option<CacheManager>,
    results: ResultSet,
    settings: ResolverSettings,
}

impl DependencyResolver {
    pub fn new(
        http: Client,
        repository: SharedRepository,
        results: ResultSet,
        settings: ResolverSettings,
    ) -> Self {
        Self {
            http,
            repository,
            namespaces: Vec::new(),
            cache: None,
            results,
            settings,
        }
    }

    pub fn with_namespace(mut self, namespace: InternalNamespace) -> Self {
        self.namespaces.push(namespace);
        self
    }

    pub fn with_cache(mut self, cache: Option<CacheManager>) -> Self {
        self.cache = cache;
        self
    }

    /// Resolves every coordinate of `service` into `destination` with bounded
    /// parallelism and returns the failures. All coordinates are recorded as
    /// known before any task starts.
    pub async fn resolve(
        self: &Arc<Self>,
        coordinates: Vec<Coordinate>,
        destination: &Path,
        service: &str,
    ) -> Vec<CoordinateError> {
        for coordinate in &coordinates {
            self.results.record(service, Bucket::Known, coordinate);
        }
        info!(service, count = coordinates.len(), "Downloading dependencies");

        let outcomes = run_bounded(self.settings.parallelism, coordinates, |coordinate| {
            let resolver = Arc::clone(self);
            let destination = destination.to_path_buf();
            let service = service.to_string();
            async move {
                resolver
                    .resolve_one(&coordinate, &destination, &service)
                    .await
                    .err()
                    .map(|error| CoordinateError { coordinate, error })
            }
        })
        .await;

        let errors: Vec<CoordinateError> = outcomes.into_iter().flatten().collect();
        for error in &errors {
            warn!(service, error = %error, "Dependency not resolved");
        }
        errors
    }

    /// Resolves one coordinate into `destination/<group>/<artifact>/<version>/`.
    pub async fn resolve_one(
        &self,
        coordinate: &Coordinate,
        destination: &Path,
        service: &str,
    ) -> Result<(), MirrorError> {
        if !coordinate.is_path_safe() {
            self.results.record(service, Bucket::Unknown, coordinate);
            return Err(CacheError::UnsafeCoordinate(coordinate.clone()).into());
        }
        if let Some(cache) = &self.cache {
            let status = cache.has(coordinate)?;
            if status.exists {
                trace!(coordinate = %coordinate, "Copying dependency from cache");
                cache.copy_into(coordinate, destination)?;
                if !status.has_sources {
                    self.results
                        .record(service, Bucket::WithoutSource, coordinate);
                }
                return Ok(());
            }
        }

        let dir = coordinate.dir_under(destination);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;

        match self
            .namespaces
            .iter()
            .find(|ns| ns.group == coordinate.group())
        {
            Some(namespace) => {
                self.resolve_internal(namespace, coordinate, &dir, service)
                    .await
            }
            None => self.resolve_external(coordinate, &dir, service).await,
        }
    }

    async fn resolve_internal(
        &self,
        namespace: &InternalNamespace,
        coordinate: &Coordinate,
        dir: &Path,
        service: &str,
    ) -> Result<(), MirrorError> {
        let Some(project) = namespace.index.get(coordinate.artifact()) else {
            warn!(coordinate = %coordinate, "Internal project not found");
            self.results.record_all(
                service,
                &[Bucket::UnknownInternal, Bucket::WithoutSource],
                coordinate,
            );
            return Ok(());
        };
        trace!(coordinate = %coordinate, project = %project.name, "Internal dependency");

        match self
            .fetch_internal(namespace, project, coordinate, dir)
            .await
        {
            Ok(true) => Ok(()),
            Ok(false) => {
                warn!(coordinate = %coordinate, "No tag matches internal dependency version");
                self.results.record_all(
                    service,
                    &[Bucket::UnknownInternalVersion, Bucket::WithoutSource],
                    coordinate,
                );
                Ok(())
            }
            Err(e) => {
                self.results.record_all(
                    service,
                    &[Bucket::UnknownInternal, Bucket::WithoutSource],
                    coordinate,
                );
                Err(e)
            }
        }
    }

    /// Downloads the tagged snapshot. `Ok(false)` when no tag matches.
    async fn fetch_internal(
        &self,
        namespace: &InternalNamespace,
        project: &ProjectRef,
        coordinate: &Coordinate,
        dir: &Path,
    ) -> Result<bool, MirrorError> {
        let tags = self
            .repository
            .list_tags(project.id)
            .await
            .with_context(|| format!("Failed to list tags of {}", project.path))?;
        let Some(tag) = tags
            .iter()
            .find(|t| namespace.accepts(&t.name, coordinate.version()))
        else {
            return Ok(false);
        };

        let format = &self.settings.archive_format;
        let data = self
            .repository
            .fetch_archive(project.id, format, &tag.name)
            .await
            .with_context(|| format!("Failed to fetch {} at {}", project.path, tag.name))?;

        let file_name = format!("{}.{}", coordinate.artifact(), format);
        let archive = dir.join(&file_name);
        tokio::fs::write(&archive, &data)
            .await
            .with_context(|| format!("Failed to write {}", archive.display()))?;
        let sidecar = write_sidecar(&archive)?;
        debug!(coordinate = %coordinate, tag = %tag.name, size = data.len(), "Saved internal dependency");

        self.save_to_cache(coordinate, &[archive, sidecar])?;
        Ok(true)
    }

    async fn resolve_external(
        &self,
        coordinate: &Coordinate,
        dir: &Path,
        service: &str,
    ) -> Result<(), MirrorError> {
        let (base, links) = match self.listing(coordinate).await {
            Listing::Found { base, links } => (base, links),
            Listing::Unknown => {
                debug!(coordinate = %coordinate, "Unknown dependency");
                self.results.record(service, Bucket::Unknown, coordinate);
                return Ok(());
            }
            Listing::Unavailable => {
                self.results
                    .record(service, Bucket::WithoutSource, coordinate);
                return Ok(());
            }
        };
        trace!(coordinate = %coordinate, links = ?links, "Parsed listing");

        let mut markers = MarkerScan::default();
        for name in links {
            if name.contains('/') {
                debug!(coordinate = %coordinate, link = %name, "Skipping nested listing entry");
                continue;
            }
            markers.observe(&name);

            let url = join_url(&base, &name);
            let target = dir.join(&name);
            match self.download_with_retry(&url, &target).await {
                Ok(Fetched::Saved) => {}
                Ok(Fetched::Missing(status)) => {
                    warn!(url = %url, status = %status, "Listed file not downloadable, maybe broken link");
                    continue;
                }
                Err(e) => {
                    self.results.record_all(
                        service,
                        &[Bucket::UnknownInternal, Bucket::WithoutSource],
                        coordinate,
                    );
                    return Err(e);
                }
            }

            let mut saved = vec![target.clone()];
            if wants_sidecar(&name) {
                saved.push(write_sidecar(&target)?);
            }
            self.save_to_cache(coordinate, &saved)?;
        }

        if !markers.has_sources() {
            trace!(coordinate = %coordinate, "Sources not found");
            self.results
                .record(service, Bucket::WithoutSource, coordinate);
        }
        Ok(())
    }

    async fn listing(&self, coordinate: &Coordinate) -> Listing {
        let path = format!("{}/", coordinate.repository_path());
        let primary = join_url(&self.settings.maven_url, &path);
        debug!(url = %primary, "Fetching dependency listing");

        let response = match self.http.get(&primary).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(url = %primary, error = %e, "Dependency listing request failed");
                return Listing::Unavailable;
            }
        };

        match response.status() {
            StatusCode::OK => match response.text().await {
                Ok(body) => Listing::Found {
                    base: join_url(&self.settings.maven_url, &coordinate.repository_path()),
                    links: parse_links(&body),
                },
                Err(e) => {
                    warn!(url = %primary, error = %e, "Failed to read dependency listing");
                    Listing::Unavailable
                }
            },
            StatusCode::NOT_FOUND => self.plugin_listing(coordinate, &path).await,
            status => {
                warn!(url = %primary, status = %status, "Dependency listing unavailable");
                Listing::Unavailable
            }
        }
    }

    async fn plugin_listing(&self, coordinate: &Coordinate, path: &str) -> Listing {
        let url = join_url(&self.settings.plugins_url, path);
        debug!(url = %url, "Trying plugin repository");
        let response = match self.http.get(&url).send().await {
            Ok(response) if response.status() == StatusCode::OK => response,
            Ok(response) => {
                trace!(url = %url, status = %response.status(), "Not in plugin repository");
                return Listing::Unknown;
            }
            Err(e) => {
                debug!(url = %url, error = %e, "Plugin repository request failed");
                return Listing::Unknown;
            }
        };
        match response.text().await {
            Ok(body) => Listing::Found {
                base: join_url(&self.settings.plugins_url, &coordinate.repository_path()),
                links: parse_links(&body),
            },
            Err(e) => {
                warn!(url = %url, error = %e, "Failed to read plugin listing");
                Listing::Unknown
            }
        }
    }

    async fn download_with_retry(&self, url: &str, target: &Path) -> Result<Fetched, MirrorError> {
        match self.download(url, target).await {
            Err(MirrorError::FetchTransient { message, .. }) => {
                let wait = self.settings.retry.delay();
                debug!(url, error = %message, wait_ms = wait.as_millis() as u64, "Download failed, retrying");
                tokio::time::sleep(wait).await;
                self.download(url, target).await
            }
            other => other,
        }
    }

    /// Streams `url` into `target`. Connection errors, body errors and 5xx
    /// responses are transient; other non-success statuses are not.
    async fn download(&self, url: &str, target: &Path) -> Result<Fetched, MirrorError> {
        let transient = |message: String| MirrorError::FetchTransient {
            url: url.to_string(),
            message,
        };

        let mut response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| transient(e.to_string()))?;
        let status = response.status();
        if status.is_server_error() {
            return Err(transient(format!("server returned {}", status)));
        }
        if !status.is_success() {
            return Ok(Fetched::Missing(status));
        }

        let partial = crate::archive::partial_path(target);
        let mut file = tokio::fs::File::create(&partial)
            .await
            .with_context(|| format!("Failed to create {}", partial.display()))?;
        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => file
                    .write_all(&chunk)
                    .await
                    .with_context(|| format!("Failed to write {}", partial.display()))?,
                Ok(None) => break,
                Err(e) => {
                    drop(file);
                    let _ = tokio::fs::remove_file(&partial).await;
                    return Err(transient(e.to_string()));
                }
            }
        }
        file.flush()
            .await
            .with_context(|| format!("Failed to write {}", partial.display()))?;
        drop(file);
        tokio::fs::rename(&partial, target)
            .await
            .with_context(|| format!("Failed to move download to {}", target.display()))?;
        trace!(url, "Downloaded");
        Ok(Fetched::Saved)
    }

    fn save_to_cache(&self, coordinate: &Coordinate, files: &[PathBuf]) -> Result<(), MirrorError> {
        let Some(cache) = &self.cache else {
            return Ok(());
        };
        for file in files {
            let name = file
                .file_name()
                .and_then(|n| n.to_str())
                .with_context(|| format!("Path has no file name: {}", file.display()))?;
            cache.put(coordinate, name, file)?;
        }
        Ok(())
    }
}
