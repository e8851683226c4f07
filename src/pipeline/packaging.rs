//! Output layout of one service and its final packaging

use super::blocking;
use crate::archive;
use crate::checksum;
use crate::upload::ArtifactUploader;
use anyhow::{Context, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const DEPS_SOURCES_DIR: &str = "deps_sources";
pub const DOCKER_IMAGES_DIR: &str = "docker_images";
pub const GRADLE_DEPENDENCIES_DIR: &str = "gradle_dependencies";
pub const GRADLE_CONFIGS_DIR: &str = "gradle_configs";
pub const WORKSPACE_DIR: &str = "workspace";

/// Areas packed on their own before the service directory itself.
pub const PACKED_AREAS: [&str; 4] = [
    DEPS_SOURCES_DIR,
    DOCKER_IMAGES_DIR,
    GRADLE_DEPENDENCIES_DIR,
    GRADLE_CONFIGS_DIR,
];

/// Paths used while processing one service under the output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceLayout {
    output_dir: PathBuf,
    service: String,
    format: String,
}

impl ServiceLayout {
    pub fn new(output_dir: &Path, service: &str, format: &str) -> Self {
        Self {
            output_dir: output_dir.to_path_buf(),
            service: service.to_string(),
            format: format.to_string(),
        }
    }

    pub fn service_dir(&self) -> PathBuf {
        self.output_dir.join(&self.service)
    }

    pub fn workspace(&self) -> PathBuf {
        self.service_dir().join(WORKSPACE_DIR)
    }

    pub fn deps_sources(&self) -> PathBuf {
        self.service_dir().join(DEPS_SOURCES_DIR)
    }

    /// Temporary copy of the fetched source snapshot.
    pub fn source_snapshot(&self) -> PathBuf {
        self.output_dir
            .join(format!(".{}.src.{}", self.service, self.format))
    }

    /// Where the source snapshot ends up inside the service directory.
    pub fn packaged_sources(&self) -> PathBuf {
        self.service_dir()
            .join(format!("{}.{}", self.service, self.format))
    }

    /// Final output archive.
    pub fn archive(&self) -> PathBuf {
        self.output_dir
            .join(format!("{}.{}", self.service, self.format))
    }

    /// Removes everything this service may have written so a re-run starts
    /// from scratch.
    pub fn cleanup(&self) {
        let archive = self.archive();
        remove_path(&self.service_dir());
        for file in [
            self.source_snapshot(),
            archive::partial_path(&self.source_snapshot()),
            checksum::sidecar_path(&archive),
            archive::partial_path(&archive),
            archive,
        ] {
            remove_path(&file);
        }
    }
}

fn remove_path(path: &Path) {
    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match result {
        Ok(()) => debug!(path = %path.display(), "Removed"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove"),
    }
}

fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))
}

/// Arranges the service directory and packs it.
///
/// The source snapshot moves into the service directory, the build tool cache
/// becomes `gradle_dependencies` and the workspace is dropped. Each area is
/// packed on its own, then the service directory is packed into the final
/// archive. Returns the archive path.
pub fn finalize(layout: &ServiceLayout, tool_cache: &Path) -> Result<PathBuf> {
    let service_dir = layout.service_dir();
    ensure_dir(&service_dir)?;

    let snapshot = layout.source_snapshot();
    fs::rename(&snapshot, layout.packaged_sources()).with_context(|| {
        format!(
            "Failed to move sources archive {} into {}",
            snapshot.display(),
            service_dir.display()
        )
    })?;

    let dependencies = service_dir.join(GRADLE_DEPENDENCIES_DIR);
    if tool_cache.is_dir() {
        fs::rename(tool_cache, &dependencies).with_context(|| {
            format!("Failed to move build cache {}", tool_cache.display())
        })?;
    } else {
        warn!(dir = %tool_cache.display(), "Build left no tool cache");
    }

    let workspace = layout.workspace();
    if workspace.exists() {
        fs::remove_dir_all(&workspace)
            .with_context(|| format!("Failed to remove {}", workspace.display()))?;
    }

    for area in PACKED_AREAS {
        let dir = service_dir.join(area);
        ensure_dir(&dir)?;
        archive::pack_folder(&dir, &layout.format)?;
    }
    let packed = archive::pack_folder(&service_dir, &layout.format)?;
    info!(archive = %packed.display(), "Service packaged");
    Ok(packed)
}

/// [`finalize`] on the blocking pool.
pub async fn finalize_async(layout: ServiceLayout, tool_cache: PathBuf) -> Result<PathBuf> {
    blocking(move || finalize(&layout, &tool_cache)).await
}

/// Uploads the archive and its checksum sidecar, then deletes the local
/// archive. The sidecar stays on disk.
pub async fn publish(uploader: &dyn ArtifactUploader, archive: &Path) -> Result<()> {
    let sidecar = checksum::sidecar_path(archive);
    for file in [archive, sidecar.as_path()] {
        let name = file
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("Path has no file name: {}", file.display()))?;
        uploader.put(file, name).await?;
    }
    tokio::fs::remove_file(archive)
        .await
        .with_context(|| format!("Failed to delete uploaded archive {}", archive.display()))?;
    Ok(())
}
