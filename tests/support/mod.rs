//! In-memory collaborators shared by the integration tests

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use fleetpack::archive;
use fleetpack::build::{BuildExecutor, BuildSettings};
use fleetpack::build::runtime::{ContainerRuntime, RunInvocation, RunOutput, TOOL_CACHE_DIR};
use fleetpack::hosted::{HostedRepository, ProjectIndex, ProjectRef, SharedRepository, Tag};
use fleetpack::pipeline::{ServiceProcessor, ServiceSettings};
use fleetpack::resolve::{DependencyResolver, InternalNamespace, ResolverSettings, RetryPolicy};
use fleetpack::results::ResultSet;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const FORMAT: &str = "tar.gz";
pub const INTERNAL_GROUP: &str = "sx.microservices";

pub const DOCKERFILE: &str = "\
FROM gradle:7.4.2-jdk11 AS build
WORKDIR /home/gradle
RUN gradle build -x test
FROM eclipse-temurin:11-jre
";

pub fn project(id: u64, path: &str) -> ProjectRef {
    ProjectRef {
        id,
        name: path.to_string(),
        path: path.to_string(),
        http_url_to_repo: String::new(),
    }
}

/// Hosted repository serving canned archives and tags per project id.
#[derive(Default)]
pub struct FakeRepository {
    pub archives: HashMap<u64, Vec<u8>>,
    pub tags: HashMap<u64, Vec<String>>,
    pub fetches: Mutex<Vec<(u64, String)>>,
}

impl FakeRepository {
    pub fn with_archive(mut self, project_id: u64, data: Vec<u8>) -> Self {
        self.archives.insert(project_id, data);
        self
    }

    pub fn with_tags(mut self, project_id: u64, tags: &[&str]) -> Self {
        self.tags
            .insert(project_id, tags.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn fetched(&self) -> Vec<(u64, String)> {
        self.fetches.lock().unwrap().clone()
    }
}

#[async_trait]
impl HostedRepository for FakeRepository {
    async fn list_projects(&self, _group: &str) -> Result<Vec<ProjectRef>> {
        Ok(Vec::new())
    }

    async fn list_tags(&self, project_id: u64) -> Result<Vec<Tag>> {
        Ok(self
            .tags
            .get(&project_id)
            .map(|tags| tags.iter().map(|name| Tag { name: name.clone() }).collect())
            .unwrap_or_default())
    }

    async fn fetch_archive(&self, project_id: u64, _format: &str, git_ref: &str) -> Result<Bytes> {
        self.fetches
            .lock()
            .unwrap()
            .push((project_id, git_ref.to_string()));
        self.archives
            .get(&project_id)
            .map(|data| Bytes::from(data.clone()))
            .ok_or_else(|| anyhow!("no archive for project {}", project_id))
    }
}

/// Container runtime that "builds" by writing pom files into the tool cache.
pub struct FakeRuntime {
    poms: Vec<(String, String)>,
    exit_code: i64,
    delay: Duration,
    active: AtomicUsize,
    pub runs: AtomicUsize,
    /// Highest number of builds seen running at once
    pub peak: AtomicUsize,
}

impl FakeRuntime {
    /// `poms` are `(path under the module store, content)` pairs.
    pub fn resolving(poms: &[(&str, &str)]) -> Arc<Self> {
        Arc::new(Self {
            poms: poms
                .iter()
                .map(|(path, content)| (path.to_string(), content.to_string()))
                .collect(),
            ..Self::idle()
        })
    }

    pub fn failing(exit_code: i64) -> Arc<Self> {
        Arc::new(Self {
            exit_code,
            ..Self::idle()
        })
    }

    /// Successful builds that each take `delay`.
    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::idle()
        })
    }

    fn idle() -> Self {
        Self {
            poms: Vec::new(),
            exit_code: 0,
            delay: Duration::ZERO,
            active: AtomicUsize::new(0),
            runs: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn run(&self, invocation: &RunInvocation) -> Result<RunOutput> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let running = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.active.fetch_sub(1, Ordering::SeqCst);

        let store = invocation
            .workdir
            .join(TOOL_CACHE_DIR)
            .join("caches/modules-2/files-2.1");
        for (path, content) in &self.poms {
            let file = store.join(path);
            fs::create_dir_all(file.parent().unwrap())?;
            fs::write(file, content)?;
        }
        Ok(RunOutput {
            exit_code: self.exit_code,
            stdout: String::new(),
            stderr: if self.exit_code == 0 {
                String::new()
            } else {
                "BUILD FAILED".to_string()
            },
        })
    }

    async fn save_image(&self, image: &str, dest: &Path) -> Result<()> {
        fs::write(dest, format!("image {}", image))?;
        Ok(())
    }
}

pub fn pom(group: &str, artifact: &str, version: &str) -> String {
    format!(
        "<project><groupId>{}</groupId><artifactId>{}</artifactId><version>{}</version></project>",
        group, artifact, version
    )
}

/// Source snapshot `<name>/app/{Dockerfile,build.gradle,settings.gradle}`
/// packed the way the hosted repository serves it.
pub fn source_archive(name: &str, with_descriptor: bool) -> Vec<u8> {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join(name);
    let app = root.join("app");
    fs::create_dir_all(&app).unwrap();
    if with_descriptor {
        fs::write(app.join("Dockerfile"), DOCKERFILE).unwrap();
    }
    fs::write(
        app.join("build.gradle"),
        "repositories {\n    mavenCentral()\n}\n",
    )
    .unwrap();
    fs::write(app.join("settings.gradle"), "rootProject.name = 'app'\n").unwrap();
    fs::write(root.join("README.md"), "# service\n").unwrap();
    archive::pack(&root).unwrap()
}

pub fn resolver_settings(base_url: &str) -> ResolverSettings {
    ResolverSettings {
        maven_url: format!("{}/maven", base_url),
        plugins_url: format!("{}/plugins", base_url),
        archive_format: FORMAT.to_string(),
        parallelism: 2,
        retry: RetryPolicy::immediate(),
    }
}

pub fn build_settings() -> BuildSettings {
    BuildSettings {
        descriptor_name: "Dockerfile".to_string(),
        mirror: None,
        proxy: None,
    }
}

/// Everything one service run needs, wired around fakes.
pub struct Harness {
    pub output_dir: PathBuf,
    pub results: ResultSet,
    pub processor: ServiceProcessor,
}

pub fn harness(
    output_dir: &Path,
    repository: Arc<FakeRepository>,
    runtime: Arc<FakeRuntime>,
    projects: Vec<ProjectRef>,
    base_url: &str,
) -> Harness {
    let results = ResultSet::new();
    let index = ProjectIndex::new(projects);
    let shared: SharedRepository = repository;

    let resolver = DependencyResolver::new(
        reqwest::Client::new(),
        shared.clone(),
        results.clone(),
        resolver_settings(base_url),
    )
    .with_namespace(InternalNamespace {
        group: INTERNAL_GROUP.to_string(),
        index: index.clone(),
        bare_version_tags: false,
    });

    let processor = ServiceProcessor::new(
        ServiceSettings {
            output_dir: output_dir.to_path_buf(),
            branch: "master".to_string(),
            archive_format: FORMAT.to_string(),
        },
        shared,
        index,
        BuildExecutor::new(runtime, build_settings()),
        Arc::new(resolver),
        results.clone(),
    );

    Harness {
        output_dir: output_dir.to_path_buf(),
        results,
        processor,
    }
}
