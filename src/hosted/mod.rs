//! Hosted repository access (project listing, tags, source archives)

pub mod gitlab;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

pub use gitlab::GitlabClient;

/// One project as listed by the hosted repository.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProjectRef {
    pub id: u64,
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub http_url_to_repo: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Tag {
    pub name: String,
}

#[async_trait]
pub trait HostedRepository: Send + Sync {
    /// All projects of a group, across every page.
    async fn list_projects(&self, group: &str) -> Result<Vec<ProjectRef>>;

    /// Tags of a project, most recently updated first.
    async fn list_tags(&self, project_id: u64) -> Result<Vec<Tag>>;

    /// Source snapshot of `git_ref` packed in `format`.
    async fn fetch_archive(&self, project_id: u64, format: &str, git_ref: &str) -> Result<Bytes>;
}

pub type SharedRepository = Arc<dyn HostedRepository>;

/// Project lookup by path, built once per run.
#[derive(Debug, Clone, Default)]
pub struct ProjectIndex {
    by_path: HashMap<String, ProjectRef>,
}

impl ProjectIndex {
    pub fn new(projects: Vec<ProjectRef>) -> Self {
        let by_path = projects
            .into_iter()
            .map(|p| (p.path.trim().to_string(), p))
            .collect();
        Self { by_path }
    }

    pub async fn load(repository: &dyn HostedRepository, group: &str) -> Result<Self> {
        let projects = repository.list_projects(group).await?;
        Ok(Self::new(projects))
    }

    pub fn get(&self, path: &str) -> Option<&ProjectRef> {
        self.by_path.get(path)
    }

    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }
}
