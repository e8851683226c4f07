//! GitLab REST API client

use super::{HostedRepository, ProjectRef, Tag};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, trace};

const PER_PAGE: u32 = 50;
const NEXT_PAGE_HEADER: &str = "X-Next-Page";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

pub struct GitlabClient {
    client: Client,
    base_url: String,
    token: String,
}

impl GitlabClient {
    pub fn new(base_url: &str, token: &str, skip_tls_verify: bool) -> Result<Self> {
        let client = Client::builder()
            .danger_accept_invalid_certs(skip_tls_verify)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build hosted repository HTTP client")?;
        Ok(Self::with_client(client, base_url, token))
    }

    pub fn with_client(client: Client, base_url: &str, token: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Response> {
        let url = format!("{}{}", self.base_url, path);
        trace!(url = %url, "GET");
        let response = self
            .client
            .get(&url)
            .header("PRIVATE-TOKEN", &self.token)
            .query(query)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                bail!(
                    "Hosted repository rejected the token ({}) for {}; check GIT_TOKEN",
                    status,
                    url
                );
            }
            bail!("Hosted repository returned {} for {}: {}", status, url, body);
        }
        Ok(response)
    }

    /// Follows `X-Next-Page` until it is empty or missing.
    async fn get_all_pages<T: DeserializeOwned>(
        &self,
        path: &str,
        extra: &[(&str, String)],
    ) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut page = 1u32;
        loop {
            let mut query = vec![("per_page", PER_PAGE.to_string()), ("page", page.to_string())];
            query.extend(extra.iter().cloned());

            let response = self.get(path, &query).await?;
            let next = response
                .headers()
                .get(NEXT_PAGE_HEADER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u32>().ok());

            let batch: Vec<T> = response
                .json()
                .await
                .with_context(|| format!("Invalid JSON from {} page {}", path, page))?;
            items.extend(batch);

            match next {
                Some(n) if n > page => page = n,
                _ => break,
            }
        }
        Ok(items)
    }
}

fn encode_segment(segment: &str) -> String {
    segment.replace('/', "%2F")
}

#[async_trait]
impl HostedRepository for GitlabClient {
    async fn list_projects(&self, group: &str) -> Result<Vec<ProjectRef>> {
        let path = format!("/groups/{}/projects", encode_segment(group));
        let projects: Vec<ProjectRef> = self
            .get_all_pages(&path, &[])
            .await
            .with_context(|| format!("Failed to list projects of group {}", group))?;
        debug!(group, count = projects.len(), "Listed projects");
        Ok(projects)
    }

    async fn list_tags(&self, project_id: u64) -> Result<Vec<Tag>> {
        let path = format!("/projects/{}/repository/tags", project_id);
        let extra = [
            ("order_by", "updated".to_string()),
            ("sort", "desc".to_string()),
        ];
        self.get_all_pages(&path, &extra)
            .await
            .with_context(|| format!("Failed to list tags of project {}", project_id))
    }

    async fn fetch_archive(
        &self,
        project_id: u64,
        format: &str,
        git_ref: &str,
    ) -> Result<Bytes> {
        let path = format!("/projects/{}/repository/archive.{}", project_id, format);
        let response = self.get(&path, &[("sha", git_ref.to_string())]).await?;
        let bytes = response
            .bytes()
            .await
            .with_context(|| format!("Failed to read archive of project {}", project_id))?;
        if bytes.is_empty() {
            bail!(
                "Empty archive for project {} at {}",
                project_id,
                git_ref
            );
        }
        trace!(project_id, git_ref, size = bytes.len(), "Fetched archive");
        Ok(bytes)
    }
}
