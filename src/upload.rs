//! Publishing finished archives to a raw artifact repository

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Body, Client, StatusCode};
use std::path::Path;
use tracing::{debug, info};

#[async_trait]
pub trait ArtifactUploader: Send + Sync {
    /// Uploads `local_file` as `remote_name` under the configured repository path.
    async fn put(&self, local_file: &Path, remote_name: &str) -> Result<()>;
}

/// Nexus raw repository uploader. Success is `201 Created`; anything else,
/// including other 2xx codes, is an error.
pub struct NexusUploader {
    client: Client,
    base_url: String,
    user: String,
    pass: String,
}

impl NexusUploader {
    pub fn new(client: Client, nexus_url: &str, nexus_path: &str, user: &str, pass: &str) -> Self {
        Self {
            client,
            base_url: format!(
                "{}/{}",
                nexus_url.trim_end_matches('/'),
                nexus_path.trim_matches('/')
            ),
            user: user.to_string(),
            pass: pass.to_string(),
        }
    }

    pub fn url_for(&self, remote_name: &str) -> String {
        format!("{}/{}", self.base_url, remote_name)
    }
}

#[async_trait]
impl ArtifactUploader for NexusUploader {
    async fn put(&self, local_file: &Path, remote_name: &str) -> Result<()> {
        let url = self.url_for(remote_name);
        let file = tokio::fs::File::open(local_file)
            .await
            .with_context(|| format!("Failed to open {} for upload", local_file.display()))?;
        let size = file.metadata().await.map(|m| m.len()).unwrap_or(0);

        debug!(url = %url, size, "Uploading");
        let response = self
            .client
            .put(&url)
            .basic_auth(&self.user, Some(&self.pass))
            .header(reqwest::header::ACCEPT, "*/*")
            .header(reqwest::header::CONTENT_LENGTH, size)
            .body(Body::from(file))
            .send()
            .await
            .with_context(|| format!("Upload to {} failed", url))?;

        let status = response.status();
        if status != StatusCode::CREATED {
            let body = response.text().await.unwrap_or_default();
            bail!("Upload to {} returned {} (expected 201): {}", url, status, body);
        }
        info!(file = remote_name, "Uploaded");
        Ok(())
    }
}
