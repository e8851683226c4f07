//! Dependency discovery and download
//!
//! [`harvest`] turns a finished build's module cache into coordinates;
//! [`DependencyResolver`] fetches each coordinate from the cache, an internal
//! hosted namespace or an external Maven-layout repository and classifies it.

pub mod downloader;
pub mod harvest;
pub mod listing;

use crate::config::{MirrorConfig, ProxySettings};
use anyhow::{anyhow, Context, Result};
use reqwest::{Client, Proxy, Url};
use std::time::Duration;
use tracing::debug;

pub use downloader::{DependencyResolver, InternalNamespace, ResolverSettings, RetryPolicy};
pub use harvest::harvest;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client for repository downloads and uploads, routed through the
/// SOCKS5 proxy when one is configured.
pub fn http_client(config: &MirrorConfig) -> Result<Client> {
    let mut builder = Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .danger_accept_invalid_certs(config.skip_tls_verify);
    if let Some(settings) = config.proxy_settings() {
        debug!(proxy = %settings.url(), "Using SOCKS proxy for HTTP requests");
        builder = builder.proxy(socks_proxy(&settings)?);
    }
    builder.build().context("Failed to create HTTP client")
}

fn socks_proxy(settings: &ProxySettings) -> Result<Proxy> {
    let mut url = Url::parse(&settings.url())
        .with_context(|| format!("Invalid proxy address {}", settings.url()))?;
    if let Some(user) = &settings.user {
        url.set_username(user)
            .map_err(|_| anyhow!("Proxy user cannot be set on {}", settings.url()))?;
        url.set_password(settings.pass.as_deref())
            .map_err(|_| anyhow!("Proxy password cannot be set on {}", settings.url()))?;
    }
    Proxy::all(url).context("Failed to configure proxy")
}
