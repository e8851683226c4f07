//! Configuration management for fleetpack
//!
//! Settings come from a JSON file (default `config.json`); secrets come from
//! the environment.
//!
//! # Environment Variables
//!
//! - `GIT_TOKEN`: hosted repository API token - **required**
//! - `NEXUS_USER` / `NEXUS_PASS`: artifact repository credentials, required
//!   when `upload_to_nexus` is enabled
//! - `FLEETPACK_LOG_LEVEL`: logging level - default: "info"
//!
//! # Example
//!
//! ```no_run
//! use fleetpack::config::{Credentials, MirrorConfig};
//! use std::path::Path;
//!
//! let config = MirrorConfig::load(Path::new("config.json")).expect("readable config");
//! let credentials = Credentials::from_env();
//! config.validate(&credentials).expect("Invalid configuration");
//! ```

use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

const DEFAULT_INTERNAL_NAMESPACE: &str = "sx.microservices";
const DEFAULT_DEPS_NAMESPACE: &str = "rtl.pgs";
const DEFAULT_BUILD_DESCRIPTOR: &str = "Dockerfile";
const DEFAULT_RETRY_MIN_SECS: u64 = 5;
const DEFAULT_RETRY_JITTER_SECS: u64 = 10;

/// Descriptors each worker may need while building and packing one unit.
pub const FDS_PER_WORKER: u64 = 2048;

pub const SUPPORTED_ARCHIVE_FORMATS: [&str; 2] = ["tar.gz", "tgz"];

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read configuration file {path}: {source}")]
    Unreadable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Cannot parse configuration file {path}: {source}")]
    Malformed {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// A required field is empty
    #[error("Empty configuration field: {0}")]
    MissingField(&'static str),

    /// A required environment variable is not set
    #[error("Environment variable {0} is not set")]
    MissingEnv(&'static str),

    /// Configuration validation failed
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error(
        "Not enough file descriptors: {required} needed for max_parallelism {parallelism}, hard limit is {limit}"
    )]
    FileDescriptors {
        required: u64,
        parallelism: usize,
        limit: u64,
    },
}

/// Secrets taken from the environment, never from the configuration file.
#[derive(Clone, Default)]
pub struct Credentials {
    pub git_token: Option<String>,
    pub nexus_user: Option<String>,
    pub nexus_pass: Option<String>,
}

impl Credentials {
    pub fn from_env() -> Self {
        let read = |key: &str| env::var(key).ok().filter(|v| !v.is_empty());
        Self {
            git_token: read("GIT_TOKEN"),
            nexus_user: read("NEXUS_USER"),
            nexus_pass: read("NEXUS_PASS"),
        }
    }

    pub fn git_token(&self) -> Result<&str, ConfigError> {
        self.git_token
            .as_deref()
            .ok_or(ConfigError::MissingEnv("GIT_TOKEN"))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mask = |v: &Option<String>| if v.is_some() { "<set>" } else { "<unset>" };
        f.debug_struct("Credentials")
            .field("git_token", &mask(&self.git_token))
            .field("nexus_user", &self.nexus_user)
            .field("nexus_pass", &mask(&self.nexus_pass))
            .finish()
    }
}

/// Run configuration as read from the JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// Base URL of the hosted repository REST API (`https://gitlab.example/api/v4`)
    pub gitlab_api_host: String,
    pub output_dir: PathBuf,
    pub service_list: Vec<String>,

    /// Group holding the services and the first internal dependency namespace
    pub group_id: String,
    /// Group holding the second internal dependency namespace
    #[serde(alias = "rtl_search_repo_id")]
    pub deps_group_id: String,
    #[serde(default = "default_internal_namespace")]
    pub internal_namespace: String,
    #[serde(default = "default_deps_namespace")]
    pub deps_namespace: String,

    pub branch: String,
    pub archive_format: String,

    pub maven_url: String,
    pub plugins_url: String,

    pub max_parallelism: usize,

    /// File name of the container build descriptor
    #[serde(default = "default_build_descriptor")]
    pub build_descriptor: String,

    #[serde(default)]
    pub upload_to_nexus: bool,
    #[serde(default)]
    pub nexus_url: String,
    #[serde(default)]
    pub nexus_path: String,
    #[serde(default, alias = "mirror_url")]
    pub nexus_maven_url: String,
    #[serde(default, alias = "force_mirror")]
    pub nexus_force_add_to_gradle: bool,
    #[serde(default, alias = "auto_mirror")]
    pub nexus_auto_add_to_gradle: bool,

    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default)]
    pub cache: bool,

    #[serde(default)]
    pub proxy: bool,
    #[serde(default)]
    pub proxy_host: String,
    #[serde(default)]
    pub proxy_port: String,
    #[serde(default)]
    pub proxy_user: String,
    #[serde(default, skip_serializing)]
    pub proxy_pass: String,

    #[serde(default = "default_true")]
    pub skip_tls_verify: bool,
    #[serde(default = "default_retry_min_secs")]
    pub retry_min_secs: u64,
    #[serde(default = "default_retry_jitter_secs")]
    pub retry_jitter_secs: u64,
}

fn default_internal_namespace() -> String {
    DEFAULT_INTERNAL_NAMESPACE.to_string()
}

fn default_deps_namespace() -> String {
    DEFAULT_DEPS_NAMESPACE.to_string()
}

fn default_build_descriptor() -> String {
    DEFAULT_BUILD_DESCRIPTOR.to_string()
}

fn default_true() -> bool {
    true
}

fn default_retry_min_secs() -> u64 {
    DEFAULT_RETRY_MIN_SECS
}

fn default_retry_jitter_secs() -> u64 {
    DEFAULT_RETRY_JITTER_SECS
}

/// SOCKS5 proxy settings shared by the HTTP client and the build tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySettings {
    pub host: String,
    pub port: String,
    pub user: Option<String>,
    pub pass: Option<String>,
}

impl ProxySettings {
    pub fn url(&self) -> String {
        format!("socks5://{}:{}", self.host, self.port)
    }
}

impl MirrorConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw).map_err(|source| ConfigError::Malformed {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Validates the configuration together with the environment credentials.
    ///
    /// # Errors
    ///
    /// Returns the first problem found; every error is fatal for the run.
    pub fn validate(&self, credentials: &Credentials) -> Result<(), ConfigError> {
        let required: [(&'static str, &str); 8] = [
            ("gitlab_api_host", &self.gitlab_api_host),
            ("group_id", &self.group_id),
            ("deps_group_id", &self.deps_group_id),
            ("branch", &self.branch),
            ("archive_format", &self.archive_format),
            ("maven_url", &self.maven_url),
            ("plugins_url", &self.plugins_url),
            ("build_descriptor", &self.build_descriptor),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingField(name));
            }
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(ConfigError::MissingField("output_dir"));
        }
        if self.service_list.is_empty() {
            return Err(ConfigError::MissingField("service_list"));
        }

        credentials.git_token()?;

        if self.max_parallelism == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_parallelism must be at least 1".to_string(),
            ));
        }

        if !SUPPORTED_ARCHIVE_FORMATS.contains(&self.archive_format.as_str()) {
            return Err(ConfigError::ValidationFailed(format!(
                "Unsupported archive format: {}. Valid options: {}",
                self.archive_format,
                SUPPORTED_ARCHIVE_FORMATS.join(", ")
            )));
        }

        if self.proxy && (self.proxy_host.is_empty() || self.proxy_port.is_empty()) {
            return Err(ConfigError::ValidationFailed(
                "proxy is enabled but proxy_host or proxy_port is empty".to_string(),
            ));
        }

        if self.upload_to_nexus {
            if self.nexus_url.is_empty() {
                return Err(ConfigError::MissingField("nexus_url"));
            }
            if self.nexus_path.is_empty() {
                return Err(ConfigError::MissingField("nexus_path"));
            }
            if credentials.nexus_user.is_none() {
                return Err(ConfigError::MissingEnv("NEXUS_USER"));
            }
            if credentials.nexus_pass.is_none() {
                return Err(ConfigError::MissingEnv("NEXUS_PASS"));
            }
        }

        if self.mirror_enabled() && self.nexus_maven_url.is_empty() {
            return Err(ConfigError::MissingField("nexus_maven_url"));
        }

        if self.cache && self.cache_root().is_none() {
            return Err(ConfigError::MissingField("cache_dir"));
        }

        Ok(())
    }

    /// Rejects `--clear-cache` while caching is off.
    pub fn validate_clear_cache(&self, clear_cache: bool) -> Result<(), ConfigError> {
        if clear_cache && !self.cache {
            return Err(ConfigError::ValidationFailed(
                "clear cache requested but caching is disabled".to_string(),
            ));
        }
        Ok(())
    }

    /// Checks that `max_parallelism` workers fit under the hard descriptor limit.
    pub fn check_fd_headroom(&self) -> Result<(), ConfigError> {
        let limit = hard_nofile_limit()?;
        check_fd_limit(self.max_parallelism, limit)
    }

    pub fn mirror_enabled(&self) -> bool {
        self.nexus_force_add_to_gradle || self.nexus_auto_add_to_gradle
    }

    pub fn proxy_settings(&self) -> Option<ProxySettings> {
        if !self.proxy {
            return None;
        }
        let non_empty = |v: &str| (!v.is_empty()).then(|| v.to_string());
        Some(ProxySettings {
            host: self.proxy_host.clone(),
            port: self.proxy_port.clone(),
            user: non_empty(&self.proxy_user),
            pass: non_empty(&self.proxy_pass),
        })
    }

    /// Cache root, only when caching is enabled. Falls back to the user cache
    /// directory when `cache_dir` is not set.
    pub fn cache_root(&self) -> Option<PathBuf> {
        if !self.cache {
            return None;
        }
        self.cache_dir
            .clone()
            .or_else(|| dirs::cache_dir().map(|d| d.join("fleetpack")))
    }

    pub fn service_archive(&self, service: &str) -> PathBuf {
        self.output_dir
            .join(format!("{}.{}", service, self.archive_format))
    }
}

pub fn check_fd_limit(parallelism: usize, hard_limit: u64) -> Result<(), ConfigError> {
    let required = (parallelism as u64).saturating_mul(FDS_PER_WORKER);
    if required > hard_limit {
        return Err(ConfigError::FileDescriptors {
            required,
            parallelism,
            limit: hard_limit,
        });
    }
    Ok(())
}

#[cfg(unix)]
fn hard_nofile_limit() -> Result<u64, ConfigError> {
    use nix::sys::resource::{getrlimit, Resource};
    let (_soft, hard) = getrlimit(Resource::RLIMIT_NOFILE).map_err(|e| {
        ConfigError::ValidationFailed(format!("cannot read RLIMIT_NOFILE: {}", e))
    })?;
    Ok(hard)
}

#[cfg(not(unix))]
fn hard_nofile_limit() -> Result<u64, ConfigError> {
    Ok(u64::MAX)
}

impl fmt::Display for MirrorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Fleetpack Configuration:")?;
        writeln!(f, "  Hosted API: {}", self.gitlab_api_host)?;
        writeln!(f, "  Output Dir: {}", self.output_dir.display())?;
        writeln!(f, "  Services: {}", self.service_list.join(", "))?;
        writeln!(f, "  Branch: {}", self.branch)?;
        writeln!(f, "  Archive Format: {}", self.archive_format)?;
        writeln!(
            f,
            "  Internal Namespaces: {} (group {}), {} (group {})",
            self.internal_namespace, self.group_id, self.deps_namespace, self.deps_group_id
        )?;
        writeln!(f, "  Maven URL: {}", self.maven_url)?;
        writeln!(f, "  Plugins URL: {}", self.plugins_url)?;
        writeln!(f, "  Max Parallelism: {}", self.max_parallelism)?;
        writeln!(f, "  Build Descriptor: {}", self.build_descriptor)?;
        writeln!(f, "  Cache Enabled: {}", self.cache)?;
        if let Some(dir) = self.cache_root() {
            writeln!(f, "  Cache Dir: {}", dir.display())?;
        }
        writeln!(f, "  Upload: {}", self.upload_to_nexus)?;
        if self.upload_to_nexus {
            writeln!(f, "  Nexus: {}{}", self.nexus_url, self.nexus_path)?;
        }
        if self.mirror_enabled() {
            writeln!(
                f,
                "  Mirror: {} (force: {}, auto: {})",
                self.nexus_maven_url, self.nexus_force_add_to_gradle, self.nexus_auto_add_to_gradle
            )?;
        }
        if let Some(proxy) = self.proxy_settings() {
            writeln!(f, "  Proxy: {}", proxy.url())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    /// Helper to temporarily set environment variables for testing
    struct EnvGuard {
        key: String,
        old_value: Option<String>,
    }

    impl EnvGuard {
        fn set(key: &str, value: &str) -> Self {
            let old_value = env::var(key).ok();
            env::set_var(key, value);
            Self {
                key: key.to_string(),
                old_value,
            }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            match &self.old_value {
                Some(v) => env::set_var(&self.key, v),
                None => env::remove_var(&self.key),
            }
        }
    }

    const MINIMAL: &str = r#"{
        "gitlab_api_host": "https://git.example/api/v4",
        "output_dir": "/tmp/out",
        "service_list": ["billing"],
        "group_id": "12",
        "rtl_search_repo_id": "34",
        "branch": "master",
        "archive_format": "tar.gz",
        "maven_url": "https://repo.example/maven2/",
        "plugins_url": "https://plugins.example/m2/",
        "max_parallelism": 2
    }"#;

    fn credentials() -> Credentials {
        Credentials {
            git_token: Some("token".to_string()),
            nexus_user: None,
            nexus_pass: None,
        }
    }

    fn minimal() -> MirrorConfig {
        MirrorConfig::from_json(MINIMAL).unwrap()
    }

    #[test]
    fn test_defaults_and_alias() {
        let config = minimal();
        assert_eq!(config.deps_group_id, "34");
        assert_eq!(config.internal_namespace, DEFAULT_INTERNAL_NAMESPACE);
        assert_eq!(config.deps_namespace, DEFAULT_DEPS_NAMESPACE);
        assert_eq!(config.build_descriptor, "Dockerfile");
        assert!(config.skip_tls_verify);
        assert_eq!(config.retry_min_secs, 5);
        assert_eq!(config.retry_jitter_secs, 10);
        assert!(!config.cache);
        assert!(config.cache_root().is_none());
    }

    #[test]
    fn test_minimal_config_is_valid() {
        assert!(minimal().validate(&credentials()).is_ok());
    }

    #[test]
    fn test_missing_token_rejected() {
        let result = minimal().validate(&Credentials::default());
        assert!(matches!(result, Err(ConfigError::MissingEnv("GIT_TOKEN"))));
    }

    #[test]
    fn test_zero_parallelism_rejected() {
        let mut config = minimal();
        config.max_parallelism = 0;
        assert!(matches!(
            config.validate(&credentials()),
            Err(ConfigError::ValidationFailed(_))
        ));
    }

    #[test]
    fn test_unsupported_archive_format() {
        let mut config = minimal();
        config.archive_format = "zip".to_string();
        let err = config.validate(&credentials()).unwrap_err();
        assert!(err.to_string().contains("zip"));
    }

    #[test]
    fn test_empty_required_field() {
        let mut config = minimal();
        config.branch = String::new();
        assert!(matches!(
            config.validate(&credentials()),
            Err(ConfigError::MissingField("branch"))
        ));
    }

    #[test]
    fn test_upload_requires_credentials() {
        let mut config = minimal();
        config.upload_to_nexus = true;
        config.nexus_url = "https://nexus.example".to_string();
        config.nexus_path = "/repository/raw".to_string();
        assert!(matches!(
            config.validate(&credentials()),
            Err(ConfigError::MissingEnv("NEXUS_USER"))
        ));

        let creds = Credentials {
            nexus_user: Some("u".to_string()),
            nexus_pass: Some("p".to_string()),
            ..credentials()
        };
        assert!(config.validate(&creds).is_ok());
    }

    #[test]
    fn test_mirror_requires_url() {
        let mut config = minimal();
        config.nexus_auto_add_to_gradle = true;
        assert!(matches!(
            config.validate(&credentials()),
            Err(ConfigError::MissingField("nexus_maven_url"))
        ));
    }

    #[test]
    fn test_proxy_requires_host_and_port() {
        let mut config = minimal();
        config.proxy = true;
        config.proxy_host = "10.0.0.1".to_string();
        assert!(config.validate(&credentials()).is_err());

        config.proxy_port = "1080".to_string();
        assert!(config.validate(&credentials()).is_ok());
        let proxy = config.proxy_settings().unwrap();
        assert_eq!(proxy.url(), "socks5://10.0.0.1:1080");
        assert!(proxy.user.is_none());
    }

    #[test]
    fn test_clear_cache_requires_cache() {
        let mut config = minimal();
        assert!(config.validate_clear_cache(false).is_ok());
        assert!(config.validate_clear_cache(true).is_err());
        config.cache = true;
        assert!(config.validate_clear_cache(true).is_ok());
    }

    #[test]
    fn test_cache_root_prefers_configured_dir() {
        let mut config = minimal();
        config.cache = true;
        config.cache_dir = Some(PathBuf::from("/var/cache/deps"));
        assert_eq!(config.cache_root(), Some(PathBuf::from("/var/cache/deps")));
    }

    #[test]
    fn test_fd_limit() {
        assert!(check_fd_limit(2, 4096).is_ok());
        let err = check_fd_limit(3, 4096).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::FileDescriptors {
                required: 6144,
                limit: 4096,
                ..
            }
        ));
    }

    #[test]
    #[serial]
    fn test_credentials_from_env() {
        let _guards = vec![
            EnvGuard::set("GIT_TOKEN", "abc"),
            EnvGuard::set("NEXUS_USER", "deployer"),
            EnvGuard::set("NEXUS_PASS", ""),
        ];
        let creds = Credentials::from_env();
        assert_eq!(creds.git_token().unwrap(), "abc");
        assert_eq!(creds.nexus_user.as_deref(), Some("deployer"));
        assert!(creds.nexus_pass.is_none());
        assert!(!format!("{:?}", creds).contains("abc"));
    }

    #[test]
    fn test_load_reports_path() {
        let err = MirrorConfig::load(Path::new("/nonexistent/config.json")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/config.json"));
    }

    #[test]
    fn test_config_display() {
        let display = format!("{}", minimal());
        assert!(display.contains("Fleetpack Configuration:"));
        assert!(display.contains("billing"));
    }
}
