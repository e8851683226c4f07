//! Container build descriptor discovery and parsing
//!
//! The descriptor is a multi-stage Dockerfile. Two kinds of lines matter:
//! the stage line naming the build image (`FROM gradle:7.4.2-jdk11 AS build`)
//! and the tool line invoking the build tool (`RUN gradle build -x test`).
//! Everything else is ignored.

use crate::config::ProxySettings;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Why a descriptor could not yield a complete build invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DescriptorError {
    #[error("Failed to determine image to build")]
    MissingImage,
    #[error("Failed to determine command to build")]
    MissingCommand,
    #[error("Failed to determine build tool version")]
    MissingToolVersion,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildDescriptor {
    pub image: String,
    pub tool_version: String,
    pub command: String,
}

enum Line<'a> {
    Stage { image: Option<&'a str> },
    Tool { command: &'a str },
    Other,
}

fn stage_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)\bas\s+(?:gradle_)?build").expect("valid regex"))
}

fn classify(line: &str) -> Line<'_> {
    if stage_pattern().is_match(line) {
        return Line::Stage {
            image: line.split_whitespace().nth(1),
        };
    }
    if line.to_lowercase().contains(" gradle ") {
        if let Some(start) = line.rfind("gradle") {
            return Line::Tool {
                command: line[start..].trim_end(),
            };
        }
    }
    Line::Other
}

/// Tool version from an image reference: the tag's leading segment before the
/// first `-` (`gradle:7.4.2-jdk11` gives `7.4.2`). A registry port is not a
/// tag (`registry:5000/gradle` has none).
pub fn tool_version_of(image: &str) -> Option<&str> {
    let (_, tag) = image.rsplit_once(':')?;
    if tag.contains('/') {
        return None;
    }
    let version = tag.split('-').next().unwrap_or_default();
    (!version.is_empty()).then_some(version)
}

/// Parses descriptor text. When a line kind repeats, the last one wins.
pub fn parse(content: &str) -> Result<BuildDescriptor, DescriptorError> {
    let mut image: Option<String> = None;
    let mut tool_version: Option<String> = None;
    let mut command: Option<String> = None;

    for line in content.lines() {
        match classify(line) {
            Line::Stage { image: Some(found) } => {
                debug!(image = found, "Build image");
                tool_version = tool_version_of(found).map(str::to_string);
                image = Some(found.to_string());
            }
            Line::Stage { image: None } => return Err(DescriptorError::MissingImage),
            Line::Tool { command: found } => {
                debug!(command = found, "Build command");
                command = Some(found.to_string());
            }
            Line::Other => {}
        }
    }

    let image = image.ok_or(DescriptorError::MissingImage)?;
    let command = command.ok_or(DescriptorError::MissingCommand)?;
    let tool_version = tool_version.ok_or(DescriptorError::MissingToolVersion)?;
    Ok(BuildDescriptor {
        image,
        tool_version,
        command,
    })
}

/// Adds SOCKS proxy system properties after the first `gradle ` of the command.
pub fn with_proxy(command: &str, proxy: &ProxySettings) -> String {
    let mut flags = format!(
        "gradle -DsocksProxyHost={} -DsocksProxyPort={} ",
        proxy.host, proxy.port
    );
    if let Some(user) = &proxy.user {
        flags.push_str(&format!(
            "-Djava.net.socks.username={} -Djava.net.socks.password={} ",
            user,
            proxy.pass.as_deref().unwrap_or_default()
        ));
    }
    command.replacen("gradle ", &flags, 1)
}

/// Every file named `name` under `root`, in sorted walk order.
pub fn find_all(root: &Path, name: &str) -> Vec<PathBuf> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "Skipping unreadable path while looking for descriptor");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file() && entry.file_name() == name)
        .map(|entry| entry.into_path())
        .collect()
}

/// First descriptor under `root`; warns when there is more than one.
pub fn find(root: &Path, name: &str) -> Option<PathBuf> {
    let mut found = find_all(root, name);
    if found.len() > 1 {
        warn!(
            count = found.len(),
            using = %found[0].display(),
            "Found more than one build descriptor, using the first"
        );
    }
    if found.is_empty() {
        None
    } else {
        Some(found.swap_remove(0))
    }
}
