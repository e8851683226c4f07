//! Dependency coordinates (group, artifact, version)

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Identifies one resolvable dependency. Equality is exact string equality on
/// all three fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Coordinate {
    group: String,
    artifact: String,
    version: String,
}

impl Coordinate {
    pub fn new(
        group: impl Into<String>,
        artifact: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            artifact: artifact.into(),
            version: version.into(),
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn artifact(&self) -> &str {
        &self.artifact
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Path of this coordinate in a Maven-layout repository
    /// (`org/example/lib/1.0`).
    pub fn repository_path(&self) -> String {
        format!(
            "{}/{}/{}",
            self.group.replace('.', "/"),
            self.artifact,
            self.version
        )
    }

    /// Whether every field can be used as a single directory name: not
    /// empty, not `.` or `..`, and free of path separators.
    pub fn is_path_safe(&self) -> bool {
        [&self.group, &self.artifact, &self.version]
            .iter()
            .all(|field| is_safe_segment(field))
    }

    /// On-disk location under `root`, keeping the dotted group as a single
    /// directory (`root/org.example/lib/1.0`).
    pub fn dir_under(&self, root: &Path) -> PathBuf {
        root.join(&self.group)
            .join(&self.artifact)
            .join(&self.version)
    }
}

fn is_safe_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && !segment.contains(['/', '\\'])
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.group, self.artifact, self.version)
    }
}
