//! SHA-256 checksum sidecars
//!
//! Every published artifact gets a `<file>.hash` file next to it containing
//! `<sha256 hex>  <file name>\n`, the format `sha256sum -c` accepts.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

pub const SIDECAR_EXTENSION: &str = "hash";

/// Hex-encoded SHA-256 of the file contents.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file =
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)
        .with_context(|| format!("Failed to hash {}", path.display()))?;
    Ok(hex::encode(hasher.finalize()))
}

pub fn sidecar_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(SIDECAR_EXTENSION);
    path.with_file_name(name)
}

/// Writes the sidecar for `path` and returns its location.
pub fn write_sidecar(path: &Path) -> Result<PathBuf> {
    let digest = sha256_file(path)?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("Path has no file name: {}", path.display()))?;
    let sidecar = sidecar_path(path);
    fs::write(&sidecar, format!("{}  {}\n", digest, file_name))
        .with_context(|| format!("Failed to write checksum {}", sidecar.display()))?;
    Ok(sidecar)
}

/// Whether a downloaded file gets a sidecar: `.jar` and `.pom` artifacts, not
/// the `.jar.sha1`-style sidecars published next to them.
pub fn wants_sidecar(file_name: &str) -> bool {
    let artifact = file_name.contains(".jar") || file_name.contains(".pom");
    let is_sidecar = file_name.contains(".jar.") || file_name.contains(".pom.");
    artifact && !is_sidecar
}
