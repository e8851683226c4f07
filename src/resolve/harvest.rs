//! Dependency harvesting from a build's local Gradle cache

use crate::coordinate::Coordinate;
use roxmltree::Document;
use std::collections::HashSet;
use std::fs;
use std::path::{Component, Path};
use tracing::{debug, trace, warn};
use walkdir::WalkDir;

/// Module store inside the Gradle user home.
pub const MODULES_DIR: &str = "caches/modules-2/files-2.1";

/// Coordinates of every `*.pom` under `<tool_cache>/caches/modules-2/files-2.1`,
/// deduplicated in walk order.
pub fn harvest(tool_cache: &Path) -> Vec<Coordinate> {
    let root = tool_cache.join(MODULES_DIR);
    if !root.is_dir() {
        warn!(dir = %root.display(), "No module cache, build resolved no dependencies");
        return Vec::new();
    }

    let mut seen = HashSet::new();
    let mut coordinates = Vec::new();
    for entry in WalkDir::new(&root).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable module cache entry");
                continue;
            }
        };
        let is_pom = entry.file_type().is_file()
            && entry.path().extension().is_some_and(|ext| ext == "pom");
        if !is_pom {
            continue;
        }
        if let Some(coordinate) = coordinate_of(entry.path()) {
            if seen.insert(coordinate.clone()) {
                coordinates.push(coordinate);
            }
        }
    }
    debug!(count = coordinates.len(), "Harvested dependencies");
    coordinates
}

/// Coordinate declared by a pom file, falling back to its location in the
/// module store when the pom is unreadable or leaves fields unresolved.
pub fn coordinate_of(pom: &Path) -> Option<Coordinate> {
    let declared = fs::read(pom)
        .ok()
        .map(|bytes| decode(&bytes))
        .and_then(|text| parse_pom(&text));

    match declared {
        Some(coordinate) if is_resolved(&coordinate) => Some(coordinate),
        _ => {
            let fallback = coordinate_from_path(pom);
            trace!(
                pom = %pom.display(),
                coordinate = ?fallback.as_ref().map(ToString::to_string),
                "Using module store path for coordinate"
            );
            fallback
        }
    }
}

/// UTF-8 when valid, otherwise Latin-1.
fn decode(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

/// Reads `groupId`, `artifactId` and `version` from the direct children of
/// the root `<project>` element. Missing children come back empty.
pub fn parse_pom(content: &str) -> Option<Coordinate> {
    let doc = Document::parse(content).ok()?;
    let root = doc.root_element();
    if !root.has_tag_name("project") {
        return None;
    }

    let mut group = String::new();
    let mut artifact = String::new();
    let mut version = String::new();
    for child in root.children().filter(|n| n.is_element()) {
        let text = child.text().map(|s| s.trim().to_string()).unwrap_or_default();
        match child.tag_name().name() {
            "groupId" => group = text,
            "artifactId" => artifact = text,
            "version" => version = text,
            _ => {}
        }
    }
    Some(Coordinate::new(group, artifact, version))
}

fn is_resolved(coordinate: &Coordinate) -> bool {
    let usable = |field: &str| !field.is_empty() && !field.contains('$');
    usable(coordinate.group()) && usable(coordinate.version()) && coordinate.is_path_safe()
}

/// `.../<group>/<artifact>/<version>/<hash>/<file>.pom`
pub fn coordinate_from_path(pom: &Path) -> Option<Coordinate> {
    let parts: Vec<&str> = pom
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .collect();
    let n = parts.len();
    if n < 5 {
        return None;
    }
    let coordinate = Coordinate::new(parts[n - 5], parts[n - 4], parts[n - 3]);
    coordinate.is_path_safe().then_some(coordinate)
}
