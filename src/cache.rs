//! Content cache for downloaded dependency artifacts
//!
//! Layout is `root/<group>/<artifact>/<version>/` with the dotted group kept as
//! one directory. Entries are created lazily and never evicted. There is no
//! cross-task lock: two services fetching the same coordinate may both write
//! it, and the last writer wins.

use crate::coordinate::Coordinate;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, trace};
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Not a regular file: {0}")]
    NotRegularFile(PathBuf),

    #[error("Coordinate {0} cannot be mapped to a cache path")]
    UnsafeCoordinate(Coordinate),
}

impl CacheError {
    fn io(path: &Path, source: io::Error) -> Self {
        CacheError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// What the cache knows about one coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStatus {
    pub exists: bool,
    pub has_sources: bool,
}

/// Tracks the binary and sources markers over a sequence of file names, in
/// the order they are seen.
///
/// A binary is a `.jar` that is neither javadoc nor a `.jar.` sidecar. Sources
/// are any name containing `sources` once a binary was seen, or a `.tgz`
/// archive that is not a sidecar.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkerScan {
    pub binary: bool,
    pub sources: bool,
}

impl MarkerScan {
    pub fn observe(&mut self, name: &str) {
        if name.contains(".jar") && !name.contains("javadoc.jar") && !name.contains(".jar.") {
            self.binary = true;
        }
        if self.binary && name.contains("sources") {
            self.sources = true;
        }
        if name.contains(".tgz") && !name.contains(".tgz.") {
            self.sources = true;
        }
    }

    pub fn scan<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let mut scan = Self::default();
        for name in names {
            scan.observe(name);
        }
        scan
    }

    /// A binary without sources is the only incomplete case.
    pub fn has_sources(&self) -> bool {
        self.sources || !self.binary
    }
}

#[derive(Debug, Clone)]
pub struct CacheManager {
    root: PathBuf,
}

impl CacheManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Entry directory for `coordinate`. Fields that would leave the cache
    /// root (`..`, separators, empty) are rejected.
    pub fn entry_dir(&self, coordinate: &Coordinate) -> Result<PathBuf, CacheError> {
        if !coordinate.is_path_safe() {
            return Err(CacheError::UnsafeCoordinate(coordinate.clone()));
        }
        Ok(coordinate.dir_under(&self.root))
    }

    pub fn has(&self, coordinate: &Coordinate) -> Result<CacheStatus, CacheError> {
        let dir = self.entry_dir(coordinate)?;
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                trace!(coordinate = %coordinate, "Not in cache");
                return Ok(CacheStatus::default());
            }
            Err(e) => return Err(CacheError::io(&dir, e)),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| CacheError::io(&dir, e))?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();

        let scan = MarkerScan::scan(names.iter().map(String::as_str));
        Ok(CacheStatus {
            exists: true,
            has_sources: scan.has_sources(),
        })
    }

    /// Copies `source` into the entry for `coordinate` as `file_name`,
    /// overwriting any previous file of that name.
    pub fn put(
        &self,
        coordinate: &Coordinate,
        file_name: &str,
        source: &Path,
    ) -> Result<(), CacheError> {
        let meta = fs::metadata(source).map_err(|e| CacheError::io(source, e))?;
        if !meta.is_file() {
            return Err(CacheError::NotRegularFile(source.to_path_buf()));
        }

        let dir = self.entry_dir(coordinate)?;
        fs::create_dir_all(&dir).map_err(|e| CacheError::io(&dir, e))?;
        let dest = dir.join(file_name);
        fs::copy(source, &dest).map_err(|e| CacheError::io(&dest, e))?;
        trace!(coordinate = %coordinate, file = file_name, "Saved to cache");
        Ok(())
    }

    /// Recursively copies the entry for `coordinate` into
    /// `destination/<group>/<artifact>/<version>/`.
    pub fn copy_into(
        &self,
        coordinate: &Coordinate,
        destination: &Path,
    ) -> Result<PathBuf, CacheError> {
        let src = self.entry_dir(coordinate)?;
        let dest = coordinate.dir_under(destination);
        copy_tree(&src, &dest)?;
        debug!(coordinate = %coordinate, "Copied from cache");
        Ok(dest)
    }

    pub fn clear(&self) -> Result<(), CacheError> {
        match fs::remove_dir_all(&self.root) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::io(&self.root, e)),
        }
    }
}

fn copy_tree(src: &Path, dest: &Path) -> Result<(), CacheError> {
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(src).to_path_buf();
            CacheError::Io {
                path,
                source: e.into(),
            }
        })?;
        let relative = entry.path().strip_prefix(src).unwrap_or(entry.path());
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|e| CacheError::io(&target, e))?;
        } else if entry.file_type().is_file() {
            fs::copy(entry.path(), &target).map_err(|e| CacheError::io(&target, e))?;
        }
    }
    Ok(())
}
