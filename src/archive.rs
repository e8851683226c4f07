//! tar+gzip archive codec
//!
//! Only directories and regular files are carried in either direction.
//! Archives are written through a `.partial` file that is renamed into place
//! once complete, so an interrupted run never leaves a truncated archive under
//! the final name.

use anyhow::{bail, Context, Result};
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};
use tar::{Archive, Builder, EntryType, Header};
use tracing::{debug, trace};
use walkdir::WalkDir;

use crate::checksum;

/// Packs `dir` into an in-memory tar+gzip archive. Entry names are relative to
/// the parent of `dir`, so the archive unpacks into a directory of the same
/// name.
pub fn pack(dir: &Path) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    write_archive(dir, &mut buffer)?;
    Ok(buffer)
}

/// Packs `dir` into `dest` via `dest.partial`.
pub fn pack_to_file(dir: &Path, dest: &Path) -> Result<()> {
    let partial = partial_path(dest);
    let result = File::create(&partial)
        .with_context(|| format!("Failed to create {}", partial.display()))
        .and_then(|file| {
            let mut writer = BufWriter::new(file);
            write_archive(dir, &mut writer)?;
            writer
                .flush()
                .with_context(|| format!("Failed to flush {}", partial.display()))
        });

    if let Err(e) = result {
        let _ = fs::remove_file(&partial);
        return Err(e);
    }

    fs::rename(&partial, dest).with_context(|| {
        format!(
            "Failed to move {} to {}",
            partial.display(),
            dest.display()
        )
    })?;
    Ok(())
}

/// Packs `dir` into `<dir>.<format>`, deletes `dir` and writes the checksum
/// sidecar. Returns the archive path.
pub fn pack_folder(dir: &Path, format: &str) -> Result<PathBuf> {
    let mut name = dir
        .file_name()
        .with_context(|| format!("Cannot pack {}: no directory name", dir.display()))?
        .to_os_string();
    name.push(".");
    name.push(format);
    let dest = dir.with_file_name(name);

    debug!(dir = %dir.display(), archive = %dest.display(), "Packing folder");
    pack_to_file(dir, &dest)?;
    fs::remove_dir_all(dir)
        .with_context(|| format!("Failed to delete packed folder {}", dir.display()))?;
    checksum::write_sidecar(&dest)?;
    Ok(dest)
}

/// Unpacks a tar+gzip archive into `dest`, creating it if needed. Entries that
/// would land outside `dest` fail the whole extraction.
pub fn unpack(data: &[u8], dest: &Path) -> Result<()> {
    fs::create_dir_all(dest)
        .with_context(|| format!("Failed to create output dir {}", dest.display()))?;

    let mut archive = Archive::new(MultiGzDecoder::new(data));
    for entry in archive
        .entries()
        .context("Failed to read tar entries (invalid archive)")?
    {
        let mut entry = entry.context("Failed to read tar entry")?;
        let relative = entry
            .path()
            .context("Failed to get entry path")?
            .into_owned();

        if !is_contained(&relative) {
            bail!("Archive entry escapes destination: {}", relative.display());
        }
        let target = dest.join(&relative);

        match entry.header().entry_type() {
            EntryType::Directory => {
                fs::create_dir_all(&target)
                    .with_context(|| format!("Failed to create {}", target.display()))?;
            }
            EntryType::Regular | EntryType::Continuous => {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)
                        .with_context(|| format!("Failed to create {}", parent.display()))?;
                }
                let mut out = File::create(&target)
                    .with_context(|| format!("Failed to create {}", target.display()))?;
                std::io::copy(&mut entry, &mut out)
                    .with_context(|| format!("Failed to extract {}", target.display()))?;
            }
            other => {
                trace!(path = %relative.display(), kind = ?other, "Skipping unsupported entry");
            }
        }
    }
    Ok(())
}

pub fn unpack_file(archive: &Path, dest: &Path) -> Result<()> {
    let mut data = Vec::new();
    File::open(archive)
        .and_then(|mut f| f.read_to_end(&mut data))
        .with_context(|| format!("Failed to read archive {}", archive.display()))?;
    unpack(&data, dest)
}

pub fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".partial");
    dest.with_file_name(name)
}

fn is_contained(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

fn write_archive<W: Write>(dir: &Path, writer: W) -> Result<()> {
    let metadata =
        fs::metadata(dir).with_context(|| format!("Cannot stat {}", dir.display()))?;
    if !metadata.is_dir() {
        bail!("Not a directory: {}", dir.display());
    }
    let base = dir.parent().unwrap_or_else(|| Path::new(""));

    let encoder = GzEncoder::new(writer, Compression::default());
    let mut builder = Builder::new(encoder);
    builder.follow_symlinks(false);

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to walk {}", dir.display()))?;
        let path = entry.path();
        let name = path.strip_prefix(base).unwrap_or(path);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            builder
                .append_dir(name, path)
                .with_context(|| format!("Failed to add {}", path.display()))?;
        } else if file_type.is_file() {
            let mut file =
                File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
            let meta = file
                .metadata()
                .with_context(|| format!("Failed to stat {}", path.display()))?;
            let mut header = Header::new_gnu();
            header.set_metadata(&meta);
            header.set_entry_type(EntryType::Regular);
            builder
                .append_data(&mut header, name, &mut file)
                .with_context(|| format!("Failed to add {}", path.display()))?;
        } else {
            trace!(path = %path.display(), "Skipping non-regular file");
        }
    }

    builder
        .into_inner()
        .context("Failed to finish tar stream")?
        .finish()
        .context("Failed to finish gzip stream")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_tree(root: &Path) -> PathBuf {
        let dir = root.join("deps_sources");
        fs::create_dir_all(dir.join("com.foo/bar/1.0")).unwrap();
        fs::write(dir.join("com.foo/bar/1.0/bar-1.0.jar"), b"jar bytes").unwrap();
        fs::create_dir_all(dir.join("empty")).unwrap();
        dir
    }

    #[test]
    fn test_pack_then_unpack_preserves_tree() {
        let src = TempDir::new().unwrap();
        let dir = sample_tree(src.path());

        let bytes = pack(&dir).unwrap();
        let dest = TempDir::new().unwrap();
        unpack(&bytes, dest.path()).unwrap();

        let jar = dest.path().join("deps_sources/com.foo/bar/1.0/bar-1.0.jar");
        assert_eq!(fs::read(jar).unwrap(), b"jar bytes");
        assert!(dest.path().join("deps_sources/empty").is_dir());
    }

    #[test]
    fn test_pack_folder_removes_source_and_writes_sidecar() {
        let src = TempDir::new().unwrap();
        let dir = sample_tree(src.path());

        let archive = pack_folder(&dir, "tar.gz").unwrap();
        assert_eq!(archive, src.path().join("deps_sources.tar.gz"));
        assert!(archive.is_file());
        assert!(!dir.exists());
        assert!(src.path().join("deps_sources.tar.gz.hash").is_file());
        assert!(!partial_path(&archive).exists());
    }

    #[test]
    fn test_pack_missing_dir_leaves_nothing() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("out.tgz");
        assert!(pack_to_file(&tmp.path().join("missing"), &dest).is_err());
        assert!(!dest.exists());
        assert!(!partial_path(&dest).exists());
    }

    #[test]
    fn test_unpack_rejects_escaping_entries() {
        let mut raw = Vec::new();
        {
            let encoder = GzEncoder::new(&mut raw, Compression::default());
            let mut builder = Builder::new(encoder);
            let data = b"evil";
            let mut header = Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_entry_type(EntryType::Regular);
            header.set_mode(0o644);
            // set_path refuses `..`, so write the name bytes directly
            let name = b"../escape.txt";
            header.as_old_mut().name[..name.len()].copy_from_slice(name);
            header.set_cksum();
            builder.append(&header, &data[..]).unwrap();
            builder.into_inner().unwrap().finish().unwrap();
        }

        let dest = TempDir::new().unwrap();
        let inner = dest.path().join("inner");
        let err = unpack(&raw, &inner).unwrap_err();
        assert!(err.to_string().contains("escapes"));
        assert!(!dest.path().join("escape.txt").exists());
    }

    #[test]
    fn test_unpack_garbage_fails() {
        let dest = TempDir::new().unwrap();
        assert!(unpack(b"not an archive", dest.path()).is_err());
    }
}
