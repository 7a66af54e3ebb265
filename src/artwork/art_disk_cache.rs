//! On-disk cache of extracted embedded artwork.
//!
//! Files are named `md5(track path).<ext>` and are rewritten on every
//! extraction, so a stale file never survives a re-extract.

use std::fs;
use std::path::{Path, PathBuf};

use image::ImageFormat;
use log::{debug, warn};

use crate::artwork::embedded_art::extension_for;
use crate::error::{LibraryError, LibraryResult};
use crate::fs_access::FileAccess;

/// Every extension a cached picture can carry.
pub(crate) fn cached_extensions() -> Vec<&'static str> {
    let mut extensions: Vec<&'static str> = ImageFormat::all().map(extension_for).collect();
    extensions.sort_unstable();
    extensions.dedup();
    extensions
}

pub(crate) fn hash_string(value: &str) -> String {
    format!("{:x}", md5::compute(value.as_bytes()))
}

pub fn cached_art_stem(track_path: &Path) -> String {
    hash_string(&track_path.to_string_lossy())
}

pub fn cached_art_path(cache_dir: &Path, track_path: &Path, format: ImageFormat) -> PathBuf {
    cache_dir.join(format!(
        "{}.{}",
        cached_art_stem(track_path),
        extension_for(format)
    ))
}

/// Writes `bytes` as the cached picture for `track_path` and removes cached
/// pictures for the same track under other extensions. Returns `None` when the
/// file on disk does not hold exactly `bytes.len()` bytes; the partial file is
/// removed in that case.
pub fn write_cached_art(
    files: &dyn FileAccess,
    cache_dir: &Path,
    track_path: &Path,
    bytes: &[u8],
    format: ImageFormat,
) -> LibraryResult<Option<PathBuf>> {
    let target = cached_art_path(cache_dir, track_path, format);
    let written = files
        .write_file(&target, bytes)
        .map_err(|err| LibraryError::io(&target, err))?;
    if written != bytes.len() as u64 {
        warn!(
            "Cached artwork {} has {} bytes, expected {}; discarding",
            target.display(),
            written,
            bytes.len()
        );
        if let Err(err) = files.remove_file(&target) {
            debug!("Could not remove short artwork file {}: {}", target.display(), err);
        }
        return Ok(None);
    }

    let stem = cached_art_stem(track_path);
    let keep = extension_for(format);
    for extension in cached_extensions().into_iter().filter(|ext| *ext != keep) {
        let sibling = cache_dir.join(format!("{stem}.{extension}"));
        if files.is_file(&sibling) {
            files
                .remove_file(&sibling)
                .map_err(|err| LibraryError::io(&sibling, err))?;
            debug!("Removed superseded cached artwork {}", sibling.display());
        }
    }
    Ok(Some(target))
}

fn list_files_recursive(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if file_type.is_dir() {
                stack.push(path);
            } else if file_type.is_file() {
                files.push(path);
            }
        }
    }
    files
}

/// Deletes every file under the artwork cache directory; returns how many.
pub fn clear_disk_cache(cache_dir: &Path) -> usize {
    let mut deleted = 0usize;
    for path in list_files_recursive(cache_dir) {
        if fs::remove_file(path).is_ok() {
            deleted = deleted.saturating_add(1);
        }
    }
    deleted
}
