//! Keeps store playlists and the portable playlist folder reconciled.
//!
//! Import matches file lines against Track rows by exact path; unmatched paths
//! are dropped with a warning. The playlist name (file stem) is the
//! de-duplication key, so importing a name that already exists is a no-op
//! unless a forced re-import is requested.

use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::Serialize;

use crate::config::Config;
use crate::db_manager::DbManager;
use crate::error::{LibraryError, LibraryResult};
use crate::fs_access::{FileAccess, LocalFiles};
use crate::playlist::playlist_files::{
    playlist_file_path, read_playlist_document, sanitize_playlist_file_stem,
    write_playlist_file_with, PlaylistDocument,
};
use crate::playlist::playlist_store::MembershipReconciliation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportOutcome {
    Created(i64),
    Replaced(i64),
    /// A playlist with this name was already stored; nothing changed.
    AlreadyExists(i64),
}

impl ImportOutcome {
    pub fn playlist_id(self) -> i64 {
        match self {
            Self::Created(id) | Self::Replaced(id) | Self::AlreadyExists(id) => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaylistImport {
    pub name: String,
    pub file: PathBuf,
    pub outcome: ImportOutcome,
    pub imported: usize,
    pub warnings: Vec<String>,
}

pub struct PlaylistSync<F: FileAccess = LocalFiles> {
    playlists_dir: PathBuf,
    extension: String,
    files: F,
}

impl PlaylistSync<LocalFiles> {
    pub fn new(playlists_dir: impl Into<PathBuf>, extension: &str) -> Self {
        Self::with_file_access(playlists_dir, extension, LocalFiles)
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.playlists_dir(), &config.playlists.file_extension)
    }
}

impl<F: FileAccess> PlaylistSync<F> {
    pub fn with_file_access(
        playlists_dir: impl Into<PathBuf>,
        extension: &str,
        files: F,
    ) -> Self {
        Self {
            playlists_dir: playlists_dir.into(),
            extension: extension.trim_start_matches('.').to_string(),
            files,
        }
    }

    pub fn playlists_dir(&self) -> &Path {
        &self.playlists_dir
    }

    pub fn file_path_for(&self, playlist_name: &str) -> PathBuf {
        playlist_file_path(&self.playlists_dir, playlist_name, &self.extension)
    }

    /// Playlist files in the folder, sorted by path. A missing folder has none.
    pub fn playlist_files(&self) -> LibraryResult<Vec<PathBuf>> {
        let entries = match std::fs::read_dir(&self.playlists_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(
                    "Playlist folder {} does not exist yet",
                    self.playlists_dir.display()
                );
                return Ok(Vec::new());
            }
            Err(err) => return Err(LibraryError::io(&self.playlists_dir, err)),
        };

        let mut files = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|err| LibraryError::io(&self.playlists_dir, err))?
                .path();
            let matches_extension = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case(&self.extension));
            if matches_extension && self.files.is_file(&path) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Imports one file unless a playlist with its name already exists. The
    /// name is the one declared in the file, falling back to the file stem.
    pub fn import_file(&self, db: &mut DbManager, file: &Path) -> LibraryResult<PlaylistImport> {
        let document = read_playlist_document(file)?;
        let name = resolve_playlist_name(db, file, &document)?;
        if let Some(existing) = db.playlist_by_name(&name)? {
            debug!("Playlist '{}' already stored; skipping import", name);
            return Ok(PlaylistImport {
                name,
                file: file.to_path_buf(),
                outcome: ImportOutcome::AlreadyExists(existing.id),
                imported: 0,
                warnings: Vec::new(),
            });
        }
        self.store_file(db, file, name, &document.paths, false)
    }

    /// Imports every playlist file whose name is not stored yet.
    pub fn import_all(&self, db: &mut DbManager) -> LibraryResult<Vec<PlaylistImport>> {
        let mut imports = Vec::new();
        for file in self.playlist_files()? {
            imports.push(self.import_file(db, &file)?);
        }
        let created = imports
            .iter()
            .filter(|import| matches!(import.outcome, ImportOutcome::Created(_)))
            .count();
        info!(
            "Playlist import: {} file(s), {} new playlist(s)",
            imports.len(),
            created
        );
        Ok(imports)
    }

    /// Re-reads every file and replaces each playlist's membership with the file
    /// content, creating playlists that do not exist.
    pub fn force_reimport(&self, db: &mut DbManager) -> LibraryResult<Vec<PlaylistImport>> {
        let mut imports = Vec::new();
        for file in self.playlist_files()? {
            let document = read_playlist_document(&file)?;
            let name = resolve_playlist_name(db, &file, &document)?;
            imports.push(self.store_file(db, &file, name, &document.paths, true)?);
        }
        info!("Force re-imported {} playlist file(s)", imports.len());
        Ok(imports)
    }

    /// Writes the playlist's paths in position order, replacing any existing
    /// file. Returns `None` when the playlist does not exist.
    pub fn export_playlist(
        &self,
        db: &DbManager,
        playlist_id: i64,
    ) -> LibraryResult<Option<PathBuf>> {
        let Some(playlist) = db.playlist(playlist_id)? else {
            return Ok(None);
        };
        let paths = db.playlist_paths(playlist_id)?;
        let file = self.file_path_for(&playlist.name);
        write_playlist_file_with(&self.files, &file, Some(&playlist.name), &paths)?;
        debug!(
            "Exported playlist '{}' ({} entries) to {}",
            playlist.name,
            paths.len(),
            file.display()
        );
        Ok(Some(file))
    }

    pub fn export_all(&self, db: &DbManager) -> LibraryResult<Vec<PathBuf>> {
        let mut written = Vec::new();
        for playlist in db.playlists()? {
            if let Some(file) = self.export_playlist(db, playlist.id)? {
                written.push(file);
            }
        }
        info!(
            "Exported {} playlist(s) to {}",
            written.len(),
            self.playlists_dir.display()
        );
        Ok(written)
    }

    /// Explicit pass to run after a full Track rebuild: drops entries whose path
    /// disappeared and refreshes positions and derived totals.
    pub fn reconcile_memberships(
        &self,
        db: &mut DbManager,
    ) -> LibraryResult<MembershipReconciliation> {
        let reconciliation = db.reconcile_playlist_entries()?;
        if reconciliation.removed_entries > 0 {
            warn!(
                "Removed {} playlist entries without a matching track",
                reconciliation.removed_entries
            );
        }
        Ok(reconciliation)
    }

    fn store_file(
        &self,
        db: &mut DbManager,
        file: &Path,
        name: String,
        paths: &[String],
        replace_existing: bool,
    ) -> LibraryResult<PlaylistImport> {
        let stored = db.store_imported_playlist(&name, paths, replace_existing)?;

        let warnings: Vec<String> = stored
            .unmatched
            .iter()
            .map(|path| format!("{}: no track for {}", file.display(), path))
            .collect();
        for warning in &warnings {
            warn!("Playlist import skipped a path. {}", warning);
        }

        let outcome = if stored.created {
            ImportOutcome::Created(stored.playlist_id)
        } else {
            ImportOutcome::Replaced(stored.playlist_id)
        };
        info!(
            "Imported playlist '{}' from {}: {} entries, {} unmatched",
            name,
            file.display(),
            stored.accepted,
            stored.unmatched.len()
        );
        Ok(PlaylistImport {
            name,
            file: file.to_path_buf(),
            outcome,
            imported: stored.accepted,
            warnings,
        })
    }
}

fn resolve_playlist_name(
    db: &DbManager,
    file: &Path,
    document: &PlaylistDocument,
) -> LibraryResult<String> {
    if let Some(name) = &document.name {
        return Ok(name.clone());
    }
    let stem = playlist_name_from_file(file);
    if db.playlist_by_name(&stem)?.is_some() {
        return Ok(stem);
    }
    // Without a declared name the stem may be the sanitized form of a stored name.
    Ok(db
        .playlists()?
        .into_iter()
        .map(|playlist| playlist.name)
        .find(|name| sanitize_playlist_file_stem(name) == stem)
        .unwrap_or(stem))
}

fn playlist_name_from_file(file: &Path) -> String {
    file.file_stem()
        .and_then(|stem| stem.to_str())
        .map(|stem| stem.trim().to_string())
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| "playlist".to_string())
}
