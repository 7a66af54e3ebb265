//! Detects stored track paths that no longer exist on disk and repairs them.
//!
//! Repair is best effort: an ordered list of [`PathRewriteRule`]s is tried per
//! missing path and the first rewrite naming an existing file wins. Anything
//! without a working rewrite is unrecoverable and gets removed together with its
//! favorites, history and playlist membership.

use std::collections::HashMap;
use std::path::Path;

use log::{debug, info, warn};
use rusqlite::{params, OptionalExtension};
use serde::Serialize;

use crate::config::PathRewriteRule;
use crate::db_manager::{
    delete_track_dependents, refresh_playlists_referencing, repoint_track_path, DbManager,
};
use crate::error::LibraryResult;
use crate::fs_access::{FileAccess, LocalFiles};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackPathRow {
    pub id: i64,
    pub path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PathValidation {
    pub valid: Vec<TrackPathRow>,
    pub invalid: Vec<TrackPathRow>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathCorrection {
    pub id: i64,
    pub old_path: String,
    pub new_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AlternativePaths {
    pub corrections: Vec<PathCorrection>,
    pub unrecoverable: Vec<TrackPathRow>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CorrectionReport {
    /// Rows moved to their corrected path.
    pub renamed: usize,
    /// Rows deleted as duplicates of the row owning the corrected path.
    pub merged: usize,
}

/// Per-relation row counts removed by [`PathRepair::remove_orphaned_records`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OrphanRemoval {
    pub history: usize,
    pub favorites: usize,
    pub playlist_entries: usize,
    pub tracks: usize,
}

/// Outcome of a full maintenance pass. Step failures are collected in `errors`
/// instead of aborting the pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupSummary {
    pub checked: usize,
    pub valid: usize,
    pub corrected: usize,
    pub merged: usize,
    pub removed: usize,
    pub still_missing: usize,
    pub artists: usize,
    pub albums: usize,
    pub errors: Vec<String>,
}

impl CleanupSummary {
    /// True when the pass changed no track rows.
    pub fn is_noop(&self) -> bool {
        self.corrected == 0 && self.merged == 0 && self.removed == 0
    }
}

pub struct PathRepair<F: FileAccess = LocalFiles> {
    rules: Vec<PathRewriteRule>,
    files: F,
}

impl PathRepair<LocalFiles> {
    pub fn new(rules: Vec<PathRewriteRule>) -> Self {
        Self::with_file_access(rules, LocalFiles)
    }
}

impl<F: FileAccess> PathRepair<F> {
    pub fn with_file_access(rules: Vec<PathRewriteRule>, files: F) -> Self {
        Self { rules, files }
    }

    pub fn rules(&self) -> &[PathRewriteRule] {
        &self.rules
    }

    /// Partitions every track row by whether its path exists on disk.
    pub fn validate_all_paths(&self, db: &DbManager) -> LibraryResult<PathValidation> {
        let rows: Vec<TrackPathRow> = {
            let mut stmt = db.conn.prepare("SELECT id, path FROM tracks ORDER BY id")?;
            let rows = stmt.query_map([], |row| {
                Ok(TrackPathRow {
                    id: row.get(0)?,
                    path: row.get(1)?,
                })
            })?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        let (valid, invalid): (Vec<_>, Vec<_>) = rows
            .into_iter()
            .partition(|row| self.files.is_file(Path::new(&row.path)));
        debug!(
            "Path validation: {} valid, {} missing",
            valid.len(),
            invalid.len()
        );
        Ok(PathValidation { valid, invalid })
    }

    /// Tries each rewrite rule in order for every missing row.
    pub fn find_alternative_paths(&self, invalid: &[TrackPathRow]) -> AlternativePaths {
        let mut alternatives = AlternativePaths::default();
        for row in invalid {
            let candidate = self
                .rules
                .iter()
                .filter_map(|rule| rule.apply(&row.path))
                .find(|candidate| self.files.is_file(Path::new(candidate)));

            match candidate {
                Some(new_path) => {
                    debug!("Repair candidate for {}: {}", row.path, new_path);
                    alternatives.corrections.push(PathCorrection {
                        id: row.id,
                        old_path: row.path.clone(),
                        new_path,
                    });
                }
                None => {
                    debug!("No repair candidate for {}", row.path);
                    alternatives.unrecoverable.push(row.clone());
                }
            }
        }
        alternatives
    }

    /// Applies corrections grouped by target path in one transaction. When the
    /// target already belongs to another row the whole group is merged into it;
    /// otherwise the first row is renamed and the rest of the group is merged.
    pub fn update_corrected_paths(
        &self,
        db: &mut DbManager,
        corrections: &[PathCorrection],
    ) -> LibraryResult<CorrectionReport> {
        let mut groups: Vec<(&str, Vec<&PathCorrection>)> = Vec::new();
        let mut group_index: HashMap<&str, usize> = HashMap::new();
        for correction in corrections {
            let target = correction.new_path.as_str();
            let index = *group_index.entry(target).or_insert_with(|| {
                groups.push((target, Vec::new()));
                groups.len() - 1
            });
            groups[index].1.push(correction);
        }

        let mut report = CorrectionReport::default();
        let tx = db.conn.transaction()?;
        for (target, group) in groups {
            let existing_id: Option<i64> = tx
                .query_row(
                    "SELECT id FROM tracks WHERE path = ?1",
                    params![target],
                    |row| row.get(0),
                )
                .optional()?;

            let owner_outside_group =
                existing_id.filter(|id| group.iter().all(|correction| correction.id != *id));
            let duplicates: &[&PathCorrection] = match owner_outside_group {
                Some(owner_id) => {
                    info!(
                        "Merging {} stale row(s) into existing track {} at {}",
                        group.len(),
                        owner_id,
                        target
                    );
                    &group
                }
                None => {
                    let (keeper, rest) = match group.split_first() {
                        Some(split) => split,
                        None => continue,
                    };
                    repoint_track_path(&tx, &keeper.old_path, target)?;
                    tx.execute(
                        "UPDATE tracks SET path = ?1, filename = ?2 WHERE id = ?3",
                        params![target, file_name_of(target), keeper.id],
                    )?;
                    info!("Repaired track path {} -> {}", keeper.old_path, target);
                    report.renamed += 1;
                    rest
                }
            };

            for duplicate in duplicates {
                repoint_track_path(&tx, &duplicate.old_path, target)?;
                tx.execute("DELETE FROM tracks WHERE id = ?1", params![duplicate.id])?;
                report.merged += 1;
            }
            refresh_playlists_referencing(&tx, target)?;
        }
        tx.commit()?;
        Ok(report)
    }

    /// Deletes the given track rows and everything referencing them.
    pub fn remove_orphaned_records(
        &self,
        db: &mut DbManager,
        ids: &[i64],
    ) -> LibraryResult<OrphanRemoval> {
        let mut removal = OrphanRemoval::default();
        if ids.is_empty() {
            return Ok(removal);
        }

        let tx = db.conn.transaction()?;
        for id in ids {
            let path: Option<String> = tx
                .query_row(
                    "SELECT path FROM tracks WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(path) = path else {
                continue;
            };
            let dependents = delete_track_dependents(&tx, &path)?;
            removal.history += dependents.history;
            removal.favorites += dependents.favorites;
            removal.playlist_entries += dependents.playlist_entries;
            removal.tracks += tx.execute("DELETE FROM tracks WHERE id = ?1", params![id])?;
            debug!("Removed orphaned track {}", path);
        }
        tx.commit()?;
        Ok(removal)
    }

    /// Validate, correct, remove the unrecoverable and rebuild aggregates.
    /// A second run without filesystem changes changes nothing.
    pub fn cleanup_database(&self, db: &mut DbManager) -> LibraryResult<CleanupSummary> {
        let validation = self.validate_all_paths(db)?;
        let mut summary = CleanupSummary {
            checked: validation.valid.len() + validation.invalid.len(),
            valid: validation.valid.len(),
            ..CleanupSummary::default()
        };

        if !validation.invalid.is_empty() {
            let alternatives = self.find_alternative_paths(&validation.invalid);

            if !alternatives.corrections.is_empty() {
                match self.update_corrected_paths(db, &alternatives.corrections) {
                    Ok(report) => {
                        summary.corrected = report.renamed;
                        summary.merged = report.merged;
                    }
                    Err(err) => {
                        warn!("Path correction rolled back: {}", err);
                        summary.still_missing += alternatives.corrections.len();
                        summary.errors.push(format!("path correction: {err}"));
                    }
                }
            }

            let orphan_ids: Vec<i64> = alternatives
                .unrecoverable
                .iter()
                .map(|row| row.id)
                .collect();
            match self.remove_orphaned_records(db, &orphan_ids) {
                Ok(removal) => summary.removed = removal.tracks,
                Err(err) => {
                    warn!("Orphan removal rolled back: {}", err);
                    summary.still_missing += orphan_ids.len();
                    summary.errors.push(format!("orphan removal: {err}"));
                }
            }
        }

        match db.rebuild_aggregates() {
            Ok((artists, albums)) => {
                summary.artists = artists;
                summary.albums = albums;
            }
            Err(err) => {
                warn!("Aggregate rebuild failed: {}", err);
                summary.errors.push(format!("aggregate rebuild: {err}"));
            }
        }

        info!(
            "Cleanup finished: checked={} corrected={} merged={} removed={} still_missing={}",
            summary.checked,
            summary.corrected,
            summary.merged,
            summary.removed,
            summary.still_missing
        );
        Ok(summary)
    }
}

fn file_name_of(path: &str) -> String {
    Path::new(path)
        .file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| path.to_string())
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::io;
    use std::path::{Path, PathBuf};

    use super::{PathCorrection, PathRepair, TrackPathRow};
    use crate::config::PathRewriteRule;
    use crate::db_manager::DbManager;
    use crate::fs_access::FileAccess;
    use crate::library::track_store::test_support::record;
    use crate::protocol::{PlaylistCreate, TrackRecord};

    struct FakeFiles {
        existing: HashSet<PathBuf>,
    }

    impl FakeFiles {
        fn with(paths: &[&str]) -> Self {
            Self {
                existing: paths.iter().map(PathBuf::from).collect(),
            }
        }
    }

    impl FileAccess for FakeFiles {
        fn is_file(&self, path: &Path) -> bool {
            self.existing.contains(path)
        }

        fn write_file(&self, _path: &Path, bytes: &[u8]) -> io::Result<u64> {
            Ok(bytes.len() as u64)
        }

        fn remove_file(&self, _path: &Path) -> io::Result<()> {
            Ok(())
        }
    }

    fn stale_rules() -> Vec<PathRewriteRule> {
        vec![
            PathRewriteRule::new("/Nope/", "/"),
            PathRewriteRule::new("/Old/", "/"),
        ]
    }

    #[test]
    fn test_validate_partitions_rows_by_existence() {
        let mut db = DbManager::new_in_memory().expect("failed to create in-memory db");
        db.bulk_upsert(&[
            record("/m/here.mp3", "A", "X", "Here"),
            record("/m/gone.mp3", "A", "X", "Gone"),
        ])
        .expect("ingest should succeed");
        let repair = PathRepair::with_file_access(stale_rules(), FakeFiles::with(&["/m/here.mp3"]));

        let validation = repair.validate_all_paths(&db).expect("validation");
        assert_eq!(validation.valid.len(), 1);
        assert_eq!(validation.invalid.len(), 1);
        assert_eq!(validation.invalid[0].path, "/m/gone.mp3");
    }

    #[test]
    fn test_find_alternative_paths_uses_first_existing_rewrite() {
        let repair = PathRepair::with_file_access(
            stale_rules(),
            FakeFiles::with(&["/m/Artist/song.mp3"]),
        );
        let invalid = vec![
            TrackPathRow {
                id: 1,
                path: "/m/Old/Artist/song.mp3".to_string(),
            },
            TrackPathRow {
                id: 2,
                path: "/m/Old/Artist/lost.mp3".to_string(),
            },
        ];

        let alternatives = repair.find_alternative_paths(&invalid);
        assert_eq!(
            alternatives.corrections,
            vec![PathCorrection {
                id: 1,
                old_path: "/m/Old/Artist/song.mp3".to_string(),
                new_path: "/m/Artist/song.mp3".to_string(),
            }]
        );
        assert_eq!(alternatives.unrecoverable.len(), 1);
        assert_eq!(alternatives.unrecoverable[0].id, 2);
    }

    #[test]
    fn test_stale_row_merges_into_existing_owner_of_corrected_path() {
        let mut db = DbManager::new_in_memory().expect("failed to create in-memory db");
        db.bulk_upsert(&[
            record("/m/Old/a.mp3", "A", "X", "Song"),
            record("/m/a.mp3", "A", "X", "Song"),
        ])
        .expect("ingest should succeed");
        db.add_to_favorites("/m/Old/a.mp3").expect("favorite");
        let repair = PathRepair::with_file_access(stale_rules(), FakeFiles::with(&["/m/a.mp3"]));

        let summary = repair.cleanup_database(&mut db).expect("cleanup");
        assert_eq!(summary.merged, 1);
        assert_eq!(summary.corrected, 0);
        assert_eq!(summary.removed, 0);

        let tracks = db.all_tracks().expect("read");
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].path, "/m/a.mp3");
        assert!(db.is_favorite("/m/a.mp3").expect("lookup"));
    }

    #[test]
    fn test_rename_keeps_playlist_membership_and_merges_group_duplicates() {
        let mut db = DbManager::new_in_memory().expect("failed to create in-memory db");
        db.bulk_upsert(&[
            record("/m/Old/b.mp3", "A", "X", "B"),
            record("/m/Nope/b.mp3", "A", "X", "B"),
            record("/m/c.mp3", "A", "X", "C"),
        ])
        .expect("ingest should succeed");
        let PlaylistCreate::Created(playlist) = db.create_playlist("Mix", None).expect("create")
        else {
            panic!("playlist should be created");
        };
        for path in ["/m/Old/b.mp3", "/m/c.mp3", "/m/Nope/b.mp3"] {
            db.add_track_to_playlist(playlist.id, path).expect("add");
        }

        let repair = PathRepair::with_file_access(
            stale_rules(),
            FakeFiles::with(&["/m/b.mp3", "/m/c.mp3"]),
        );
        let summary = repair.cleanup_database(&mut db).expect("cleanup");
        assert_eq!(summary.corrected, 1);
        assert_eq!(summary.merged, 1);
        assert_eq!(db.track_count().expect("count"), 2);

        let entries = db.playlist_entries(playlist.id).expect("entries");
        let paths: Vec<_> = entries.iter().map(|entry| entry.track_path.as_str()).collect();
        let positions: Vec<_> = entries.iter().map(|entry| entry.position).collect();
        assert_eq!(paths, vec!["/m/b.mp3", "/m/c.mp3"]);
        assert_eq!(positions, vec![1, 2]);

        let renamed = db
            .track_by_path("/m/b.mp3")
            .expect("read")
            .expect("renamed track should exist");
        assert_eq!(renamed.filename, "b.mp3");
    }

    #[test]
    fn test_merge_carries_play_stats_and_refreshes_playlist_totals() {
        let mut db = DbManager::new_in_memory().expect("failed to create in-memory db");
        db.bulk_upsert(&[
            record("/m/Old/a.mp3", "A", "X", "Song"),
            TrackRecord {
                duration: Some(240.0),
                ..record("/m/a.mp3", "A", "X", "Song")
            },
        ])
        .expect("ingest should succeed");
        db.add_play("/m/Old/a.mp3").expect("play");
        db.add_play("/m/Old/a.mp3").expect("play");
        db.add_play("/m/a.mp3").expect("play");
        let PlaylistCreate::Created(playlist) = db.create_playlist("Mix", None).expect("create")
        else {
            panic!("playlist should be created");
        };
        db.add_track_to_playlist(playlist.id, "/m/Old/a.mp3")
            .expect("add");

        let repair = PathRepair::with_file_access(stale_rules(), FakeFiles::with(&["/m/a.mp3"]));
        let summary = repair.cleanup_database(&mut db).expect("cleanup");
        assert_eq!(summary.merged, 1);

        let survivor = db
            .track_by_path("/m/a.mp3")
            .expect("read")
            .expect("merge target should exist");
        assert_eq!(survivor.play_count, 3);
        assert!(survivor.last_played.is_some());
        assert_eq!(db.history_entry_count("/m/a.mp3").expect("history"), 3);

        let info = db
            .playlist(playlist.id)
            .expect("read")
            .expect("playlist exists");
        assert_eq!(info.track_count, 1);
        assert_eq!(info.total_duration, 240.0);
    }

    #[test]
    fn test_failed_correction_rolls_back_every_group() {
        let mut db = DbManager::new_in_memory().expect("failed to create in-memory db");
        db.bulk_upsert(&[
            record("/m/Old/a.mp3", "A", "X", "A"),
            record("/m/Old/b.mp3", "B", "Y", "B"),
        ])
        .expect("ingest should succeed");
        db.add_to_favorites("/m/Old/a.mp3").expect("favorite");
        db.conn
            .execute_batch(
                "CREATE TEMP TRIGGER fail_b_rename BEFORE UPDATE OF path ON tracks
                 WHEN NEW.path = '/m/b.mp3'
                 BEGIN SELECT RAISE(ABORT, 'rename refused'); END;",
            )
            .expect("trigger should install");
        let repair = PathRepair::with_file_access(
            stale_rules(),
            FakeFiles::with(&["/m/a.mp3", "/m/b.mp3"]),
        );

        let summary = repair.cleanup_database(&mut db).expect("cleanup");
        assert_eq!(summary.corrected, 0);
        assert_eq!(summary.merged, 0);
        assert_eq!(summary.still_missing, 2);
        assert_eq!(summary.errors.len(), 1);
        assert!(summary.errors[0].contains("path correction"));

        let mut paths: Vec<String> = db
            .all_tracks()
            .expect("read")
            .into_iter()
            .map(|track| track.path)
            .collect();
        paths.sort();
        assert_eq!(paths, vec!["/m/Old/a.mp3", "/m/Old/b.mp3"]);
        assert!(db.is_favorite("/m/Old/a.mp3").expect("lookup"));
        assert!(!db.is_favorite("/m/a.mp3").expect("lookup"));
    }

    #[test]
    fn test_failed_orphan_removal_keeps_every_row() {
        let mut db = DbManager::new_in_memory().expect("failed to create in-memory db");
        db.bulk_upsert(&[
            record("/m/x.mp3", "A", "X", "X"),
            record("/m/y.mp3", "A", "X", "Y"),
        ])
        .expect("ingest should succeed");
        db.add_play("/m/x.mp3").expect("play");
        db.conn
            .execute_batch(
                "CREATE TEMP TRIGGER fail_y_delete BEFORE DELETE ON tracks
                 WHEN OLD.path = '/m/y.mp3'
                 BEGIN SELECT RAISE(ABORT, 'delete refused'); END;",
            )
            .expect("trigger should install");
        let ids: Vec<i64> = db
            .all_tracks()
            .expect("read")
            .iter()
            .map(|track| track.id)
            .collect();
        let repair = PathRepair::with_file_access(Vec::new(), FakeFiles::with(&[]));

        assert!(repair.remove_orphaned_records(&mut db, &ids).is_err());
        assert_eq!(db.track_count().expect("count"), 2);
        assert_eq!(db.history_entry_count("/m/x.mp3").expect("history"), 1);

        let summary = repair.cleanup_database(&mut db).expect("cleanup");
        assert_eq!(summary.removed, 0);
        assert_eq!(summary.still_missing, 2);
        assert_eq!(summary.errors.len(), 1);
        assert!(summary.errors[0].contains("orphan removal"));
    }

    #[test]
    fn test_remove_orphaned_records_cascades_and_counts() {
        let mut db = DbManager::new_in_memory().expect("failed to create in-memory db");
        db.bulk_upsert(&[
            record("/m/x.mp3", "A", "X", "X"),
            record("/m/y.mp3", "A", "X", "Y"),
        ])
        .expect("ingest should succeed");
        db.add_play("/m/x.mp3").expect("play");
        db.add_play("/m/x.mp3").expect("play");
        db.add_to_favorites("/m/x.mp3").expect("favorite");
        let PlaylistCreate::Created(playlist) = db.create_playlist("P", None).expect("create")
        else {
            panic!("playlist should be created");
        };
        db.add_track_to_playlist(playlist.id, "/m/x.mp3").expect("add");
        db.add_track_to_playlist(playlist.id, "/m/y.mp3").expect("add");

        let x_id = db
            .track_by_path("/m/x.mp3")
            .expect("read")
            .expect("exists")
            .id;
        let repair = PathRepair::with_file_access(Vec::new(), FakeFiles::with(&[]));
        let removal = repair
            .remove_orphaned_records(&mut db, &[x_id, 9_999])
            .expect("removal");

        assert_eq!(removal.history, 2);
        assert_eq!(removal.favorites, 1);
        assert_eq!(removal.playlist_entries, 1);
        assert_eq!(removal.tracks, 1);

        let entries = db.playlist_entries(playlist.id).expect("entries");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].position, 1);
        let info = db
            .playlist(playlist.id)
            .expect("read")
            .expect("playlist exists");
        assert_eq!(info.track_count, 1);
    }

    #[test]
    fn test_cleanup_twice_is_noop_the_second_time() {
        let mut db = DbManager::new_in_memory().expect("failed to create in-memory db");
        db.bulk_upsert(&[
            record("/m/Old/a.mp3", "A", "X", "A"),
            record("/m/gone.mp3", "B", "Y", "Gone"),
            record("/m/kept.mp3", "C", "Z", "Kept"),
        ])
        .expect("ingest should succeed");
        let repair = PathRepair::with_file_access(
            stale_rules(),
            FakeFiles::with(&["/m/a.mp3", "/m/kept.mp3"]),
        );

        let first = repair.cleanup_database(&mut db).expect("first cleanup");
        assert_eq!(first.corrected, 1);
        assert_eq!(first.removed, 1);
        assert!(first.errors.is_empty());

        let second = repair.cleanup_database(&mut db).expect("second cleanup");
        assert!(second.is_noop());
        assert_eq!(second.still_missing, 0);
        assert_eq!(second.checked, 2);
        assert_eq!(second.valid, 2);
        assert_eq!(second.artists, 2);
    }
}
