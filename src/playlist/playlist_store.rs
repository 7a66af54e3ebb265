//! Playlist rows and their ordered, path-keyed membership.
//!
//! Every mutation leaves positions as a dense `1..=N` sequence. Track count and
//! duration on the playlist row are maintained by the entry triggers.

use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::db_manager::{
    refresh_playlist_totals, renumber_playlist_positions, row_to_track, track_path_exists,
    unix_now_ms, write_playlist_positions, DbManager,
};
use crate::error::LibraryResult;
use crate::protocol::{PlaylistCreate, PlaylistEdit, PlaylistEntry, PlaylistInfo, PlaylistTrack};

const PLAYLIST_COLUMNS: &str =
    "id, name, description, track_count, total_duration, created_at, updated_at";

/// Result of writing an imported path list into the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoredImport {
    pub playlist_id: i64,
    pub created: bool,
    pub accepted: usize,
    /// Paths with no Track row, in file order.
    pub unmatched: Vec<String>,
    /// Repeated paths skipped because an entry for them already existed.
    pub duplicates: usize,
}

/// Counts from dropping entries whose path no longer names a Track.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MembershipReconciliation {
    pub removed_entries: usize,
    pub playlists_refreshed: usize,
}

fn row_to_playlist(row: &Row) -> rusqlite::Result<PlaylistInfo> {
    Ok(PlaylistInfo {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        track_count: row.get(3)?,
        total_duration: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn normalized_playlist_name(name: &str) -> Option<String> {
    let trimmed = name.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn playlist_exists(conn: &Connection, playlist_id: i64) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM playlists WHERE id = ?1)",
        params![playlist_id],
        |row| row.get(0),
    )
}

fn playlist_id_by_name(conn: &Connection, name: &str) -> rusqlite::Result<Option<i64>> {
    conn.query_row(
        "SELECT id FROM playlists WHERE name = ?1",
        params![name],
        |row| row.get(0),
    )
    .optional()
}

fn ordered_entry_ids(conn: &Connection, playlist_id: i64) -> rusqlite::Result<Vec<(i64, String)>> {
    let mut stmt = conn.prepare(
        "SELECT id, track_path FROM playlist_tracks
         WHERE playlist_id = ?1 ORDER BY position ASC, id ASC",
    )?;
    let rows = stmt.query_map(params![playlist_id], |row| Ok((row.get(0)?, row.get(1)?)))?;
    rows.collect()
}

fn next_position(conn: &Connection, playlist_id: i64) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COALESCE(MAX(position), 0) + 1 FROM playlist_tracks WHERE playlist_id = ?1",
        params![playlist_id],
        |row| row.get(0),
    )
}

impl DbManager {
    pub fn create_playlist(
        &mut self,
        name: &str,
        description: Option<&str>,
    ) -> LibraryResult<PlaylistCreate> {
        let Some(name) = normalized_playlist_name(name) else {
            return Ok(PlaylistCreate::InvalidName);
        };
        let tx = self.conn.transaction()?;
        if playlist_id_by_name(&tx, &name)?.is_some() {
            return Ok(PlaylistCreate::NameTaken);
        }
        let now = unix_now_ms();
        tx.execute(
            "INSERT INTO playlists (name, description, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)",
            params![name, description, now],
        )?;
        let id = tx.last_insert_rowid();
        let info = tx.query_row(
            &format!("SELECT {PLAYLIST_COLUMNS} FROM playlists WHERE id = ?1"),
            params![id],
            row_to_playlist,
        )?;
        tx.commit()?;
        info!("Created playlist '{}' ({})", info.name, info.id);
        Ok(PlaylistCreate::Created(info))
    }

    pub fn rename_playlist(
        &mut self,
        playlist_id: i64,
        new_name: &str,
    ) -> LibraryResult<PlaylistEdit> {
        let Some(new_name) = normalized_playlist_name(new_name) else {
            return Ok(PlaylistEdit::InvalidName);
        };
        let tx = self.conn.transaction()?;
        if !playlist_exists(&tx, playlist_id)? {
            return Ok(PlaylistEdit::PlaylistNotFound);
        }
        if playlist_id_by_name(&tx, &new_name)?.is_some_and(|existing| existing != playlist_id) {
            return Ok(PlaylistEdit::NameTaken);
        }
        tx.execute(
            "UPDATE playlists SET name = ?1, updated_at = ?2 WHERE id = ?3",
            params![new_name, unix_now_ms(), playlist_id],
        )?;
        tx.commit()?;
        Ok(PlaylistEdit::Applied)
    }

    pub fn set_playlist_description(
        &mut self,
        playlist_id: i64,
        description: Option<&str>,
    ) -> LibraryResult<PlaylistEdit> {
        let updated = self.conn.execute(
            "UPDATE playlists SET description = ?1, updated_at = ?2 WHERE id = ?3",
            params![description, unix_now_ms(), playlist_id],
        )?;
        Ok(if updated == 0 {
            PlaylistEdit::PlaylistNotFound
        } else {
            PlaylistEdit::Applied
        })
    }

    pub fn playlist(&self, playlist_id: i64) -> LibraryResult<Option<PlaylistInfo>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {PLAYLIST_COLUMNS} FROM playlists WHERE id = ?1"),
                params![playlist_id],
                row_to_playlist,
            )
            .optional()?)
    }

    pub fn playlist_by_name(&self, name: &str) -> LibraryResult<Option<PlaylistInfo>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {PLAYLIST_COLUMNS} FROM playlists WHERE name = ?1"),
                params![name.trim()],
                row_to_playlist,
            )
            .optional()?)
    }

    pub fn playlists(&self) -> LibraryResult<Vec<PlaylistInfo>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PLAYLIST_COLUMNS} FROM playlists ORDER BY name COLLATE NOCASE, id"
        ))?;
        let rows = stmt.query_map([], row_to_playlist)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    /// Membership rows in position order.
    pub fn playlist_entries(&self, playlist_id: i64) -> LibraryResult<Vec<PlaylistEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, playlist_id, track_path, position FROM playlist_tracks
             WHERE playlist_id = ?1 ORDER BY position ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![playlist_id], |row| {
            Ok(PlaylistEntry {
                id: row.get(0)?,
                playlist_id: row.get(1)?,
                track_path: row.get(2)?,
                position: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    pub fn playlist_paths(&self, playlist_id: i64) -> LibraryResult<Vec<String>> {
        Ok(self
            .playlist_entries(playlist_id)?
            .into_iter()
            .map(|entry| entry.track_path)
            .collect())
    }

    /// Entries joined with their Track rows. Entries whose path has no Track are skipped.
    pub fn playlist_tracks(&self, playlist_id: i64) -> LibraryResult<Vec<PlaylistTrack>> {
        let mut stmt = self.conn.prepare(
            "SELECT * FROM playlist_tracks_view WHERE playlist_id = ?1 ORDER BY position ASC",
        )?;
        let rows = stmt.query_map(params![playlist_id], |row| {
            Ok(PlaylistTrack {
                position: row.get("position")?,
                track: row_to_track(row)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    /// Appends `track_path` at the next position.
    pub fn add_track_to_playlist(
        &mut self,
        playlist_id: i64,
        track_path: &str,
    ) -> LibraryResult<PlaylistEdit> {
        let tx = self.conn.transaction()?;
        if !playlist_exists(&tx, playlist_id)? {
            return Ok(PlaylistEdit::PlaylistNotFound);
        }
        if !track_path_exists(&tx, track_path)? {
            return Ok(PlaylistEdit::TrackNotFound);
        }
        let position = next_position(&tx, playlist_id)?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO playlist_tracks (playlist_id, track_path, position, added_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![playlist_id, track_path, position, unix_now_ms()],
        )?;
        if inserted == 0 {
            return Ok(PlaylistEdit::AlreadyInPlaylist);
        }
        tx.commit()?;
        Ok(PlaylistEdit::Applied)
    }

    pub fn remove_track_from_playlist(
        &mut self,
        playlist_id: i64,
        track_path: &str,
    ) -> LibraryResult<PlaylistEdit> {
        let tx = self.conn.transaction()?;
        if !playlist_exists(&tx, playlist_id)? {
            return Ok(PlaylistEdit::PlaylistNotFound);
        }
        let removed = tx.execute(
            "DELETE FROM playlist_tracks WHERE playlist_id = ?1 AND track_path = ?2",
            params![playlist_id, track_path],
        )?;
        if removed == 0 {
            return Ok(PlaylistEdit::NotInPlaylist);
        }
        renumber_playlist_positions(&tx, playlist_id)?;
        tx.commit()?;
        Ok(PlaylistEdit::Applied)
    }

    /// Moves `track_path` to the 1-based `new_position` (clamped to the playlist
    /// length) and rewrites every position.
    pub fn reorder_playlist_track(
        &mut self,
        playlist_id: i64,
        track_path: &str,
        new_position: usize,
    ) -> LibraryResult<PlaylistEdit> {
        let tx = self.conn.transaction()?;
        if !playlist_exists(&tx, playlist_id)? {
            return Ok(PlaylistEdit::PlaylistNotFound);
        }
        let mut entries = ordered_entry_ids(&tx, playlist_id)?;
        let Some(current_index) = entries.iter().position(|(_, path)| path == track_path) else {
            return Ok(PlaylistEdit::NotInPlaylist);
        };
        let moved = entries.remove(current_index);
        let target_index = new_position.clamp(1, entries.len() + 1) - 1;
        entries.insert(target_index, moved);

        let entry_ids: Vec<i64> = entries.iter().map(|(id, _)| *id).collect();
        write_playlist_positions(&tx, &entry_ids)?;
        tx.execute(
            "UPDATE playlists SET updated_at = ?1 WHERE id = ?2",
            params![unix_now_ms(), playlist_id],
        )?;
        tx.commit()?;
        debug!(
            "Moved {} in playlist {} from {} to {}",
            track_path,
            playlist_id,
            current_index + 1,
            target_index + 1
        );
        Ok(PlaylistEdit::Applied)
    }

    /// Removes every entry but keeps the playlist.
    pub fn clear_playlist(&mut self, playlist_id: i64) -> LibraryResult<PlaylistEdit> {
        let tx = self.conn.transaction()?;
        if !playlist_exists(&tx, playlist_id)? {
            return Ok(PlaylistEdit::PlaylistNotFound);
        }
        tx.execute(
            "DELETE FROM playlist_tracks WHERE playlist_id = ?1",
            params![playlist_id],
        )?;
        refresh_playlist_totals(&tx, playlist_id)?;
        tx.commit()?;
        Ok(PlaylistEdit::Applied)
    }

    pub fn delete_playlist(&mut self, playlist_id: i64) -> LibraryResult<PlaylistEdit> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM playlist_tracks WHERE playlist_id = ?1",
            params![playlist_id],
        )?;
        let deleted = tx.execute("DELETE FROM playlists WHERE id = ?1", params![playlist_id])?;
        if deleted == 0 {
            return Ok(PlaylistEdit::PlaylistNotFound);
        }
        tx.commit()?;
        info!("Deleted playlist {}", playlist_id);
        Ok(PlaylistEdit::Applied)
    }

    /// Drops entries whose path has no Track row, re-densifies positions and
    /// refreshes count/duration on every playlist.
    pub fn reconcile_playlist_entries(&mut self) -> LibraryResult<MembershipReconciliation> {
        let tx = self.conn.transaction()?;
        let removed_entries = tx.execute(
            "DELETE FROM playlist_tracks
             WHERE track_path NOT IN (SELECT path FROM tracks)",
            [],
        )?;
        let playlist_ids: Vec<i64> = {
            let mut stmt = tx.prepare("SELECT id FROM playlists ORDER BY id")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<_>>()?
        };
        for playlist_id in &playlist_ids {
            renumber_playlist_positions(&tx, *playlist_id)?;
            refresh_playlist_totals(&tx, *playlist_id)?;
        }
        tx.commit()?;
        Ok(MembershipReconciliation {
            removed_entries,
            playlists_refreshed: playlist_ids.len(),
        })
    }

    /// Writes `paths` as the membership of the playlist called `name`, creating it
    /// if needed. With `replace_existing` an existing playlist is cleared first;
    /// otherwise paths are appended after its current entries.
    pub(crate) fn store_imported_playlist(
        &mut self,
        name: &str,
        paths: &[String],
        replace_existing: bool,
    ) -> LibraryResult<StoredImport> {
        let tx = self.conn.transaction()?;
        let now = unix_now_ms();
        let (playlist_id, created) = match playlist_id_by_name(&tx, name)? {
            Some(id) => {
                if replace_existing {
                    tx.execute(
                        "DELETE FROM playlist_tracks WHERE playlist_id = ?1",
                        params![id],
                    )?;
                }
                (id, false)
            }
            None => {
                tx.execute(
                    "INSERT INTO playlists (name, created_at, updated_at) VALUES (?1, ?2, ?2)",
                    params![name, now],
                )?;
                (tx.last_insert_rowid(), true)
            }
        };

        let mut stored = StoredImport {
            playlist_id,
            created,
            ..StoredImport::default()
        };
        let mut position = next_position(&tx, playlist_id)?;
        {
            let mut insert = tx.prepare(
                "INSERT OR IGNORE INTO playlist_tracks (playlist_id, track_path, position, added_at)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for path in paths {
                if !track_path_exists(&tx, path)? {
                    stored.unmatched.push(path.clone());
                    continue;
                }
                if insert.execute(params![playlist_id, path, position, now])? == 0 {
                    stored.duplicates += 1;
                    continue;
                }
                stored.accepted += 1;
                position += 1;
            }
        }
        renumber_playlist_positions(&tx, playlist_id)?;
        tx.commit()?;
        Ok(stored)
    }
}
