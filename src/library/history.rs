//! Favorite set and play-history bookkeeping.
//!
//! Both reference tracks by path. Unknown paths produce a `TrackNotFound`
//! outcome instead of an error. Playing a track appends to `play_history`;
//! the history trigger keeps the Track row's `play_count`/`last_played` in sync.

use log::debug;
use rusqlite::params;

use crate::db_manager::{row_to_track, track_path_exists, unix_now_ms, DbManager};
use crate::error::LibraryResult;
use crate::protocol::{FavoriteChange, FavoriteTrack, PlayOutcome, Track};

impl DbManager {
    /// Inverts the current favorite membership of `path`.
    pub fn toggle_favorite(&mut self, path: &str) -> LibraryResult<FavoriteChange> {
        let tx = self.conn.transaction()?;
        if !track_path_exists(&tx, path)? {
            return Ok(FavoriteChange::TrackNotFound);
        }
        let currently_favorite: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM favorites WHERE track_path = ?1)",
            params![path],
            |row| row.get(0),
        )?;
        let change = if currently_favorite {
            tx.execute("DELETE FROM favorites WHERE track_path = ?1", params![path])?;
            FavoriteChange::Removed
        } else {
            tx.execute(
                "INSERT INTO favorites (track_path, added_at) VALUES (?1, ?2)",
                params![path, unix_now_ms()],
            )?;
            FavoriteChange::Added
        };
        tx.commit()?;
        debug!("Favorite toggled for {}: {:?}", path, change);
        Ok(change)
    }

    pub fn add_to_favorites(&mut self, path: &str) -> LibraryResult<FavoriteChange> {
        let tx = self.conn.transaction()?;
        if !track_path_exists(&tx, path)? {
            return Ok(FavoriteChange::TrackNotFound);
        }
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO favorites (track_path, added_at) VALUES (?1, ?2)",
            params![path, unix_now_ms()],
        )?;
        tx.commit()?;
        Ok(if inserted == 1 {
            FavoriteChange::Added
        } else {
            FavoriteChange::AlreadyFavorite
        })
    }

    pub fn remove_from_favorites(&mut self, path: &str) -> LibraryResult<FavoriteChange> {
        let tx = self.conn.transaction()?;
        if !track_path_exists(&tx, path)? {
            return Ok(FavoriteChange::TrackNotFound);
        }
        let removed = tx.execute("DELETE FROM favorites WHERE track_path = ?1", params![path])?;
        tx.commit()?;
        Ok(if removed > 0 {
            FavoriteChange::Removed
        } else {
            FavoriteChange::NotFavorite
        })
    }

    pub fn is_favorite(&self, path: &str) -> LibraryResult<bool> {
        Ok(self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM favorites WHERE track_path = ?1)",
            params![path],
            |row| row.get(0),
        )?)
    }

    /// Favorited tracks, most recently favorited first.
    pub fn favorites(&self) -> LibraryResult<Vec<FavoriteTrack>> {
        let mut stmt = self.conn.prepare(
            "SELECT * FROM favorite_tracks_view ORDER BY favorited_at DESC, id DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(FavoriteTrack {
                favorited_at: row.get("favorited_at")?,
                track: row_to_track(row)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    /// Appends a play event. The history trigger bumps the track's play count
    /// and last-played time.
    pub fn add_play(&mut self, path: &str) -> LibraryResult<PlayOutcome> {
        let tx = self.conn.transaction()?;
        if !track_path_exists(&tx, path)? {
            return Ok(PlayOutcome::TrackNotFound);
        }
        tx.execute(
            "INSERT INTO play_history (track_path, played_at, play_count) VALUES (?1, ?2, 1)",
            params![path, unix_now_ms()],
        )?;
        let (play_count, last_played): (i64, Option<i64>) = tx.query_row(
            "SELECT play_count, last_played FROM tracks WHERE path = ?1",
            params![path],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        tx.commit()?;
        Ok(PlayOutcome::Recorded {
            play_count,
            last_played: last_played.unwrap_or_default(),
        })
    }

    /// Drops the play log and clears `last_played` on every track. Track rows and
    /// lifetime play counts are kept. Returns the number of tracks cleared.
    pub fn clear_history(&mut self) -> LibraryResult<usize> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM play_history", [])?;
        let cleared = tx.execute(
            "UPDATE tracks SET last_played = NULL WHERE last_played IS NOT NULL",
            [],
        )?;
        tx.commit()?;
        debug!("Cleared play history for {} tracks", cleared);
        Ok(cleared)
    }

    pub fn recently_played(&self, limit: usize) -> LibraryResult<Vec<Track>> {
        self.tracks_from_view(
            "SELECT * FROM recently_played_view ORDER BY last_played DESC, id DESC LIMIT ?1",
            limit,
        )
    }

    pub fn most_played(&self, limit: usize) -> LibraryResult<Vec<Track>> {
        self.tracks_from_view(
            "SELECT * FROM most_played_view
             ORDER BY play_count DESC, last_played DESC, id ASC LIMIT ?1",
            limit,
        )
    }

    pub fn history_entry_count(&self, path: &str) -> LibraryResult<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM play_history WHERE track_path = ?1",
            params![path],
            |row| row.get(0),
        )?)
    }

    fn tracks_from_view(&self, sql: &str, limit: usize) -> LibraryResult<Vec<Track>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params![limit as i64], row_to_track)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }
}
