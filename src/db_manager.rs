//! SQLite connection ownership, schema creation and schema validation.
//!
//! The schema is created with `IF NOT EXISTS` everywhere so it can run on every
//! startup. Derived values (artist/album aggregates, playlist counts, track
//! play statistics) are maintained by triggers declared here.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};
use rusqlite::functions::FunctionFlags;
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::error::{LibraryError, LibraryResult};
use crate::protocol::Track;

pub(crate) const TRACK_COLUMNS: &str = "id, path, filename, title, artist, album, year, genre, \
     duration, file_size, format, bitrate, last_played, play_count, date_added";

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS tracks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT NOT NULL UNIQUE CHECK (length(path) > 0),
    filename TEXT NOT NULL,
    title TEXT,
    artist TEXT,
    album TEXT,
    year INTEGER,
    genre TEXT,
    duration REAL,
    file_size INTEGER NOT NULL DEFAULT 0,
    format TEXT,
    bitrate INTEGER,
    last_played INTEGER,
    play_count INTEGER NOT NULL DEFAULT 0,
    date_added INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS artists (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    track_count INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS albums (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    artist TEXT NOT NULL DEFAULT '',
    year INTEGER,
    track_count INTEGER NOT NULL DEFAULT 0,
    UNIQUE (title, artist)
);

CREATE TABLE IF NOT EXISTS playlists (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    description TEXT,
    track_count INTEGER NOT NULL DEFAULT 0,
    total_duration REAL NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS playlist_tracks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    playlist_id INTEGER NOT NULL REFERENCES playlists(id) ON DELETE CASCADE,
    track_path TEXT NOT NULL,
    position INTEGER NOT NULL,
    added_at INTEGER NOT NULL,
    UNIQUE (playlist_id, track_path)
);

CREATE TABLE IF NOT EXISTS favorites (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    track_path TEXT NOT NULL UNIQUE,
    added_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS play_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    track_path TEXT NOT NULL,
    played_at INTEGER NOT NULL,
    play_count INTEGER NOT NULL DEFAULT 1
);

CREATE INDEX IF NOT EXISTS idx_tracks_path ON tracks(path);
CREATE INDEX IF NOT EXISTS idx_tracks_title ON tracks(title);
CREATE INDEX IF NOT EXISTS idx_tracks_artist ON tracks(artist);
CREATE INDEX IF NOT EXISTS idx_tracks_album ON tracks(album);
CREATE INDEX IF NOT EXISTS idx_tracks_genre ON tracks(genre);
CREATE INDEX IF NOT EXISTS idx_tracks_year ON tracks(year);
CREATE INDEX IF NOT EXISTS idx_tracks_last_played ON tracks(last_played);
CREATE INDEX IF NOT EXISTS idx_tracks_play_count ON tracks(play_count);
CREATE INDEX IF NOT EXISTS idx_albums_artist ON albums(artist);
CREATE INDEX IF NOT EXISTS idx_playlist_tracks_position ON playlist_tracks(playlist_id, position);
CREATE INDEX IF NOT EXISTS idx_playlist_tracks_path ON playlist_tracks(track_path);
CREATE INDEX IF NOT EXISTS idx_play_history_path ON play_history(track_path);
CREATE INDEX IF NOT EXISTS idx_play_history_played_at ON play_history(played_at);

CREATE TRIGGER IF NOT EXISTS trg_playlist_tracks_insert AFTER INSERT ON playlist_tracks BEGIN
    UPDATE playlists SET
        track_count = (SELECT COUNT(*) FROM playlist_tracks WHERE playlist_id = NEW.playlist_id),
        total_duration = (
            SELECT COALESCE(SUM(t.duration), 0)
            FROM playlist_tracks pt JOIN tracks t ON t.path = pt.track_path
            WHERE pt.playlist_id = NEW.playlist_id
        ),
        updated_at = CAST(strftime('%s', 'now') AS INTEGER) * 1000
    WHERE id = NEW.playlist_id;
END;

CREATE TRIGGER IF NOT EXISTS trg_playlist_tracks_delete AFTER DELETE ON playlist_tracks BEGIN
    UPDATE playlists SET
        track_count = (SELECT COUNT(*) FROM playlist_tracks WHERE playlist_id = OLD.playlist_id),
        total_duration = (
            SELECT COALESCE(SUM(t.duration), 0)
            FROM playlist_tracks pt JOIN tracks t ON t.path = pt.track_path
            WHERE pt.playlist_id = OLD.playlist_id
        ),
        updated_at = CAST(strftime('%s', 'now') AS INTEGER) * 1000
    WHERE id = OLD.playlist_id;
END;

CREATE TRIGGER IF NOT EXISTS trg_play_history_insert AFTER INSERT ON play_history BEGIN
    UPDATE tracks SET
        play_count = play_count + NEW.play_count,
        last_played = NEW.played_at
    WHERE path = NEW.track_path;
END;

CREATE TRIGGER IF NOT EXISTS trg_tracks_insert_aggregates AFTER INSERT ON tracks BEGIN
    INSERT OR IGNORE INTO artists (name, track_count)
        SELECT NEW.artist, 0 WHERE NEW.artist IS NOT NULL AND NEW.artist <> '';
    UPDATE artists
        SET track_count = (SELECT COUNT(*) FROM tracks WHERE artist = NEW.artist)
        WHERE name = NEW.artist;
    INSERT OR IGNORE INTO albums (title, artist, year, track_count)
        SELECT NEW.album, COALESCE(NEW.artist, ''), NEW.year, 0
        WHERE NEW.album IS NOT NULL AND NEW.album <> '';
    UPDATE albums
        SET track_count = (
                SELECT COUNT(*) FROM tracks
                WHERE album = NEW.album AND COALESCE(artist, '') = COALESCE(NEW.artist, '')
            ),
            year = COALESCE(year, NEW.year)
        WHERE title = NEW.album AND artist = COALESCE(NEW.artist, '');
END;

CREATE TRIGGER IF NOT EXISTS trg_tracks_update_aggregates AFTER UPDATE OF artist, album, year ON tracks BEGIN
    INSERT OR IGNORE INTO artists (name, track_count)
        SELECT NEW.artist, 0 WHERE NEW.artist IS NOT NULL AND NEW.artist <> '';
    UPDATE artists
        SET track_count = (SELECT COUNT(*) FROM tracks WHERE artist = artists.name)
        WHERE name IN (NEW.artist, OLD.artist);
    INSERT OR IGNORE INTO albums (title, artist, year, track_count)
        SELECT NEW.album, COALESCE(NEW.artist, ''), NEW.year, 0
        WHERE NEW.album IS NOT NULL AND NEW.album <> '';
    UPDATE albums
        SET track_count = (
                SELECT COUNT(*) FROM tracks
                WHERE tracks.album = albums.title AND COALESCE(tracks.artist, '') = albums.artist
            ),
            year = CASE
                WHEN title = NEW.album AND artist = COALESCE(NEW.artist, '')
                    THEN COALESCE(NEW.year, year)
                ELSE year
            END
        WHERE (title = NEW.album AND artist = COALESCE(NEW.artist, ''))
           OR (title = OLD.album AND artist = COALESCE(OLD.artist, ''));
END;

CREATE TRIGGER IF NOT EXISTS trg_tracks_delete_aggregates AFTER DELETE ON tracks BEGIN
    UPDATE artists
        SET track_count = (SELECT COUNT(*) FROM tracks WHERE artist = OLD.artist)
        WHERE name = OLD.artist;
    UPDATE albums
        SET track_count = (
                SELECT COUNT(*) FROM tracks
                WHERE album = OLD.album AND COALESCE(artist, '') = COALESCE(OLD.artist, '')
            )
        WHERE title = OLD.album AND artist = COALESCE(OLD.artist, '');
END;

CREATE VIEW IF NOT EXISTS playlist_tracks_view AS
    SELECT pt.playlist_id, pt.position, pt.added_at AS entry_added_at,
           t.id, t.path, t.filename, t.title, t.artist, t.album, t.year, t.genre,
           t.duration, t.file_size, t.format, t.bitrate, t.last_played, t.play_count,
           t.date_added
    FROM playlist_tracks pt
    JOIN tracks t ON t.path = pt.track_path;

CREATE VIEW IF NOT EXISTS favorite_tracks_view AS
    SELECT f.added_at AS favorited_at,
           t.id, t.path, t.filename, t.title, t.artist, t.album, t.year, t.genre,
           t.duration, t.file_size, t.format, t.bitrate, t.last_played, t.play_count,
           t.date_added
    FROM favorites f
    JOIN tracks t ON t.path = f.track_path;

CREATE VIEW IF NOT EXISTS recently_played_view AS
    SELECT id, path, filename, title, artist, album, year, genre, duration, file_size,
           format, bitrate, last_played, play_count, date_added
    FROM tracks
    WHERE last_played IS NOT NULL;

CREATE VIEW IF NOT EXISTS most_played_view AS
    SELECT id, path, filename, title, artist, album, year, genre, duration, file_size,
           format, bitrate, last_played, play_count, date_added
    FROM tracks
    WHERE play_count > 0;
";

const EXPECTED_TABLES: [&str; 7] = [
    "tracks",
    "artists",
    "albums",
    "playlists",
    "playlist_tracks",
    "favorites",
    "play_history",
];

const EXPECTED_VIEWS: [&str; 4] = [
    "playlist_tracks_view",
    "favorite_tracks_view",
    "recently_played_view",
    "most_played_view",
];

const EXPECTED_TRIGGERS: [&str; 6] = [
    "trg_playlist_tracks_insert",
    "trg_playlist_tracks_delete",
    "trg_play_history_insert",
    "trg_tracks_insert_aggregates",
    "trg_tracks_update_aggregates",
    "trg_tracks_delete_aggregates",
];

/// Relations missing from the connected database.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchemaReport {
    pub missing_tables: Vec<String>,
    pub missing_views: Vec<String>,
    pub missing_triggers: Vec<String>,
}

impl SchemaReport {
    pub fn is_complete(&self) -> bool {
        self.missing_tables.is_empty()
            && self.missing_views.is_empty()
            && self.missing_triggers.is_empty()
    }

    fn everything_missing() -> Self {
        let owned = |names: &[&str]| names.iter().map(|name| name.to_string()).collect();
        Self {
            missing_tables: owned(&EXPECTED_TABLES),
            missing_views: owned(&EXPECTED_VIEWS),
            missing_triggers: owned(&EXPECTED_TRIGGERS),
        }
    }
}

/// Owns the single store connection. Every data-access component is an
/// `impl DbManager` block in its own module.
pub struct DbManager {
    pub(crate) conn: Connection,
}

pub fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("roqvault")
        .join("library.db")
}

impl DbManager {
    /// Opens (or creates) the database file at `db_path` and ensures the schema.
    pub fn new(db_path: &Path) -> LibraryResult<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|err| LibraryError::io(parent, err))?;
            }
        }
        info!("Opening library database at {}", db_path.display());
        let conn = Connection::open(db_path)?;
        let journal_mode: String =
            conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        debug!("Library database journal mode: {}", journal_mode);
        Self::from_connection(conn)
    }

    pub fn new_default() -> LibraryResult<Self> {
        Self::new(&default_database_path())
    }

    pub fn new_in_memory() -> LibraryResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> LibraryResult<Self> {
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        register_unicode_fold(&conn)?;
        let db_manager = Self { conn };
        db_manager.initialize_schema()?;
        Ok(db_manager)
    }

    /// Creates every table, index, trigger and view that does not exist yet.
    pub fn initialize_schema(&self) -> LibraryResult<()> {
        self.conn.execute_batch(SCHEMA_SQL)?;
        debug!("Library schema ensured");
        Ok(())
    }

    /// Lists expected relations that are missing. Never fails: a store that
    /// cannot be inspected reports everything as missing.
    pub fn validate_schema(&self) -> SchemaReport {
        let present = match self.present_schema_objects() {
            Ok(present) => present,
            Err(err) => {
                warn!("Schema validation could not read sqlite_master: {}", err);
                return SchemaReport::everything_missing();
            }
        };

        let missing = |kind: &str, names: &[&str]| -> Vec<String> {
            names
                .iter()
                .filter(|name| {
                    !present.iter().any(|(present_kind, present_name)| {
                        present_kind == kind && present_name == *name
                    })
                })
                .map(|name| name.to_string())
                .collect()
        };

        let report = SchemaReport {
            missing_tables: missing("table", &EXPECTED_TABLES),
            missing_views: missing("view", &EXPECTED_VIEWS),
            missing_triggers: missing("trigger", &EXPECTED_TRIGGERS),
        };
        if !report.is_complete() {
            warn!("Library schema is incomplete: {:?}", report);
        }
        report
    }

    fn present_schema_objects(&self) -> rusqlite::Result<Vec<(String, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT type, name FROM sqlite_master WHERE type IN ('table', 'view', 'trigger')",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect()
    }
}

pub(crate) fn unix_now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as i64)
        .unwrap_or(0)
}

/// Maps a row selected with [`TRACK_COLUMNS`] (or a view exposing the same names).
pub(crate) fn row_to_track(row: &Row) -> rusqlite::Result<Track> {
    Ok(Track {
        id: row.get("id")?,
        path: row.get("path")?,
        filename: row.get("filename")?,
        title: row.get("title")?,
        artist: row.get("artist")?,
        album: row.get("album")?,
        year: row.get("year")?,
        genre: row.get("genre")?,
        duration: row.get("duration")?,
        file_size: row.get::<_, Option<i64>>("file_size")?.unwrap_or(0),
        format: row.get("format")?,
        bitrate: row.get("bitrate")?,
        last_played: row.get("last_played")?,
        play_count: row.get::<_, Option<i64>>("play_count")?.unwrap_or(0),
        date_added: row.get("date_added")?,
    })
}

pub(crate) fn track_path_exists(conn: &Connection, path: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM tracks WHERE path = ?1)",
        params![path],
        |row| row.get(0),
    )
}

/// Rewrites playlist positions to a dense `1..=N` sequence, keeping the current order.
pub(crate) fn renumber_playlist_positions(
    conn: &Connection,
    playlist_id: i64,
) -> rusqlite::Result<usize> {
    let entry_ids: Vec<i64> = {
        let mut stmt = conn.prepare(
            "SELECT id FROM playlist_tracks WHERE playlist_id = ?1 ORDER BY position ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![playlist_id], |row| row.get(0))?;
        rows.collect::<rusqlite::Result<_>>()?
    };
    write_playlist_positions(conn, &entry_ids)?;
    Ok(entry_ids.len())
}

/// Assigns positions `1..=N` to `entry_ids` in the given order.
pub(crate) fn write_playlist_positions(
    conn: &Connection,
    entry_ids: &[i64],
) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare("UPDATE playlist_tracks SET position = ?1 WHERE id = ?2")?;
    for (index, entry_id) in entry_ids.iter().enumerate() {
        stmt.execute(params![(index + 1) as i64, entry_id])?;
    }
    Ok(())
}

/// SQL function `unicode_fold(text)`: full Unicode lowercase, since the built-in
/// `LIKE` and `lower()` only fold ASCII. Non-text values fold to NULL.
fn register_unicode_fold(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "unicode_fold",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            Ok(match ctx.get_raw(0) {
                ValueRef::Text(text) => Some(String::from_utf8_lossy(text).to_lowercase()),
                _ => None,
            })
        },
    )
}

/// Recomputes a playlist's derived count and duration outside the entry triggers,
/// e.g. after the referenced tracks changed.
pub(crate) fn refresh_playlist_totals(
    conn: &Connection,
    playlist_id: i64,
) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE playlists SET
            track_count = (SELECT COUNT(*) FROM playlist_tracks WHERE playlist_id = ?1),
            total_duration = (
                SELECT COALESCE(SUM(t.duration), 0)
                FROM playlist_tracks pt JOIN tracks t ON t.path = pt.track_path
                WHERE pt.playlist_id = ?1
            ),
            updated_at = ?2
         WHERE id = ?1",
        params![playlist_id, unix_now_ms()],
    )?;
    Ok(())
}

fn playlists_referencing(conn: &Connection, track_path: &str) -> rusqlite::Result<Vec<i64>> {
    let mut stmt =
        conn.prepare("SELECT DISTINCT playlist_id FROM playlist_tracks WHERE track_path = ?1")?;
    let rows = stmt.query_map(params![track_path], |row| row.get(0))?;
    rows.collect()
}

/// Refreshes count and duration of every playlist holding `track_path`.
pub(crate) fn refresh_playlists_referencing(
    conn: &Connection,
    track_path: &str,
) -> rusqlite::Result<usize> {
    let playlist_ids = playlists_referencing(conn, track_path)?;
    for playlist_id in &playlist_ids {
        refresh_playlist_totals(conn, *playlist_id)?;
    }
    Ok(playlist_ids.len())
}

/// Adds the play count of the track at `from_path` onto the track at `into_path`
/// and keeps the later of the two last-played times. No-op when either row is
/// missing.
fn absorb_play_stats(
    conn: &Connection,
    from_path: &str,
    into_path: &str,
) -> rusqlite::Result<()> {
    let source: Option<(i64, Option<i64>)> = conn
        .query_row(
            "SELECT play_count, last_played FROM tracks WHERE path = ?1",
            params![from_path],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    let Some((play_count, last_played)) = source else {
        return Ok(());
    };
    if play_count == 0 && last_played.is_none() {
        return Ok(());
    }
    conn.execute(
        "UPDATE tracks SET
            play_count = play_count + ?2,
            last_played = CASE
                WHEN ?3 IS NULL THEN last_played
                WHEN last_played IS NULL OR last_played < ?3 THEN ?3
                ELSE last_played
            END
         WHERE path = ?1",
        params![into_path, play_count, last_played],
    )?;
    Ok(())
}

/// Rows removed from each dependent relation of a track path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DependentRemoval {
    pub history: usize,
    pub favorites: usize,
    pub playlist_entries: usize,
}

/// Deletes history, favorite and playlist rows for `track_path` and re-densifies
/// the affected playlists. The track row itself is left alone.
pub(crate) fn delete_track_dependents(
    conn: &Connection,
    track_path: &str,
) -> rusqlite::Result<DependentRemoval> {
    let affected_playlists = playlists_referencing(conn, track_path)?;
    let history = conn.execute(
        "DELETE FROM play_history WHERE track_path = ?1",
        params![track_path],
    )?;
    let favorites = conn.execute(
        "DELETE FROM favorites WHERE track_path = ?1",
        params![track_path],
    )?;
    let playlist_entries = conn.execute(
        "DELETE FROM playlist_tracks WHERE track_path = ?1",
        params![track_path],
    )?;
    for playlist_id in affected_playlists {
        renumber_playlist_positions(conn, playlist_id)?;
    }
    Ok(DependentRemoval {
        history,
        favorites,
        playlist_entries,
    })
}

/// Moves favorites, history and playlist membership from `old_path` to `new_path`.
/// Where the new path is already present (same playlist, favorite set) the old
/// row is dropped and the playlist re-densified. A track already stored at
/// `new_path` absorbs the play statistics of the one at `old_path`.
pub(crate) fn repoint_track_path(
    conn: &Connection,
    old_path: &str,
    new_path: &str,
) -> rusqlite::Result<()> {
    if old_path == new_path {
        return Ok(());
    }
    let affected_playlists = playlists_referencing(conn, old_path)?;

    absorb_play_stats(conn, old_path, new_path)?;
    conn.execute(
        "UPDATE OR IGNORE favorites SET track_path = ?2 WHERE track_path = ?1",
        params![old_path, new_path],
    )?;
    conn.execute(
        "DELETE FROM favorites WHERE track_path = ?1",
        params![old_path],
    )?;
    conn.execute(
        "UPDATE play_history SET track_path = ?2 WHERE track_path = ?1",
        params![old_path, new_path],
    )?;
    conn.execute(
        "UPDATE OR IGNORE playlist_tracks SET track_path = ?2 WHERE track_path = ?1",
        params![old_path, new_path],
    )?;
    conn.execute(
        "DELETE FROM playlist_tracks WHERE track_path = ?1",
        params![old_path],
    )?;
    for playlist_id in affected_playlists {
        renumber_playlist_positions(conn, playlist_id)?;
    }
    Ok(())
}
