//! Track rows: transactional bulk ingest, filtered reads, search and live stats.

use log::{debug, info, warn};
use rusqlite::{params, OptionalExtension};

use crate::db_manager::{
    delete_track_dependents, row_to_track, track_path_exists, unix_now_ms, DbManager,
    DependentRemoval, TRACK_COLUMNS,
};
use crate::error::{LibraryError, LibraryResult};
use crate::protocol::{
    Album, Artist, CancellationToken, LibraryStats, ScanPhase, ScanProgress, Track, TrackRecord,
};

const UPSERT_TRACK_SQL: &str = "
INSERT INTO tracks (
    path, filename, title, artist, album, year, genre, duration, file_size, format, bitrate,
    play_count, date_added
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 0, ?12)
ON CONFLICT(path) DO UPDATE SET
    filename = excluded.filename,
    title = excluded.title,
    artist = excluded.artist,
    album = excluded.album,
    year = excluded.year,
    genre = excluded.genre,
    duration = excluded.duration,
    file_size = excluded.file_size,
    format = excluded.format,
    bitrate = excluded.bitrate";

fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

impl DbManager {
    /// Inserts or replaces every record keyed by path, all in one transaction.
    pub fn bulk_upsert(&mut self, tracks: &[TrackRecord]) -> LibraryResult<usize> {
        self.bulk_upsert_with_progress(tracks, &CancellationToken::new(), |_| {})
    }

    /// Same as [`DbManager::bulk_upsert`], reporting progress after each record and
    /// checking `cancel` before each one. A failing record or a cancellation rolls
    /// the whole batch back.
    pub fn bulk_upsert_with_progress<F>(
        &mut self,
        tracks: &[TrackRecord],
        cancel: &CancellationToken,
        mut on_progress: F,
    ) -> LibraryResult<usize>
    where
        F: FnMut(ScanProgress),
    {
        let total = tracks.len();
        if total == 0 {
            on_progress(ScanProgress::new(0, 0, "", ScanPhase::Complete));
            return Ok(0);
        }

        info!("Ingesting {} track records", total);
        let date_added = unix_now_ms();
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(UPSERT_TRACK_SQL)?;
            for (index, record) in tracks.iter().enumerate() {
                if cancel.is_cancelled() {
                    warn!(
                        "Ingest cancelled after {} of {} records; rolling back",
                        index, total
                    );
                    return Err(LibraryError::Cancelled {
                        processed: index,
                        total,
                    });
                }

                stmt.execute(params![
                    record.path,
                    record.resolved_filename(),
                    record.resolved_title(),
                    record.resolved_artist(),
                    record.resolved_album(),
                    record.year,
                    record.resolved_genre(),
                    record.duration,
                    record.file_size,
                    record.resolved_format(),
                    record.bitrate,
                    date_added,
                ])
                .map_err(|source| {
                    warn!(
                        "Ingest failed at {:?}; rolling back {} records: {}",
                        record.path, total, source
                    );
                    LibraryError::BulkUpsert {
                        path: record.path.clone(),
                        source,
                    }
                })?;

                on_progress(ScanProgress::new(
                    index + 1,
                    total,
                    &record.path,
                    ScanPhase::Ingesting,
                ));
            }
        }

        on_progress(ScanProgress::new(total, total, "", ScanPhase::Committing));
        tx.commit()?;
        on_progress(ScanProgress::new(total, total, "", ScanPhase::Complete));
        info!("Committed {} track records", total);
        Ok(total)
    }

    pub fn track_by_path(&self, path: &str) -> LibraryResult<Option<Track>> {
        let track = self
            .conn
            .query_row(
                &format!("SELECT {TRACK_COLUMNS} FROM tracks WHERE path = ?1"),
                params![path],
                row_to_track,
            )
            .optional()?;
        Ok(track)
    }

    pub fn track_exists(&self, path: &str) -> LibraryResult<bool> {
        Ok(track_path_exists(&self.conn, path)?)
    }

    pub fn track_count(&self) -> LibraryResult<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM tracks", [], |row| row.get(0))?)
    }

    pub fn all_tracks(&self) -> LibraryResult<Vec<Track>> {
        self.query_tracks(
            &format!(
                "SELECT {TRACK_COLUMNS} FROM tracks
                 ORDER BY artist COLLATE NOCASE, album COLLATE NOCASE, title COLLATE NOCASE"
            ),
            params![],
        )
    }

    pub fn tracks_by_artist(&self, artist: &str) -> LibraryResult<Vec<Track>> {
        self.query_tracks(
            &format!(
                "SELECT {TRACK_COLUMNS} FROM tracks WHERE artist = ?1
                 ORDER BY album COLLATE NOCASE, title COLLATE NOCASE"
            ),
            params![artist],
        )
    }

    pub fn tracks_by_album(&self, album: &str) -> LibraryResult<Vec<Track>> {
        self.query_tracks(
            &format!(
                "SELECT {TRACK_COLUMNS} FROM tracks WHERE album = ?1
                 ORDER BY artist COLLATE NOCASE, title COLLATE NOCASE"
            ),
            params![album],
        )
    }

    /// Case-insensitive substring match across title, artist, album and genre.
    /// Case folding is Unicode-aware, so `björk` matches `BJÖRK`.
    pub fn search_tracks(&self, query: &str, limit: usize) -> LibraryResult<Vec<Track>> {
        let trimmed = query.trim();
        if trimmed.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let pattern = format!("%{}%", escape_like(&trimmed.to_lowercase()));
        self.query_tracks(
            &format!(
                "SELECT {TRACK_COLUMNS} FROM tracks
                 WHERE unicode_fold(title) LIKE ?1 ESCAPE '\\'
                    OR unicode_fold(artist) LIKE ?1 ESCAPE '\\'
                    OR unicode_fold(album) LIKE ?1 ESCAPE '\\'
                    OR unicode_fold(genre) LIKE ?1 ESCAPE '\\'
                 ORDER BY artist COLLATE NOCASE, album COLLATE NOCASE, title COLLATE NOCASE
                 LIMIT ?2"
            ),
            params![pattern, limit as i64],
        )
    }

    /// Aggregate counts computed from the Track rows on every call.
    pub fn stats(&self) -> LibraryResult<LibraryStats> {
        let stats = self.conn.query_row(
            "SELECT COUNT(*),
                    COUNT(DISTINCT NULLIF(artist, '')),
                    COUNT(DISTINCT NULLIF(album, '')),
                    COUNT(DISTINCT NULLIF(genre, '')),
                    COALESCE(SUM(duration), 0),
                    COALESCE(SUM(file_size), 0)
             FROM tracks",
            [],
            |row| {
                Ok(LibraryStats {
                    tracks: row.get(0)?,
                    artists: row.get(1)?,
                    albums: row.get(2)?,
                    genres: row.get(3)?,
                    total_duration: row.get::<_, f64>(4)?,
                    total_size: row.get(5)?,
                })
            },
        )?;
        Ok(stats)
    }

    pub fn artists(&self) -> LibraryResult<Vec<Artist>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, track_count FROM artists
             WHERE track_count > 0 ORDER BY name COLLATE NOCASE",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Artist {
                id: row.get(0)?,
                name: row.get(1)?,
                track_count: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    pub fn albums(&self) -> LibraryResult<Vec<Album>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, title, artist, year, track_count FROM albums
             WHERE track_count > 0 ORDER BY artist COLLATE NOCASE, title COLLATE NOCASE",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Album {
                id: row.get(0)?,
                title: row.get(1)?,
                artist: row.get(2)?,
                year: row.get(3)?,
                track_count: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    pub fn genres(&self) -> LibraryResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT genre FROM tracks
             WHERE genre IS NOT NULL AND genre <> '' ORDER BY genre COLLATE NOCASE",
        )?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    /// Rebuilds the artist and album aggregates from the current Track rows.
    /// Returns the number of artist and album rows written.
    pub fn rebuild_aggregates(&mut self) -> LibraryResult<(usize, usize)> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM artists", [])?;
        tx.execute("DELETE FROM albums", [])?;
        let artists = tx.execute(
            "INSERT INTO artists (name, track_count)
             SELECT artist, COUNT(*) FROM tracks
             WHERE artist IS NOT NULL AND artist <> ''
             GROUP BY artist",
            [],
        )?;
        let albums = tx.execute(
            "INSERT INTO albums (title, artist, year, track_count)
             SELECT album, COALESCE(artist, ''), MAX(year), COUNT(*) FROM tracks
             WHERE album IS NOT NULL AND album <> ''
             GROUP BY album, COALESCE(artist, '')",
            [],
        )?;
        tx.commit()?;
        debug!(
            "Rebuilt aggregates: {} artists, {} albums",
            artists, albums
        );
        Ok((artists, albums))
    }

    /// Deletes a track and its favorites, history and playlist membership.
    /// Returns `None` when the path is unknown.
    pub fn delete_track(&mut self, path: &str) -> LibraryResult<Option<DependentRemoval>> {
        let tx = self.conn.transaction()?;
        if !track_path_exists(&tx, path)? {
            return Ok(None);
        }
        let removal = delete_track_dependents(&tx, path)?;
        tx.execute("DELETE FROM tracks WHERE path = ?1", params![path])?;
        tx.commit()?;
        Ok(Some(removal))
    }

    fn query_tracks(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> LibraryResult<Vec<Track>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, row_to_track)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::protocol::TrackRecord;

    pub fn record(path: &str, artist: &str, album: &str, title: &str) -> TrackRecord {
        TrackRecord {
            title: Some(title.to_string()),
            artist: Some(artist.to_string()),
            album: Some(album.to_string()),
            duration: Some(100.0),
            file_size: 1_000,
            ..TrackRecord::new(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::record;
    use crate::db_manager::DbManager;
    use crate::error::LibraryError;
    use crate::protocol::{CancellationToken, ScanPhase, TrackRecord};

    fn five_track_fixture() -> Vec<TrackRecord> {
        vec![
            record("/music/a/1.mp3", "Alpha", "First", "One"),
            record("/music/a/2.mp3", "Alpha", "First", "Two"),
            record("/music/b/3.mp3", "Beta", "First", "Three"),
            record("/music/c/4.mp3", "Gamma", "Second", "Four"),
            TrackRecord {
                genre: Some("Jazz".to_string()),
                duration: Some(50.5),
                file_size: 2_500,
                ..record("/music/c/5.mp3", "Gamma", "Second", "Five")
            },
        ]
    }

    #[test]
    fn test_stats_on_empty_store_are_zero() {
        let db = DbManager::new_in_memory().expect("failed to create in-memory db");
        let stats = db.stats().expect("stats should succeed");
        assert_eq!(stats.tracks, 0);
        assert_eq!(stats.artists, 0);
        assert_eq!(stats.total_duration, 0.0);
        assert!(db.all_tracks().expect("read should succeed").is_empty());
        assert!(db.search_tracks("x", 10).expect("search should succeed").is_empty());
    }

    #[test]
    fn test_stats_counts_distinct_artists_and_albums() {
        let mut db = DbManager::new_in_memory().expect("failed to create in-memory db");
        db.bulk_upsert(&five_track_fixture())
            .expect("ingest should succeed");

        let stats = db.stats().expect("stats should succeed");
        assert_eq!(stats.tracks, 5);
        assert_eq!(stats.artists, 3);
        assert_eq!(stats.albums, 2);
        assert_eq!(stats.genres, 1);
        assert!((stats.total_duration - 450.5).abs() < f64::EPSILON);
        assert_eq!(stats.total_size, 6_500);
    }

    #[test]
    fn test_bulk_upsert_rolls_back_whole_batch_on_invalid_record() {
        let mut db = DbManager::new_in_memory().expect("failed to create in-memory db");
        db.bulk_upsert(&[record("/music/keep.mp3", "A", "B", "Keep")])
            .expect("seed ingest should succeed");

        let mut batch = five_track_fixture();
        batch.insert(2, TrackRecord::new(""));
        let err = db.bulk_upsert(&batch).expect_err("empty path must fail");

        match err {
            LibraryError::BulkUpsert { path, .. } => assert_eq!(path, ""),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(db.track_count().expect("count should succeed"), 1);
        assert!(db
            .track_by_path("/music/a/1.mp3")
            .expect("read should succeed")
            .is_none());
    }

    #[test]
    fn test_bulk_upsert_replaces_by_path_and_keeps_play_stats() {
        let mut db = DbManager::new_in_memory().expect("failed to create in-memory db");
        db.bulk_upsert(&[record("/music/x.mp3", "Old", "Album", "Title")])
            .expect("ingest should succeed");
        db.add_play("/music/x.mp3").expect("play should succeed");

        db.bulk_upsert(&[record("/music/x.mp3", "New", "Album", "Retitled")])
            .expect("re-ingest should succeed");

        let track = db
            .track_by_path("/music/x.mp3")
            .expect("read should succeed")
            .expect("track should exist");
        assert_eq!(track.artist.as_deref(), Some("New"));
        assert_eq!(track.title.as_deref(), Some("Retitled"));
        assert_eq!(track.play_count, 1);
        assert_eq!(db.track_count().expect("count should succeed"), 1);

        let artists = db.artists().expect("artists should load");
        assert_eq!(artists.len(), 1);
        assert_eq!(artists[0].name, "New");
    }

    #[test]
    fn test_bulk_upsert_reports_progress_and_honours_cancellation() {
        let mut db = DbManager::new_in_memory().expect("failed to create in-memory db");
        let mut phases = Vec::new();
        db.bulk_upsert_with_progress(&five_track_fixture(), &CancellationToken::new(), |p| {
            phases.push((p.current, p.phase))
        })
        .expect("ingest should succeed");
        assert_eq!(phases.first(), Some(&(1, ScanPhase::Ingesting)));
        assert_eq!(phases.last(), Some(&(5, ScanPhase::Complete)));
        assert_eq!(phases.len(), 7);

        let mut fresh = DbManager::new_in_memory().expect("failed to create in-memory db");
        let token = CancellationToken::new();
        let err = fresh
            .bulk_upsert_with_progress(&five_track_fixture(), &token, |p| {
                if p.current == 2 {
                    token.cancel();
                }
            })
            .expect_err("cancelled ingest must fail");
        assert!(matches!(
            err,
            LibraryError::Cancelled {
                processed: 2,
                total: 5
            }
        ));
        assert!(err.is_rolled_back());
        assert_eq!(fresh.track_count().expect("count should succeed"), 0);
    }

    #[test]
    fn test_search_matches_fields_case_insensitively_in_artist_album_title_order() {
        let mut db = DbManager::new_in_memory().expect("failed to create in-memory db");
        db.bulk_upsert(&five_track_fixture())
            .expect("ingest should succeed");

        let first = db.search_tracks("FIRST", 10).expect("search should succeed");
        let titles: Vec<_> = first
            .iter()
            .map(|track| track.title.clone().unwrap_or_default())
            .collect();
        assert_eq!(titles, vec!["One", "Two", "Three"]);

        let jazz = db.search_tracks("jaz", 10).expect("search should succeed");
        assert_eq!(jazz.len(), 1);

        let limited = db.search_tracks("m", 2).expect("search should succeed");
        assert_eq!(limited.len(), 2);

        assert!(db
            .search_tracks("100%", 10)
            .expect("search should succeed")
            .is_empty());
    }

    #[test]
    fn test_search_folds_non_ascii_case() {
        let mut db = DbManager::new_in_memory().expect("failed to create in-memory db");
        db.bulk_upsert(&[
            record("/m/hyper.mp3", "BJÖRK", "Post", "Hyperballad"),
            record("/m/other.mp3", "Sigur Rós", "Ágætis byrjun", "Svefn-g-englar"),
        ])
        .expect("ingest should succeed");

        let bjork = db.search_tracks("björk", 10).expect("search should succeed");
        assert_eq!(bjork.len(), 1);
        assert_eq!(bjork[0].path, "/m/hyper.mp3");

        let album = db.search_tracks("ÁGÆTIS", 10).expect("search should succeed");
        assert_eq!(album.len(), 1);
        assert_eq!(album[0].path, "/m/other.mp3");
    }

    #[test]
    fn test_filtered_reads_and_aggregates() {
        let mut db = DbManager::new_in_memory().expect("failed to create in-memory db");
        db.bulk_upsert(&five_track_fixture())
            .expect("ingest should succeed");

        assert_eq!(db.tracks_by_artist("Gamma").expect("read").len(), 2);
        assert_eq!(db.tracks_by_album("First").expect("read").len(), 3);
        assert_eq!(db.genres().expect("read"), vec!["Jazz".to_string()]);

        let albums = db.albums().expect("albums should load");
        assert_eq!(albums.len(), 3);
        let alpha_first = albums
            .iter()
            .find(|album| album.title == "First" && album.artist == "Alpha")
            .expect("album should exist");
        assert_eq!(alpha_first.track_count, 2);

        db.delete_track("/music/a/1.mp3")
            .expect("delete should succeed")
            .expect("track should exist");
        db.delete_track("/music/a/2.mp3")
            .expect("delete should succeed")
            .expect("track should exist");
        assert!(db
            .artists()
            .expect("artists should load")
            .iter()
            .all(|artist| artist.name != "Alpha"));

        let (artists, albums) = db.rebuild_aggregates().expect("rebuild should succeed");
        assert_eq!((artists, albums), (2, 2));
        assert_eq!(
            db.delete_track("/missing.mp3").expect("delete should succeed"),
            None
        );
    }
}
