//! Data model shared by the store, playlist sync, path repair and artwork components.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Track row as persisted in the store. `path` is the only stable identity;
/// `id` can change when rows are rebuilt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: i64,
    pub path: String,
    pub filename: String,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub year: Option<i32>,
    pub genre: Option<String>,
    /// Duration in seconds.
    pub duration: Option<f64>,
    pub file_size: i64,
    pub format: Option<String>,
    pub bitrate: Option<i64>,
    /// Unix milliseconds.
    pub last_played: Option<i64>,
    pub play_count: i64,
    /// Unix milliseconds.
    pub date_added: i64,
}

/// Track record produced by the external scanner and consumed by bulk ingest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackRecord {
    pub path: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default, alias = "filesize")]
    pub file_size: i64,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub bitrate: Option<i64>,
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

impl TrackRecord {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// File name, derived from the path when the scanner left it blank.
    pub fn resolved_filename(&self) -> String {
        let trimmed = self.filename.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
        Path::new(&self.path)
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string)
            .unwrap_or_else(|| self.path.clone())
    }

    /// Title tag, falling back to the file stem when the tag is missing.
    pub fn resolved_title(&self) -> String {
        non_empty(&self.title).unwrap_or_else(|| {
            Path::new(&self.path)
                .file_stem()
                .and_then(|name| name.to_str())
                .map(|name| name.to_string())
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| "Unknown Title".to_string())
        })
    }

    pub fn resolved_artist(&self) -> Option<String> {
        non_empty(&self.artist)
    }

    pub fn resolved_album(&self) -> Option<String> {
        non_empty(&self.album)
    }

    pub fn resolved_genre(&self) -> Option<String> {
        non_empty(&self.genre)
    }

    /// Container format, taken from the extension when the scanner did not report one.
    pub fn resolved_format(&self) -> Option<String> {
        non_empty(&self.format).or_else(|| {
            Path::new(&self.path)
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.to_ascii_lowercase())
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artist {
    pub id: i64,
    pub name: String,
    pub track_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Album {
    pub id: i64,
    pub title: String,
    /// Empty when the album's tracks carry no artist.
    pub artist: String,
    pub year: Option<i32>,
    pub track_count: i64,
}

/// Live aggregate counts over the Track rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LibraryStats {
    pub tracks: i64,
    pub artists: i64,
    pub albums: i64,
    pub genres: i64,
    pub total_duration: f64,
    pub total_size: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaylistInfo {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub track_count: i64,
    pub total_duration: f64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// One membership row. Joined to tracks by path, never by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaylistEntry {
    pub id: i64,
    pub playlist_id: i64,
    pub track_path: String,
    pub position: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaylistTrack {
    pub position: i64,
    pub track: Track,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FavoriteTrack {
    pub favorited_at: i64,
    pub track: Track,
}

/// Result of a favorites operation. `TrackNotFound` is returned, never raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FavoriteChange {
    Added,
    AlreadyFavorite,
    Removed,
    NotFavorite,
    TrackNotFound,
}

impl FavoriteChange {
    /// False only when the referenced track is unknown.
    pub fn success(self) -> bool {
        self != Self::TrackNotFound
    }

    /// True when a favorite row was created.
    pub fn added(self) -> bool {
        self == Self::Added
    }

    /// Favorite membership after the operation, if the track exists.
    pub fn is_favorite(self) -> Option<bool> {
        match self {
            Self::Added | Self::AlreadyFavorite => Some(true),
            Self::Removed | Self::NotFavorite => Some(false),
            Self::TrackNotFound => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayOutcome {
    Recorded { play_count: i64, last_played: i64 },
    TrackNotFound,
}

/// Result of a playlist mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaylistEdit {
    Applied,
    PlaylistNotFound,
    TrackNotFound,
    AlreadyInPlaylist,
    NotInPlaylist,
    NameTaken,
    InvalidName,
}

impl PlaylistEdit {
    pub fn is_applied(self) -> bool {
        self == Self::Applied
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaylistCreate {
    Created(PlaylistInfo),
    NameTaken,
    InvalidName,
}

/// Where a piece of artwork came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtSource {
    Embedded,
    Local,
    Sample,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedArt {
    pub path: PathBuf,
    pub source: ArtSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanPhase {
    Ingesting,
    Committing,
    Complete,
}

/// Progress event emitted while ingesting scanner output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanProgress {
    pub current: usize,
    pub total: usize,
    pub current_file: String,
    pub percentage: f32,
    pub phase: ScanPhase,
}

impl ScanProgress {
    pub fn new(current: usize, total: usize, current_file: &str, phase: ScanPhase) -> Self {
        let percentage = if total == 0 {
            100.0
        } else {
            (current as f32 / total as f32 * 100.0).min(100.0)
        };
        Self {
            current,
            total,
            current_file: current_file.to_string(),
            percentage,
            phase,
        }
    }
}

/// Shared flag checked between records of a long-running ingest.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}
