//! Layered artwork resolution for a track.
//!
//! Order: in-memory cache by album/artist, embedded picture (persisted to the
//! disk cache), covers folder under the music root, bundled sample image. Any
//! hit is cached under the album/artist key so every track of that album
//! reuses it.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, info, warn};

use crate::artwork::art_cache::{cache_key, ArtCache, Clock, SystemClock, DEFAULT_ART_TTL};
use crate::artwork::art_disk_cache::{clear_disk_cache, write_cached_art};
use crate::artwork::embedded_art::{validate_picture, EmbeddedArtReader, TagArtReader};
use crate::config::Config;
use crate::fs_access::{FileAccess, LocalFiles};
use crate::protocol::{ArtSource, ResolvedArt, Track};

/// Delay before the startup sweep when none is configured.
pub const DEFAULT_STARTUP_SWEEP_DELAY: Duration = Duration::from_secs(5);

/// Image extensions probed in the covers folder, in order.
pub const COVER_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "webp", "gif", "bmp"];

/// What the resolver needs to know about a track.
#[derive(Debug, Clone, Copy)]
pub struct ArtRequest<'a> {
    pub track_path: &'a Path,
    pub album: Option<&'a str>,
    pub artist: Option<&'a str>,
}

impl<'a> ArtRequest<'a> {
    pub fn new(track_path: &'a Path, album: Option<&'a str>, artist: Option<&'a str>) -> Self {
        Self {
            track_path,
            album,
            artist,
        }
    }

    pub fn for_track(track: &'a Track) -> Self {
        Self::new(
            Path::new(&track.path),
            track.album.as_deref(),
            track.artist.as_deref(),
        )
    }
}

/// Replaces filesystem-unsafe characters in a cover file name.
pub fn sanitize_cover_name(name: &str) -> String {
    name.trim()
        .chars()
        .map(|ch| match ch {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            ch if ch.is_control() => '_',
            ch => ch,
        })
        .collect::<String>()
        .trim_matches('.')
        .trim()
        .to_string()
}

/// Candidate cover stems for an album/artist pair, most specific first.
pub fn cover_name_candidates(album: Option<&str>, artist: Option<&str>) -> Vec<String> {
    let album = album.map(sanitize_cover_name).filter(|value| !value.is_empty());
    let artist = artist.map(sanitize_cover_name).filter(|value| !value.is_empty());

    let mut raw = Vec::new();
    match (&album, &artist) {
        (Some(album), Some(artist)) => {
            raw.push(format!("{artist} - {album}"));
            raw.push(format!("{album} - {artist}"));
            raw.push(album.clone());
        }
        (Some(album), None) => raw.push(album.clone()),
        (None, Some(artist)) => raw.push(artist.clone()),
        (None, None) => {}
    }

    let mut candidates: Vec<String> = Vec::new();
    for name in raw {
        let lowered = name.to_lowercase().replace(' ', "_");
        for candidate in [name, lowered] {
            if !candidates.contains(&candidate) {
                candidates.push(candidate);
            }
        }
    }
    candidates
}

pub struct AlbumArtResolver {
    cache: Mutex<ArtCache>,
    ttl: Duration,
    sweep_delay: Duration,
    covers_dir: PathBuf,
    cache_dir: PathBuf,
    sample_image: Option<PathBuf>,
    reader: Box<dyn EmbeddedArtReader>,
    files: Arc<dyn FileAccess>,
}

impl AlbumArtResolver {
    pub fn new(covers_dir: PathBuf, cache_dir: PathBuf, sample_image: Option<PathBuf>) -> Self {
        Self {
            cache: Mutex::new(ArtCache::new(DEFAULT_ART_TTL, Arc::new(SystemClock))),
            ttl: DEFAULT_ART_TTL,
            sweep_delay: DEFAULT_STARTUP_SWEEP_DELAY,
            covers_dir,
            cache_dir,
            sample_image,
            reader: Box::new(TagArtReader),
            files: Arc::new(LocalFiles),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let ttl = Duration::from_secs(u64::from(config.artwork.cache_ttl_hours) * 60 * 60);
        Self::new(
            config.covers_dir(),
            config.art_cache_dir(),
            config.sample_image_path(),
        )
        .with_clock(Arc::new(SystemClock), ttl)
        .with_sweep_delay(Duration::from_secs(u64::from(
            config.artwork.startup_sweep_delay_secs,
        )))
    }

    pub fn with_sweep_delay(mut self, delay: Duration) -> Self {
        self.sweep_delay = delay;
        self
    }

    /// Replaces the cache with an empty one using `clock` and `ttl`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        self.cache = Mutex::new(ArtCache::new(ttl, clock));
        self.ttl = ttl;
        self
    }

    pub fn with_reader(mut self, reader: Box<dyn EmbeddedArtReader>) -> Self {
        self.reader = reader;
        self
    }

    pub fn with_file_access(mut self, files: Arc<dyn FileAccess>) -> Self {
        self.files = files;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn sweep_delay(&self) -> Duration {
        self.sweep_delay
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn lock_cache(&self) -> MutexGuard<'_, ArtCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns artwork for the track, or `None` when no tier produced a file.
    pub fn resolve(&self, request: &ArtRequest<'_>) -> Option<ResolvedArt> {
        let key = cache_key(request.album, request.artist);
        if let Some(cached) = self.lock_cache().get(&key, self.files.as_ref()) {
            debug!(
                "Artwork cache hit for {}: {}",
                request.track_path.display(),
                cached.path.display()
            );
            return Some(cached);
        }

        let resolved = self
            .resolve_embedded(request)
            .or_else(|| self.resolve_local_cover(request))
            .or_else(|| self.resolve_sample());

        match &resolved {
            Some(art) => {
                debug!(
                    "Resolved {:?} artwork for {}: {}",
                    art.source,
                    request.track_path.display(),
                    art.path.display()
                );
                self.lock_cache().insert(key, art);
            }
            None => debug!("No artwork for {}", request.track_path.display()),
        }
        resolved
    }

    pub fn resolve_track(&self, track: &Track) -> Option<ResolvedArt> {
        self.resolve(&ArtRequest::for_track(track))
    }

    fn resolve_embedded(&self, request: &ArtRequest<'_>) -> Option<ResolvedArt> {
        let picture = self.reader.read_picture(request.track_path)?;
        let Some(format) = validate_picture(&picture) else {
            debug!(
                "Rejected embedded picture in {} after format check",
                request.track_path.display()
            );
            return None;
        };
        match write_cached_art(
            self.files.as_ref(),
            &self.cache_dir,
            request.track_path,
            &picture.data,
            format,
        ) {
            Ok(Some(path)) => Some(ResolvedArt {
                path,
                source: ArtSource::Embedded,
            }),
            Ok(None) => None,
            Err(err) => {
                warn!(
                    "Could not persist embedded artwork for {}: {}",
                    request.track_path.display(),
                    err
                );
                None
            }
        }
    }

    fn resolve_local_cover(&self, request: &ArtRequest<'_>) -> Option<ResolvedArt> {
        cover_name_candidates(request.album, request.artist)
            .iter()
            .flat_map(|name| {
                COVER_EXTENSIONS
                    .iter()
                    .map(move |ext| self.covers_dir.join(format!("{name}.{ext}")))
            })
            .find(|candidate| self.files.is_file(candidate))
            .map(|path| ResolvedArt {
                path,
                source: ArtSource::Local,
            })
    }

    fn resolve_sample(&self) -> Option<ResolvedArt> {
        let sample = self.sample_image.as_ref()?;
        if !self.files.is_file(sample) {
            debug!("Sample artwork {} is missing", sample.display());
            return None;
        }
        Some(ResolvedArt {
            path: sample.clone(),
            source: ArtSource::Sample,
        })
    }

    /// Evicts expired and dangling cache entries; returns how many.
    pub fn sweep_cache(&self) -> usize {
        let evicted = self.lock_cache().sweep(self.files.as_ref());
        if evicted > 0 {
            debug!("Artwork cache sweep evicted {} entries", evicted);
        }
        evicted
    }

    /// Runs one cache sweep on a background thread after `delay`.
    pub fn spawn_startup_sweep(
        self: &Arc<Self>,
        delay: Duration,
    ) -> std::io::Result<JoinHandle<usize>> {
        let resolver = Arc::clone(self);
        std::thread::Builder::new()
            .name("art-cache-sweep".to_string())
            .spawn(move || {
                std::thread::sleep(delay);
                resolver.sweep_cache()
            })
    }

    /// Starts the opportunistic startup sweep with the configured delay.
    pub fn start_startup_sweep(self: &Arc<Self>) -> std::io::Result<JoinHandle<usize>> {
        debug!(
            "Artwork cache sweep scheduled in {}s",
            self.sweep_delay.as_secs_f32()
        );
        self.spawn_startup_sweep(self.sweep_delay)
    }

    pub fn cached_entries(&self) -> usize {
        self.lock_cache().len()
    }

    pub fn clear_cache(&self) {
        self.lock_cache().clear();
    }

    /// Empties the in-memory cache and deletes every extracted picture on disk.
    pub fn clear_disk_cache(&self) -> usize {
        self.clear_cache();
        let deleted = clear_disk_cache(&self.cache_dir);
        info!(
            "Cleared {} cached artwork file(s) from {}",
            deleted,
            self.cache_dir.display()
        );
        deleted
    }
}
