//! In-memory artwork cache keyed by a hash of album and artist.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::fs_access::FileAccess;
use crate::protocol::{ArtSource, ResolvedArt};

pub const DEFAULT_ART_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Time source for entry expiry.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Hash of the normalized album/artist pair. Any track sharing both values maps
/// to the same key.
pub fn cache_key(album: Option<&str>, artist: Option<&str>) -> String {
    let normalize = |value: Option<&str>| value.unwrap_or_default().trim().to_lowercase();
    let joined = format!("{}|{}", normalize(album), normalize(artist));
    format!("{:x}", md5::compute(joined.as_bytes()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtCacheEntry {
    pub path: PathBuf,
    pub source: ArtSource,
    pub created_at: SystemTime,
}

pub struct ArtCache {
    entries: HashMap<String, ArtCacheEntry>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl ArtCache {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
            clock,
        }
    }

    fn is_live(&self, entry: &ArtCacheEntry, now: SystemTime, files: &dyn FileAccess) -> bool {
        // A clock that moved backwards keeps the entry rather than expiring it.
        let age = now.duration_since(entry.created_at).unwrap_or_default();
        age < self.ttl && files.is_file(&entry.path)
    }

    /// Returns the entry for `key` when it is unexpired and its file still
    /// exists; otherwise evicts it.
    pub fn get(&mut self, key: &str, files: &dyn FileAccess) -> Option<ResolvedArt> {
        let now = self.clock.now();
        let entry = self.entries.get(key)?;
        if self.is_live(entry, now, files) {
            return Some(ResolvedArt {
                path: entry.path.clone(),
                source: entry.source,
            });
        }
        self.entries.remove(key);
        None
    }

    pub fn insert(&mut self, key: String, art: &ResolvedArt) {
        self.entries.insert(
            key,
            ArtCacheEntry {
                path: art.path.clone(),
                source: art.source,
                created_at: self.clock.now(),
            },
        );
    }

    /// Evicts every expired or dangling entry and returns how many were removed.
    pub fn sweep(&mut self, files: &dyn FileAccess) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        let stale: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| !self.is_live(entry, now, files))
            .map(|(key, _)| key.clone())
            .collect();
        for key in stale {
            self.entries.remove(&key);
        }
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Mutex;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    use super::Clock;

    /// Clock that only moves when told to.
    pub struct ManualClock {
        now: Mutex<SystemTime>,
    }

    impl ManualClock {
        pub fn new() -> Self {
            Self {
                now: Mutex::new(UNIX_EPOCH + Duration::from_secs(1_700_000_000)),
            }
        }

        pub fn advance(&self, by: Duration) {
            let mut now = self.now.lock().expect("clock lock poisoned");
            *now += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> SystemTime {
            *self.now.lock().expect("clock lock poisoned")
        }
    }
}
