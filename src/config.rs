//! Persistent configuration model, defaults and TOML load/save.

use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::error::{LibraryError, LibraryResult};

/// Root configuration persisted to `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    #[serde(default)]
    /// Store location and query preferences.
    pub library: LibraryConfig,
    #[serde(default)]
    /// Portable playlist folder layout.
    pub playlists: PlaylistsConfig,
    #[serde(default)]
    /// Artwork resolution and caching.
    pub artwork: ArtworkConfig,
    #[serde(default)]
    /// Path repair heuristics.
    pub repair: RepairConfig,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct LibraryConfig {
    #[serde(default = "default_music_root")]
    pub music_root: String,
    /// Empty selects the per-user data directory.
    #[serde(default)]
    pub database_path: String,
    #[serde(default = "default_search_limit")]
    pub search_limit: u32,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct PlaylistsConfig {
    /// Sub-folder of the music root holding portable playlist files.
    #[serde(default = "default_playlists_folder_name")]
    pub folder_name: String,
    #[serde(default = "default_playlist_file_extension")]
    pub file_extension: String,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ArtworkConfig {
    /// Empty selects the per-user cache directory.
    #[serde(default)]
    pub cache_dir: String,
    /// Relative to the music root.
    #[serde(default = "default_covers_subdir")]
    pub covers_subdir: String,
    /// Bundled fallback image; relative paths resolve against the music root.
    #[serde(default = "default_sample_image")]
    pub sample_image: String,
    #[serde(default = "default_cache_ttl_hours")]
    pub cache_ttl_hours: u32,
    #[serde(default = "default_startup_sweep_delay_secs")]
    pub startup_sweep_delay_secs: u32,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct RepairConfig {
    /// Tried in order; the first rewrite that names an existing file wins.
    #[serde(default = "default_rewrite_rules")]
    pub rewrite_rules: Vec<PathRewriteRule>,
}

/// Literal substring rewrite applied to a stored track path.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct PathRewriteRule {
    pub pattern: String,
    pub replacement: String,
}

impl PathRewriteRule {
    pub fn new(pattern: impl Into<String>, replacement: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            replacement: replacement.into(),
        }
    }

    /// Returns the rewritten path, or `None` when the rule does not change it.
    pub fn apply(&self, path: &str) -> Option<String> {
        if self.pattern.is_empty() || !path.contains(&self.pattern) {
            return None;
        }
        let rewritten = path.replace(&self.pattern, &self.replacement);
        (rewritten != path).then_some(rewritten)
    }
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            music_root: default_music_root(),
            database_path: String::new(),
            search_limit: default_search_limit(),
        }
    }
}

impl Default for PlaylistsConfig {
    fn default() -> Self {
        Self {
            folder_name: default_playlists_folder_name(),
            file_extension: default_playlist_file_extension(),
        }
    }
}

impl Default for ArtworkConfig {
    fn default() -> Self {
        Self {
            cache_dir: String::new(),
            covers_subdir: default_covers_subdir(),
            sample_image: default_sample_image(),
            cache_ttl_hours: default_cache_ttl_hours(),
            startup_sweep_delay_secs: default_startup_sweep_delay_secs(),
        }
    }
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            rewrite_rules: default_rewrite_rules(),
        }
    }
}

fn default_music_root() -> String {
    dirs::audio_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join("Music")))
        .unwrap_or_else(|| PathBuf::from("Music"))
        .to_string_lossy()
        .into_owned()
}

fn default_search_limit() -> u32 {
    200
}

fn default_playlists_folder_name() -> String {
    "Playlists".to_string()
}

fn default_playlist_file_extension() -> String {
    "m3u".to_string()
}

fn default_covers_subdir() -> String {
    "assets/covers".to_string()
}

fn default_sample_image() -> String {
    "assets/sample-cover.png".to_string()
}

fn default_cache_ttl_hours() -> u32 {
    24
}

fn default_startup_sweep_delay_secs() -> u32 {
    5
}

fn default_rewrite_rules() -> Vec<PathRewriteRule> {
    vec![
        PathRewriteRule::new("/Music/Music/", "/Music/"),
        PathRewriteRule::new("/Old/", "/"),
    ]
}

impl Config {
    pub fn music_root(&self) -> PathBuf {
        PathBuf::from(&self.library.music_root)
    }

    pub fn database_path(&self) -> PathBuf {
        if self.library.database_path.trim().is_empty() {
            crate::db_manager::default_database_path()
        } else {
            PathBuf::from(&self.library.database_path)
        }
    }

    pub fn playlists_dir(&self) -> PathBuf {
        self.music_root().join(&self.playlists.folder_name)
    }

    pub fn art_cache_dir(&self) -> PathBuf {
        if self.artwork.cache_dir.trim().is_empty() {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("roqvault")
                .join("artwork")
        } else {
            PathBuf::from(&self.artwork.cache_dir)
        }
    }

    pub fn covers_dir(&self) -> PathBuf {
        self.music_root().join(&self.artwork.covers_subdir)
    }

    pub fn sample_image_path(&self) -> Option<PathBuf> {
        let configured = self.artwork.sample_image.trim();
        if configured.is_empty() {
            return None;
        }
        let path = PathBuf::from(configured);
        if path.is_absolute() {
            Some(path)
        } else {
            Some(self.music_root().join(path))
        }
    }
}

fn non_empty_or(value: String, fallback: fn() -> String) -> String {
    if value.trim().is_empty() {
        fallback()
    } else {
        value.trim().to_string()
    }
}

/// Clamps numeric values into supported ranges and restores empty names.
pub fn sanitize_config(config: Config) -> Config {
    let Config {
        library,
        playlists,
        artwork,
        repair,
    } = config;

    Config {
        library: LibraryConfig {
            music_root: non_empty_or(library.music_root, default_music_root),
            database_path: library.database_path,
            search_limit: library.search_limit.clamp(1, 10_000),
        },
        playlists: PlaylistsConfig {
            folder_name: non_empty_or(playlists.folder_name, default_playlists_folder_name),
            file_extension: non_empty_or(
                playlists.file_extension.trim_start_matches('.').to_string(),
                default_playlist_file_extension,
            ),
        },
        artwork: ArtworkConfig {
            cache_ttl_hours: artwork.cache_ttl_hours.max(1),
            ..artwork
        },
        repair: RepairConfig {
            rewrite_rules: repair
                .rewrite_rules
                .into_iter()
                .filter(|rule| !rule.pattern.is_empty())
                .collect(),
        },
    }
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("roqvault")
        .join("config.toml")
}

/// Loads the config at `path`, writing defaults first when the file does not exist.
pub fn load_or_create_config(path: &Path) -> LibraryResult<Config> {
    if !path.exists() {
        info!(
            "Config file not found. Creating default config. path={}",
            path.display()
        );
        save_config(path, &Config::default())?;
    }

    let content = std::fs::read_to_string(path).map_err(|err| LibraryError::io(path, err))?;
    let parsed = match toml::from_str::<Config>(&content) {
        Ok(config) => config,
        Err(err) => {
            warn!(
                "Config at {} could not be parsed, using defaults: {}",
                path.display(),
                err
            );
            Config::default()
        }
    };
    Ok(sanitize_config(parsed))
}

pub fn save_config(path: &Path, config: &Config) -> LibraryResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|err| LibraryError::io(parent, err))?;
    }
    let text = toml::to_string(config).map_err(|err| LibraryError::Config(err.to_string()))?;
    std::fs::write(path, text).map_err(|err| LibraryError::io(path, err))
}
