//! Local music library persistence.
//!
//! A SQLite store of tracks, playlists, favorites and play history, kept in
//! step with portable playlist files and an artwork cache while audio files
//! move around underneath it.

pub mod artwork;
pub mod config;
pub mod db_manager;
pub mod error;
pub mod fs_access;
pub mod library;
pub mod playlist;
pub mod protocol;

pub use artwork::art_resolver::{AlbumArtResolver, ArtRequest};
pub use config::Config;
pub use db_manager::DbManager;
pub use error::{LibraryError, LibraryResult};
pub use library::path_repair::PathRepair;
pub use playlist::playlist_sync::PlaylistSync;
