//! Playlist storage, the portable playlist file format and store/file sync.

pub mod playlist_files;
pub mod playlist_store;
pub mod playlist_sync;
