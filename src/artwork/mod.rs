//! Album artwork: layered resolution, in-memory TTL cache and on-disk cache of
//! extracted embedded pictures.

pub mod art_cache;
pub mod art_disk_cache;
pub mod art_resolver;
pub mod embedded_art;
