use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use roqvault::config::{sanitize_config, Config};
use roqvault::playlist::playlist_files::read_playlist_file;
use roqvault::protocol::{FavoriteChange, PlayOutcome, PlaylistCreate, TrackRecord};
use roqvault::{DbManager, PathRepair, PlaylistSync};

fn unique_temp_dir(name: &str) -> PathBuf {
    let nonce = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time should be valid")
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("roqvault_it_{name}_{nonce}"));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn touch(path: &Path) {
    std::fs::create_dir_all(path.parent().expect("fixture path has a parent"))
        .expect("fixture dir should be creatable");
    std::fs::write(path, b"audio").expect("fixture file should be writable");
}

fn scanner_record(path: &Path, artist: &str, album: &str) -> TrackRecord {
    TrackRecord {
        artist: Some(artist.to_string()),
        album: Some(album.to_string()),
        duration: Some(180.0),
        file_size: 5,
        ..TrackRecord::new(path.to_string_lossy())
    }
}

fn as_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[test]
fn test_ingest_playlist_roundtrip_and_cleanup() {
    let root = unique_temp_dir("roundtrip");
    let music = root.join("music");
    let a = music.join("a.mp3");
    let b = music.join("b.mp3");
    let moved = music.join("c.mp3");
    let stale = music.join("Old").join("c.mp3");
    let gone = music.join("gone.mp3");
    for path in [&a, &b, &moved] {
        touch(path);
    }

    let mut config = Config::default();
    config.library.music_root = as_string(&music);
    let config = sanitize_config(config);

    let mut db = DbManager::new(&root.join("data").join("library.db")).expect("db should open");
    assert!(db.validate_schema().is_complete());
    let ingested = db
        .bulk_upsert(&[
            scanner_record(&a, "Artist A", "First"),
            scanner_record(&b, "Artist B", "Second"),
            scanner_record(&stale, "Artist A", "First"),
            scanner_record(&gone, "Artist C", "Third"),
        ])
        .expect("ingest should succeed");
    assert_eq!(ingested, 4);
    let stats = db.stats().expect("stats");
    assert_eq!((stats.tracks, stats.artists, stats.albums), (4, 3, 3));

    let PlaylistCreate::Created(playlist) = db.create_playlist("Daily", None).expect("create")
    else {
        panic!("playlist should be created");
    };
    for path in [&a, &stale, &gone, &b] {
        assert!(db
            .add_track_to_playlist(playlist.id, &as_string(path))
            .expect("add")
            .is_applied());
    }
    assert_eq!(
        db.toggle_favorite(&as_string(&stale)).expect("favorite"),
        FavoriteChange::Added
    );
    assert!(matches!(
        db.add_play(&as_string(&gone)).expect("play"),
        PlayOutcome::Recorded { play_count: 1, .. }
    ));

    let repair = PathRepair::new(config.repair.rewrite_rules.clone());
    let first = repair.cleanup_database(&mut db).expect("cleanup");
    assert_eq!(first.corrected, 1);
    assert_eq!(first.removed, 1);
    assert!(first.errors.is_empty());
    assert!(db.is_favorite(&as_string(&moved)).expect("favorite lookup"));
    assert_eq!(
        db.playlist_paths(playlist.id).expect("paths"),
        vec![as_string(&a), as_string(&moved), as_string(&b)]
    );
    let positions: Vec<i64> = db
        .playlist_entries(playlist.id)
        .expect("entries")
        .iter()
        .map(|entry| entry.position)
        .collect();
    assert_eq!(positions, vec![1, 2, 3]);

    let second = repair.cleanup_database(&mut db).expect("second cleanup");
    assert!(second.is_noop());
    assert_eq!(second.checked, 3);

    let sync = PlaylistSync::from_config(&config);
    let written = sync.export_all(&db).expect("export");
    assert_eq!(written, vec![music.join("Playlists").join("Daily.m3u")]);
    assert_eq!(
        read_playlist_file(&written[0]).expect("read back"),
        db.playlist_paths(playlist.id).expect("paths")
    );

    let mut fresh = DbManager::new_in_memory().expect("in-memory db");
    fresh
        .bulk_upsert(&[
            scanner_record(&a, "Artist A", "First"),
            scanner_record(&moved, "Artist A", "First"),
        ])
        .expect("ingest should succeed");
    let imports = sync.import_all(&mut fresh).expect("import");
    assert_eq!(imports.len(), 1);
    assert_eq!(imports[0].imported, 2);
    assert_eq!(imports[0].warnings.len(), 1);
    assert_eq!(
        fresh
            .playlist_paths(imports[0].outcome.playlist_id())
            .expect("paths"),
        vec![as_string(&a), as_string(&moved)]
    );

    drop(db);
    std::fs::remove_dir_all(root).expect("fixture should be removable");
}
