//! Maintenance CLI over the library store.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::{error, info, warn};
use serde::Serialize;

use roqvault::config::{default_config_path, load_or_create_config};
use roqvault::library::path_repair::PathRepair;
use roqvault::protocol::{CancellationToken, ScanPhase, TrackRecord};
use roqvault::{AlbumArtResolver, ArtRequest, Config, DbManager, LibraryError, LibraryResult};
use roqvault::PlaylistSync;

#[derive(Parser, Debug)]
#[command(name = "roqvault", about = "Music library store maintenance")]
struct CliArgs {
    /// Config file; created with defaults when missing.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides the configured database path.
    #[arg(long)]
    db: Option<PathBuf>,

    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Live totals for tracks, artists, albums, genres, duration and size.
    Stats,
    Search {
        query: String,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Ingests a JSON array of scanner track records in one transaction.
    Ingest { file: PathBuf },
    ValidateSchema,
    /// Validates stored paths, repairs what it can and removes the rest.
    Cleanup,
    ImportPlaylists {
        /// Replace the membership of playlists that already exist.
        #[arg(long)]
        force: bool,
    },
    ExportPlaylists,
    /// Drops playlist entries whose track is gone and re-densifies positions.
    ReconcilePlaylists,
    /// Toggles the favorite flag of a track.
    Favorite { path: String },
    /// Records a play of a track.
    Play { path: String },
    /// Resolves artwork for a track.
    Art { path: String },
}

fn print_json<T: Serialize>(value: &T) -> LibraryResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_scanner_records(path: &Path) -> LibraryResult<Vec<TrackRecord>> {
    let text = std::fs::read_to_string(path).map_err(|err| LibraryError::Io {
        path: path.to_path_buf(),
        source: err,
    })?;
    Ok(serde_json::from_str(&text)?)
}

fn run(cli: CliArgs) -> LibraryResult<()> {
    let config_path = cli.config.unwrap_or_else(default_config_path);
    let config: Config = load_or_create_config(&config_path)?;
    let db_path = cli.db.unwrap_or_else(|| config.database_path());
    let mut db = DbManager::new(&db_path)?;

    match cli.command {
        Command::Stats => print_json(&db.stats()?),
        Command::Search { query, limit } => {
            let limit = limit.unwrap_or(config.library.search_limit as usize);
            print_json(&db.search_tracks(&query, limit)?)
        }
        Command::Ingest { file } => {
            let records = read_scanner_records(&file)?;
            let step = (records.len() / 10).max(1);
            let cancel = CancellationToken::new();
            let ingested = db.bulk_upsert_with_progress(&records, &cancel, |progress| {
                if progress.phase != ScanPhase::Ingesting || progress.current % step == 0 {
                    info!(
                        "{:?} {}/{} ({:.0}%)",
                        progress.phase, progress.current, progress.total, progress.percentage
                    );
                }
            })?;
            print_json(&serde_json::json!({ "ingested": ingested }))
        }
        Command::ValidateSchema => print_json(&db.validate_schema()),
        Command::Cleanup => {
            let repair = PathRepair::new(config.repair.rewrite_rules.clone());
            print_json(&repair.cleanup_database(&mut db)?)
        }
        Command::ImportPlaylists { force } => {
            let sync = PlaylistSync::from_config(&config);
            let imports = if force {
                sync.force_reimport(&mut db)?
            } else {
                sync.import_all(&mut db)?
            };
            print_json(&imports)
        }
        Command::ExportPlaylists => {
            let sync = PlaylistSync::from_config(&config);
            print_json(&sync.export_all(&db)?)
        }
        Command::ReconcilePlaylists => {
            let sync = PlaylistSync::from_config(&config);
            print_json(&sync.reconcile_memberships(&mut db)?)
        }
        Command::Favorite { path } => print_json(&db.toggle_favorite(&path)?),
        Command::Play { path } => print_json(&db.add_play(&path)?),
        Command::Art { path } => {
            let resolver = Arc::new(AlbumArtResolver::from_config(&config));
            if let Err(err) = resolver.start_startup_sweep() {
                warn!("Could not start artwork cache sweep: {}", err);
            }
            let resolved = match db.track_by_path(&path)? {
                Some(track) => resolver.resolve_track(&track),
                None => resolver.resolve(&ArtRequest::new(Path::new(&path), None, None)),
            };
            print_json(&resolved)
        }
    }
}

fn main() -> ExitCode {
    let cli = CliArgs::parse();

    let mut clog = colog::default_builder();
    clog.filter(
        None,
        if cli.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        },
    );
    clog.init();

    std::panic::set_hook(Box::new(|panic_info| {
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        log::error!("panic in thread '{}': {}", thread_name, panic_info);
    }));

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{}", err);
            ExitCode::FAILURE
        }
    }
}
