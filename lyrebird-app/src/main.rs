mod console;
mod rodio_backend;

use clap::{Parser, Subcommand};
use lyrebird_core::{
    session_path, Catalog, CoreError, HistoryRecorder, LyricsError, LyricsService,
    LyrebirdConfig, PlaybackEngine, RepeatMode, SessionState, SqliteCatalog, Track, TrackId,
};
use rodio::OutputStreamBuilder;
use rodio_backend::RodioFactory;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// How long background tasks get to drain engine events after shutdown
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

const UNKNOWN_ARTIST: &str = "Unknown Artist";
const UNKNOWN_ALBUM: &str = "Unknown Album";

#[derive(Debug, thiserror::Error)]
enum AppError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Lyrics(#[from] LyricsError),

    #[error("Audio output unavailable: {0}")]
    Audio(#[from] rodio::StreamError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Parser)]
#[command(name = "lyrebird", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Play audio files with synchronized lyrics
    Play {
        /// Files to queue, in order
        files: Vec<PathBuf>,

        /// Resume the last saved session when no files are given
        #[arg(long)]
        resume: bool,

        #[arg(long)]
        shuffle: bool,

        /// off, one or all
        #[arg(long)]
        repeat: Option<RepeatMode>,
    },

    /// Manage stored lyrics
    Lyrics {
        #[command(subcommand)]
        action: LyricsAction,
    },

    /// Show recently played tracks
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// List tracks in the catalog with play counts
    Tracks,
}

#[derive(Debug, Subcommand)]
enum LyricsAction {
    /// Store an LRC file for a track (file path or track id)
    Import { track: String, file: PathBuf },
    /// Remove stored lyrics for a track
    Delete { track: String },
    /// Print the lyrics that would be shown for a track
    Show { track: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match LyrebirdConfig::load_or_create() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    init_tracing(config.logging.file);

    match run(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, config: LyrebirdConfig) -> Result<(), AppError> {
    let db_path = config.library.database_path();
    let catalog = Arc::new(SqliteCatalog::open(&db_path).await?);
    info!("Catalog opened at {}", db_path.display());

    let result = match cli.command {
        Command::Play {
            files,
            resume,
            shuffle,
            repeat,
        } => play(&config, Arc::clone(&catalog), &files, resume, shuffle, repeat).await,
        Command::Lyrics { action } => lyrics(&config, Arc::clone(&catalog), action).await,
        Command::History { limit } => history(catalog.as_ref(), limit).await,
        Command::Tracks => tracks(catalog.as_ref()).await,
    };

    if let Err(e) = catalog.checkpoint().await {
        warn!("Failed to checkpoint catalog: {}", e);
    }
    result
}

async fn play(
    config: &LyrebirdConfig,
    catalog: Arc<SqliteCatalog>,
    files: &[PathBuf],
    resume: bool,
    shuffle: bool,
    repeat: Option<RepeatMode>,
) -> Result<(), AppError> {
    let mut queue = Vec::with_capacity(files.len());
    for path in files {
        match register_file(catalog.as_ref(), path).await {
            Ok(track) => queue.push(track),
            Err(e) => warn!("Skipping {}: {}", path.display(), e),
        }
    }

    let mut stream = OutputStreamBuilder::open_default_stream()?;
    stream.log_on_drop(false);

    let engine = PlaybackEngine::new(
        Arc::new(RodioFactory::new(stream.mixer().clone())),
        config.playback.clone(),
    );

    let cancel_token = CancellationToken::new();

    // Set up Ctrl+C handler to trigger graceful shutdown
    let ctrlc_token = cancel_token.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received Ctrl+C, shutting down gracefully...");
        ctrlc_token.cancel();
    }) {
        error!("Failed to set Ctrl+C handler: {}", e);
    }

    // Both services stop when the engine's event channel closes, so the final
    // track transition still reaches them
    let lyrics = LyricsService::new(catalog.clone(), config.lyrics.clone(), None);
    engine.add_position_observer(lyrics.clone());
    let lyrics_handle = Arc::clone(&lyrics).start(engine.subscribe());

    let recorder = Arc::new(HistoryRecorder::new(catalog.clone(), None));
    let recorder_handle = Arc::clone(&recorder).start(engine.subscribe());

    let logger_handle = tokio::spawn(console::log_engine_events(engine.subscribe()));
    tokio::spawn(console::print_lyrics(lyrics.subscribe(), cancel_token.clone()));

    if queue.is_empty() {
        if resume {
            resume_session(&engine, catalog.as_ref()).await;
        } else {
            warn!("Nothing to play; pass files or --resume");
        }
    } else {
        if shuffle {
            engine.set_shuffle(true).await?;
        }
        if let Some(mode) = repeat {
            engine.set_repeat_mode(mode).await?;
        }
        let first = queue[0].clone();
        if let Err(e) = engine.load(first, queue).await {
            error!("Failed to start playback: {}", e);
        }
    }

    console::run(&engine, &lyrics, cancel_token.clone()).await;

    let session = SessionState::capture(&engine).await;
    if let Err(e) = session.save(&session_path()) {
        warn!("Failed to save session: {}", e);
    }

    engine.shutdown().await;
    drop(engine);
    cancel_token.cancel();

    drain(lyrics_handle, &lyrics.cancel_token()).await;
    drain(recorder_handle, &recorder.cancel_token()).await;
    logger_handle.abort();

    drop(stream);
    info!("Goodbye");
    Ok(())
}

async fn resume_session(engine: &PlaybackEngine, catalog: &dyn Catalog) {
    match SessionState::load(&session_path()) {
        Ok(Some(session)) => match session.restore(engine, catalog).await {
            Ok(true) => {}
            Ok(false) => warn!("Saved session has no playable tracks"),
            Err(e) => error!("Failed to restore session: {}", e),
        },
        Ok(None) => warn!("No saved session to resume"),
        Err(e) => error!("Failed to read saved session: {}", e),
    }
}

/// Wait for a service task, cancelling it if it does not finish in time
async fn drain(mut handle: JoinHandle<()>, cancel_token: &CancellationToken) {
    if tokio::time::timeout(DRAIN_TIMEOUT, &mut handle).await.is_err() {
        warn!("Background task did not finish, cancelling");
        cancel_token.cancel();
        let _ = handle.await;
    }
}

/// Look up a file in the catalog, adding it with placeholder metadata if new.
///
/// The canonical path is the track id; the duration is filled in by the
/// decoder on first load.
async fn register_file(catalog: &dyn Catalog, path: &Path) -> Result<Track, AppError> {
    let canonical = std::fs::canonicalize(path)?;
    let locator = canonical.to_string_lossy().into_owned();
    let id = TrackId::new(locator.clone());

    if let Some(track) = catalog.lookup_track(&id).await? {
        return Ok(track);
    }

    let title = canonical
        .file_stem()
        .map_or_else(|| locator.clone(), |stem| stem.to_string_lossy().into_owned());
    let track = Track::new(id, title, UNKNOWN_ARTIST, UNKNOWN_ALBUM, Duration::ZERO, locator);
    catalog.upsert_track(&track).await?;
    info!("Added {} to catalog", track);
    Ok(track)
}

/// Resolve a command-line track reference: an existing file path or a raw id
async fn resolve_track(catalog: &dyn Catalog, reference: &str) -> Result<Track, AppError> {
    let path = Path::new(reference);
    if path.exists() {
        return register_file(catalog, path).await;
    }
    let id = TrackId::new(reference);
    catalog
        .lookup_track(&id)
        .await?
        .ok_or_else(|| CoreError::TrackNotFound { id: id.to_string() }.into())
}

async fn lyrics(
    config: &LyrebirdConfig,
    catalog: Arc<SqliteCatalog>,
    action: LyricsAction,
) -> Result<(), AppError> {
    let service = LyricsService::new(catalog.clone(), config.lyrics.clone(), None);

    match action {
        LyricsAction::Import { track, file } => {
            let track = resolve_track(catalog.as_ref(), &track).await?;
            let document = service.import_lyrics_file(&track.id, &file).await?;
            println!("Imported {} lines for {}", document.len(), track);
        }
        LyricsAction::Delete { track } => {
            let track = resolve_track(catalog.as_ref(), &track).await?;
            if service.delete_lyrics(&track.id).await? {
                println!("Deleted lyrics for {track}");
            } else {
                println!("No stored lyrics for {track}");
            }
        }
        LyricsAction::Show { track } => {
            let track = resolve_track(catalog.as_ref(), &track).await?;
            match service.lyrics_for(&track).await? {
                Some(document) => print!("{}", document.serialize()),
                None => println!("No lyrics for {track}"),
            }
        }
    }
    Ok(())
}

async fn history(catalog: &dyn Catalog, limit: usize) -> Result<(), AppError> {
    let events = catalog.recent_history(limit).await?;
    if events.is_empty() {
        println!("No listening history yet");
    }

    for event in events {
        let name = catalog
            .lookup_track(&event.track_id)
            .await?
            .map_or_else(|| event.track_id.to_string(), |track| track.to_string());
        let played = event.played.map_or_else(
            || "-".to_string(),
            |played| lyrebird_core::DurationExt::format_clock(&played),
        );
        println!(
            "{}  {:>6}  {}",
            event.played_at.format("%Y-%m-%d %H:%M"),
            played,
            name
        );
    }
    Ok(())
}

async fn tracks(catalog: &dyn Catalog) -> Result<(), AppError> {
    let tracks = catalog.list_tracks().await?;
    if tracks.is_empty() {
        println!("Catalog is empty");
    }

    for track in tracks {
        let stats = catalog.play_stats(&track.id).await?;
        println!("{:>4} plays  {}  ({})", stats.play_count, track, track.id);
    }
    Ok(())
}

fn init_tracing(file_logging_enabled: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,symphonia=warn"));

    let fmt_layer = tracing_subscriber::fmt::layer();

    if file_logging_enabled {
        let log_path = lyrebird_core::paths::log_file_path();

        // Create data directory if needed
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        match File::create(&log_path) {
            Ok(file) => {
                let file_layer = tracing_subscriber::fmt::layer()
                    .with_writer(Arc::new(file))
                    .with_ansi(false);

                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt_layer)
                    .with(file_layer)
                    .init();

                return;
            }
            Err(e) => {
                eprintln!("Failed to create log file at {}: {e}", log_path.display());
            }
        }
    }

    // Fallback: console only
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_play_flags() {
        let cli = Cli::try_parse_from([
            "lyrebird", "play", "a.flac", "b.ogg", "--shuffle", "--repeat", "all",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Command::Play {
                ref files,
                resume: false,
                shuffle: true,
                repeat: Some(RepeatMode::All),
            } if files.len() == 2
        ));
    }

    #[test]
    fn test_cli_rejects_bad_repeat_mode() {
        assert!(Cli::try_parse_from(["lyrebird", "play", "--repeat", "sometimes"]).is_err());
    }

    #[tokio::test]
    async fn test_register_file_uses_canonical_path_as_id() {
        let catalog = SqliteCatalog::open_in_memory().await.unwrap();
        let path = std::env::temp_dir().join(format!("lyrebird-register-{}.ogg", std::process::id()));
        std::fs::write(&path, b"not really audio").unwrap();

        let track = register_file(&catalog, &path).await.unwrap();
        assert_eq!(track.title, format!("lyrebird-register-{}", std::process::id()));
        assert_eq!(track.id.as_str(), track.locator);

        let again = register_file(&catalog, &path).await.unwrap();
        assert_eq!(again, track);
        assert_eq!(catalog.list_tracks().await.unwrap().len(), 1);

        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn test_resolve_unknown_id_is_not_found() {
        let catalog = SqliteCatalog::open_in_memory().await.unwrap();
        let err = resolve_track(&catalog, "no-such-track").await.unwrap_err();
        assert!(matches!(err, AppError::Core(CoreError::TrackNotFound { .. })));
    }
}
