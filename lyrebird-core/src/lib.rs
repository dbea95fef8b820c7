pub mod catalog;
pub mod clock;
pub mod config;
pub mod decoder;
pub mod engine;
pub mod error;
pub mod history;
pub mod lrc;
pub mod lyrics;
pub mod paths;
pub mod queue;
pub mod session;
pub mod sync;
pub mod time;
pub mod track;

pub use catalog::{Catalog, PlayStats, SqliteCatalog};
pub use config::{LibraryConfig, LoggingConfig, LyricsConfig, LyrebirdConfig, PlaybackConfig};
pub use decoder::{DecoderFactory, PlaybackDecoder};
pub use engine::{
    EngineEvent, EngineSnapshot, EngineState, PlaybackEngine, PositionObserver, PositionSample,
};
pub use error::{CoreError, DecoderError, LyricsError, ParseError};
pub use history::{HistoryEvent, HistoryRecorder};
pub use lrc::{LyricDocument, LyricLine, LyricMetadata, ParseReport};
pub use lyrics::LyricsService;
pub use paths::{
    catalog_db_path, config_dir, config_path, data_dir, log_file_path, session_path,
    CATALOG_DB_FILE_NAME, CONFIG_DIR_NAME, CONFIG_FILE_NAME, LOG_FILE_NAME, SESSION_FILE_NAME,
};
pub use queue::{PlaybackQueue, RepeatMode};
pub use session::SessionState;
pub use sync::{LyricView, SyncCursor, SyncedLine};
pub use time::DurationExt;
pub use track::{Track, TrackId};
