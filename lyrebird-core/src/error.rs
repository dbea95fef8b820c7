use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    // Configuration errors
    #[error("Invalid config: {message}")]
    ConfigInvalid { message: String },

    #[error("Failed to parse config file: {0}")]
    ConfigParseError(#[from] toml::de::Error),

    // Playback errors
    #[error("Decoder error: {0}")]
    Decoder(#[from] DecoderError),

    #[error("Cannot start playback from an empty queue")]
    EmptyQueue,

    #[error("Engine is preparing a track, try again once it is ready")]
    Busy,

    #[error("No track is loaded")]
    NoTrackLoaded,

    #[error("Track {id} is not in the queue")]
    TrackNotInQueue { id: String },

    #[error("Track not found in catalog: {id}")]
    TrackNotFound { id: String },

    #[error("Load was superseded by a newer command")]
    Superseded,

    #[error("Engine has been shut down")]
    Shutdown,

    // Lyrics errors
    #[error(transparent)]
    Lyrics(#[from] LyricsError),

    // Catalog errors
    #[error("Catalog database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // IO errors
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Failure reported by a [`PlaybackDecoder`](crate::decoder::PlaybackDecoder).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecoderError {
    /// The media locator could not be opened.
    #[error("cannot open {locator}: {reason}")]
    Open { locator: String, reason: String },

    /// The stream was opened but its format is not decodable.
    #[error("unsupported media {locator}: {reason}")]
    Unsupported { locator: String, reason: String },

    /// Seeking within the loaded stream failed.
    #[error("seek failed: {reason}")]
    Seek { reason: String },

    /// The audio output device rejected a command.
    #[error("audio output failed: {reason}")]
    Output { reason: String },

    /// A transport command arrived before anything was loaded.
    #[error("no media loaded")]
    NotLoaded,
}

/// Why a piece of timed-lyric text was rejected as a whole.
///
/// Individual malformed lines never produce this error; they are skipped and
/// counted in the [`ParseReport`](crate::lrc::ParseReport).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("text contains no timing or metadata tags")]
    NoTimedContent,

    #[error("lyrics file is not valid UTF-8")]
    InvalidEncoding,
}

#[derive(Debug, Error)]
pub enum LyricsError {
    #[error("Failed to parse lyrics: {0}")]
    Parse(#[from] ParseError),

    #[error("Failed to read lyrics file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Lyrics storage failed: {reason}")]
    Storage { reason: String },
}

pub type Result<T> = std::result::Result<T, CoreError>;
