//! Persistent track catalog.
//!
//! The engine and recorders only see the [`Catalog`] trait. [`SqliteCatalog`]
//! is the on-disk implementation used by the application.

use crate::error::{CoreError, Result};
use crate::history::HistoryEvent;
use crate::time::{millis_from_i64, DurationExt};
use crate::track::{Track, TrackId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use std::path::Path;
use tokio_rusqlite::Connection;
use tracing::{debug, info};

/// Play statistics kept per track
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlayStats {
    pub play_count: u64,
    pub last_played: Option<DateTime<Utc>>,
}

/// Storage for tracks, listening history, play counts and lyrics
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn lookup_track(&self, id: &TrackId) -> Result<Option<Track>>;

    async fn list_tracks(&self) -> Result<Vec<Track>>;

    /// Insert a track or replace the stored metadata of an existing one
    async fn upsert_track(&self, track: &Track) -> Result<()>;

    async fn append_history(&self, event: &HistoryEvent) -> Result<()>;

    /// Count one completed play and update the last-played time
    async fn increment_play_count(&self, id: &TrackId) -> Result<()>;

    /// Most recent history entries first
    async fn recent_history(&self, limit: usize) -> Result<Vec<HistoryEvent>>;

    async fn play_stats(&self, id: &TrackId) -> Result<PlayStats>;

    /// Raw timed-lyric text stored for a track
    async fn lyrics_for(&self, id: &TrackId) -> Result<Option<String>>;

    async fn store_lyrics(&self, id: &TrackId, raw: &str) -> Result<()>;

    /// Returns whether anything was deleted
    async fn delete_lyrics(&self, id: &TrackId) -> Result<bool>;
}

const SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS tracks (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    artist TEXT NOT NULL,
    album TEXT NOT NULL,
    duration_ms INTEGER NOT NULL,
    locator TEXT NOT NULL,
    art TEXT,
    genre TEXT,
    track_number INTEGER,
    year INTEGER,
    play_count INTEGER NOT NULL DEFAULT 0,
    last_played INTEGER
);

-- Append-only listening history
CREATE TABLE IF NOT EXISTS history (
    id INTEGER PRIMARY KEY,
    track_id TEXT NOT NULL,
    played_at INTEGER NOT NULL,
    played_ms INTEGER
);

CREATE TABLE IF NOT EXISTS lyrics (
    track_id TEXT PRIMARY KEY,
    content TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_history_played_at ON history(played_at);
CREATE INDEX IF NOT EXISTS idx_tracks_artist_album ON tracks(artist, album);
";

const TRACK_COLUMNS: &str =
    "id, title, artist, album, duration_ms, locator, art, genre, track_number, year";

fn track_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Track> {
    Ok(Track {
        id: TrackId::new(row.get::<_, String>(0)?),
        title: row.get(1)?,
        artist: row.get(2)?,
        album: row.get(3)?,
        duration_ms: u64::try_from(row.get::<_, i64>(4)?).unwrap_or(0),
        locator: row.get(5)?,
        art: row.get(6)?,
        genre: row.get(7)?,
        track_number: row.get(8)?,
        year: row.get(9)?,
    })
}

fn timestamp_from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
}

/// SQLite-backed catalog
pub struct SqliteCatalog {
    conn: Connection,
}

impl SqliteCatalog {
    /// Open the catalog at the default location
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created or opened.
    pub async fn new() -> Result<Self> {
        Self::open(&crate::paths::catalog_db_path()).await
    }

    /// Open a catalog at a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub async fn open(path: &Path) -> Result<Self> {
        info!("Opening catalog database at {:?}", path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path).await?;
        conn.call(|conn| {
            conn.execute_batch(SCHEMA_SQL)?;
            conn.pragma_update(None, "journal_mode", "WAL")?;
            Ok(())
        })
        .await?;

        info!("Catalog database initialized");
        Ok(Self { conn })
    }

    /// Open a throwaway in-memory catalog
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        conn.call(|conn| {
            conn.execute_batch(SCHEMA_SQL)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    /// Checkpoint WAL for clean shutdown
    ///
    /// # Errors
    ///
    /// Returns an error if the WAL checkpoint fails.
    pub async fn checkpoint(&self) -> Result<()> {
        self.conn
            .call(|conn| {
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE)")?;
                Ok(())
            })
            .await
            .map_err(Into::into)
    }
}

#[async_trait]
impl Catalog for SqliteCatalog {
    async fn lookup_track(&self, id: &TrackId) -> Result<Option<Track>> {
        let id = id.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare_cached(&format!(
                    "SELECT {TRACK_COLUMNS} FROM tracks WHERE id = ?1"
                ))?;
                let track = stmt
                    .query_row(rusqlite::params![id], track_from_row)
                    .optional()?;
                Ok(track)
            })
            .await
            .map_err(Into::into)
    }

    async fn list_tracks(&self) -> Result<Vec<Track>> {
        self.conn
            .call(|conn| {
                let mut stmt = conn.prepare_cached(&format!(
                    "SELECT {TRACK_COLUMNS} FROM tracks ORDER BY artist, album, track_number, title"
                ))?;
                let tracks = stmt
                    .query_map([], track_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(tracks)
            })
            .await
            .map_err(Into::into)
    }

    async fn upsert_track(&self, track: &Track) -> Result<()> {
        debug!("Upserting track {}", track.id);
        let track = track.clone();
        let duration_ms = track.duration().as_millis_i64();

        self.conn
            .call(move |conn| {
                conn.execute(
                    r"
                    INSERT INTO tracks (id, title, artist, album, duration_ms, locator, art, genre, track_number, year)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                    ON CONFLICT(id) DO UPDATE SET
                        title = excluded.title,
                        artist = excluded.artist,
                        album = excluded.album,
                        duration_ms = excluded.duration_ms,
                        locator = excluded.locator,
                        art = excluded.art,
                        genre = excluded.genre,
                        track_number = excluded.track_number,
                        year = excluded.year
                ",
                    rusqlite::params![
                        track.id.as_str(),
                        track.title,
                        track.artist,
                        track.album,
                        duration_ms,
                        track.locator,
                        track.art,
                        track.genre,
                        track.track_number,
                        track.year
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(Into::into)
    }

    async fn append_history(&self, event: &HistoryEvent) -> Result<()> {
        debug!("Appending history entry for {}", event.track_id);
        let track_id = event.track_id.to_string();
        let played_at = event.played_at.timestamp_millis();
        let played_ms = event.played.map(|played| played.as_millis_i64());

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO history (track_id, played_at, played_ms) VALUES (?1, ?2, ?3)",
                    rusqlite::params![track_id, played_at, played_ms],
                )?;
                Ok(())
            })
            .await
            .map_err(Into::into)
    }

    async fn increment_play_count(&self, id: &TrackId) -> Result<()> {
        let key = id.to_string();
        let now = Utc::now().timestamp_millis();

        let updated = self
            .conn
            .call(move |conn| {
                let updated = conn.execute(
                    "UPDATE tracks SET play_count = play_count + 1, last_played = ?2 WHERE id = ?1",
                    rusqlite::params![key, now],
                )?;
                Ok(updated)
            })
            .await?;

        if updated == 0 {
            return Err(CoreError::TrackNotFound { id: id.to_string() });
        }
        Ok(())
    }

    async fn recent_history(&self, limit: usize) -> Result<Vec<HistoryEvent>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare_cached(
                    r"
                    SELECT track_id, played_at, played_ms
                    FROM history
                    ORDER BY played_at DESC, id DESC
                    LIMIT ?1
                ",
                )?;
                let events = stmt
                    .query_map(rusqlite::params![limit], |row| {
                        Ok(HistoryEvent {
                            track_id: TrackId::new(row.get::<_, String>(0)?),
                            played_at: timestamp_from_millis(row.get(1)?),
                            played: row.get::<_, Option<i64>>(2)?.map(millis_from_i64),
                        })
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(events)
            })
            .await
            .map_err(Into::into)
    }

    async fn play_stats(&self, id: &TrackId) -> Result<PlayStats> {
        let key = id.to_string();
        let stats = self
            .conn
            .call(move |conn| {
                let mut stmt = conn
                    .prepare_cached("SELECT play_count, last_played FROM tracks WHERE id = ?1")?;
                let stats = stmt
                    .query_row(rusqlite::params![key], |row| {
                        Ok(PlayStats {
                            play_count: u64::try_from(row.get::<_, i64>(0)?).unwrap_or(0),
                            last_played: row
                                .get::<_, Option<i64>>(1)?
                                .map(timestamp_from_millis),
                        })
                    })
                    .optional()?;
                Ok(stats)
            })
            .await?;

        stats.ok_or_else(|| CoreError::TrackNotFound { id: id.to_string() })
    }

    async fn lyrics_for(&self, id: &TrackId) -> Result<Option<String>> {
        let key = id.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare_cached("SELECT content FROM lyrics WHERE track_id = ?1")?;
                let content = stmt
                    .query_row(rusqlite::params![key], |row| row.get::<_, String>(0))
                    .optional()?;
                Ok(content)
            })
            .await
            .map_err(Into::into)
    }

    async fn store_lyrics(&self, id: &TrackId, raw: &str) -> Result<()> {
        info!("Storing lyrics for {}", id);
        let key = id.to_string();
        let content = raw.to_string();
        let now = Utc::now().timestamp_millis();

        self.conn
            .call(move |conn| {
                conn.execute(
                    r"
                    INSERT INTO lyrics (track_id, content, updated_at)
                    VALUES (?1, ?2, ?3)
                    ON CONFLICT(track_id) DO UPDATE SET
                        content = excluded.content,
                        updated_at = excluded.updated_at
                ",
                    rusqlite::params![key, content, now],
                )?;
                Ok(())
            })
            .await
            .map_err(Into::into)
    }

    async fn delete_lyrics(&self, id: &TrackId) -> Result<bool> {
        let key = id.to_string();
        let deleted = self
            .conn
            .call(move |conn| {
                let deleted =
                    conn.execute("DELETE FROM lyrics WHERE track_id = ?1", rusqlite::params![key])?;
                Ok(deleted)
            })
            .await?;
        Ok(deleted > 0)
    }
}
