//! Lyrics for the current track.
//!
//! [`LyricsService`] imports and deletes stored lyrics, loads the document
//! for each new track (catalog first, then a sidecar `.lrc` file) and keeps a
//! [`SyncCursor`] fed with playback positions.

use crate::catalog::Catalog;
use crate::config::LyricsConfig;
use crate::engine::{EngineEvent, PositionObserver, PositionSample};
use crate::error::{LyricsError, ParseError};
use crate::lrc::{LyricDocument, LyricLine};
use crate::sync::{LyricView, SyncCursor};
use crate::track::{Track, TrackId};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Default)]
struct ActiveLyrics {
    track: Option<Track>,
    document: Option<LyricDocument>,
    last_sample: Option<PositionSample>,
}

impl ActiveLyrics {
    fn is_current(&self, id: &TrackId) -> bool {
        self.track.as_ref().is_some_and(|track| &track.id == id)
    }

    /// Latest known position of `id`, or zero
    fn position_of(&self, id: &TrackId) -> Duration {
        self.last_sample
            .as_ref()
            .filter(|sample| &sample.track_id == id)
            .map_or(Duration::ZERO, |sample| sample.position)
    }
}

/// Lyrics import, lookup and synchronization for the playing track
pub struct LyricsService {
    catalog: Arc<dyn Catalog>,
    config: LyricsConfig,
    cursor: SyncCursor,
    active: Mutex<ActiveLyrics>,
    cancel_token: CancellationToken,
}

impl LyricsService {
    /// Create a new lyrics service
    ///
    /// # Arguments
    /// * `catalog` - Where imported lyrics are stored
    /// * `config` - Lyrics settings (grace period, sidecar lookup)
    /// * `cancel_token` - Optional external cancellation token for graceful shutdown
    pub fn new(
        catalog: Arc<dyn Catalog>,
        config: LyricsConfig,
        cancel_token: Option<CancellationToken>,
    ) -> Arc<Self> {
        Arc::new(Self {
            catalog,
            cursor: SyncCursor::new(config.manual_scroll_grace()),
            config,
            active: Mutex::new(ActiveLyrics::default()),
            cancel_token: cancel_token.unwrap_or_default(),
        })
    }

    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    #[must_use]
    pub const fn cursor(&self) -> &SyncCursor {
        &self.cursor
    }

    /// Subscribe to the synchronized line view
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<LyricView> {
        self.cursor.subscribe()
    }

    /// Document shown for the current track
    #[must_use]
    pub fn current_document(&self) -> Option<LyricDocument> {
        self.lock().document.clone()
    }

    /// Lines around the current position, using the configured window
    #[must_use]
    pub fn visible_lines(&self) -> Vec<LyricLine> {
        let active = self.lock();
        let (Some(document), Some(track)) = (&active.document, &active.track) else {
            return Vec::new();
        };
        document
            .visible_lines(
                active.position_of(&track.id),
                self.config.visible_before,
                self.config.visible_after,
            )
            .to_vec()
    }

    /// Parse and store lyrics for a track.
    ///
    /// Nothing is stored unless parsing succeeds. When the track is playing,
    /// its displayed lyrics are replaced.
    ///
    /// # Errors
    ///
    /// Returns [`LyricsError::Parse`] for untimed text and
    /// [`LyricsError::Storage`] if the catalog write fails.
    pub async fn import_lyrics(
        &self,
        track_id: &TrackId,
        raw: &str,
    ) -> Result<LyricDocument, LyricsError> {
        let document = LyricDocument::parse_strict(raw)?;

        self.catalog
            .store_lyrics(track_id, raw)
            .await
            .map_err(|e| LyricsError::Storage {
                reason: e.to_string(),
            })?;
        info!("Imported {} lyric lines for {}", document.len(), track_id);

        self.replace_if_current(track_id, Some(document.clone()));
        Ok(document)
    }

    /// Read a timed-lyric file and import it
    ///
    /// # Errors
    ///
    /// Returns [`LyricsError::Io`] if the file cannot be read,
    /// [`ParseError::InvalidEncoding`] for non UTF-8 content, or any error
    /// [`import_lyrics`](Self::import_lyrics) returns.
    pub async fn import_lyrics_file(
        &self,
        track_id: &TrackId,
        path: &Path,
    ) -> Result<LyricDocument, LyricsError> {
        let raw = read_lyrics_file(path).await?;
        self.import_lyrics(track_id, &raw).await
    }

    /// Remove stored lyrics. Returns whether anything was stored.
    ///
    /// # Errors
    ///
    /// Returns [`LyricsError::Storage`] if the catalog delete fails.
    pub async fn delete_lyrics(&self, track_id: &TrackId) -> Result<bool, LyricsError> {
        let deleted = self
            .catalog
            .delete_lyrics(track_id)
            .await
            .map_err(|e| LyricsError::Storage {
                reason: e.to_string(),
            })?;
        if deleted {
            info!("Deleted lyrics for {}", track_id);
        }
        self.replace_if_current(track_id, None);
        Ok(deleted)
    }

    /// Find lyrics for a track: stored lyrics first, then a sidecar file
    ///
    /// # Errors
    ///
    /// Returns [`LyricsError::Storage`] if the catalog lookup fails. A
    /// missing or unreadable sidecar is not an error.
    pub async fn lyrics_for(&self, track: &Track) -> Result<Option<LyricDocument>, LyricsError> {
        let stored = self
            .catalog
            .lyrics_for(&track.id)
            .await
            .map_err(|e| LyricsError::Storage {
                reason: e.to_string(),
            })?;
        if let Some(raw) = stored {
            debug!("Using stored lyrics for {}", track.id);
            return Ok(Some(LyricDocument::parse(&raw)));
        }

        if !self.config.sidecar {
            return Ok(None);
        }
        let path = sidecar_path(&track.locator);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(None);
        }
        match read_lyrics_file(&path).await {
            Ok(raw) => {
                debug!("Using sidecar lyrics {:?}", path);
                Ok(Some(LyricDocument::parse(&raw)))
            }
            Err(e) => {
                warn!("Ignoring sidecar lyrics: {}", e);
                Ok(None)
            }
        }
    }

    /// Switch to the lyrics of `track`, or clear them for `None`
    pub async fn activate(&self, track: Option<&Track>) {
        {
            let mut active = self.lock();
            active.track = track.cloned();
            active.document = None;
        }
        self.cursor.clear();

        let Some(track) = track else {
            return;
        };

        let document = match self.lyrics_for(track).await {
            Ok(document) => document,
            Err(e) => {
                warn!("Failed to load lyrics for {}: {}", track.id, e);
                None
            }
        };
        match &document {
            Some(doc) => info!("Loaded {} lyric lines for {}", doc.len(), track),
            None => info!("No lyrics found for {}", track),
        }

        // A newer track may have been activated while loading
        self.replace_if_current(&track.id, document);
    }

    /// Start following engine track changes in a background task
    #[must_use]
    pub fn start(
        self: Arc<Self>,
        events: broadcast::Receiver<EngineEvent>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run(events).await;
        })
    }

    async fn run(&self, mut rx: broadcast::Receiver<EngineEvent>) {
        info!("Initializing lyrics handler");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!("Lyrics handler shutting down");
                    break;
                }
                event = rx.recv() => {
                    match event {
                        Ok(EngineEvent::TrackTransition { to, .. }) => {
                            self.activate(to.as_ref()).await;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                        _ => {
                            // Missed some events (Lagged) or other event types, continue
                        }
                    }
                }
            }
        }
    }

    pub fn on_manual_scroll_started(&self) {
        self.cursor.on_manual_scroll_started();
    }

    pub fn on_manual_scroll_ended(&self) {
        self.cursor.on_manual_scroll_ended();
    }

    fn replace_if_current(&self, track_id: &TrackId, document: Option<LyricDocument>) {
        let mut active = self.lock();
        if !active.is_current(track_id) {
            return;
        }
        let position = active.position_of(track_id);
        active.document.clone_from(&document);
        self.cursor.set_document(document, position);
    }

    fn lock(&self) -> MutexGuard<'_, ActiveLyrics> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PositionObserver for LyricsService {
    fn on_position(&self, sample: &PositionSample) {
        let mut active = self.lock();
        let current = active.is_current(&sample.track_id);
        active.last_sample = Some(sample.clone());
        drop(active);

        if current {
            self.cursor.on_position(sample.position);
        }
    }
}

/// `<media>.lrc` next to a media file
fn sidecar_path(locator: &str) -> PathBuf {
    Path::new(locator).with_extension("lrc")
}

async fn read_lyrics_file(path: &Path) -> Result<String, LyricsError> {
    let bytes = tokio::fs::read(path).await.map_err(|source| {
        warn!("Failed to read lyrics file {:?}: {}", path, source);
        LyricsError::Io {
            path: path.to_path_buf(),
            source,
        }
    })?;
    String::from_utf8(bytes).map_err(|_| ParseError::InvalidEncoding.into())
}
