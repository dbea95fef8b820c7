//! Saved playback session.

use crate::catalog::Catalog;
use crate::engine::PlaybackEngine;
use crate::error::Result;
use crate::queue::RepeatMode;
use crate::time::DurationExt;
use crate::track::TrackId;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Queue and transport settings persisted between runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    /// Queue in canonical order
    pub queue: Vec<TrackId>,
    pub current: Option<TrackId>,
    #[serde(default)]
    pub position_ms: u64,
    #[serde(default)]
    pub shuffle: bool,
    #[serde(default)]
    pub repeat: RepeatMode,
    #[serde(default = "default_volume")]
    pub volume: f32,
}

const fn default_volume() -> f32 {
    1.0
}

impl SessionState {
    /// Capture the engine's queue and settings
    pub async fn capture(engine: &PlaybackEngine) -> Self {
        let (queue, current) = engine.queue_ids().await;
        let snapshot = engine.snapshot();
        let position_ms = snapshot
            .position
            .filter(|sample| Some(&sample.track_id) == current.as_ref())
            .map_or(0, |sample| sample.position.as_millis_u64());

        Self {
            queue,
            current,
            position_ms,
            shuffle: snapshot.shuffle,
            repeat: snapshot.repeat,
            volume: snapshot.volume,
        }
    }

    /// Write the session as JSON
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        info!("Saved session to {:?}", path);
        Ok(())
    }

    /// Read a saved session; `None` when no session was saved
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Rebuild the queue in `engine` from catalog tracks.
    ///
    /// Tracks missing from the catalog are dropped. Returns `false` when
    /// nothing could be restored.
    ///
    /// # Errors
    ///
    /// Returns an error if a catalog lookup or the engine load fails.
    pub async fn restore(&self, engine: &PlaybackEngine, catalog: &dyn Catalog) -> Result<bool> {
        let mut tracks = Vec::with_capacity(self.queue.len());
        for id in &self.queue {
            match catalog.lookup_track(id).await? {
                Some(track) => tracks.push(track),
                None => warn!("Dropping {} from restored queue: not in catalog", id),
            }
        }

        let start = self
            .current
            .as_ref()
            .and_then(|id| tracks.iter().find(|t| &t.id == id))
            .or_else(|| tracks.first())
            .cloned();
        let Some(start) = start else {
            return Ok(false);
        };
        let resume_here = Some(&start.id) == self.current.as_ref();

        engine.set_repeat_mode(self.repeat).await?;
        engine.set_shuffle(self.shuffle).await?;
        engine.set_volume(self.volume).await?;
        info!("Restoring session at {} ({} tracks)", start, tracks.len());
        engine.load(start, tracks).await?;

        if resume_here && self.position_ms > 0 {
            engine
                .seek_to(i64::try_from(self.position_ms).unwrap_or(i64::MAX))
                .await?;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SqliteCatalog;
    use crate::config::PlaybackConfig;
    use crate::decoder::fake::FakeFactory;
    use crate::queue::PlaybackQueue;
    use crate::track::Track;
    use std::sync::Arc;
    use std::time::Duration;

    fn track(id: &str) -> Track {
        Track::new(id, id, "Artist", "Album", Duration::from_secs(120), format!("/m/{id}.ogg"))
    }

    fn engine(factory: &FakeFactory) -> Arc<PlaybackEngine> {
        PlaybackEngine::with_queue(
            Arc::new(factory.clone()),
            PlaybackConfig::default(),
            PlaybackQueue::with_seed(3),
        )
    }

    #[tokio::test]
    async fn test_capture_and_restore() {
        let catalog = SqliteCatalog::open_in_memory().await.unwrap();
        let list: Vec<_> = ["a", "b", "c"].into_iter().map(track).collect();
        for t in &list {
            catalog.upsert_track(t).await.unwrap();
        }

        let factory = FakeFactory::new();
        let first = engine(&factory);
        first.load(list[1].clone(), list.clone()).await.unwrap();
        first.set_repeat_mode(RepeatMode::All).await.unwrap();
        first.set_volume(0.4).await.unwrap();
        first.seek_to(30_000).await.unwrap();

        let state = SessionState::capture(&first).await;
        assert_eq!(state.current, Some(TrackId::new("b")));
        assert_eq!(state.position_ms, 30_000);
        assert_eq!(state.queue.len(), 3);

        let second_factory = FakeFactory::new();
        let second = engine(&second_factory);
        assert!(state.restore(&second, &catalog).await.unwrap());

        let snapshot = second.snapshot();
        assert_eq!(snapshot.track.unwrap().id.as_str(), "b");
        assert_eq!(snapshot.repeat, RepeatMode::All);
        assert_eq!(second_factory.state().position, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_restore_with_unknown_tracks_does_nothing() {
        let catalog = SqliteCatalog::open_in_memory().await.unwrap();
        let factory = FakeFactory::new();
        let engine = engine(&factory);
        let state = SessionState {
            queue: vec![TrackId::new("gone")],
            current: Some(TrackId::new("gone")),
            position_ms: 0,
            shuffle: false,
            repeat: RepeatMode::Off,
            volume: 1.0,
        };
        assert!(!state.restore(&engine, &catalog).await.unwrap());
        assert!(factory.state().loads.is_empty());
    }

    #[test]
    fn test_save_and_load_file() {
        let path = std::env::temp_dir().join(format!("lyrebird-session-{}.json", std::process::id()));
        let state = SessionState {
            queue: vec![TrackId::new("a"), TrackId::new("b")],
            current: Some(TrackId::new("b")),
            position_ms: 1234,
            shuffle: true,
            repeat: RepeatMode::One,
            volume: 0.5,
        };
        state.save(&path).unwrap();
        assert_eq!(SessionState::load(&path).unwrap(), Some(state));
        std::fs::remove_file(&path).unwrap();

        assert_eq!(SessionState::load(&path).unwrap(), None);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let state: SessionState = serde_json::from_str(r#"{"queue":["a"],"current":null}"#).unwrap();
        assert_eq!(state.repeat, RepeatMode::Off);
        assert!((state.volume - 1.0).abs() < f32::EPSILON);
    }
}
