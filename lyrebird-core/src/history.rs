//! Listening history and play-count recorder.

use crate::catalog::Catalog;
use crate::engine::EngineEvent;
use crate::error::Result;
use crate::track::TrackId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One append-only history entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub track_id: TrackId,
    pub played_at: DateTime<Utc>,
    /// How much of the track was played, when known
    pub played: Option<Duration>,
}

/// Writes history and play counts from engine events
pub struct HistoryRecorder {
    catalog: Arc<dyn Catalog>,
    /// Track whose history entry is still open
    accruing: Mutex<Option<TrackId>>,
    cancel_token: CancellationToken,
}

impl HistoryRecorder {
    /// Create a new recorder
    ///
    /// # Arguments
    /// * `catalog` - Where history and play counts are written
    /// * `cancel_token` - Optional external cancellation token for graceful shutdown
    pub fn new(catalog: Arc<dyn Catalog>, cancel_token: Option<CancellationToken>) -> Self {
        Self {
            catalog,
            accruing: Mutex::new(None),
            cancel_token: cancel_token.unwrap_or_default(),
        }
    }

    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Start recording in a background task
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
        info!("Initializing history recorder");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!("History recorder shutting down");
                    break;
                }
                event = rx.recv() => {
                    match event {
                        Ok(event) => {
                            if let Err(e) = self.handle_event(&event).await {
                                warn!("Failed to record history: {}", e);
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("History recorder missed {} engine events", skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
    }

    /// Apply one engine event to the catalog.
    ///
    /// A transition away from the accruing track closes its entry; the
    /// destination becomes the new accruing track. Completions bump the
    /// play count.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog write fails. The accruing track is
    /// updated regardless.
    pub async fn handle_event(&self, event: &EngineEvent) -> Result<()> {
        match event {
            EngineEvent::TrackTransition { from, to, played } => {
                let closing = {
                    let mut accruing = self.accruing.lock().await;
                    let closing = from
                        .as_ref()
                        .filter(|track| accruing.as_ref() == Some(&track.id))
                        .map(|track| track.id.clone());
                    *accruing = to.as_ref().map(|track| track.id.clone());
                    closing
                };

                match closing {
                    Some(track_id) => {
                        debug!("Closing history entry for {}", track_id);
                        self.catalog
                            .append_history(&HistoryEvent {
                                track_id,
                                played_at: Utc::now(),
                                played: *played,
                            })
                            .await
                    }
                    None => Ok(()),
                }
            }
            EngineEvent::TrackCompleted { track, .. } => {
                self.catalog.increment_play_count(&track.id).await
            }
            _ => Ok(()),
        }
    }

    /// Track currently accruing play time
    pub async fn accruing(&self) -> Option<TrackId> {
        self.accruing.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SqliteCatalog;
    use crate::track::Track;

    fn track(id: &str) -> Track {
        Track::new(id, id, "Artist", "Album", Duration::from_secs(100), id)
    }

    fn transition(from: Option<&Track>, to: Option<&Track>, played_ms: u64) -> EngineEvent {
        EngineEvent::TrackTransition {
            from: from.cloned(),
            to: to.cloned(),
            played: from.map(|_| Duration::from_millis(played_ms)),
        }
    }

    async fn recorder() -> (HistoryRecorder, Arc<SqliteCatalog>) {
        let catalog = Arc::new(SqliteCatalog::open_in_memory().await.unwrap());
        for id in ["a", "b"] {
            catalog.upsert_track(&track(id)).await.unwrap();
        }
        let recorder = HistoryRecorder::new(catalog.clone(), None);
        (recorder, catalog)
    }

    #[tokio::test]
    async fn test_transition_closes_accruing_entry() {
        let (recorder, catalog) = recorder().await;
        let (a, b) = (track("a"), track("b"));

        recorder.handle_event(&transition(None, Some(&a), 0)).await.unwrap();
        assert_eq!(recorder.accruing().await, Some(TrackId::new("a")));

        recorder.handle_event(&transition(Some(&a), Some(&b), 42_000)).await.unwrap();
        let history = catalog.recent_history(10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].track_id, TrackId::new("a"));
        assert_eq!(history[0].played, Some(Duration::from_secs(42)));
        assert_eq!(recorder.accruing().await, Some(TrackId::new("b")));
    }

    #[tokio::test]
    async fn test_entry_appended_at_most_once() {
        let (recorder, catalog) = recorder().await;
        let a = track("a");

        recorder.handle_event(&transition(None, Some(&a), 0)).await.unwrap();
        recorder.handle_event(&transition(Some(&a), None, 1000)).await.unwrap();
        // A late duplicate for the same track is ignored
        recorder.handle_event(&transition(Some(&a), None, 1000)).await.unwrap();

        assert_eq!(catalog.recent_history(10).await.unwrap().len(), 1);
        assert_eq!(recorder.accruing().await, None);
    }

    #[tokio::test]
    async fn test_repeat_of_same_track_is_a_new_entry() {
        let (recorder, catalog) = recorder().await;
        let a = track("a");

        recorder.handle_event(&transition(None, Some(&a), 0)).await.unwrap();
        recorder.handle_event(&transition(Some(&a), Some(&a), 100_000)).await.unwrap();
        recorder.handle_event(&transition(Some(&a), None, 5_000)).await.unwrap();

        assert_eq!(catalog.recent_history(10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_completion_increments_play_count() {
        let (recorder, catalog) = recorder().await;
        let a = track("a");

        recorder
            .handle_event(&EngineEvent::TrackCompleted {
                track: a.clone(),
                full_duration: a.duration(),
            })
            .await
            .unwrap();

        let stats = catalog.play_stats(&a.id).await.unwrap();
        assert_eq!(stats.play_count, 1);
        assert!(stats.last_played.is_some());
    }

    #[tokio::test]
    async fn test_background_task_consumes_events() {
        let (recorder, catalog) = recorder().await;
        let recorder = Arc::new(recorder);
        let (tx, rx) = broadcast::channel(16);
        let cancel = recorder.cancel_token();
        let handle = Arc::clone(&recorder).start(rx);

        let a = track("a");
        tx.send(transition(None, Some(&a), 0)).unwrap();
        tx.send(transition(Some(&a), None, 3_000)).unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(catalog.recent_history(10).await.unwrap().len(), 1);
        assert!(!cancel.is_cancelled());
    }
}
