//! Playback state machine.
//!
//! [`PlaybackEngine`] owns the queue, the active decoder and the position
//! clock. Every command takes the engine lock, so commands are applied one
//! at a time. While a track is `Preparing` only `load`, `stop` and `shutdown`
//! are accepted; they supersede the pending preparation, and the decoder it
//! was opening is released as soon as its load returns.

use crate::clock::{ClockControl, PositionClock, TickFn, TickFuture};
use crate::config::PlaybackConfig;
use crate::decoder::{DecoderFactory, PlaybackDecoder};
use crate::error::{CoreError, Result};
use crate::queue::{PlaybackQueue, RepeatMode};
use crate::time::clamp_millis;
use crate::track::{Track, TrackId};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

/// Engine lifecycle state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum EngineState {
    #[default]
    Idle,
    Preparing,
    Ready,
    Playing,
    Paused,
    Ended,
    Error(String),
}

impl EngineState {
    #[must_use]
    pub const fn is_playing(&self) -> bool {
        matches!(self, Self::Playing)
    }

    /// Whether a decoder is loaded and accepts transport commands
    #[must_use]
    pub const fn has_media(&self) -> bool {
        matches!(self, Self::Ready | Self::Playing | Self::Paused)
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Preparing => f.write_str("preparing"),
            Self::Ready => f.write_str("ready"),
            Self::Playing => f.write_str("playing"),
            Self::Paused => f.write_str("paused"),
            Self::Ended => f.write_str("ended"),
            Self::Error(reason) => write!(f, "error: {reason}"),
        }
    }
}

/// Playback position of a loaded track
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionSample {
    pub track_id: TrackId,
    pub position: Duration,
}

impl PositionSample {
    #[must_use]
    pub const fn new(track_id: TrackId, position: Duration) -> Self {
        Self { track_id, position }
    }
}

/// Events emitted by the playback engine
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// The engine entered a new state
    StateChanged(EngineState),
    /// A track played to its end
    TrackCompleted { track: Track, full_duration: Duration },
    /// The active track changed; `played` is how far `from` got
    TrackTransition {
        from: Option<Track>,
        to: Option<Track>,
        played: Option<Duration>,
    },
    Position(PositionSample),
    ShuffleChanged(bool),
    RepeatModeChanged(RepeatMode),
    VolumeChanged(f32),
    Error { message: String },
}

/// Receives every position sample synchronously, on the publishing task
pub trait PositionObserver: Send + Sync {
    fn on_position(&self, sample: &PositionSample);
}

/// Point-in-time copy of the engine's watch cells
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSnapshot {
    pub state: EngineState,
    pub position: Option<PositionSample>,
    pub track: Option<Track>,
    pub shuffle: bool,
    pub repeat: RepeatMode,
    pub volume: f32,
}

struct EngineInner {
    state: EngineState,
    queue: PlaybackQueue,
    decoder: Option<Box<dyn PlaybackDecoder>>,
    /// Track owned by the current decoder generation
    current: Option<Track>,
    clock: PositionClock,
    /// Bumped whenever the loaded media changes; stale ticks and loads
    /// compare against it
    generation: u64,
    volume: f32,
    last_position: Duration,
    shut_down: bool,
}

impl EngineInner {
    fn accept(&self) -> Result<()> {
        if self.shut_down {
            return Err(CoreError::Shutdown);
        }
        if self.state == EngineState::Preparing {
            return Err(CoreError::Busy);
        }
        Ok(())
    }

    fn release_decoder(&mut self) {
        if let Some(mut decoder) = self.decoder.take() {
            decoder.release();
        }
    }

    /// Detach the current track for a `TrackTransition`.
    ///
    /// A track that never finished preparing produces no `from`.
    fn take_current(&mut self) -> (Option<Track>, Option<Duration>) {
        let track = self.current.take();
        if self.state == EngineState::Preparing {
            return (None, None);
        }
        let played = track.as_ref().map(|_| self.decoder_position());
        (track, played)
    }

    fn decoder_position(&self) -> Duration {
        self.decoder
            .as_ref()
            .map_or(self.last_position, |decoder| decoder.position())
    }
}

/// Playback engine: queue, decoder and position clock behind one lock
pub struct PlaybackEngine {
    inner: Mutex<EngineInner>,
    factory: Arc<dyn DecoderFactory>,
    config: PlaybackConfig,
    event_tx: broadcast::Sender<EngineEvent>,
    state_tx: watch::Sender<EngineState>,
    position_tx: watch::Sender<Option<PositionSample>>,
    track_tx: watch::Sender<Option<Track>>,
    shuffle_tx: watch::Sender<bool>,
    repeat_tx: watch::Sender<RepeatMode>,
    volume_tx: watch::Sender<f32>,
    observers: RwLock<Vec<Arc<dyn PositionObserver>>>,
    weak: Weak<Self>,
}

impl PlaybackEngine {
    /// Create a new engine with an entropy-seeded queue
    #[must_use]
    pub fn new(factory: Arc<dyn DecoderFactory>, config: PlaybackConfig) -> Arc<Self> {
        Self::with_queue(factory, config, PlaybackQueue::new())
    }

    /// Create a new engine around an existing (usually seeded) queue
    #[must_use]
    pub fn with_queue(
        factory: Arc<dyn DecoderFactory>,
        config: PlaybackConfig,
        mut queue: PlaybackQueue,
    ) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(256);
        let volume = config.initial_volume.clamp(0.0, 1.0);
        let repeat = queue.set_repeat_mode(Some(config.default_repeat));
        let shuffle = queue.is_shuffled();

        Arc::new_cyclic(|weak| Self {
            inner: Mutex::new(EngineInner {
                state: EngineState::Idle,
                queue,
                decoder: None,
                current: None,
                clock: PositionClock::new(config.tick_interval()),
                generation: 0,
                volume,
                last_position: Duration::ZERO,
                shut_down: false,
            }),
            factory,
            config,
            event_tx,
            state_tx: watch::channel(EngineState::Idle).0,
            position_tx: watch::channel(None).0,
            track_tx: watch::channel(None).0,
            shuffle_tx: watch::channel(shuffle).0,
            repeat_tx: watch::channel(repeat).0,
            volume_tx: watch::channel(volume).0,
            observers: RwLock::new(Vec::new()),
            weak: weak.clone(),
        })
    }

    /// Subscribe to engine events
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.event_tx.subscribe()
    }

    pub fn watch_state(&self) -> watch::Receiver<EngineState> {
        self.state_tx.subscribe()
    }

    pub fn watch_position(&self) -> watch::Receiver<Option<PositionSample>> {
        self.position_tx.subscribe()
    }

    pub fn watch_track(&self) -> watch::Receiver<Option<Track>> {
        self.track_tx.subscribe()
    }

    pub fn watch_shuffle(&self) -> watch::Receiver<bool> {
        self.shuffle_tx.subscribe()
    }

    pub fn watch_repeat(&self) -> watch::Receiver<RepeatMode> {
        self.repeat_tx.subscribe()
    }

    pub fn watch_volume(&self) -> watch::Receiver<f32> {
        self.volume_tx.subscribe()
    }

    /// Current values of every watch cell
    #[must_use]
    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            state: self.state_tx.borrow().clone(),
            position: self.position_tx.borrow().clone(),
            track: self.track_tx.borrow().clone(),
            shuffle: *self.shuffle_tx.borrow(),
            repeat: *self.repeat_tx.borrow(),
            volume: *self.volume_tx.borrow(),
        }
    }

    #[must_use]
    pub fn state(&self) -> EngineState {
        self.state_tx.borrow().clone()
    }

    /// Register a callback fed synchronously with every position sample
    pub fn add_position_observer(&self, observer: Arc<dyn PositionObserver>) {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    /// Queue contents in play order
    pub async fn queue_tracks(&self) -> Vec<Track> {
        self.inner.lock().await.queue.ordered().cloned().collect()
    }

    /// Queue contents in canonical order, plus the current track's id
    pub async fn queue_ids(&self) -> (Vec<TrackId>, Option<TrackId>) {
        let inner = self.inner.lock().await;
        (
            inner.queue.track_ids(),
            inner.queue.current().map(|track| track.id.clone()),
        )
    }

    /// Load `track` with `queue` as the new play queue.
    ///
    /// A track missing from `queue` is put in front of it. Playback starts
    /// once the decoder is ready when autoplay is configured.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Decoder`] if the media cannot be opened,
    /// [`CoreError::Superseded`] if a newer `load` or `stop` arrived while
    /// preparing, or [`CoreError::Shutdown`] after shutdown.
    pub async fn load(&self, track: Track, queue: Vec<Track>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.shut_down {
            return Err(CoreError::Shutdown);
        }

        let mut queue = queue;
        if !queue.iter().any(|t| t.id == track.id) {
            queue.insert(0, track.clone());
        }
        inner.queue.set_queue(queue, Some(&track.id))?;

        info!("Loading {} ({})", track, track.id);
        let (from, played) = inner.take_current();
        self.start_track(inner, track, from, played, self.config.autoplay)
            .await
    }

    /// Jump to a queued track by id
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TrackNotInQueue`] for an unknown id, or any
    /// error `load` can return.
    pub async fn play_track(&self, id: &TrackId) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.accept()?;
        let track = inner
            .queue
            .play_track(id)
            .ok_or_else(|| CoreError::TrackNotInQueue { id: id.to_string() })?;
        let (from, played) = inner.take_current();
        self.start_track(inner, track, from, played, true).await
    }

    /// Pause when playing, otherwise start or resume playback.
    ///
    /// After the queue has ended, playback restarts from the first track.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NoTrackLoaded`] when idle or failed, and
    /// [`CoreError::Busy`] while preparing.
    pub async fn toggle_play_pause(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.accept()?;

        match inner.state {
            EngineState::Playing => {
                if let Some(decoder) = inner.decoder.as_mut() {
                    decoder.pause();
                }
                let position = inner.decoder_position();
                inner.last_position = position;
                self.transition(&mut inner, EngineState::Paused);
                if let Some(track) = &inner.current {
                    self.publish_position(PositionSample::new(track.id.clone(), position));
                }
                Ok(())
            }
            EngineState::Ready | EngineState::Paused => {
                self.play_loaded(&mut inner);
                Ok(())
            }
            EngineState::Ended => {
                let track = inner.queue.rewind().ok_or(CoreError::EmptyQueue)?;
                info!("Restarting queue from {}", track);
                self.start_track(inner, track, None, None, true).await
            }
            EngineState::Idle | EngineState::Error(_) | EngineState::Preparing => {
                Err(CoreError::NoTrackLoaded)
            }
        }
    }

    /// Skip to the next track in the queue.
    ///
    /// Past the end of a non-repeating queue the engine ends.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::EmptyQueue`], [`CoreError::Busy`] or a load error.
    pub async fn skip_next(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.accept()?;
        if inner.queue.is_empty() {
            return Err(CoreError::EmptyQueue);
        }

        let play = self.config.autoplay || inner.state.is_playing();
        match inner.queue.skip_next() {
            Some(track) => {
                let (from, played) = inner.take_current();
                self.start_track(inner, track, from, played, play).await
            }
            None => {
                let (from, played) = inner.take_current();
                self.end_queue(&mut inner, from, played);
                Ok(())
            }
        }
    }

    /// Restart the current track, or go back one when near its start
    ///
    /// After the queue has ended, the last track is loaded again.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::EmptyQueue`], [`CoreError::Busy`] or a load error.
    pub async fn skip_previous(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.accept()?;
        if inner.queue.is_empty() {
            return Err(CoreError::EmptyQueue);
        }

        if inner.state.has_media() && inner.decoder_position() > self.config.restart_threshold()
        {
            debug!("Restarting current track");
            return self.seek_locked(&mut inner, Duration::ZERO);
        }

        let play = self.config.autoplay || inner.state.is_playing();
        if inner.state == EngineState::Ended {
            // The cursor still sits on the track that ended the queue
            let track = inner.queue.current().cloned().ok_or(CoreError::EmptyQueue)?;
            return self.start_track(inner, track, None, None, play).await;
        }
        let track = inner.queue.skip_previous().ok_or(CoreError::EmptyQueue)?;
        let (from, played) = inner.take_current();
        self.start_track(inner, track, from, played, play).await
    }

    /// Seek within the loaded track, clamped to `[0, duration]`.
    ///
    /// The new position is published immediately.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NoTrackLoaded`] without loaded media,
    /// [`CoreError::Busy`] while preparing, or [`CoreError::Decoder`] if
    /// the decoder rejects the seek (the engine then enters `Error`).
    pub async fn seek_to(&self, position_ms: i64) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.accept()?;
        if !inner.state.has_media() {
            return Err(CoreError::NoTrackLoaded);
        }

        let max = inner
            .current
            .as_ref()
            .map(Track::duration)
            .filter(|d| !d.is_zero())
            .unwrap_or(Duration::MAX);
        self.seek_locked(&mut inner, clamp_millis(position_ms, max))
    }

    /// Flip shuffle, keeping the current track
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Busy`] while preparing.
    pub async fn toggle_shuffle(&self) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        inner.accept()?;
        let shuffle = inner.queue.toggle_shuffle();
        self.shuffle_tx.send_replace(shuffle);
        self.emit(EngineEvent::ShuffleChanged(shuffle));
        Ok(shuffle)
    }

    /// Enable or disable shuffle
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Busy`] while preparing.
    pub async fn set_shuffle(&self, enabled: bool) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.accept()?;
        if inner.queue.is_shuffled() != enabled {
            inner.queue.set_shuffle(enabled);
            self.shuffle_tx.send_replace(enabled);
            self.emit(EngineEvent::ShuffleChanged(enabled));
        }
        Ok(())
    }

    /// Cycle Off -> One -> All -> Off
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Busy`] while preparing.
    pub async fn cycle_repeat_mode(&self) -> Result<RepeatMode> {
        self.apply_repeat_mode(None).await
    }

    /// Set the repeat mode directly
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Busy`] while preparing.
    pub async fn set_repeat_mode(&self, mode: RepeatMode) -> Result<RepeatMode> {
        self.apply_repeat_mode(Some(mode)).await
    }

    async fn apply_repeat_mode(&self, mode: Option<RepeatMode>) -> Result<RepeatMode> {
        let mut inner = self.inner.lock().await;
        inner.accept()?;
        let mode = inner.queue.set_repeat_mode(mode);
        self.repeat_tx.send_replace(mode);
        self.emit(EngineEvent::RepeatModeChanged(mode));
        Ok(mode)
    }

    /// Set output volume, clamped to `0.0..=1.0`
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Busy`] while preparing.
    pub async fn set_volume(&self, volume: f32) -> Result<f32> {
        let mut inner = self.inner.lock().await;
        inner.accept()?;
        let volume = if volume.is_nan() {
            0.0
        } else {
            volume.clamp(0.0, 1.0)
        };
        inner.volume = volume;
        if let Some(decoder) = inner.decoder.as_mut() {
            decoder.set_volume(volume);
        }
        self.volume_tx.send_replace(volume);
        self.emit(EngineEvent::VolumeChanged(volume));
        Ok(volume)
    }

    /// Stop playback and release the decoder; the queue is kept
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Shutdown`] after shutdown.
    pub async fn stop(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.shut_down {
            return Err(CoreError::Shutdown);
        }
        info!("Stopping playback");
        self.reset(&mut inner);
        Ok(())
    }

    /// Stop playback and refuse every later command. Idempotent.
    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        if inner.shut_down {
            return;
        }
        info!("Shutting down playback engine");
        self.reset(&mut inner);
        inner.shut_down = true;
    }

    /// React to the end of the current track's stream.
    ///
    /// Called by the position clock; also usable to simulate completion.
    /// Does nothing unless the engine is playing.
    ///
    /// # Errors
    ///
    /// Returns an error if the next track fails to load.
    pub async fn handle_track_finished(&self) -> Result<()> {
        self.finish_track(None).await
    }

    async fn finish_track(&self, expected_generation: Option<u64>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if expected_generation.is_some_and(|generation| generation != inner.generation) {
            debug!("Ignoring end of stream from a replaced track");
            return Ok(());
        }
        if !inner.state.is_playing() {
            debug!("Ignoring end of stream while {}", inner.state);
            return Ok(());
        }
        let Some(finished) = inner.current.take() else {
            return Ok(());
        };
        inner.clock.stop();

        let full_duration = if finished.duration_ms > 0 {
            finished.duration()
        } else {
            inner.decoder_position().max(inner.last_position)
        };
        info!("Finished {}", finished);
        self.emit(EngineEvent::TrackCompleted {
            track: finished.clone(),
            full_duration,
        });

        match inner.queue.next() {
            Some(next) => {
                self.start_track(inner, next, Some(finished), Some(full_duration), true)
                    .await
            }
            None => {
                inner.last_position = full_duration;
                self.end_queue(&mut inner, Some(finished), Some(full_duration));
                Ok(())
            }
        }
    }

    /// Replace the active media with `track` and wait for it to be ready.
    ///
    /// The lock is released while the decoder loads so that `stop` and
    /// newer loads can supersede it.
    async fn start_track(
        &self,
        mut inner: MutexGuard<'_, EngineInner>,
        track: Track,
        from: Option<Track>,
        played: Option<Duration>,
        play: bool,
    ) -> Result<()> {
        inner.clock.stop();
        inner.release_decoder();
        inner.generation += 1;
        let generation = inner.generation;
        inner.current = Some(track.clone());
        inner.last_position = Duration::ZERO;

        self.emit(EngineEvent::TrackTransition {
            from,
            to: Some(track.clone()),
            played,
        });
        self.track_tx.send_replace(Some(track.clone()));
        self.transition(&mut inner, EngineState::Preparing);
        self.publish_position(PositionSample::new(track.id.clone(), Duration::ZERO));

        let mut decoder = self.factory.create();
        drop(inner);

        let loaded = decoder.load(&track).await;

        let mut inner = self.inner.lock().await;
        if inner.generation != generation || inner.shut_down {
            debug!("Discarding superseded load of {}", track.id);
            decoder.release();
            return Err(CoreError::Superseded);
        }

        match loaded {
            Ok(probed) => {
                if let Some(duration) = probed.filter(|_| track.duration_ms == 0) {
                    let updated = Track {
                        duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
                        ..track
                    };
                    self.track_tx.send_replace(Some(updated.clone()));
                    inner.current = Some(updated);
                }
                decoder.set_volume(inner.volume);
                inner.decoder = Some(decoder);
                self.transition(&mut inner, EngineState::Ready);
                if play {
                    self.play_loaded(&mut inner);
                }
                Ok(())
            }
            Err(err) => {
                decoder.release();
                inner.current = None;
                let reason = err.to_string();
                error!("Failed to load {}: {}", track.id, reason);
                self.transition(&mut inner, EngineState::Error(reason.clone()));
                self.emit(EngineEvent::Error { message: reason });
                Err(err.into())
            }
        }
    }

    fn play_loaded(&self, inner: &mut EngineInner) {
        if let Some(decoder) = inner.decoder.as_mut() {
            decoder.play();
            self.transition(inner, EngineState::Playing);
        }
    }

    fn seek_locked(&self, inner: &mut EngineInner, target: Duration) -> Result<()> {
        let Some(track_id) = inner.current.as_ref().map(|track| track.id.clone()) else {
            return Err(CoreError::NoTrackLoaded);
        };
        let Some(decoder) = inner.decoder.as_mut() else {
            return Err(CoreError::NoTrackLoaded);
        };

        if let Err(err) = decoder.seek(target) {
            let reason = err.to_string();
            error!("Seek failed: {}", reason);
            inner.release_decoder();
            inner.current = None;
            self.track_tx.send_replace(None);
            self.transition(inner, EngineState::Error(reason.clone()));
            self.emit(EngineEvent::Error { message: reason });
            return Err(err.into());
        }

        inner.last_position = target;
        self.publish_position(PositionSample::new(track_id, target));
        Ok(())
    }

    /// Queue exhausted: release media and enter `Ended`
    fn end_queue(&self, inner: &mut EngineInner, from: Option<Track>, played: Option<Duration>) {
        inner.clock.stop();
        inner.release_decoder();
        inner.current = None;
        if from.is_some() {
            self.emit(EngineEvent::TrackTransition {
                from,
                to: None,
                played,
            });
        }
        self.transition(inner, EngineState::Ended);
    }

    fn reset(&self, inner: &mut EngineInner) {
        inner.clock.stop();
        let (from, played) = inner.take_current();
        inner.release_decoder();
        inner.generation += 1;
        inner.last_position = Duration::ZERO;

        if from.is_some() {
            self.emit(EngineEvent::TrackTransition {
                from,
                to: None,
                played,
            });
        }
        self.track_tx.send_replace(None);
        self.position_tx.send_replace(None);
        self.transition(inner, EngineState::Idle);
    }

    /// Apply a state change. The clock runs exactly while `Playing` and is
    /// stopped before any other state is published.
    fn transition(&self, inner: &mut EngineInner, state: EngineState) {
        if state.is_playing() {
            let on_tick = self.tick_fn(inner.generation);
            inner.clock.start(on_tick);
        } else {
            inner.clock.stop();
        }

        if inner.state == state {
            return;
        }
        debug!("Engine state {} -> {}", inner.state, state);
        inner.state = state.clone();
        self.state_tx.send_replace(state.clone());
        self.emit(EngineEvent::StateChanged(state));
    }

    fn tick_fn(&self, generation: u64) -> TickFn {
        let weak = self.weak.clone();
        Box::new(move || match weak.upgrade() {
            Some(engine) => engine.on_tick(generation),
            None => Box::pin(async { ClockControl::Stop }),
        })
    }

    fn on_tick(self: Arc<Self>, generation: u64) -> TickFuture {
        Box::pin(async move {
            let mut inner = self.inner.lock().await;
            if inner.generation != generation || !inner.state.is_playing() {
                return ClockControl::Stop;
            }
            let (Some(decoder), Some(track)) = (inner.decoder.as_ref(), inner.current.as_ref())
            else {
                return ClockControl::Stop;
            };

            let position = decoder.position();
            let finished = decoder.is_finished();
            let sample = PositionSample::new(track.id.clone(), position);
            inner.last_position = position;
            // Published under the lock so a concurrent seek or load cannot
            // be overwritten by this older sample
            self.publish_position(sample);
            drop(inner);

            if finished {
                // Runs on its own task: finishing stops this clock
                let engine = Arc::clone(&self);
                tokio::spawn(async move {
                    if let Err(e) = engine.finish_track(Some(generation)).await {
                        warn!("Failed to advance after track end: {}", e);
                    }
                });
                return ClockControl::Stop;
            }
            ClockControl::Continue
        })
    }

    fn publish_position(&self, sample: PositionSample) {
        self.position_tx.send_replace(Some(sample.clone()));
        {
            let observers = self.observers.read().unwrap_or_else(PoisonError::into_inner);
            for observer in observers.iter() {
                observer.on_position(&sample);
            }
        }
        self.emit(EngineEvent::Position(sample));
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.event_tx.send(event);
    }
}
