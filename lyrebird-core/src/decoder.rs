//! Decoder abstraction driven by the playback engine.
//!
//! The engine never touches audio hardware directly. It asks a
//! [`DecoderFactory`] for a fresh [`PlaybackDecoder`] per loaded track and
//! releases it when the track is replaced, stopped or fails.

use crate::error::DecoderError;
use crate::track::Track;
use async_trait::async_trait;
use std::time::Duration;

/// A single-use decoder and output for one track
#[async_trait]
pub trait PlaybackDecoder: Send {
    /// Open the track's media and prepare output.
    ///
    /// Returns the stream duration when the container reports one.
    async fn load(&mut self, track: &Track) -> Result<Option<Duration>, DecoderError>;

    /// Start or resume output
    fn play(&mut self);

    /// Pause output, keeping the stream position
    fn pause(&mut self);

    /// Jump to an absolute position in the stream
    fn seek(&mut self, position: Duration) -> Result<(), DecoderError>;

    /// Current stream position
    fn position(&self) -> Duration;

    /// True once the end of the stream has been reached
    fn is_finished(&self) -> bool;

    /// Set output gain in `0.0..=1.0`
    fn set_volume(&mut self, volume: f32);

    /// Stop output and free the stream. Safe to call more than once.
    fn release(&mut self);
}

/// Creates decoders for the engine
pub trait DecoderFactory: Send + Sync {
    fn create(&self) -> Box<dyn PlaybackDecoder>;
}

impl<F> DecoderFactory for F
where
    F: Fn() -> Box<dyn PlaybackDecoder> + Send + Sync,
{
    fn create(&self) -> Box<dyn PlaybackDecoder> {
        self()
    }
}
