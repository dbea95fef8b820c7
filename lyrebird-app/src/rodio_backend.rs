//! `rodio` implementation of the engine's decoder interface.
//!
//! Each decoder owns one `Sink` on the shared output mixer. Decoding is set up
//! on the blocking pool because probing a file reads from disk.

use async_trait::async_trait;
use lyrebird_core::{DecoderError, DecoderFactory, PlaybackDecoder, Track};
use rodio::mixer::Mixer;
use rodio::{Decoder, Sink, Source};
use std::fs::File;
use std::io::BufReader;
use std::time::Duration;
use tracing::debug;

type FileDecoder = Decoder<BufReader<File>>;

fn open_decoder(locator: &str) -> Result<FileDecoder, DecoderError> {
    let file = File::open(locator).map_err(|e| DecoderError::Open {
        locator: locator.to_string(),
        reason: e.to_string(),
    })?;
    Decoder::new(BufReader::new(file)).map_err(|e| DecoderError::Unsupported {
        locator: locator.to_string(),
        reason: e.to_string(),
    })
}

/// Plays one track through a `rodio` sink
pub struct RodioDecoder {
    mixer: Mixer,
    sink: Option<Sink>,
}

impl RodioDecoder {
    #[must_use]
    pub const fn new(mixer: Mixer) -> Self {
        Self { mixer, sink: None }
    }
}

#[async_trait]
impl PlaybackDecoder for RodioDecoder {
    async fn load(&mut self, track: &Track) -> Result<Option<Duration>, DecoderError> {
        let locator = track.locator.clone();
        let source = tokio::task::spawn_blocking(move || open_decoder(&locator))
            .await
            .map_err(|e| DecoderError::Open {
                locator: track.locator.clone(),
                reason: e.to_string(),
            })??;

        let duration = source.total_duration();
        let sink = Sink::connect_new(&self.mixer);
        sink.pause();
        sink.append(source);
        self.sink = Some(sink);

        debug!("Opened {} ({:?})", track.locator, duration);
        Ok(duration)
    }

    fn play(&mut self) {
        if let Some(sink) = &self.sink {
            sink.play();
        }
    }

    fn pause(&mut self) {
        if let Some(sink) = &self.sink {
            sink.pause();
        }
    }

    fn seek(&mut self, position: Duration) -> Result<(), DecoderError> {
        let sink = self.sink.as_ref().ok_or(DecoderError::NotLoaded)?;
        sink.try_seek(position).map_err(|e| DecoderError::Seek {
            reason: e.to_string(),
        })
    }

    fn position(&self) -> Duration {
        self.sink.as_ref().map_or(Duration::ZERO, Sink::get_pos)
    }

    fn is_finished(&self) -> bool {
        self.sink.as_ref().is_some_and(Sink::empty)
    }

    fn set_volume(&mut self, volume: f32) {
        if let Some(sink) = &self.sink {
            sink.set_volume(volume);
        }
    }

    fn release(&mut self) {
        if let Some(sink) = self.sink.take() {
            sink.stop();
        }
    }
}

impl Drop for RodioDecoder {
    fn drop(&mut self) {
        self.release();
    }
}

/// Creates [`RodioDecoder`]s on one output mixer
pub struct RodioFactory {
    mixer: Mixer,
}

impl RodioFactory {
    #[must_use]
    pub const fn new(mixer: Mixer) -> Self {
        Self { mixer }
    }
}

impl DecoderFactory for RodioFactory {
    fn create(&self) -> Box<dyn PlaybackDecoder> {
        Box::new(RodioDecoder::new(self.mixer.clone()))
    }
}
