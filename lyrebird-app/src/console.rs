//! Line-based terminal controls and output.

use lyrebird_core::{
    DurationExt, EngineEvent, EngineState, LyricView, LyricsService, PlaybackEngine,
};
use std::io::BufRead;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const VOLUME_STEP: f32 = 0.1;
const SEEK_STEP_MS: i64 = 10_000;

pub const HELP: &str = "\
commands:
  p            play / pause
  n            next track
  b            previous track (restarts the track when past the start)
  s            stop
  f <secs>     seek to position
  > / <        seek forward / back 10s
  + / -        volume up / down
  z            toggle shuffle
  r            cycle repeat mode
  l            show lyrics around the current line
  L            list all lyrics (pauses line following briefly)
  i            status
  q            quit";

/// A parsed console command
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    TogglePause,
    Next,
    Previous,
    Stop,
    SeekTo(i64),
    SeekBy(i64),
    Volume(f32),
    Shuffle,
    Repeat,
    Lyrics,
    AllLyrics,
    Status,
    Help,
    Quit,
}

impl Command {
    /// Parse one input line
    ///
    /// # Errors
    ///
    /// Returns a message for unknown commands or malformed arguments.
    pub fn parse(line: &str) -> Result<Self, String> {
        let mut parts = line.split_whitespace();
        let Some(word) = parts.next() else {
            return Ok(Self::Status);
        };

        let command = match word {
            "p" | "pause" | "play" => Self::TogglePause,
            "n" | "next" => Self::Next,
            "b" | "prev" => Self::Previous,
            "s" | "stop" => Self::Stop,
            ">" => Self::SeekBy(SEEK_STEP_MS),
            "<" => Self::SeekBy(-SEEK_STEP_MS),
            "+" => Self::Volume(VOLUME_STEP),
            "-" => Self::Volume(-VOLUME_STEP),
            "z" | "shuffle" => Self::Shuffle,
            "r" | "repeat" => Self::Repeat,
            "l" | "lyrics" => Self::Lyrics,
            "L" => Self::AllLyrics,
            "i" | "status" => Self::Status,
            "h" | "?" | "help" => Self::Help,
            "q" | "quit" | "exit" => Self::Quit,
            "f" | "seek" => {
                let arg = parts.next().ok_or("seek needs a position in seconds")?;
                let secs: f64 = arg
                    .parse()
                    .map_err(|_| format!("invalid position: {arg}"))?;
                #[allow(clippy::cast_possible_truncation)]
                let millis = (secs * 1000.0).round() as i64;
                Self::SeekTo(millis)
            }
            other => return Err(format!("unknown command: {other} (h for help)")),
        };
        Ok(command)
    }
}

/// Read stdin lines on a plain thread; the channel closes at EOF
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Run console commands until `q`, end of input, or cancellation
pub async fn run(engine: &PlaybackEngine, lyrics: &LyricsService, cancel_token: CancellationToken) {
    let mut lines = spawn_stdin_reader();
    println!("{HELP}");

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => break,
            line = lines.recv() => {
                let Some(line) = line else {
                    info!("Input closed");
                    break;
                };
                match Command::parse(&line) {
                    Ok(Command::Quit) => break,
                    Ok(command) => execute(engine, lyrics, command).await,
                    Err(message) => println!("{message}"),
                }
            }
        }
    }
}

async fn execute(engine: &PlaybackEngine, lyrics: &LyricsService, command: Command) {
    let result = match command {
        Command::TogglePause => engine.toggle_play_pause().await,
        Command::Next => engine.skip_next().await,
        Command::Previous => engine.skip_previous().await,
        Command::Stop => engine.stop().await,
        Command::SeekTo(millis) => engine.seek_to(millis).await,
        Command::SeekBy(delta) => {
            let current = engine
                .snapshot()
                .position
                .map_or(0, |sample| sample.position.as_millis_i64());
            engine.seek_to(current.saturating_add(delta)).await
        }
        Command::Volume(delta) => {
            let volume = engine.snapshot().volume + delta;
            engine.set_volume(volume).await.map(|_| ())
        }
        Command::Shuffle => engine.toggle_shuffle().await.map(|_| ()),
        Command::Repeat => engine.cycle_repeat_mode().await.map(|_| ()),
        Command::Lyrics => {
            print_lines(&lyrics.visible_lines());
            Ok(())
        }
        Command::AllLyrics => {
            lyrics.on_manual_scroll_started();
            match lyrics.current_document() {
                Some(document) => print_lines(&document.lines),
                None => println!("(no lyrics)"),
            }
            lyrics.on_manual_scroll_ended();
            Ok(())
        }
        Command::Status => {
            print_status(engine).await;
            Ok(())
        }
        Command::Help => {
            println!("{HELP}");
            Ok(())
        }
        Command::Quit => Ok(()),
    };

    if let Err(e) = result {
        println!("{e}");
    }
}

fn print_lines(lines: &[lyrebird_core::LyricLine]) {
    if lines.is_empty() {
        println!("(no lyrics)");
    }
    for line in lines {
        println!("[{}] {}", line.timestamp.format_clock(), line.text);
    }
}

async fn print_status(engine: &PlaybackEngine) {
    let snapshot = engine.snapshot();
    let position = snapshot
        .position
        .map_or(Duration::ZERO, |sample| sample.position);

    match &snapshot.track {
        Some(track) => println!(
            "{} {} [{} / {}]",
            snapshot.state,
            track,
            position.format_clock(),
            track.duration().format_clock()
        ),
        None => println!("{}", snapshot.state),
    }
    println!(
        "shuffle: {}  repeat: {}  volume: {:.0}%  queue: {} tracks",
        if snapshot.shuffle { "on" } else { "off" },
        snapshot.repeat,
        snapshot.volume * 100.0,
        engine.queue_tracks().await.len()
    );
}

/// Print the current lyric line whenever it changes
pub async fn print_lyrics(mut rx: watch::Receiver<LyricView>, cancel_token: CancellationToken) {
    let mut last: Option<usize> = None;

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => break,
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = rx.borrow_and_update().clone();
                if view.manual || view.current_index == last {
                    continue;
                }
                last = view.current_index;
                if let Some(line) = view.current {
                    println!("♪ {}", line.text);
                }
            }
        }
    }
}

/// Log engine events until the engine goes away
pub async fn log_engine_events(mut rx: broadcast::Receiver<EngineEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => match &event {
                EngineEvent::StateChanged(EngineState::Error(message)) => {
                    error!("Playback error: {}", message);
                }
                EngineEvent::StateChanged(state) => {
                    info!("State: {}", state);
                }
                EngineEvent::TrackTransition { to: Some(track), .. } => {
                    info!("Now playing: {} [{}]", track, track.album);
                }
                EngineEvent::TrackTransition { to: None, .. } => {
                    info!("Playback stopped");
                }
                EngineEvent::TrackCompleted { track, .. } => {
                    info!("Finished: {}", track);
                }
                EngineEvent::Position(_) => {}
                EngineEvent::ShuffleChanged(enabled) => {
                    info!("Shuffle {}", if *enabled { "on" } else { "off" });
                }
                EngineEvent::RepeatModeChanged(mode) => {
                    info!("Repeat: {}", mode);
                }
                EngineEvent::VolumeChanged(volume) => {
                    info!("Volume: {:.0}%", volume * 100.0);
                }
                EngineEvent::Error { message } => {
                    error!("Engine error: {}", message);
                }
            },
            Err(broadcast::error::RecvError::Closed) => {
                info!("Engine event channel closed");
                break;
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("Missed {} engine events", n);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_letter_commands() {
        assert_eq!(Command::parse("p").unwrap(), Command::TogglePause);
        assert_eq!(Command::parse("n").unwrap(), Command::Next);
        assert_eq!(Command::parse("b").unwrap(), Command::Previous);
        assert_eq!(Command::parse(" q ").unwrap(), Command::Quit);
        assert_eq!(Command::parse("L").unwrap(), Command::AllLyrics);
    }

    #[test]
    fn test_parse_seek_in_seconds() {
        assert_eq!(Command::parse("f 42").unwrap(), Command::SeekTo(42_000));
        assert_eq!(Command::parse("seek 1.5").unwrap(), Command::SeekTo(1500));
        assert_eq!(Command::parse("f -3").unwrap(), Command::SeekTo(-3000));
        assert_eq!(Command::parse(">").unwrap(), Command::SeekBy(10_000));
    }

    #[test]
    fn test_parse_errors() {
        assert!(Command::parse("f").is_err());
        assert!(Command::parse("f abc").is_err());
        assert!(Command::parse("xyz").is_err());
    }

    #[test]
    fn test_blank_line_shows_status() {
        assert_eq!(Command::parse("   ").unwrap(), Command::Status);
    }
}
