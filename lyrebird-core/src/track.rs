use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Stable catalog identifier of a track.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(String);

impl TrackId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TrackId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TrackId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A playable track as known to the catalog.
///
/// Tracks are immutable values; the engine keeps copies of the loaded and
/// queued tracks and never writes them back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    pub title: String,
    pub artist: String,
    pub album: String,
    /// Duration in milliseconds as reported by the catalog (0 when unknown)
    pub duration_ms: u64,
    /// Filesystem path or URI handed to the decoder
    pub locator: String,
    /// Opaque reference to cover art owned by the art store
    pub art: Option<String>,
    pub genre: Option<String>,
    pub track_number: Option<u32>,
    pub year: Option<i32>,
}

impl Track {
    /// Create a new track with the required fields
    pub fn new(
        id: impl Into<TrackId>,
        title: impl Into<String>,
        artist: impl Into<String>,
        album: impl Into<String>,
        duration: Duration,
        locator: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            artist: artist.into(),
            album: album.into(),
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            locator: locator.into(),
            art: None,
            genre: None,
            track_number: None,
            year: None,
        }
    }

    #[must_use]
    pub fn with_art(mut self, art: impl Into<String>) -> Self {
        self.art = Some(art.into());
        self
    }

    #[must_use]
    pub fn with_genre(mut self, genre: impl Into<String>) -> Self {
        self.genre = Some(genre.into());
        self
    }

    #[must_use]
    pub const fn with_track_number(mut self, number: u32) -> Self {
        self.track_number = Some(number);
        self
    }

    #[must_use]
    pub const fn with_year(mut self, year: i32) -> Self {
        self.year = Some(year);
        self
    }

    /// Catalog duration of the track
    #[must_use]
    pub const fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.artist, self.title)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_new() {
        let track = Track::new(
            "t1",
            "Song",
            "Artist",
            "Album",
            Duration::from_secs(183),
            "/music/song.flac",
        );

        assert_eq!(track.id, TrackId::new("t1"));
        assert_eq!(track.duration_ms, 183_000);
        assert_eq!(track.duration(), Duration::from_secs(183));
        assert!(track.art.is_none());
        assert!(track.year.is_none());
    }

    #[test]
    fn test_track_builders() {
        let track = Track::new("t1", "Song", "Artist", "Album", Duration::ZERO, "a.mp3")
            .with_art("covers/t1.jpg")
            .with_genre("Jazz")
            .with_track_number(4)
            .with_year(1959);

        assert_eq!(track.art.as_deref(), Some("covers/t1.jpg"));
        assert_eq!(track.genre.as_deref(), Some("Jazz"));
        assert_eq!(track.track_number, Some(4));
        assert_eq!(track.year, Some(1959));
    }

    #[test]
    fn test_track_display() {
        let track = Track::new("t1", "So What", "Miles Davis", "Kind of Blue", Duration::ZERO, "x");
        assert_eq!(track.to_string(), "Miles Davis - So What");
    }

    #[test]
    fn test_track_id_serializes_transparently() {
        let json = serde_json::to_string(&TrackId::new("abc")).unwrap();
        assert_eq!(json, "\"abc\"");
    }
}
