//! Play queue with shuffle and repeat semantics.
//!
//! The queue keeps tracks in their canonical (insertion) order and a separate
//! iteration order, which is a permutation of canonical positions. Shuffle
//! only rewrites the iteration order, so the set of queued tracks never
//! changes and a track id always maps to the same canonical position.

use crate::error::{CoreError, Result};
use crate::track::{Track, TrackId};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Repeat behaviour applied when the queue advances
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepeatMode {
    /// Stop after the last track
    #[default]
    Off,
    /// Replay the current track when it finishes
    One,
    /// Wrap around to the first track after the last
    All,
}

impl RepeatMode {
    /// Next mode in the Off -> One -> All -> Off cycle
    #[must_use]
    pub const fn cycle(self) -> Self {
        match self {
            Self::Off => Self::One,
            Self::One => Self::All,
            Self::All => Self::Off,
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::One => "one",
            Self::All => "all",
        }
    }
}

impl fmt::Display for RepeatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RepeatMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "none" => Ok(Self::Off),
            "one" | "track" => Ok(Self::One),
            "all" | "queue" => Ok(Self::All),
            other => Err(format!("unknown repeat mode '{other}' (expected off, one or all)")),
        }
    }
}

/// Ordered track list with a current position, shuffle flag and repeat mode
#[derive(Debug, Clone)]
pub struct PlaybackQueue {
    /// Tracks in canonical order
    tracks: Vec<Track>,
    /// Iteration order: canonical positions in play order
    order: Vec<usize>,
    /// Position of the current track within `order`
    cursor: Option<usize>,
    shuffle: bool,
    repeat: RepeatMode,
    rng: StdRng,
}

impl Default for PlaybackQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackQueue {
    /// Create an empty queue seeded from OS entropy
    #[must_use]
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Create an empty queue with a deterministic shuffle sequence
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            tracks: Vec::new(),
            order: Vec::new(),
            cursor: None,
            shuffle: false,
            repeat: RepeatMode::Off,
            rng,
        }
    }

    /// Replace the queue contents.
    ///
    /// The current track becomes `start` when it is in `tracks`, otherwise
    /// the first track of the iteration order. With shuffle on, a fresh order
    /// is drawn with the start track placed first.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::EmptyQueue`] when `tracks` is empty and a start
    /// track was requested. An empty list without a start clears the queue.
    pub fn set_queue(&mut self, tracks: Vec<Track>, start: Option<&TrackId>) -> Result<()> {
        if tracks.is_empty() {
            if start.is_some() {
                return Err(CoreError::EmptyQueue);
            }
            self.clear();
            return Ok(());
        }

        let start_index = start.and_then(|id| tracks.iter().position(|t| &t.id == id));
        self.tracks = tracks;
        self.order = (0..self.tracks.len()).collect();

        if self.shuffle {
            self.order.shuffle(&mut self.rng);
            if let Some(index) = start_index {
                self.move_to_front(index);
            }
            self.cursor = Some(0);
        } else {
            self.cursor = Some(start_index.unwrap_or(0));
        }
        Ok(())
    }

    /// Remove every track
    pub fn clear(&mut self) {
        self.tracks.clear();
        self.order.clear();
        self.cursor = None;
    }

    /// Advance after a track finished on its own.
    ///
    /// `One` replays the current track, `All` wraps past the end, and `Off`
    /// returns `None` past the end while staying on the last track.
    pub fn next(&mut self) -> Option<Track> {
        self.advance(self.repeat)
    }

    /// Step back according to the repeat mode.
    ///
    /// At the first track `All` wraps to the last one; otherwise the first
    /// track is selected again so it restarts.
    pub fn previous(&mut self) -> Option<Track> {
        self.retreat(self.repeat)
    }

    /// User-requested skip forward: always moves, even under `One`
    pub fn skip_next(&mut self) -> Option<Track> {
        self.advance(self.skip_mode())
    }

    /// User-requested skip back: always moves, even under `One`
    pub fn skip_previous(&mut self) -> Option<Track> {
        self.retreat(self.skip_mode())
    }

    /// Move back to the first track of the iteration order
    pub fn rewind(&mut self) -> Option<Track> {
        if self.order.is_empty() {
            return None;
        }
        self.cursor = Some(0);
        self.current().cloned()
    }

    /// Make a specific queued track current
    pub fn play_track(&mut self, id: &TrackId) -> Option<Track> {
        let canonical = self.tracks.iter().position(|t| &t.id == id)?;
        self.cursor = self.order.iter().position(|&i| i == canonical);
        self.current().cloned()
    }

    /// Flip shuffle; the current track stays current in the new order.
    ///
    /// Returns the new shuffle flag.
    pub fn toggle_shuffle(&mut self) -> bool {
        self.set_shuffle(!self.shuffle);
        self.shuffle
    }

    /// Enable or disable shuffle without changing the current track
    pub fn set_shuffle(&mut self, enabled: bool) {
        if enabled == self.shuffle {
            return;
        }
        self.shuffle = enabled;
        if self.tracks.is_empty() {
            return;
        }

        let current = self.current_index();
        self.order = (0..self.tracks.len()).collect();

        if enabled {
            self.order.shuffle(&mut self.rng);
            if let Some(index) = current {
                self.move_to_front(index);
                self.cursor = Some(0);
            }
        } else {
            self.cursor = current;
        }
    }

    /// Set the repeat mode, or cycle Off -> One -> All -> Off when `None`
    pub fn set_repeat_mode(&mut self, mode: Option<RepeatMode>) -> RepeatMode {
        self.repeat = mode.unwrap_or_else(|| self.repeat.cycle());
        self.repeat
    }

    #[must_use]
    pub const fn repeat_mode(&self) -> RepeatMode {
        self.repeat
    }

    #[must_use]
    pub const fn is_shuffled(&self) -> bool {
        self.shuffle
    }

    /// The current track
    #[must_use]
    pub fn current(&self) -> Option<&Track> {
        self.current_index().map(|i| &self.tracks[i])
    }

    /// Canonical index of the current track
    #[must_use]
    pub fn current_index(&self) -> Option<usize> {
        self.cursor.map(|pos| self.order[pos])
    }

    /// Position of the current track within the iteration order
    #[must_use]
    pub const fn position(&self) -> Option<usize> {
        self.cursor
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: &TrackId) -> bool {
        self.tracks.iter().any(|t| &t.id == id)
    }

    /// Tracks in canonical order
    #[must_use]
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Tracks in iteration (play) order
    pub fn ordered(&self) -> impl Iterator<Item = &Track> + '_ {
        self.order.iter().map(|&i| &self.tracks[i])
    }

    /// Ids in canonical order
    #[must_use]
    pub fn track_ids(&self) -> Vec<TrackId> {
        self.tracks.iter().map(|t| t.id.clone()).collect()
    }

    const fn skip_mode(&self) -> RepeatMode {
        match self.repeat {
            RepeatMode::One => RepeatMode::All,
            other => other,
        }
    }

    fn advance(&mut self, mode: RepeatMode) -> Option<Track> {
        let pos = self.cursor?;
        if mode == RepeatMode::One {
            return self.current().cloned();
        }

        if pos + 1 < self.order.len() {
            self.cursor = Some(pos + 1);
        } else if mode == RepeatMode::All {
            self.cursor = Some(0);
        } else {
            return None;
        }
        self.current().cloned()
    }

    fn retreat(&mut self, mode: RepeatMode) -> Option<Track> {
        let pos = self.cursor?;
        if mode == RepeatMode::One {
            return self.current().cloned();
        }

        self.cursor = Some(if pos > 0 {
            pos - 1
        } else if mode == RepeatMode::All {
            self.order.len() - 1
        } else {
            0
        });
        self.current().cloned()
    }

    fn move_to_front(&mut self, canonical: usize) {
        if let Some(pos) = self.order.iter().position(|&i| i == canonical) {
            self.order.swap(0, pos);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn tracks(n: usize) -> Vec<Track> {
        (0..n)
            .map(|i| {
                Track::new(
                    format!("t{i}"),
                    format!("Song {i}"),
                    "Artist",
                    "Album",
                    Duration::from_secs(180),
                    format!("/music/{i}.flac"),
                )
            })
            .collect()
    }

    fn queue(n: usize) -> PlaybackQueue {
        let mut q = PlaybackQueue::with_seed(7);
        q.set_queue(tracks(n), None).unwrap();
        q
    }

    fn sorted_ids(q: &PlaybackQueue) -> Vec<String> {
        let mut ids: Vec<_> = q.ordered().map(|t| t.id.to_string()).collect();
        ids.sort();
        ids
    }

    #[test]
    fn test_set_queue_with_start_track() {
        let mut q = PlaybackQueue::with_seed(1);
        q.set_queue(tracks(4), Some(&TrackId::new("t2"))).unwrap();
        assert_eq!(q.current().unwrap().id.as_str(), "t2");
        assert_eq!(q.current_index(), Some(2));
    }

    #[test]
    fn test_set_queue_unknown_start_uses_first() {
        let mut q = PlaybackQueue::with_seed(1);
        q.set_queue(tracks(3), Some(&TrackId::new("missing"))).unwrap();
        assert_eq!(q.current_index(), Some(0));
    }

    #[test]
    fn test_set_queue_empty_with_start_fails() {
        let mut q = queue(3);
        let err = q.set_queue(Vec::new(), Some(&TrackId::new("t0"))).unwrap_err();
        assert!(matches!(err, CoreError::EmptyQueue));
        // Failed replacement leaves the old queue alone
        assert_eq!(q.len(), 3);
    }

    #[test]
    fn test_set_queue_empty_without_start_clears() {
        let mut q = queue(3);
        q.set_queue(Vec::new(), None).unwrap();
        assert!(q.is_empty());
        assert!(q.current().is_none());
        assert!(q.next().is_none());
        assert!(q.previous().is_none());
    }

    #[test]
    fn test_next_off_stops_at_end() {
        let mut q = queue(3);
        assert_eq!(q.next().unwrap().id.as_str(), "t1");
        assert_eq!(q.next().unwrap().id.as_str(), "t2");
        assert!(q.next().is_none());
        // Index stays on the last track
        assert_eq!(q.current_index(), Some(2));
    }

    #[test]
    fn test_next_all_wraps() {
        let mut q = queue(2);
        q.set_repeat_mode(Some(RepeatMode::All));
        assert_eq!(q.next().unwrap().id.as_str(), "t1");
        assert_eq!(q.next().unwrap().id.as_str(), "t0");
    }

    #[test]
    fn test_next_one_replays_current() {
        let mut q = queue(3);
        q.set_repeat_mode(Some(RepeatMode::One));
        assert_eq!(q.next().unwrap().id.as_str(), "t0");
        assert_eq!(q.current_index(), Some(0));
    }

    #[test]
    fn test_previous_at_start_restarts_under_off() {
        let mut q = queue(3);
        assert_eq!(q.previous().unwrap().id.as_str(), "t0");
        assert_eq!(q.current_index(), Some(0));
    }

    #[test]
    fn test_previous_at_start_wraps_under_all() {
        let mut q = queue(3);
        q.set_repeat_mode(Some(RepeatMode::All));
        assert_eq!(q.previous().unwrap().id.as_str(), "t2");
    }

    #[test]
    fn test_previous_moves_back() {
        let mut q = PlaybackQueue::with_seed(3);
        q.set_queue(tracks(3), Some(&TrackId::new("t2"))).unwrap();
        assert_eq!(q.previous().unwrap().id.as_str(), "t1");
    }

    #[test]
    fn test_skip_moves_under_repeat_one() {
        let mut q = queue(3);
        q.set_repeat_mode(Some(RepeatMode::One));
        assert_eq!(q.skip_next().unwrap().id.as_str(), "t1");
        assert_eq!(q.skip_previous().unwrap().id.as_str(), "t0");
        assert_eq!(q.skip_previous().unwrap().id.as_str(), "t2");
    }

    #[test]
    fn test_navigation_keeps_index_in_bounds() {
        for len in 1..6 {
            for mode in [RepeatMode::Off, RepeatMode::One, RepeatMode::All] {
                let mut q = queue(len);
                q.set_repeat_mode(Some(mode));
                for step in 0..(len * 3) {
                    if step % 3 == 2 {
                        q.previous();
                    } else {
                        q.next();
                    }
                    let index = q.current_index().unwrap();
                    assert!(index < len, "len={len} mode={mode} index={index}");
                }
            }
        }
    }

    #[test]
    fn test_shuffle_keeps_current_and_tracks() {
        let mut q = PlaybackQueue::with_seed(42);
        q.set_queue(tracks(10), Some(&TrackId::new("t4"))).unwrap();
        let before = sorted_ids(&q);

        assert!(q.toggle_shuffle());
        assert_eq!(q.current().unwrap().id.as_str(), "t4");
        assert_eq!(q.position(), Some(0));
        assert_eq!(sorted_ids(&q), before);

        assert!(!q.toggle_shuffle());
        assert_eq!(q.current().unwrap().id.as_str(), "t4");
        assert_eq!(q.position(), Some(4));
        assert_eq!(sorted_ids(&q), before);
    }

    #[test]
    fn test_shuffle_repeatedly_preserves_multiset() {
        let mut q = queue(8);
        let before = sorted_ids(&q);
        for _ in 0..20 {
            q.toggle_shuffle();
            q.next();
            assert_eq!(sorted_ids(&q), before);
            assert_eq!(q.len(), 8);
        }
    }

    #[test]
    fn test_shuffled_queue_visits_every_track_once() {
        let mut q = PlaybackQueue::with_seed(9);
        q.set_shuffle(true);
        q.set_queue(tracks(6), Some(&TrackId::new("t3"))).unwrap();
        assert_eq!(q.current().unwrap().id.as_str(), "t3");

        let mut seen = vec![q.current().unwrap().id.to_string()];
        while let Some(track) = q.next() {
            seen.push(track.id.to_string());
        }
        seen.sort();
        assert_eq!(seen, ["t0", "t1", "t2", "t3", "t4", "t5"]);
    }

    #[test]
    fn test_play_track_by_id_under_shuffle() {
        let mut q = queue(5);
        q.toggle_shuffle();
        assert_eq!(q.play_track(&TrackId::new("t3")).unwrap().id.as_str(), "t3");
        assert_eq!(q.current_index(), Some(3));
        assert!(q.play_track(&TrackId::new("nope")).is_none());
    }

    #[test]
    fn test_rewind_returns_to_first_in_order() {
        let mut q = queue(3);
        q.next();
        q.next();
        assert_eq!(q.rewind().unwrap().id.as_str(), "t0");
        assert!(PlaybackQueue::with_seed(0).rewind().is_none());
    }

    #[test]
    fn test_repeat_mode_cycles() {
        for start in [RepeatMode::Off, RepeatMode::One, RepeatMode::All] {
            let mut q = queue(1);
            q.set_repeat_mode(Some(start));
            let first = q.set_repeat_mode(None);
            let second = q.set_repeat_mode(None);
            let third = q.set_repeat_mode(None);
            assert_eq!(third, start);
            assert_ne!(first, second);
            assert_eq!(first, start.cycle());
        }
        assert_eq!(RepeatMode::Off.cycle(), RepeatMode::One);
        assert_eq!(RepeatMode::One.cycle(), RepeatMode::All);
        assert_eq!(RepeatMode::All.cycle(), RepeatMode::Off);
    }

    #[test]
    fn test_repeat_mode_does_not_change_tracks() {
        let mut q = queue(4);
        let before = q.track_ids();
        q.set_repeat_mode(None);
        q.set_repeat_mode(None);
        assert_eq!(q.track_ids(), before);
    }

    #[test]
    fn test_repeat_mode_from_str() {
        assert_eq!("ALL".parse::<RepeatMode>().unwrap(), RepeatMode::All);
        assert_eq!("one".parse::<RepeatMode>().unwrap(), RepeatMode::One);
        assert!("sometimes".parse::<RepeatMode>().is_err());
    }
}
