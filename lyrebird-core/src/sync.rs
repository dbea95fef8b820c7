//! Active lyric line tracking.
//!
//! [`SyncCursor`] turns position samples into a current line index and
//! publishes a [`LyricView`] whenever the highlighted line changes. While the
//! user scrolls the lyrics by hand, automatic updates are suspended; a grace
//! timer resumes them once scrolling stops.

use crate::lrc::{LyricDocument, LyricLine};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A lyric line with its highlight flag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncedLine {
    pub line: LyricLine,
    pub is_current: bool,
}

/// Snapshot of the lyrics as a UI should render them
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LyricView {
    pub lines: Vec<SyncedLine>,
    pub current: Option<LyricLine>,
    pub current_index: Option<usize>,
    /// True while automatic following is suspended by a manual scroll
    pub manual: bool,
}

impl LyricView {
    fn build(document: Option<&LyricDocument>, index: Option<usize>, manual: bool) -> Self {
        let Some(document) = document else {
            return Self {
                manual,
                ..Self::default()
            };
        };

        let lines = document
            .lines
            .iter()
            .enumerate()
            .map(|(i, line)| SyncedLine {
                line: line.clone(),
                is_current: Some(i) == index,
            })
            .collect();

        Self {
            lines,
            current: index.and_then(|i| document.lines.get(i).cloned()),
            current_index: index,
            manual,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

#[derive(Default)]
struct CursorState {
    document: Option<LyricDocument>,
    position: Duration,
    index: Option<usize>,
    manual: bool,
    /// Bumped on every manual scroll event; a resume timer only fires if
    /// the generation it captured is still current
    generation: u64,
    resume: Option<CancellationToken>,
}

impl CursorState {
    fn cancel_resume(&mut self) {
        if let Some(token) = self.resume.take() {
            token.cancel();
        }
    }
}

/// Current-line resolver with manual override
#[derive(Clone)]
pub struct SyncCursor {
    state: Arc<Mutex<CursorState>>,
    view_tx: Arc<watch::Sender<LyricView>>,
    grace: Duration,
}

impl SyncCursor {
    #[must_use]
    pub fn new(grace: Duration) -> Self {
        let (view_tx, _) = watch::channel(LyricView::default());
        Self {
            state: Arc::new(Mutex::new(CursorState::default())),
            view_tx: Arc::new(view_tx),
            grace,
        }
    }

    /// Subscribe to view updates
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<LyricView> {
        self.view_tx.subscribe()
    }

    /// Latest published view
    #[must_use]
    pub fn view(&self) -> LyricView {
        self.view_tx.borrow().clone()
    }

    #[must_use]
    pub fn current_index(&self) -> Option<usize> {
        self.lock().index
    }

    #[must_use]
    pub fn is_manual(&self) -> bool {
        self.lock().manual
    }

    /// Replace the document and resync at `position`.
    ///
    /// Any manual override or pending resume is discarded.
    pub fn set_document(&self, document: Option<LyricDocument>, position: Duration) {
        let mut state = self.lock();
        state.cancel_resume();
        state.generation += 1;
        state.manual = false;
        state.document = document;
        state.position = position;
        state.index = state
            .document
            .as_ref()
            .and_then(|doc| doc.current_line_index(position));
        self.publish(&state);
    }

    /// Drop the document
    pub fn clear(&self) {
        self.set_document(None, Duration::ZERO);
    }

    /// Feed a playback position. Ignored for line resolution while manual.
    pub fn on_position(&self, position: Duration) {
        let mut state = self.lock();
        state.position = position;
        if state.manual {
            return;
        }
        let index = state
            .document
            .as_ref()
            .and_then(|doc| doc.current_line_index(position));
        if index != state.index {
            state.index = index;
            self.publish(&state);
        }
    }

    /// The user started scrolling: stop following playback
    pub fn on_manual_scroll_started(&self) {
        let mut state = self.lock();
        state.cancel_resume();
        state.generation += 1;
        if !state.manual {
            state.manual = true;
            self.publish(&state);
        }
    }

    /// The user stopped scrolling: resume following after the grace period
    /// unless scrolling starts again first.
    pub fn on_manual_scroll_ended(&self) {
        let mut state = self.lock();
        if !state.manual {
            return;
        }
        state.cancel_resume();
        state.generation += 1;

        let generation = state.generation;
        let token = CancellationToken::new();
        state.resume = Some(token.clone());
        drop(state);

        let cursor = self.clone();
        let grace = self.grace;
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep(grace) => cursor.resume(generation),
            }
        });
    }

    fn resume(&self, generation: u64) {
        let mut state = self.lock();
        if state.generation != generation || !state.manual {
            debug!("Discarding stale lyric resume timer");
            return;
        }
        state.manual = false;
        state.resume = None;
        let position = state.position;
        state.index = state
            .document
            .as_ref()
            .and_then(|doc| doc.current_line_index(position));
        self.publish(&state);
    }

    fn publish(&self, state: &CursorState) {
        self.view_tx.send_replace(LyricView::build(
            state.document.as_ref(),
            state.index,
            state.manual,
        ));
    }

    fn lock(&self) -> MutexGuard<'_, CursorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
