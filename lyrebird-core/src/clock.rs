//! Periodic position ticker.
//!
//! At most one ticker task runs per clock. The engine starts it on entering
//! `Playing` and stops it before publishing any other state.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// What the ticker should do after a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockControl {
    Continue,
    Stop,
}

/// Boxed future returned by a tick callback
pub type TickFuture = Pin<Box<dyn Future<Output = ClockControl> + Send>>;

/// Callback invoked once per interval
pub type TickFn = Box<dyn Fn() -> TickFuture + Send + Sync>;

struct RunningClock {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Cancellable periodic ticker
pub struct PositionClock {
    interval: Duration,
    running: Option<RunningClock>,
}

impl PositionClock {
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(1)),
            running: None,
        }
    }

    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Start ticking. Returns `false` and does nothing if already running.
    ///
    /// The first tick fires one full interval after the start.
    pub fn start(&mut self, on_tick: TickFn) -> bool {
        if self.is_running() {
            return false;
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let interval = self.interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // interval() completes its first tick immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if on_tick().await == ClockControl::Stop {
                            break;
                        }
                    }
                }
            }
            debug!("Position clock stopped");
        });

        self.running = Some(RunningClock { cancel, handle });
        debug!("Position clock started ({:?} interval)", interval);
        true
    }

    /// Stop ticking. A tick already in flight is aborted.
    pub fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            running.cancel.cancel();
            running.handle.abort();
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| !running.handle.is_finished())
    }
}

impl Drop for PositionClock {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting(counter: &Arc<AtomicUsize>) -> TickFn {
        let counter = Arc::clone(counter);
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { ClockControl::Continue })
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_once_per_interval() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut clock = PositionClock::new(Duration::from_millis(1000));
        assert!(clock.start(counting(&counter)));

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        clock.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_idempotent() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut clock = PositionClock::new(Duration::from_millis(1000));
        assert!(clock.start(counting(&counter)));
        assert!(!clock.start(counting(&counter)));

        tokio::time::sleep(Duration::from_millis(2500)).await;
        // A second ticker would have doubled the count
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_prevents_further_ticks() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut clock = PositionClock::new(Duration::from_millis(500));
        clock.start(counting(&counter));

        tokio::time::sleep(Duration::from_millis(1200)).await;
        clock.stop();
        assert!(!clock.is_running());
        let seen = counter.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(counter.load(Ordering::SeqCst), seen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_control_ends_ticker() {
        let counter = Arc::new(AtomicUsize::new(0));
        let ticks = Arc::clone(&counter);
        let mut clock = PositionClock::new(Duration::from_millis(100));
        clock.start(Box::new(move || {
            let n = ticks.fetch_add(1, Ordering::SeqCst) + 1;
            Box::pin(async move {
                if n >= 2 {
                    ClockControl::Stop
                } else {
                    ClockControl::Continue
                }
            })
        }));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert!(!clock.is_running());

        // A stopped ticker can be started again
        assert!(clock.start(counting(&counter)));
    }
}
