//! Timebase (§4.D): a fixed-interval tick clock.
//!
//! Converts instants to tick indices and emits `Tick` events in order,
//! exactly once, catching up on wall-clock skew up to a cap before marking
//! the session degraded. The emission loop is a cancellable
//! `tokio::time::interval` loop, exposed via `async-stream` as a `Stream`
//! the Coordinator drives directly rather than as a bare spawned task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use chrono::{Duration as ChronoDuration, Utc};
use futures::stream::Stream;
use tokio_util::sync::CancellationToken;

use crate::constants::MAX_CATCH_UP_TICKS;
use crate::model::Instant;

/// A single fixed-interval instant produced by the Timebase.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tick {
    pub index: u64,
    pub instant: Instant,
}

/// What the tick stream yields: either an in-order tick, or a notice that
/// the catch-up cap was exceeded and the session should enter degraded mode.
#[derive(Debug, Clone, Copy)]
pub enum TickEvent {
    Tick(Tick),
    /// Wall-clock skew exceeded [`MAX_CATCH_UP_TICKS`]; recording resumes at
    /// `resumed_at_index` with a gap rather than replaying every missed tick.
    Degraded { resumed_at_index: u64 },
}

/// Fixed-interval tick clock. `tickOf(instant) = floor((instant - start) / interval)`.
pub struct Timebase {
    start_instant: Instant,
    interval_seconds: u64,
    next_index: AtomicU64,
}

impl Timebase {
    #[must_use]
    pub fn new(start_instant: Instant, interval_seconds: u64) -> Self {
        assert!(interval_seconds >= 1, "interval_seconds must be >= 1");
        Self {
            start_instant,
            interval_seconds,
            next_index: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn start_instant(&self) -> Instant {
        self.start_instant
    }

    #[must_use]
    pub fn interval_seconds(&self) -> u64 {
        self.interval_seconds
    }

    /// `tick_i.instant == startInstant + i * intervalSeconds`.
    #[must_use]
    pub fn instant_of(&self, index: u64) -> Instant {
        self.start_instant + ChronoDuration::seconds((index * self.interval_seconds) as i64)
    }

    /// `tickOf(instant) = floor((instant - startInstant) / intervalSeconds)`.
    /// Instants before `start_instant` map to a negative index.
    #[must_use]
    pub fn tick_of(&self, instant: Instant) -> i64 {
        let delta_secs = (instant - self.start_instant).num_seconds();
        delta_secs.div_euclid(self.interval_seconds as i64)
    }

    /// Number of ticks emitted so far.
    #[must_use]
    pub fn tick_count(&self) -> u64 {
        self.next_index.load(Ordering::SeqCst)
    }

    /// Advances the clock to `now`, returning the ticks due since the last
    /// call. If more than [`MAX_CATCH_UP_TICKS`] are due, skips straight to
    /// the current tick (recording only it) and reports degraded. Exposed at
    /// `pub(crate)` so the Coordinator can force a final tick on `endSession`.
    pub(crate) fn advance(&self, now: Instant) -> (Vec<Tick>, bool) {
        let current = self.tick_of(now).max(0) as u64;
        let next = self.next_index.load(Ordering::SeqCst);
        if current < next {
            return (Vec::new(), false);
        }
        let due_count = current - next + 1;
        if due_count > MAX_CATCH_UP_TICKS {
            self.next_index.store(current + 1, Ordering::SeqCst);
            return (vec![Tick { index: current, instant: self.instant_of(current) }], true);
        }
        let ticks = (next..=current)
            .map(|idx| Tick { index: idx, instant: self.instant_of(idx) })
            .collect();
        self.next_index.store(current + 1, Ordering::SeqCst);
        (ticks, false)
    }
}

/// Drives `timebase` off a wall-clock interval timer, yielding [`TickEvent`]s
/// until `cancel` fires. The interval fires more often than strictly
/// necessary is harmless: `advance` is idempotent between due ticks.
pub fn tick_stream(
    timebase: Arc<Timebase>,
    cancel: CancellationToken,
) -> impl Stream<Item = TickEvent> {
    stream! {
        let mut interval = tokio::time::interval(Duration::from_secs(timebase.interval_seconds()));
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let now = Utc::now();
                    let (ticks, degraded) = timebase.advance(now);
                    for t in ticks {
                        yield TickEvent::Tick(t);
                    }
                    if degraded {
                        yield TickEvent::Degraded { resumed_at_index: timebase.tick_count().saturating_sub(1) };
                    }
                }
            }
        }
    }
}
