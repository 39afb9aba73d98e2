//! Time points, durations, and the injected clock capability.
//!
//! Data stores schedule per-key expirations through a [`Clock`] rather than
//! calling into the runtime directly. Production endpoints run on the
//! wall-clock implementation; tests drive a simulated clock so expiration
//! behavior stays deterministic.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A signed span of time with nanosecond resolution.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Timespan {
    nanos: i64,
}

impl Timespan {
    /// A span of zero length.
    pub const ZERO: Timespan = Timespan { nanos: 0 };

    /// Create a span from raw nanoseconds.
    pub const fn from_nanos(nanos: i64) -> Self {
        Self { nanos }
    }

    /// Create a span from milliseconds.
    pub const fn from_millis(ms: i64) -> Self {
        Self {
            nanos: ms * 1_000_000,
        }
    }

    /// Create a span from whole seconds.
    pub const fn from_secs(secs: i64) -> Self {
        Self {
            nanos: secs * 1_000_000_000,
        }
    }

    /// Raw nanosecond count.
    pub const fn as_nanos(self) -> i64 {
        self.nanos
    }

    /// Whether the span is negative.
    pub const fn is_negative(self) -> bool {
        self.nanos < 0
    }

    /// Convert to a `std::time::Duration`, clamping negative spans to zero.
    pub fn to_duration(self) -> Duration {
        if self.nanos <= 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(self.nanos as u64)
        }
    }
}

impl From<Duration> for Timespan {
    fn from(d: Duration) -> Self {
        Self {
            nanos: d.as_nanos().min(i64::MAX as u128) as i64,
        }
    }
}

impl std::ops::Add for Timespan {
    type Output = Timespan;

    fn add(self, rhs: Timespan) -> Timespan {
        Timespan {
            nanos: self.nanos.saturating_add(rhs.nanos),
        }
    }
}

impl std::fmt::Display for Timespan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ns", self.nanos)
    }
}

/// A point in time, stored as nanoseconds since the UNIX epoch.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Timestamp {
    nanos: i64,
}

impl Timestamp {
    /// The UNIX epoch.
    pub const EPOCH: Timestamp = Timestamp { nanos: 0 };

    /// Create a timestamp from raw nanoseconds since the epoch.
    pub const fn from_nanos(nanos: i64) -> Self {
        Self { nanos }
    }

    /// Raw nanosecond count since the epoch.
    pub const fn as_nanos(self) -> i64 {
        self.nanos
    }

    /// The current wall-clock time.
    pub fn now() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos()
            .min(i64::MAX as u128) as i64;
        Self { nanos }
    }

    /// The span from `earlier` to `self` (negative if `earlier` is later).
    pub const fn since(self, earlier: Timestamp) -> Timespan {
        Timespan {
            nanos: self.nanos - earlier.nanos,
        }
    }
}

impl std::ops::Add<Timespan> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Timespan) -> Timestamp {
        Timestamp {
            nanos: self.nanos.saturating_add(rhs.as_nanos()),
        }
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "@{}", self.nanos)
    }
}

/// Callback fired when a scheduled reminder comes due.
pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

/// Clock capability injected into data stores.
///
/// `send_later` fires the callback once the given span has elapsed. The
/// callback typically forwards a message to the scheduling task's mailbox;
/// the clock itself never touches store state.
pub trait Clock: Send + Sync {
    /// Current time according to this clock.
    fn now(&self) -> Timestamp;

    /// Run `callback` after `after` has elapsed. Spans that are zero or
    /// negative fire as soon as possible.
    fn send_later(&self, after: Timespan, callback: TimerCallback);
}

/// Wall-clock implementation backed by the tokio timer wheel.
///
/// Must be used from within a tokio runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealClock;

impl RealClock {
    pub fn new() -> Self {
        Self
    }
}

impl Clock for RealClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }

    fn send_later(&self, after: Timespan, callback: TimerCallback) {
        let delay = after.to_duration();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            callback();
        });
    }
}

struct PendingTimer {
    due: Timestamp,
    seq: u64,
    callback: TimerCallback,
}

impl PartialEq for PendingTimer {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for PendingTimer {}

impl PartialOrd for PendingTimer {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingTimer {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.due.cmp(&other.due).then(self.seq.cmp(&other.seq))
    }
}

/// Simulated clock for deterministic tests.
///
/// Time only moves when `advance` or `advance_to` is called; due callbacks
/// run synchronously inside the advancing call, in due-time order.
pub struct SimClock {
    state: Mutex<SimClockState>,
}

struct SimClockState {
    now: Timestamp,
    next_seq: u64,
    pending: BinaryHeap<Reverse<PendingTimer>>,
}

impl SimClock {
    /// Create a simulated clock starting at the given time.
    pub fn starting_at(now: Timestamp) -> Self {
        Self {
            state: Mutex::new(SimClockState {
                now,
                next_seq: 0,
                pending: BinaryHeap::new(),
            }),
        }
    }

    /// Number of reminders that have not fired yet.
    pub fn pending_timers(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Move the clock forward by `span`, firing every reminder that comes
    /// due on the way.
    pub fn advance(&self, span: Timespan) {
        let target = self.state.lock().now + span;
        self.advance_to(target);
    }

    /// Move the clock forward to `target`, firing due reminders in order.
    ///
    /// Callbacks run outside the internal lock, so a firing reminder may
    /// schedule further reminders.
    pub fn advance_to(&self, target: Timestamp) {
        loop {
            let callback = {
                let mut state = self.state.lock();
                match state.pending.peek() {
                    Some(Reverse(timer)) if timer.due <= target => {
                        let Reverse(timer) = state.pending.pop().expect("peeked entry");
                        if timer.due > state.now {
                            state.now = timer.due;
                        }
                        Some(timer.callback)
                    }
                    _ => {
                        if target > state.now {
                            state.now = target;
                        }
                        None
                    }
                }
            };
            match callback {
                Some(cb) => cb(),
                None => break,
            }
        }
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::starting_at(Timestamp::EPOCH)
    }
}

impl Clock for SimClock {
    fn now(&self) -> Timestamp {
        self.state.lock().now
    }

    fn send_later(&self, after: Timespan, callback: TimerCallback) {
        let mut state = self.state.lock();
        let due = state.now + after;
        let seq = state.next_seq;
        state.next_seq += 1;
        state
            .pending
            .push(Reverse(PendingTimer { due, seq, callback }));
    }
}
