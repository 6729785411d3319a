//! Time and deferred execution.
//!
//! Both the retry scheduler and line sessions take a `Clock` at construction
//! time instead of reaching for a global timer, so tests can swap in
//! [`ManualClock`] and step time deterministically.

mod manual;
mod wall;

use std::fmt;
use std::time::{Duration, Instant};

pub use manual::ManualClock;
pub use wall::TokioClock;

/// Callback invoked when a scheduled timer fires.
pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

/// Opaque identifier of a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

impl TimerHandle {
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// Source of time plus a timer table.
///
/// `cancel` must be idempotent: cancelling twice, or after the timer fired,
/// has no effect. Implementations must tolerate concurrent `schedule` and
/// `cancel` calls from many sessions.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    /// Run `callback` once `delay` has elapsed, unless cancelled first.
    fn schedule(&self, delay: Duration, callback: TimerCallback) -> TimerHandle;

    fn cancel(&self, handle: &TimerHandle);
}
