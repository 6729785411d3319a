//! Virtual clock for deterministic tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::{Clock, TimerCallback, TimerHandle};

/// A clock that only moves when told to.
///
/// Timers fire from inside [`ManualClock::advance`], in deadline order; ties
/// fire in scheduling order. While a callback runs, `now()` reports that
/// timer's deadline, so callbacks that reschedule see consistent time.
pub struct ManualClock {
    origin: Instant,
    state: Mutex<ManualState>,
}

#[derive(Default)]
struct ManualState {
    elapsed: Duration,
    next_id: u64,
    /// (deadline offset, id) -> callback
    timers: BTreeMap<(Duration, u64), TimerCallback>,
    deadlines: HashMap<u64, Duration>,
    scheduled: Vec<Duration>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            state: Mutex::new(ManualState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Move time forward by `by`, firing every timer that comes due.
    pub fn advance(&self, by: Duration) {
        let target = self.lock().elapsed + by;
        loop {
            let due = {
                let mut state = self.lock();
                let next = state
                    .timers
                    .keys()
                    .next()
                    .copied()
                    .filter(|(deadline, _)| *deadline <= target);
                match next {
                    Some(key) => {
                        let callback = state.timers.remove(&key);
                        state.deadlines.remove(&key.1);
                        state.elapsed = state.elapsed.max(key.0);
                        callback
                    }
                    None => None,
                }
            };
            match due {
                Some(callback) => callback(),
                None => break,
            }
        }
        let mut state = self.lock();
        state.elapsed = state.elapsed.max(target);
    }

    /// Total virtual time elapsed since creation.
    pub fn elapsed(&self) -> Duration {
        self.lock().elapsed
    }

    /// Timers scheduled and not yet fired or cancelled.
    pub fn pending(&self) -> usize {
        self.lock().timers.len()
    }

    /// Every delay ever passed to `schedule`, in call order.
    pub fn scheduled_delays(&self) -> Vec<Duration> {
        self.lock().scheduled.clone()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.lock().elapsed
    }

    fn schedule(&self, delay: Duration, callback: TimerCallback) -> TimerHandle {
        let mut state = self.lock();
        let id = state.next_id;
        state.next_id += 1;
        let deadline = state.elapsed + delay;
        state.timers.insert((deadline, id), callback);
        state.deadlines.insert(id, deadline);
        state.scheduled.push(delay);
        TimerHandle::new(id)
    }

    fn cancel(&self, handle: &TimerHandle) {
        let mut state = self.lock();
        if let Some(deadline) = state.deadlines.remove(&handle.id()) {
            state.timers.remove(&(deadline, handle.id()));
        }
    }
}
