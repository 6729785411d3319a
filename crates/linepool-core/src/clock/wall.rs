//! Wall clock backed by the Tokio timer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio::task::AbortHandle;

use super::{Clock, TimerCallback, TimerHandle};

/// Real clock: each timer is a spawned task that sleeps, then fires.
///
/// The side table maps live timer ids to their abort handles. Whoever
/// removes an id from the table first (the firing task or `cancel`) wins,
/// which keeps cancel-after-fire and double cancel harmless.
#[derive(Debug, Clone)]
pub struct TokioClock {
    runtime: Handle,
    next_id: Arc<AtomicU64>,
    timers: Arc<Mutex<HashMap<u64, AbortHandle>>>,
}

impl TokioClock {
    /// Clock bound to the current Tokio runtime.
    ///
    /// Panics when called outside a runtime; use [`TokioClock::with_handle`]
    /// to bind one explicitly.
    pub fn new() -> Self {
        Self::with_handle(Handle::current())
    }

    pub fn with_handle(runtime: Handle) -> Self {
        Self {
            runtime,
            next_id: Arc::new(AtomicU64::new(1)),
            timers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of timers scheduled and not yet fired or cancelled.
    pub fn pending(&self) -> usize {
        self.timers.lock().map(|t| t.len()).unwrap_or(0)
    }
}

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    fn schedule(&self, delay: Duration, callback: TimerCallback) -> TimerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let timers = Arc::clone(&self.timers);
        // Hold the table lock across spawn so the task cannot look itself up
        // before it has been registered.
        let mut table = self.timers.lock().unwrap_or_else(|e| e.into_inner());
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let live = timers
                .lock()
                .map(|mut t| t.remove(&id).is_some())
                .unwrap_or(false);
            if live {
                callback();
            }
        });
        table.insert(id, task.abort_handle());
        TimerHandle::new(id)
    }

    fn cancel(&self, handle: &TimerHandle) {
        let removed = self
            .timers
            .lock()
            .ok()
            .and_then(|mut t| t.remove(&handle.id()));
        if let Some(abort) = removed {
            abort.abort();
            tracing::trace!(timer = %handle, "timer cancelled");
        }
    }
}
