//! Retry loop: run an async operation until success or the policy says stop.

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

use super::cancel::CancelToken;
use super::error::RetryError;
use super::policy::{RetryDecision, RetryPolicy};
use crate::clock::{Clock, TimerHandle};
use crate::error::Classify;

/// Drives the attempt loop for arbitrary repeatable operations.
///
/// Attempts are strictly sequential: attempt N+1 starts only after attempt
/// N failed with a retryable kind and its delay elapsed on the injected
/// clock. At most `max_attempts` invocations happen per `run`.
pub struct BackoffScheduler {
    clock: Arc<dyn Clock>,
    rng: Mutex<StdRng>,
}

impl fmt::Debug for BackoffScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackoffScheduler").finish_non_exhaustive()
    }
}

/// Per-invocation attempt state; never shared between runs.
struct AttemptState {
    attempt: u32,
    current_delay: Option<Duration>,
}

/// Cancels the pending reattempt timer unless disarmed, so dropping the
/// `run` future mid-delay leaves no timer behind.
struct PendingTimer<'a> {
    clock: &'a dyn Clock,
    handle: Option<TimerHandle>,
}

impl PendingTimer<'_> {
    fn disarm(mut self) {
        self.handle = None;
    }
}

impl Drop for PendingTimer<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.clock.cancel(&handle);
        }
    }
}

impl BackoffScheduler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Seed the jitter source, for reproducible delays.
    pub fn with_rng_seed(self, seed: u64) -> Self {
        Self {
            clock: self.clock,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Run `operation` under `policy` with no external cancellation.
    pub async fn run<T, E, F, Fut>(
        &self,
        policy: &RetryPolicy,
        operation: F,
    ) -> Result<T, RetryError<E>>
    where
        E: Classify + fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_cancellable(policy, operation, &CancelToken::new())
            .await
    }

    /// Like [`run`](Self::run), but a pending reattempt is suppressed once
    /// `cancel` fires. An attempt already in flight is left to finish; if it
    /// succeeds its value is returned.
    pub async fn run_cancellable<T, E, F, Fut>(
        &self,
        policy: &RetryPolicy,
        mut operation: F,
        cancel: &CancelToken,
    ) -> Result<T, RetryError<E>>
    where
        E: Classify + fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut state = AttemptState {
            attempt: 1,
            current_delay: None,
        };
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled { attempts: 0 });
        }

        loop {
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            let kind = err.kind();
            let decision = {
                let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
                policy.decide(state.attempt, kind, state.current_delay, &mut *rng)
            };
            let delay = match decision {
                RetryDecision::NoRetry => {
                    tracing::debug!(
                        attempt = state.attempt,
                        max_attempts = policy.max_attempts(),
                        ?kind,
                        "giving up: {}",
                        err
                    );
                    return Err(RetryError::Operation(err));
                }
                RetryDecision::RetryAfter(d) => d,
            };
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled {
                    attempts: state.attempt,
                });
            }

            tracing::warn!(
                "retrying in {:.3}s ({}/{}): {}",
                delay.as_secs_f64(),
                state.attempt,
                policy.max_attempts(),
                err
            );
            drop(err);

            let (tx, rx) = oneshot::channel::<()>();
            let handle = self.clock.schedule(
                delay,
                Box::new(move || {
                    let _ = tx.send(());
                }),
            );
            let timer = PendingTimer {
                clock: self.clock.as_ref(),
                handle: Some(handle),
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    drop(timer);
                    tracing::debug!(attempt = state.attempt, "pending retry cancelled");
                    return Err(RetryError::Cancelled { attempts: state.attempt });
                }
                fired = rx => {
                    timer.disarm();
                    if fired.is_err() {
                        // Timer cancelled behind our back.
                        return Err(RetryError::Cancelled { attempts: state.attempt });
                    }
                }
            }

            state.attempt += 1;
            state.current_delay = Some(delay);
        }
    }
}
