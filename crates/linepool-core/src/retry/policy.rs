use rand::Rng;
use rand_distr::{Distribution, Normal};
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use crate::error::ErrorKind;

/// Growth factor between consecutive delays (Euler's number).
pub const DEFAULT_FACTOR: f64 = std::f64::consts::E;
/// Standard deviation of the jitter, as a fraction of the nominal delay.
pub const DEFAULT_JITTER_FRACTION: f64 = 0.11962656472;
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(500);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(300);

/// Decision returned by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Do not retry this error.
    NoRetry,
    /// Retry after the given delay.
    RetryAfter(Duration),
}

/// Rejected policy parameters.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PolicyError {
    #[error("initial delay must be greater than zero")]
    ZeroInitialDelay,
    #[error("max delay {max:?} is shorter than initial delay {initial:?}")]
    MaxBelowInitial { initial: Duration, max: Duration },
    #[error("growth factor must be finite and greater than 1 (got {0})")]
    Factor(f64),
    #[error("jitter fraction must be in [0, 1) (got {0})")]
    Jitter(f64),
}

/// Exponential backoff with normally distributed jitter.
///
/// Immutable once built; see [`RetryPolicy::builder`].
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    factor: f64,
    jitter_fraction: f64,
    retryable: HashSet<ErrorKind>,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.retryable.iter().collect();
        kinds.sort_by_key(|k| format!("{:?}", k));
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .field("factor", &self.factor)
            .field("jitter_fraction", &self.jitter_fraction)
            .field("retryable", &kinds)
            .finish()
    }
}

impl RetryPolicy {
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::default()
    }

    /// Maximum number of attempts (including the first).
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }

    pub fn jitter_fraction(&self) -> f64 {
        self.jitter_fraction
    }

    pub fn is_retryable(&self, kind: Option<ErrorKind>) -> bool {
        kind.is_some_and(|k| self.retryable.contains(&k))
    }

    /// Nominal (pre-jitter) delay before the next attempt.
    ///
    /// `previous` is the delay waited before the current attempt, `None`
    /// when the current attempt was the first one.
    pub fn nominal_delay(&self, previous: Option<Duration>) -> Duration {
        match previous {
            None => self.initial_delay,
            Some(prev) => {
                let grown = prev.as_secs_f64() * self.factor;
                Duration::try_from_secs_f64(grown)
                    .unwrap_or(self.max_delay)
                    .min(self.max_delay)
            }
        }
    }

    /// Perturb `delay` with a normal distribution centered on it.
    /// Negative draws clamp to zero.
    pub fn apply_jitter<R: Rng + ?Sized>(&self, delay: Duration, rng: &mut R) -> Duration {
        if self.jitter_fraction == 0.0 {
            return delay;
        }
        let mean = delay.as_secs_f64();
        let normal = match Normal::new(mean, mean * self.jitter_fraction) {
            Ok(n) => n,
            Err(_) => return delay,
        };
        let secs = normal.sample(rng).max(0.0);
        Duration::try_from_secs_f64(secs).unwrap_or(delay)
    }

    /// Decide whether the failure of attempt `attempt` (1-based) is retried.
    ///
    /// Non-retryable kinds stop immediately; reaching `max_attempts` stops
    /// with the last failure; otherwise the next delay grows from
    /// `previous` and gets jittered.
    pub fn decide<R: Rng + ?Sized>(
        &self,
        attempt: u32,
        kind: Option<ErrorKind>,
        previous: Option<Duration>,
        rng: &mut R,
    ) -> RetryDecision {
        if !self.is_retryable(kind) {
            return RetryDecision::NoRetry;
        }
        if attempt >= self.max_attempts {
            return RetryDecision::NoRetry;
        }
        let nominal = self.nominal_delay(previous);
        RetryDecision::RetryAfter(self.apply_jitter(nominal, rng))
    }
}

/// Builder for [`RetryPolicy`]. Starts from the defaults, retrying nothing.
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    factor: f64,
    jitter_fraction: f64,
    retryable: HashSet<ErrorKind>,
}

impl Default for RetryPolicyBuilder {
    fn default() -> Self {
        Self {
            max_attempts: 7,
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            factor: DEFAULT_FACTOR,
            jitter_fraction: DEFAULT_JITTER_FRACTION,
            retryable: HashSet::new(),
        }
    }
}

impl RetryPolicyBuilder {
    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n;
        self
    }

    pub fn initial_delay(mut self, d: Duration) -> Self {
        self.initial_delay = d;
        self
    }

    pub fn max_delay(mut self, d: Duration) -> Self {
        self.max_delay = d;
        self
    }

    pub fn factor(mut self, factor: f64) -> Self {
        self.factor = factor;
        self
    }

    pub fn jitter_fraction(mut self, fraction: f64) -> Self {
        self.jitter_fraction = fraction;
        self
    }

    pub fn retry_on(mut self, kind: ErrorKind) -> Self {
        self.retryable.insert(kind);
        self
    }

    pub fn retry_on_all(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.retryable.extend(kinds);
        self
    }

    pub fn build(self) -> Result<RetryPolicy, PolicyError> {
        if self.initial_delay.is_zero() {
            return Err(PolicyError::ZeroInitialDelay);
        }
        if self.max_delay < self.initial_delay {
            return Err(PolicyError::MaxBelowInitial {
                initial: self.initial_delay,
                max: self.max_delay,
            });
        }
        if !self.factor.is_finite() || self.factor <= 1.0 {
            return Err(PolicyError::Factor(self.factor));
        }
        if !(0.0..1.0).contains(&self.jitter_fraction) {
            return Err(PolicyError::Jitter(self.jitter_fraction));
        }
        Ok(RetryPolicy {
            max_attempts: self.max_attempts,
            initial_delay: self.initial_delay,
            max_delay: self.max_delay,
            factor: self.factor,
            jitter_fraction: self.jitter_fraction,
            retryable: self.retryable,
        })
    }
}
