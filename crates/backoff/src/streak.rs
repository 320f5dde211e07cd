//! Failure-streak backoff with jitter
//!
//! A single exponent, shared across every item the consumer processes, is
//! incremented on failure and decremented on success. The delay grows as
//! `base * 2^exp` with a randomized jitter of up to one `base` unit
//! subtracted, so concurrent consumers retrying the same backend do not wake
//! in lockstep. Growth is exponential, recovery is linear: a streak of
//! failures slows the consumer down fast, a streak of successes speeds it
//! back up one step at a time.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use crate::error::ConfigResult;
use crate::limiter::{exponential_nanos, BackoffConfig};

struct StreakState<R> {
    exp: u32,
    rng: R,
}

/// Failure-streak backoff limiter
///
/// Call [`delay`](Self::delay) to learn how long to hold the next retry,
/// and report outcomes with [`failure`](Self::failure) /
/// [`success`](Self::success). At a low exponent the jitter can dominate and
/// drive the delay to zero, so early retries stay fast while later ones
/// approach pure exponential backoff with small relative jitter.
///
/// The random source is owned by the instance. Production code uses an
/// entropy-seeded [`StdRng`]; tests can inject a seeded generator through
/// [`with_rng`](Self::with_rng) for reproducible delays.
///
/// # Examples
///
/// ```rust
/// use requeue_backoff::{BackoffConfig, StreakBackoff};
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let limiter = StreakBackoff::new(BackoffConfig::default())?;
///
/// limiter.failure(); // backend said no, slow down
/// let wait = limiter.delay();
/// limiter.success(); // recovered, speed back up
/// # Ok(())
/// # }
/// ```
pub struct StreakBackoff<R: Rng = StdRng> {
    config: BackoffConfig,
    state: Arc<Mutex<StreakState<R>>>,
}

impl<R: Rng> StreakBackoff<R> {
    /// Create a limiter with an injected random source
    pub fn with_rng(config: BackoffConfig, rng: R) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self { config, state: Arc::new(Mutex::new(StreakState { exp: 0, rng })) })
    }

    /// Delay to wait before the next retry.
    ///
    /// Always returns a value in `[Duration::ZERO, max_delay]`; never blocks
    /// and never fails. Consumes one random sample for jitter unless the
    /// exponential already exceeds the ceiling, in which case `max_delay` is
    /// returned as-is.
    pub fn delay(&self) -> Duration {
        let mut state = self.state();

        let delay_ns = exponential_nanos(self.config.base_nanos(), state.exp);
        if delay_ns > u128::from(self.config.max_nanos()) {
            return self.config.max_delay;
        }

        let percentage = state.rng.gen::<f64>();
        let jitter = self.config.base_nanos() as f64 * percentage;
        let backoff = delay_ns as f64 - jitter;
        if backoff <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(backoff as u64)
    }

    /// Report a failed attempt.
    pub fn failure(&self) {
        let mut state = self.state();

        state.exp = state.exp.saturating_add(1);
        debug!(exp = state.exp, "failure reported, raising backoff exponent");
    }

    /// Report a successful attempt.
    ///
    /// Recovery is gradual: each success lowers the exponent by one, never
    /// below zero.
    pub fn success(&self) {
        let mut state = self.state();

        if state.exp > 0 {
            state.exp -= 1;
            debug!(exp = state.exp, "success reported, lowering backoff exponent");
        }
    }

    /// Current backoff exponent. Read-only; never mutates state.
    pub fn exponent(&self) -> u32 {
        self.state().exp
    }

    /// Reset the exponent to zero
    pub fn reset(&self) {
        self.state().exp = 0;
    }

    /// The limiter's immutable configuration
    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    fn state(&self) -> MutexGuard<'_, StreakState<R>> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("streak backoff state lock poisoned");
                poisoned.into_inner()
            }
        }
    }
}

impl StreakBackoff<StdRng> {
    /// Create a limiter with an entropy-seeded random source
    pub fn new(config: BackoffConfig) -> ConfigResult<Self> {
        Self::with_rng(config, StdRng::from_entropy())
    }
}

impl<R: Rng> Clone for StreakBackoff<R> {
    fn clone(&self) -> Self {
        Self { config: self.config.clone(), state: Arc::clone(&self.state) }
    }
}
