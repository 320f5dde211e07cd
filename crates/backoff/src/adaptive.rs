//! Failure-rate adaptive backoff
//!
//! Layers a control loop on top of per-item exponential backoff: every
//! reported outcome feeds an exponential moving average of the failure rate,
//! and the smoothed rate scales the per-item baseline delay. A single hot
//! item retrying in a loop backs off through the per-item exponent; a
//! backend-wide outage raises the failure rate and slows *all* items down,
//! then relaxes automatically as failures subside.

use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use crate::constants::{DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY, DEFAULT_SMOOTHING};
use crate::error::{ConfigError, ConfigResult};
use crate::limiter::{BackoffConfig, BackoffLimiter, ItemBackoff};

/// Configuration for adaptive backoff
#[derive(Debug, Clone)]
pub struct AdaptiveConfig {
    /// Minimum (unit) delay; also bounds the jitter
    pub base_delay: Duration,
    /// Hard ceiling on any returned delay
    pub max_delay: Duration,
    /// Moving-average smoothing constant in `(0, 1]`.
    ///
    /// Close to 0 the failure rate moves slowly; at 1 it tracks only the
    /// latest outcome.
    pub smoothing: f64,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            smoothing: DEFAULT_SMOOTHING,
        }
    }
}

impl AdaptiveConfig {
    /// Create a new configuration builder
    pub fn builder() -> AdaptiveConfigBuilder {
        AdaptiveConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        self.backoff().validate()?;
        if self.smoothing <= 0.0 || self.smoothing > 1.0 {
            return Err(ConfigError::Invalid {
                message: format!("smoothing must be within (0, 1], got {}", self.smoothing),
            });
        }
        Ok(())
    }

    /// Ratio between the ceiling and the unit delay; the scale factor's
    /// upper bound.
    pub fn delay_ratio(&self) -> f64 {
        self.max_delay.as_nanos() as f64 / self.base_delay.as_nanos() as f64
    }

    fn backoff(&self) -> BackoffConfig {
        BackoffConfig { base_delay: self.base_delay, max_delay: self.max_delay }
    }
}

/// Builder for AdaptiveConfig
#[derive(Debug)]
pub struct AdaptiveConfigBuilder {
    config: AdaptiveConfig,
}

impl Default for AdaptiveConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AdaptiveConfigBuilder {
    pub fn new() -> Self {
        Self { config: AdaptiveConfig::default() }
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.config.base_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.config.max_delay = delay;
        self
    }

    pub fn smoothing(mut self, smoothing: f64) -> Self {
        self.config.smoothing = smoothing;
        self
    }

    pub fn build(self) -> ConfigResult<AdaptiveConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Point-in-time view of the adaptive state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdaptiveBackoffMetrics {
    /// Smoothed failure rate in `[0, 1]`
    pub failure_rate: f64,
    /// Delay multiplier in `[1, max_delay / base_delay]`
    pub scale_factor: f64,
}

struct AdaptiveState<R> {
    failure_rate: f64,
    scale_factor: f64,
    rng: R,
}

/// Failure-rate adaptive backoff limiter
///
/// Owns a per-item [`ItemBackoff`] and decorates its delays with a global
/// scale factor derived from the smoothed failure rate: at a 0% failure rate
/// delays pass through unscaled, at 100% they are pushed toward `max_delay`.
/// Jitter of up to one `base_delay` unit is subtracted from the scaled
/// delay, flooring at zero.
///
/// # Examples
///
/// ```rust
/// use requeue_backoff::{AdaptiveBackoff, AdaptiveConfig, BackoffLimiter};
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let limiter = AdaptiveBackoff::new(AdaptiveConfig::default())?;
///
/// let wait = limiter.next_delay(&"task-7");
/// limiter.record(false); // the attempt failed; raises the failure rate
/// limiter.forget(&"task-7"); // item completed, drop its history
/// # Ok(())
/// # }
/// ```
pub struct AdaptiveBackoff<T, R: Rng = StdRng> {
    config: AdaptiveConfig,
    inner: ItemBackoff<T>,
    state: Arc<Mutex<AdaptiveState<R>>>,
}

impl<T: Eq + Hash + Clone, R: Rng> AdaptiveBackoff<T, R> {
    /// Create a limiter with an injected random source
    pub fn with_rng(config: AdaptiveConfig, rng: R) -> ConfigResult<Self> {
        config.validate()?;
        let inner = ItemBackoff::new(config.backoff())?;
        Ok(Self {
            config,
            inner,
            state: Arc::new(Mutex::new(AdaptiveState {
                failure_rate: 0.0,
                scale_factor: 1.0,
                rng,
            })),
        })
    }

    /// Report the outcome of an attempt.
    ///
    /// Folds the outcome into the moving average and re-derives the scale
    /// factor. Cannot fail; safe to call concurrently with any other
    /// operation.
    pub fn record(&self, success: bool) {
        let mut state = self.state();

        let sample = if success { 0.0 } else { 1.0 };
        state.failure_rate =
            self.config.smoothing * sample + (1.0 - self.config.smoothing) * state.failure_rate;
        state.scale_factor = state.failure_rate * (self.config.delay_ratio() - 1.0) + 1.0;

        debug!(
            failure_rate = state.failure_rate,
            scale_factor = state.scale_factor,
            "outcome recorded"
        );
    }

    /// Current delay multiplier. Read-only; never mutates state.
    pub fn scale_factor(&self) -> f64 {
        self.state().scale_factor
    }

    /// Current smoothed failure rate. Read-only; never mutates state.
    pub fn failure_rate(&self) -> f64 {
        self.state().failure_rate
    }

    /// Snapshot of the adaptive state
    pub fn metrics(&self) -> AdaptiveBackoffMetrics {
        let state = self.state();
        AdaptiveBackoffMetrics {
            failure_rate: state.failure_rate,
            scale_factor: state.scale_factor,
        }
    }

    /// Reset the failure rate and drop all per-item history
    pub fn reset(&self) {
        {
            let mut state = self.state();
            state.failure_rate = 0.0;
            state.scale_factor = 1.0;
        }
        self.inner.reset();
    }

    /// The limiter's immutable configuration
    pub fn config(&self) -> &AdaptiveConfig {
        &self.config
    }

    fn state(&self) -> MutexGuard<'_, AdaptiveState<R>> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("adaptive backoff state lock poisoned");
                poisoned.into_inner()
            }
        }
    }
}

impl<T: Eq + Hash + Clone, R: Rng> BackoffLimiter<T> for AdaptiveBackoff<T, R> {
    fn next_delay(&self, item: &T) -> Duration {
        let baseline = self.inner.next_delay(item);
        let mut state = self.state();

        let max_ns = self.config.max_delay.as_nanos() as f64;
        let scaled = (baseline.as_nanos() as f64 * state.scale_factor).min(max_ns);

        let jitter = self.config.base_delay.as_nanos() as f64 * state.rng.gen::<f64>();
        if jitter > scaled {
            return Duration::ZERO;
        }
        Duration::from_nanos((scaled - jitter) as u64)
    }

    fn forget(&self, item: &T) {
        self.inner.forget(item);
    }

    fn requeues(&self, item: &T) -> u32 {
        self.inner.requeues(item)
    }
}

impl<T: Eq + Hash + Clone> AdaptiveBackoff<T, StdRng> {
    /// Create a limiter with an entropy-seeded random source
    pub fn new(config: AdaptiveConfig) -> ConfigResult<Self> {
        Self::with_rng(config, StdRng::from_entropy())
    }
}

impl<T, R: Rng> Clone for AdaptiveBackoff<T, R> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            inner: self.inner.clone(),
            state: Arc::clone(&self.state),
        }
    }
}
