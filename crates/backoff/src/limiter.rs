//! Per-item backoff limiting for work-queue consumers
//!
//! This module provides the seam a queue consumer programs against
//! ([`BackoffLimiter`]) and the baseline implementation behind it:
//! - **`ItemBackoff`**: per-item exponential backoff, where each requeue of
//!   an item doubles its delay independently of every other item.
//!
//! The limiter only ever returns a duration; the queue is responsible for
//! actually holding the item back for that long.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::{debug, warn};

use crate::constants::{DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY, MAX_BACKOFF_SHIFT};
use crate::error::{ConfigError, ConfigResult};

/// Decides how long a failed work item waits before it is redelivered.
///
/// Implementations never block and never fail: every call returns a duration
/// in `[Duration::ZERO, max_delay]` and is safe to invoke concurrently with
/// any other operation on the same instance.
pub trait BackoffLimiter<T> {
    /// Delay to apply before the item is retried.
    ///
    /// Each call counts as one more requeue of the item, so repeated calls
    /// without an intervening [`forget`](Self::forget) grow the delay.
    fn next_delay(&self, item: &T) -> Duration;

    /// Drop all backoff history for the item.
    fn forget(&self, item: &T);

    /// Number of times the item has been requeued so far.
    fn requeues(&self, item: &T) -> u32;
}

/// Configuration for exponential backoff delays
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Minimum (unit) delay; the first retry of an item waits this long
    pub base_delay: Duration,
    /// Hard ceiling on any returned delay
    pub max_delay: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self { base_delay: DEFAULT_BASE_DELAY, max_delay: DEFAULT_MAX_DELAY }
    }
}

impl BackoffConfig {
    /// Create a new configuration builder
    pub fn builder() -> BackoffConfigBuilder {
        BackoffConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.base_delay.is_zero() {
            return Err(ConfigError::Invalid {
                message: "base_delay must be greater than zero".to_string(),
            });
        }
        if self.max_delay < self.base_delay {
            return Err(ConfigError::Invalid {
                message: format!(
                    "max_delay ({:?}) cannot be less than base_delay ({:?})",
                    self.max_delay, self.base_delay
                ),
            });
        }
        Ok(())
    }

    pub(crate) fn base_nanos(&self) -> u64 {
        self.base_delay.as_nanos() as u64
    }

    pub(crate) fn max_nanos(&self) -> u64 {
        self.max_delay.as_nanos() as u64
    }
}

/// Builder for BackoffConfig
#[derive(Debug)]
pub struct BackoffConfigBuilder {
    config: BackoffConfig,
}

impl Default for BackoffConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BackoffConfigBuilder {
    pub fn new() -> Self {
        Self { config: BackoffConfig::default() }
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.config.base_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.config.max_delay = delay;
        self
    }

    pub fn build(self) -> ConfigResult<BackoffConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Exponential delay for a given requeue count, exact and clamped.
///
/// Computed as a 128-bit shift so the result cannot overflow; exponents past
/// `MAX_BACKOFF_SHIFT` already exceed any representable ceiling.
pub(crate) fn exponential_nanos(base_ns: u64, requeues: u32) -> u128 {
    u128::from(base_ns) << requeues.min(MAX_BACKOFF_SHIFT)
}

/// Per-item exponential backoff limiter
///
/// Tracks a requeue count per item; the delay for an item doubles on every
/// requeue until it reaches `max_delay`. Items are independent: a hot item
/// retrying in a tight loop backs off aggressively while fresh items still
/// get the base delay. No jitter is applied at this layer.
///
/// # Examples
///
/// ```rust
/// use requeue_backoff::{BackoffConfig, BackoffLimiter, ItemBackoff};
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let limiter = ItemBackoff::new(BackoffConfig::default())?;
///
/// let first = limiter.next_delay(&"task-7");
/// let second = limiter.next_delay(&"task-7"); // twice the first
/// limiter.forget(&"task-7"); // item completed, drop its history
/// # Ok(())
/// # }
/// ```
pub struct ItemBackoff<T> {
    config: BackoffConfig,
    requeues: Arc<Mutex<HashMap<T, u32>>>,
}

impl<T: Eq + Hash + Clone> ItemBackoff<T> {
    /// Create a new per-item limiter, validating the configuration
    pub fn new(config: BackoffConfig) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self { config, requeues: Arc::new(Mutex::new(HashMap::new())) })
    }

    /// The limiter's immutable configuration
    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// Drop the backoff history of every tracked item
    pub fn reset(&self) {
        self.tracked().clear();
    }

    fn tracked(&self) -> MutexGuard<'_, HashMap<T, u32>> {
        match self.requeues.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("item backoff requeue map lock poisoned");
                poisoned.into_inner()
            }
        }
    }
}

impl<T: Eq + Hash + Clone> BackoffLimiter<T> for ItemBackoff<T> {
    fn next_delay(&self, item: &T) -> Duration {
        let count = {
            let mut tracked = self.tracked();
            let entry = tracked.entry(item.clone()).or_insert(0);
            let count = *entry;
            *entry = count.saturating_add(1);
            count
        };

        let delay_ns = exponential_nanos(self.config.base_nanos(), count)
            .min(u128::from(self.config.max_nanos())) as u64;

        debug!(requeues = count.saturating_add(1), delay_ns, "item backed off");
        Duration::from_nanos(delay_ns)
    }

    fn forget(&self, item: &T) {
        self.tracked().remove(item);
    }

    fn requeues(&self, item: &T) -> u32 {
        self.tracked().get(item).copied().unwrap_or(0)
    }
}

impl<T> Clone for ItemBackoff<T> {
    fn clone(&self) -> Self {
        Self { config: self.config.clone(), requeues: Arc::clone(&self.requeues) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn millis(ms: u64) -> Duration {
        Duration::from_millis(ms)
    }

    #[test]
    fn test_item_backoff_doubles_per_requeue() {
        let config =
            BackoffConfig::builder().base_delay(millis(1)).max_delay(millis(1000)).build().unwrap();
        let limiter = ItemBackoff::new(config).unwrap();

        assert_eq!(limiter.next_delay(&1), millis(1));
        assert_eq!(limiter.next_delay(&1), millis(2));
        assert_eq!(limiter.next_delay(&1), millis(4));
        assert_eq!(limiter.next_delay(&1), millis(8));
    }

    #[test]
    fn test_item_backoff_items_are_independent() {
        let config =
            BackoffConfig::builder().base_delay(millis(1)).max_delay(millis(1000)).build().unwrap();
        let limiter = ItemBackoff::new(config).unwrap();

        assert_eq!(limiter.next_delay(&"a"), millis(1));
        assert_eq!(limiter.next_delay(&"a"), millis(2));

        // A fresh item starts over at the base delay.
        assert_eq!(limiter.next_delay(&"b"), millis(1));
    }

    #[test]
    fn test_item_backoff_caps_at_max_delay() {
        let config =
            BackoffConfig::builder().base_delay(millis(1)).max_delay(millis(5)).build().unwrap();
        let limiter = ItemBackoff::new(config).unwrap();

        assert_eq!(limiter.next_delay(&1), millis(1));
        assert_eq!(limiter.next_delay(&1), millis(2));
        assert_eq!(limiter.next_delay(&1), millis(4));
        assert_eq!(limiter.next_delay(&1), millis(5));
        assert_eq!(limiter.next_delay(&1), millis(5));
    }

    #[test]
    fn test_item_backoff_survives_huge_requeue_counts() {
        let config = BackoffConfig::builder()
            .base_delay(millis(1))
            .max_delay(Duration::from_secs(60))
            .build()
            .unwrap();
        let limiter = ItemBackoff::new(config).unwrap();

        // Well past any shift that fits in 64 bits.
        for _ in 0..200 {
            let delay = limiter.next_delay(&1);
            assert!(delay <= Duration::from_secs(60));
        }
        assert_eq!(limiter.next_delay(&1), Duration::from_secs(60));
    }

    #[test]
    fn test_item_backoff_forget_resets_single_item() {
        let config =
            BackoffConfig::builder().base_delay(millis(1)).max_delay(millis(1000)).build().unwrap();
        let limiter = ItemBackoff::new(config).unwrap();

        limiter.next_delay(&"a");
        limiter.next_delay(&"a");
        limiter.next_delay(&"b");

        limiter.forget(&"a");

        assert_eq!(limiter.requeues(&"a"), 0);
        assert_eq!(limiter.requeues(&"b"), 1);
        assert_eq!(limiter.next_delay(&"a"), millis(1));
    }

    #[test]
    fn test_item_backoff_requeues_does_not_mutate() {
        let limiter = ItemBackoff::new(BackoffConfig::default()).unwrap();

        limiter.next_delay(&7);
        assert_eq!(limiter.requeues(&7), 1);
        assert_eq!(limiter.requeues(&7), 1);
        assert_eq!(limiter.requeues(&42), 0);
    }

    #[test]
    fn test_item_backoff_reset_clears_everything() {
        let limiter = ItemBackoff::new(BackoffConfig::default()).unwrap();

        limiter.next_delay(&"a");
        limiter.next_delay(&"b");
        limiter.reset();

        assert_eq!(limiter.requeues(&"a"), 0);
        assert_eq!(limiter.requeues(&"b"), 0);
    }

    #[test]
    fn test_item_backoff_clone_shares_state() {
        let limiter = ItemBackoff::new(BackoffConfig::default()).unwrap();
        let handle = limiter.clone();

        handle.next_delay(&"a");
        assert_eq!(limiter.requeues(&"a"), 1);
    }

    /// Validates `BackoffConfig` validation for the malformed configuration
    /// scenario.
    ///
    /// Assertions:
    /// - Zero `base_delay` is rejected.
    /// - `max_delay` below `base_delay` is rejected.
    /// - A `max_delay` equal to `base_delay` is accepted.
    #[test]
    fn test_backoff_config_validation() {
        assert!(BackoffConfig::builder().base_delay(Duration::ZERO).build().is_err());

        assert!(BackoffConfig::builder()
            .base_delay(Duration::from_secs(10))
            .max_delay(Duration::from_secs(5))
            .build()
            .is_err());

        assert!(BackoffConfig::builder()
            .base_delay(Duration::from_secs(5))
            .max_delay(Duration::from_secs(5))
            .build()
            .is_ok());
    }

    #[test]
    fn test_backoff_config_default() {
        let config = BackoffConfig::default();
        assert_eq!(config.base_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }
}
