//! Adaptive backoff limiters for retry queue consumers.
//!
//! A work-queue consumer asks a limiter how long to hold a failed item
//! before redelivery, and reports outcomes so the limiter can adapt. The
//! limiters are passive, thread-safe data structures: they own no timers and
//! do no waiting; the queue applies the returned duration. Two adaptive
//! strategies are provided, both with randomized jitter so concurrent
//! consumers do not retry in lockstep:
//!
//! - [`StreakBackoff`]: a global exponent grows on failure and shrinks on
//!   success; delays follow `base * 2^exp`, capped, minus jitter.
//! - [`AdaptiveBackoff`]: per-item exponential delays ([`ItemBackoff`])
//!   scaled by a factor derived from an exponentially-smoothed failure rate
//!   shared across all items.
//!
//! No operation on a constructed limiter can fail; configuration is
//! validated once at construction.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod adaptive;
pub mod constants;
pub mod error;
pub mod limiter;
pub mod streak;

// Re-export commonly used types and traits for convenience
// ------------------------
pub use adaptive::{
    AdaptiveBackoff, AdaptiveBackoffMetrics, AdaptiveConfig, AdaptiveConfigBuilder,
};
pub use error::{ConfigError, ConfigResult};
pub use limiter::{BackoffConfig, BackoffConfigBuilder, BackoffLimiter, ItemBackoff};
pub use streak::StreakBackoff;
