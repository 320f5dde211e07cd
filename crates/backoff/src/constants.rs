// Constants shared by the backoff limiters
use std::time::Duration;

/// Default minimum (unit) delay between retries
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default hard ceiling on any computed delay
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Default smoothing constant for the failure-rate moving average
pub const DEFAULT_SMOOTHING: f64 = 0.05;

/// Shift bound for exponential delay calculation.
///
/// Delays are computed as `base_ns << exponent` in 128-bit arithmetic; any
/// exponent at or past this bound already exceeds every representable
/// `max_delay`, so larger exponents are capped here instead of shifted.
pub const MAX_BACKOFF_SHIFT: u32 = 64;
