//! Log throttling
//!
//! Interrupt-path messages (spurious interrupts, VBUS errors on a shorted
//! port) can repeat thousands of times per second; the throttler limits each
//! message key to one record per interval.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Limits how often the same message key is logged
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use otg_glue::utils::LogThrottler;
///
/// let throttler = LogThrottler::new(Duration::from_secs(5));
/// assert!(throttler.should_log("spurious_irq"));
/// assert!(!throttler.should_log("spurious_irq"));
/// ```
pub struct LogThrottler {
    last_logged: Mutex<HashMap<&'static str, Instant>>,
    interval: Duration,
}

impl LogThrottler {
    pub fn new(interval: Duration) -> Self {
        Self {
            last_logged: Mutex::new(HashMap::new()),
            interval,
        }
    }

    pub fn with_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Returns `true` (and records the time) if `key` is not throttled
    pub fn should_log(&self, key: &'static str) -> bool {
        let now = Instant::now();
        let mut map = self.last_logged.lock();
        if let Some(last) = map.get(key) {
            if now.duration_since(*last) < self.interval {
                return false;
            }
        }
        map.insert(key, now);
        true
    }

    /// Forget `key` so that the next occurrence is logged immediately
    ///
    /// Called when the condition behind the message recovers.
    pub fn clear(&self, key: &'static str) {
        self.last_logged.lock().remove(key);
    }

    pub fn clear_all(&self) {
        self.last_logged.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.last_logged.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_logged.lock().is_empty()
    }
}

impl Default for LogThrottler {
    /// 5 second interval
    fn default() -> Self {
        Self::with_secs(5)
    }
}

/// Throttled `tracing::warn!`
///
/// ```rust
/// use otg_glue::utils::LogThrottler;
/// use otg_glue::warn_throttled;
///
/// let throttler = LogThrottler::default();
/// warn_throttled!(throttler, "vbus_error", "VBUS error: devctl {:02x}", 0x19);
/// ```
#[macro_export]
macro_rules! warn_throttled {
    ($throttler:expr, $key:expr, $($arg:tt)*) => {
        if $throttler.should_log($key) {
            tracing::warn!($($arg)*);
        }
    };
}

/// Throttled `tracing::debug!`
#[macro_export]
macro_rules! debug_throttled {
    ($throttler:expr, $key:expr, $($arg:tt)*) => {
        if $throttler.should_log($key) {
            tracing::debug!($($arg)*);
        }
    };
}
