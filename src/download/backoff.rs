//! Backoff delays and `Retry-After` parsing.
//!
//! Retries back off linearly: the n-th retry waits `n * inc`, capped at `max`.
//! Reconnects always wait a single increment, since they follow a dropped
//! connection rather than an overloaded server. A server-supplied
//! `Retry-After` replaces the computed delay when present.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use streamget_core::download::Backoff;
//!
//! let backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(250));
//! assert_eq!(backoff.retry_delay(1), Duration::from_millis(100));
//! assert_eq!(backoff.retry_delay(2), Duration::from_millis(200));
//! assert_eq!(backoff.retry_delay(3), Duration::from_millis(250));
//! assert_eq!(backoff.reconnect_delay(), Duration::from_millis(100));
//! ```

use std::time::Duration;

use tracing::{debug, warn};

use super::constants::{DEFAULT_BACKOFF_INC, DEFAULT_BACKOFF_MAX, MAX_RETRY_AFTER};

/// Linear backoff configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Delay added per retry.
    pub inc: Duration,
    /// Upper bound for any computed delay.
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            inc: DEFAULT_BACKOFF_INC,
            max: DEFAULT_BACKOFF_MAX,
        }
    }
}

impl Backoff {
    /// Creates a backoff with the given increment and cap.
    #[must_use]
    pub fn new(inc: Duration, max: Duration) -> Self {
        Self { inc, max }
    }

    /// Delay before retry number `attempt` (1-indexed): `min(attempt * inc, max)`.
    #[must_use]
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        self.inc.saturating_mul(attempt).min(self.max)
    }

    /// Delay before any reconnect: `min(inc, max)`.
    #[must_use]
    pub fn reconnect_delay(&self) -> Duration {
        self.retry_delay(1)
    }

    /// Delay before retry number `attempt`, preferring the server's `Retry-After`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        retry_after.unwrap_or_else(|| self.retry_delay(attempt))
    }
}

/// Parses a `Retry-After` header value.
///
/// Supports both formats from RFC 7231:
/// - Integer seconds: `"120"`
/// - HTTP-date: `"Wed, 21 Oct 2015 07:28:00 GMT"`
///
/// Values above one hour are capped, dates in the past yield zero, and negative
/// or unparseable values yield `None`.
#[must_use]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        if seconds < 0 {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        }

        #[allow(clippy::cast_sign_loss)]
        let duration = Duration::from_secs(seconds as u64);

        if duration > MAX_RETRY_AFTER {
            warn!(
                seconds,
                max_seconds = MAX_RETRY_AFTER.as_secs(),
                "Retry-After exceeds maximum, capping at 1 hour"
            );
            return Some(MAX_RETRY_AFTER);
        }

        return Some(duration);
    }

    let Ok(datetime) = httpdate::parse_http_date(header_value) else {
        debug!(header_value, "unparseable Retry-After value");
        return None;
    };

    match datetime.duration_since(std::time::SystemTime::now()) {
        Ok(duration) if duration > MAX_RETRY_AFTER => {
            warn!(
                delay_secs = duration.as_secs(),
                max_secs = MAX_RETRY_AFTER.as_secs(),
                "Retry-After date exceeds maximum, capping at 1 hour"
            );
            Some(MAX_RETRY_AFTER)
        }
        Ok(duration) => Some(duration),
        Err(_) => {
            debug!(header_value, "Retry-After date is in the past, returning zero");
            Some(Duration::ZERO)
        }
    }
}
