//! Constants for the download module (defaults, timeouts, caps).

use std::time::Duration;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout (5 minutes between body reads).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Default redirect budget.
pub const DEFAULT_MAX_REDIRECTS: u32 = 2;

/// Default pre-stream retry budget.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Default mid-stream reconnect budget (range resume is off unless raised).
pub const DEFAULT_MAX_RECONNECTS: u32 = 0;

/// Default backoff increment per retry.
pub const DEFAULT_BACKOFF_INC: Duration = Duration::from_millis(100);

/// Default backoff cap.
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_millis(10_000);

/// Default number of events buffered ahead of the consumer.
pub const DEFAULT_HIGH_WATER_MARK: usize = 16;

/// Maximum Retry-After header value (1 hour) to prevent excessive delays.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Status codes followed as redirects.
pub const REDIRECT_STATUS_CODES: [u16; 5] = [301, 302, 303, 307, 308];

/// Status codes treated as rate limiting.
pub const RATE_LIMIT_STATUS_CODES: [u16; 2] = [429, 503];
