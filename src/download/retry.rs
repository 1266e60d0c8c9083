//! Retry and reconnect decisions for failed attempts.
//!
//! When an attempt ends abnormally the session asks [`RetryPolicy::decide`]
//! what to do next. The failure is first classified into a [`FailureType`]:
//! - [`FailureType::Transient`] - transport errors, premature body ends, 5xx
//! - [`FailureType::RateLimited`] - 429 and 503
//! - [`FailureType::Permanent`] - everything else
//!
//! Before any payload byte has arrived, transient and rate-limited failures
//! are retried while the retry budget lasts. Once bytes have arrived, an
//! incomplete transfer is reconnected while the reconnect budget lasts.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use streamget_core::download::{
//!     Backoff, DownloadError, RetryDecision, RetryPolicy, TransferState, classify_error,
//! };
//!
//! let policy = RetryPolicy::new(2, 0, Backoff::default());
//! let error = DownloadError::status_code("https://example.com/file", 503);
//!
//! let decision = policy.decide(classify_error(&error), None, 0, 0, TransferState::default());
//! assert_eq!(
//!     decision,
//!     RetryDecision::Retry { delay: Duration::from_millis(100), attempt: 1 }
//! );
//! ```

use std::time::Duration;

use tracing::{debug, instrument};

use super::backoff::Backoff;
use super::constants::RATE_LIMIT_STATUS_CODES;
use super::error::DownloadError;

/// Classification of an attempt failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// May succeed on another attempt.
    Transient,
    /// The server asked us to slow down (429, 503).
    RateLimited,
    /// Will not succeed regardless of retries.
    Permanent,
}

impl FailureType {
    /// Returns true if another attempt may help.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Transient | Self::RateLimited)
    }
}

/// What the session knows about the transfer when an attempt fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferState {
    /// Payload bytes received across all attempts.
    pub bytes_downloaded: u64,
    /// Learned from the first successful response.
    pub content_length: Option<u64>,
    /// Whether range resume was negotiated.
    pub supports_range_resume: bool,
}

impl TransferState {
    /// True when range resume is active and every byte has arrived.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.supports_range_resume && self.content_length == Some(self.bytes_downloaded)
    }
}

/// Next step after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry from scratch; no payload was received yet.
    Retry {
        /// How long to wait first.
        delay: Duration,
        /// The retry number this will be (1-indexed).
        attempt: u32,
    },

    /// Reconnect and continue an interrupted transfer.
    Reconnect {
        /// How long to wait first.
        delay: Duration,
        /// The reconnect number this will be (1-indexed).
        reconnect: u32,
    },

    /// Give up and surface the error.
    DoNotRetry {
        /// Human-readable reason.
        reason: String,
    },
}

/// Retry and reconnect budgets plus the backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    max_reconnects: u32,
    backoff: Backoff,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_retries: u32, max_reconnects: u32, backoff: Backoff) -> Self {
        Self {
            max_retries,
            max_reconnects,
            backoff,
        }
    }

    /// Returns the retry budget.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Returns the reconnect budget.
    #[must_use]
    pub fn max_reconnects(&self) -> u32 {
        self.max_reconnects
    }

    /// Decides what follows a failed attempt.
    ///
    /// # Arguments
    ///
    /// * `failure` - classification of the failure
    /// * `retry_after` - server-supplied delay, preferred over backoff for retries
    /// * `retry_count` - retries already spent
    /// * `reconnect_count` - reconnects already spent
    /// * `transfer` - byte accounting at the time of failure
    #[instrument(skip(self), fields(max_retries = self.max_retries, max_reconnects = self.max_reconnects))]
    pub fn decide(
        &self,
        failure: FailureType,
        retry_after: Option<Duration>,
        retry_count: u32,
        reconnect_count: u32,
        transfer: TransferState,
    ) -> RetryDecision {
        if !failure.is_retryable() {
            return RetryDecision::DoNotRetry {
                reason: "permanent failure - retry would not help".to_string(),
            };
        }

        if transfer.bytes_downloaded > 0 {
            if transfer.is_complete() {
                return RetryDecision::DoNotRetry {
                    reason: "transfer already complete".to_string(),
                };
            }
            if reconnect_count >= self.max_reconnects {
                debug!(reconnect_count, "reconnect budget exhausted");
                return RetryDecision::DoNotRetry {
                    reason: format!("max reconnects ({}) exhausted", self.max_reconnects),
                };
            }
            let delay = self.backoff.reconnect_delay();
            debug!(
                bytes_downloaded = transfer.bytes_downloaded,
                delay_ms = delay.as_millis(),
                "will reconnect"
            );
            return RetryDecision::Reconnect {
                delay,
                reconnect: reconnect_count + 1,
            };
        }

        if retry_count >= self.max_retries {
            debug!(retry_count, "retry budget exhausted");
            return RetryDecision::DoNotRetry {
                reason: format!("max retries ({}) exhausted", self.max_retries),
            };
        }

        let attempt = retry_count + 1;
        let delay = self.backoff.delay_for(attempt, retry_after);
        debug!(attempt, delay_ms = delay.as_millis(), "will retry");
        RetryDecision::Retry { delay, attempt }
    }
}

/// Classifies a failure for retry decisions.
///
/// | Failure | Type |
/// |---------|------|
/// | Transport error (DNS, connect, reset, timeout, short body) | Transient |
/// | 429, 503 | RateLimited |
/// | Other 5xx | Transient |
/// | Any other status | Permanent |
/// | Decode error, range mismatch, invalid URL, transform error | Permanent |
#[must_use]
pub fn classify_error(error: &DownloadError) -> FailureType {
    match error {
        DownloadError::Transport { .. } => FailureType::Transient,
        DownloadError::StatusCode { status, .. } => classify_status(*status),
        _ => FailureType::Permanent,
    }
}

/// Classifies an HTTP status code.
#[must_use]
pub fn classify_status(status: u16) -> FailureType {
    if RATE_LIMIT_STATUS_CODES.contains(&status) {
        FailureType::RateLimited
    } else if (500..600).contains(&status) {
        FailureType::Transient
    } else {
        FailureType::Permanent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::{TransportError, TransportErrorKind};

    fn policy(max_retries: u32, max_reconnects: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries, max_reconnects, Backoff::default())
    }

    fn streaming(bytes: u64, length: Option<u64>, range: bool) -> TransferState {
        TransferState {
            bytes_downloaded: bytes,
            content_length: length,
            supports_range_resume: range,
        }
    }

    // ==================== Classification Tests ====================

    #[test]
    fn test_classify_status_codes() {
        assert_eq!(classify_status(429), FailureType::RateLimited);
        assert_eq!(classify_status(503), FailureType::RateLimited);
        assert_eq!(classify_status(500), FailureType::Transient);
        assert_eq!(classify_status(502), FailureType::Transient);
        assert_eq!(classify_status(404), FailureType::Permanent);
        assert_eq!(classify_status(403), FailureType::Permanent);
    }

    #[test]
    fn test_classify_errors() {
        let transport = DownloadError::transport(
            "https://example.com",
            TransportError::new(TransportErrorKind::NameResolution, "dns error"),
        );
        assert_eq!(classify_error(&transport), FailureType::Transient);

        let decode = DownloadError::decode(
            "https://example.com",
            "gzip",
            std::io::Error::new(std::io::ErrorKind::InvalidData, "corrupt"),
        );
        assert_eq!(classify_error(&decode), FailureType::Permanent);

        let mismatch = DownloadError::range_mismatch("https://example.com", 10, 0);
        assert_eq!(classify_error(&mismatch), FailureType::Permanent);
    }

    // ==================== Retry Tests ====================

    #[test]
    fn test_retry_uses_linear_backoff() {
        let policy = policy(3, 0);
        let state = TransferState::default();
        assert_eq!(
            policy.decide(FailureType::Transient, None, 0, 0, state),
            RetryDecision::Retry {
                delay: Duration::from_millis(100),
                attempt: 1
            }
        );
        assert_eq!(
            policy.decide(FailureType::Transient, None, 2, 0, state),
            RetryDecision::Retry {
                delay: Duration::from_millis(300),
                attempt: 3
            }
        );
    }

    #[test]
    fn test_retry_prefers_retry_after() {
        let decision = policy(2, 0).decide(
            FailureType::RateLimited,
            Some(Duration::from_secs(5)),
            0,
            0,
            TransferState::default(),
        );
        assert_eq!(
            decision,
            RetryDecision::Retry {
                delay: Duration::from_secs(5),
                attempt: 1
            }
        );
    }

    #[test]
    fn test_retry_budget_exhausted() {
        let decision = policy(2, 0).decide(FailureType::Transient, None, 2, 0, TransferState::default());
        assert!(matches!(decision, RetryDecision::DoNotRetry { .. }));
    }

    #[test]
    fn test_zero_retries_never_retries() {
        let decision = policy(0, 5).decide(FailureType::Transient, None, 0, 0, TransferState::default());
        assert!(matches!(decision, RetryDecision::DoNotRetry { .. }));
    }

    #[test]
    fn test_permanent_failure_never_retries() {
        let decision = policy(5, 5).decide(FailureType::Permanent, None, 0, 0, TransferState::default());
        match decision {
            RetryDecision::DoNotRetry { reason } => assert!(reason.contains("permanent")),
            other => panic!("expected DoNotRetry, got {other:?}"),
        }
    }

    // ==================== Reconnect Tests ====================

    #[test]
    fn test_reconnect_after_partial_transfer() {
        let decision = policy(0, 1).decide(
            FailureType::Transient,
            None,
            0,
            0,
            streaming(40, Some(100), true),
        );
        assert_eq!(
            decision,
            RetryDecision::Reconnect {
                delay: Duration::from_millis(100),
                reconnect: 1
            }
        );
    }

    #[test]
    fn test_reconnect_delay_ignores_retry_after_and_count() {
        let decision = policy(0, 5).decide(
            FailureType::RateLimited,
            Some(Duration::from_secs(30)),
            0,
            3,
            streaming(40, Some(100), true),
        );
        assert_eq!(
            decision,
            RetryDecision::Reconnect {
                delay: Duration::from_millis(100),
                reconnect: 4
            }
        );
    }

    #[test]
    fn test_reconnect_budget_exhausted() {
        let decision = policy(5, 1).decide(
            FailureType::Transient,
            None,
            0,
            1,
            streaming(40, Some(100), true),
        );
        match decision {
            RetryDecision::DoNotRetry { reason } => assert!(reason.contains("reconnects")),
            other => panic!("expected DoNotRetry, got {other:?}"),
        }
    }

    #[test]
    fn test_reconnect_without_range_support() {
        let decision = policy(0, 1).decide(
            FailureType::Transient,
            None,
            0,
            0,
            streaming(40, None, false),
        );
        assert!(matches!(decision, RetryDecision::Reconnect { .. }));
    }

    #[test]
    fn test_complete_transfer_is_not_reconnected() {
        let decision = policy(0, 3).decide(
            FailureType::Transient,
            None,
            0,
            0,
            streaming(100, Some(100), true),
        );
        assert!(matches!(decision, RetryDecision::DoNotRetry { .. }));
    }

    #[test]
    fn test_bytes_received_skip_retry_budget() {
        // Retries remain but bytes arrived: only the reconnect budget applies.
        let decision = policy(5, 0).decide(
            FailureType::Transient,
            None,
            0,
            0,
            streaming(1, Some(100), true),
        );
        assert!(matches!(decision, RetryDecision::DoNotRetry { .. }));
    }
}
