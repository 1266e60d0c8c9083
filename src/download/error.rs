//! Error types for the download module.
//!
//! [`DownloadError`] is what a session surfaces on its error channel once every
//! redirect, retry and reconnect budget that could have hidden the failure is
//! spent. [`TransportError`] is what a [`Transport`](super::Transport) reports for
//! a single network attempt.

use std::fmt;

use thiserror::Error;

/// Boxed error used at the user-supplied seams (transform hooks, custom transports).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that end a download session.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The target URL could not be parsed, or its scheme has no registered transport.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The URL as given (or as produced by a redirect).
        url: String,
    },

    /// The transform hook produced a request whose scheme has no registered transport.
    #[error("unsupported protocol `{scheme}` for {url}")]
    UnsupportedProtocol {
        /// The unsupported scheme.
        scheme: String,
        /// The rewritten URL.
        url: String,
    },

    /// The transform hook failed or panicked.
    #[error("invalid transform result for {url}: {reason}")]
    InvalidTransformResult {
        /// The URL handed to the hook.
        url: String,
        /// What went wrong.
        reason: String,
        /// The hook's own error, when it returned one.
        #[source]
        source: Option<BoxError>,
    },

    /// More redirect responses than `max_redirects` allows.
    #[error("too many redirects ({max}) downloading {url}")]
    TooManyRedirects {
        /// The URL that answered with the redirect over budget.
        url: String,
        /// The configured redirect budget.
        max: u32,
    },

    /// A redirect status arrived without a usable `Location` header.
    #[error("HTTP {status} redirect without Location header downloading {url}")]
    MissingRedirectLocation {
        /// The URL that answered with the redirect.
        url: String,
        /// The redirect status code.
        status: u16,
    },

    /// Non-success HTTP status that was not (or could no longer be) retried.
    #[error("HTTP {status} downloading {url}")]
    StatusCode {
        /// The URL that returned the status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The transport failed (DNS, connect, reset, timeout, body read).
    #[error("transport error downloading {url}: {source}")]
    Transport {
        /// The URL being fetched.
        url: String,
        /// The underlying transport failure.
        #[source]
        source: TransportError,
    },

    /// A decoder stage rejected the response body.
    #[error("failed to decode `{encoding}` body from {url}: {source}")]
    Decode {
        /// The URL being fetched.
        url: String,
        /// The content-coding whose decoder failed.
        encoding: String,
        /// The decoder error.
        #[source]
        source: std::io::Error,
    },

    /// A resumed request answered 206 for a different offset than requested.
    #[error("range mismatch downloading {url}: requested offset {expected}, server sent {actual}")]
    RangeMismatch {
        /// The URL being fetched.
        url: String,
        /// The offset requested in the `Range` header.
        expected: u64,
        /// The offset announced by `Content-Range`.
        actual: u64,
    },

    /// The session was cancelled before it finished.
    ///
    /// Never emitted as an event; only returned by the collecting helpers.
    #[error("download cancelled")]
    Cancelled,
}

impl DownloadError {
    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates an unsupported protocol error.
    pub fn unsupported_protocol(scheme: impl Into<String>, url: impl Into<String>) -> Self {
        Self::UnsupportedProtocol {
            scheme: scheme.into(),
            url: url.into(),
        }
    }

    /// Creates an invalid transform result error.
    pub fn invalid_transform(
        url: impl Into<String>,
        reason: impl Into<String>,
        source: Option<BoxError>,
    ) -> Self {
        Self::InvalidTransformResult {
            url: url.into(),
            reason: reason.into(),
            source,
        }
    }

    /// Creates a too-many-redirects error.
    pub fn too_many_redirects(url: impl Into<String>, max: u32) -> Self {
        Self::TooManyRedirects {
            url: url.into(),
            max,
        }
    }

    /// Creates a missing redirect location error.
    pub fn missing_redirect_location(url: impl Into<String>, status: u16) -> Self {
        Self::MissingRedirectLocation {
            url: url.into(),
            status,
        }
    }

    /// Creates an HTTP status error.
    pub fn status_code(url: impl Into<String>, status: u16) -> Self {
        Self::StatusCode {
            url: url.into(),
            status,
        }
    }

    /// Creates a transport error.
    pub fn transport(url: impl Into<String>, source: TransportError) -> Self {
        Self::Transport {
            url: url.into(),
            source,
        }
    }

    /// Creates a decoder error.
    pub fn decode(
        url: impl Into<String>,
        encoding: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Self::Decode {
            url: url.into(),
            encoding: encoding.into(),
            source,
        }
    }

    /// Creates a range mismatch error.
    pub fn range_mismatch(url: impl Into<String>, expected: u64, actual: u64) -> Self {
        Self::RangeMismatch {
            url: url.into(),
            expected,
            actual,
        }
    }

    /// Returns the HTTP status code carried by this error, if any.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::StatusCode { status, .. } | Self::MissingRedirectLocation { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }

    /// Returns the transport failure kind, if this is a transport error.
    #[must_use]
    pub fn transport_kind(&self) -> Option<TransportErrorKind> {
        match self {
            Self::Transport { source, .. } => Some(source.kind()),
            _ => None,
        }
    }
}

/// Classification of a transport-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The host name could not be resolved.
    NameResolution,
    /// The connection could not be established.
    Connect,
    /// Connect or read timed out.
    Timeout,
    /// The peer reset or closed the connection mid-transfer.
    ConnectionReset,
    /// The response body could not be read.
    Body,
    /// Anything else.
    Other,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::NameResolution => "name resolution failed",
            Self::Connect => "connect failed",
            Self::Timeout => "timed out",
            Self::ConnectionReset => "connection reset",
            Self::Body => "body read failed",
            Self::Other => "request failed",
        };
        f.write_str(label)
    }
}

/// A single attempt's transport failure.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
    kind: TransportErrorKind,
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl TransportError {
    /// Creates a transport error without an underlying cause.
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Creates a transport error wrapping an underlying cause.
    pub fn with_source(
        kind: TransportErrorKind,
        message: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Returns the failure classification.
    #[must_use]
    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    /// Returns true for host name resolution failures.
    #[must_use]
    pub fn is_name_resolution(&self) -> bool {
        self.kind == TransportErrorKind::NameResolution
    }
}

// No `From<reqwest::Error>` here: every variant needs the URL, which the source
// error does not carry. Use the helper constructors.
