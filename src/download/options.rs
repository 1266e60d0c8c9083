//! Per-download configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::warn;

use super::backoff::Backoff;
use super::constants::{
    DEFAULT_HIGH_WATER_MARK, DEFAULT_MAX_RECONNECTS, DEFAULT_MAX_REDIRECTS, DEFAULT_MAX_RETRIES,
};
use super::decoder::DecoderRegistry;
use super::error::BoxError;
use super::request::{RequestDescriptor, TransformHook};

/// Options for a single download, fixed when the download starts.
///
/// Built with the `with_*` methods:
///
/// ```
/// use std::time::Duration;
/// use streamget_core::download::{DecoderRegistry, Options};
///
/// let options = Options::default()
///     .with_max_retries(5)
///     .with_max_reconnects(3)
///     .with_header("authorization", "Bearer token")
///     .with_accept_encoding(DecoderRegistry::standard());
/// assert_eq!(options.max_retries, 5);
/// ```
#[derive(Clone)]
pub struct Options {
    /// Redirect responses followed before failing.
    pub max_redirects: u32,
    /// Failed attempts retried before any payload byte arrives.
    pub max_retries: u32,
    /// Reconnects allowed after payload bytes have been received.
    pub max_reconnects: u32,
    /// Delay schedule for retries and reconnects.
    pub backoff: Backoff,
    /// Events buffered ahead of a slow consumer.
    pub high_water_mark: usize,
    /// HTTP method for every attempt.
    pub method: Method,
    /// Headers sent on every attempt.
    pub headers: HeaderMap,
    /// Hook that may rewrite each request before it is sent.
    pub transform: Option<TransformHook>,
    /// Content-coding decoders. `None` disables decoding entirely.
    pub accept_encoding: Option<DecoderRegistry>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_redirects: DEFAULT_MAX_REDIRECTS,
            max_retries: DEFAULT_MAX_RETRIES,
            max_reconnects: DEFAULT_MAX_RECONNECTS,
            backoff: Backoff::default(),
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            method: Method::GET,
            headers: HeaderMap::new(),
            transform: None,
            accept_encoding: None,
        }
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("max_redirects", &self.max_redirects)
            .field("max_retries", &self.max_retries)
            .field("max_reconnects", &self.max_reconnects)
            .field("backoff", &self.backoff)
            .field("high_water_mark", &self.high_water_mark)
            .field("method", &self.method)
            .field("headers", &self.headers)
            .field("transform", &self.transform.is_some())
            .field("accept_encoding", &self.accept_encoding)
            .finish()
    }
}

impl Options {
    #[must_use]
    pub fn with_max_redirects(mut self, max_redirects: u32) -> Self {
        self.max_redirects = max_redirects;
        self
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn with_max_reconnects(mut self, max_reconnects: u32) -> Self {
        self.max_reconnects = max_reconnects;
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, inc: Duration, max: Duration) -> Self {
        self.backoff = Backoff::new(inc, max);
        self
    }

    /// Sets the event buffer size. Zero is raised to one.
    #[must_use]
    pub fn with_high_water_mark(mut self, high_water_mark: usize) -> Self {
        self.high_water_mark = high_water_mark.max(1);
        self
    }

    #[must_use]
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Adds a header, replacing any previous value.
    ///
    /// Names or values that are not valid HTTP are logged and skipped.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => warn!(header = name, "ignoring invalid header"),
        }
        self
    }

    #[must_use]
    pub fn with_transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(RequestDescriptor) -> Result<RequestDescriptor, BoxError> + Send + Sync + 'static,
    {
        self.transform = Some(Arc::new(transform));
        self
    }

    /// Enables content decoding with `registry` and advertises its codings.
    #[must_use]
    pub fn with_accept_encoding(mut self, registry: DecoderRegistry) -> Self {
        self.accept_encoding = Some(registry);
        self
    }

    /// Event channel capacity, never zero.
    pub(crate) fn channel_capacity(&self) -> usize {
        self.high_water_mark.max(1)
    }
}
