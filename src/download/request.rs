//! Per-attempt request construction.
//!
//! [`RequestBuilder`] turns the session's current target URL and resume point
//! into a concrete [`RequestDescriptor`]: wire options are copied from
//! [`Options`](super::Options), a resume `Range` is added when the server
//! supports it, and the optional transform hook gets the final say before a
//! transport is picked for the resulting scheme.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use reqwest::Method;
use reqwest::header::{ACCEPT_ENCODING, HeaderMap, HeaderValue, RANGE};
use tracing::{debug, instrument};
use url::Url;

use super::error::{BoxError, DownloadError};
use super::options::Options;
use super::transport::{Transport, TransportRegistry};

/// User hook that may rewrite every outgoing request.
pub type TransformHook =
    Arc<dyn Fn(RequestDescriptor) -> Result<RequestDescriptor, BoxError> + Send + Sync>;

/// The wire-level description of one request.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    /// Absolute target URL.
    pub url: Url,
    /// HTTP method.
    pub method: Method,
    /// Request headers.
    pub headers: HeaderMap,
}

impl RequestDescriptor {
    /// Creates a GET descriptor with no headers.
    #[must_use]
    pub fn get(url: Url) -> Self {
        Self {
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
        }
    }

    /// Returns a header value as text, if present and valid.
    #[must_use]
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Byte range requested by the caller's own `Range` header.
///
/// Resumed requests are offset from `start` and keep `end`. The session
/// replaces the caller's range with the one the first response confirmed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RangeBase {
    /// First byte requested.
    pub start: u64,
    /// Last byte requested (inclusive), open-ended when `None`.
    pub end: Option<u64>,
}

impl RangeBase {
    /// Parses a single `bytes=start-[end]` range. Anything else means the whole resource.
    #[must_use]
    pub fn parse(value: Option<&str>) -> Self {
        let Some(spec) = value.and_then(|v| v.trim().strip_prefix("bytes=")) else {
            return Self::default();
        };
        let Some((start, end)) = spec.split_once('-') else {
            return Self::default();
        };
        let Ok(start) = start.trim().parse::<u64>() else {
            return Self::default();
        };
        let end = end.trim();
        if end.is_empty() {
            return Self { start, end: None };
        }
        match end.parse::<u64>() {
            Ok(end) => Self {
                start,
                end: Some(end),
            },
            Err(_) => Self::default(),
        }
    }

    /// Absolute offset to resume from after `downloaded` bytes.
    #[must_use]
    pub fn resume_offset(&self, downloaded: u64) -> u64 {
        self.start.saturating_add(downloaded)
    }

    /// `Range` header value resuming after `downloaded` bytes.
    #[must_use]
    pub fn resume_header(&self, downloaded: u64) -> String {
        let end = self.end.map(|end| end.to_string()).unwrap_or_default();
        format!("bytes={}-{end}", self.resume_offset(downloaded))
    }
}

/// What the session knows about the transfer so far.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResumePoint<'a> {
    /// Payload bytes received across all attempts.
    pub bytes_downloaded: u64,
    /// Whether range resume was negotiated on the first response.
    pub supports_range_resume: bool,
    /// Scheme that served the bytes so far.
    pub scheme: Option<&'a str>,
    /// Range the delivered bytes were taken from, as confirmed by the first response.
    pub range: RangeBase,
}

/// A request ready to be issued.
#[derive(Debug)]
pub struct BuiltRequest {
    /// The final descriptor, after the transform hook.
    pub descriptor: RequestDescriptor,
    /// Transport registered for the descriptor's scheme.
    pub transport: Arc<dyn Transport>,
    /// Absolute offset requested by a resume `Range`, if one was sent.
    pub resume_from: Option<u64>,
}

/// Builds per-attempt requests from a fixed option snapshot.
#[derive(Clone)]
pub struct RequestBuilder {
    method: Method,
    headers: HeaderMap,
    range: RangeBase,
    transform: Option<TransformHook>,
}

impl std::fmt::Debug for RequestBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestBuilder")
            .field("method", &self.method)
            .field("headers", &self.headers)
            .field("range", &self.range)
            .field("transform", &self.transform.is_some())
            .finish()
    }
}

impl RequestBuilder {
    /// Captures the wire-relevant parts of `options`.
    #[must_use]
    pub fn new(options: &Options) -> Self {
        let mut headers = options.headers.clone();
        if !headers.contains_key(ACCEPT_ENCODING)
            && let Some(value) = options
                .accept_encoding
                .as_ref()
                .and_then(super::DecoderRegistry::accept_encoding)
            && let Ok(value) = HeaderValue::from_str(&value)
        {
            headers.insert(ACCEPT_ENCODING, value);
        }
        let range = RangeBase::parse(headers.get(RANGE).and_then(|v| v.to_str().ok()));

        Self {
            method: options.method.clone(),
            headers,
            range,
            transform: options.transform.clone(),
        }
    }

    /// The caller's base range, parsed once.
    #[must_use]
    pub fn range_base(&self) -> RangeBase {
        self.range
    }

    /// Builds the request for one attempt.
    ///
    /// # Errors
    ///
    /// - [`DownloadError::InvalidUrl`] if `target_url` does not parse or its
    ///   scheme has no transport
    /// - [`DownloadError::InvalidTransformResult`] if the hook fails or panics
    /// - [`DownloadError::UnsupportedProtocol`] if the hook switched to a
    ///   scheme with no transport
    #[instrument(level = "debug", skip(self, transports), fields(url = %target_url))]
    pub fn build(
        &self,
        target_url: &str,
        resume: ResumePoint<'_>,
        transports: &TransportRegistry,
    ) -> Result<BuiltRequest, DownloadError> {
        let url = Url::parse(target_url).map_err(|_| DownloadError::invalid_url(target_url))?;
        if !transports.supports(url.scheme()) {
            return Err(DownloadError::invalid_url(target_url));
        }

        let mut descriptor = RequestDescriptor {
            url,
            method: self.method.clone(),
            headers: self.headers.clone(),
        };

        let mut resume_from = None;
        if resume.supports_range_resume && resume.bytes_downloaded > 0 {
            let range = resume.range.resume_header(resume.bytes_downloaded);
            if let Ok(value) = HeaderValue::from_str(&range) {
                debug!(range = %range, "resuming with range request");
                descriptor.headers.insert(RANGE, value);
                resume_from = Some(resume.range.resume_offset(resume.bytes_downloaded));
            }
        }

        if let Some(transform) = &self.transform {
            descriptor = apply_transform(transform, descriptor, target_url)?;
        }

        if resume_from.is_some()
            && resume
                .scheme
                .is_some_and(|scheme| scheme != descriptor.url.scheme())
        {
            debug!(
                scheme = descriptor.url.scheme(),
                "scheme changed after transfer started, dropping resume range"
            );
            match self.headers.get(RANGE) {
                Some(original) => {
                    descriptor.headers.insert(RANGE, original.clone());
                }
                None => {
                    descriptor.headers.remove(RANGE);
                }
            }
            resume_from = None;
        }

        let scheme = descriptor.url.scheme();
        let transport = transports
            .get(scheme)
            .ok_or_else(|| DownloadError::unsupported_protocol(scheme, descriptor.url.as_str()))?;

        Ok(BuiltRequest {
            descriptor,
            transport,
            resume_from,
        })
    }
}

fn apply_transform(
    transform: &TransformHook,
    descriptor: RequestDescriptor,
    target_url: &str,
) -> Result<RequestDescriptor, DownloadError> {
    match catch_unwind(AssertUnwindSafe(|| transform(descriptor))) {
        Ok(Ok(descriptor)) => Ok(descriptor),
        Ok(Err(source)) => Err(DownloadError::invalid_transform(
            target_url,
            "transform hook returned an error",
            Some(source),
        )),
        Err(_) => Err(DownloadError::invalid_transform(
            target_url,
            "transform hook panicked",
            None,
        )),
    }
}
