//! The seam between the session and the network.
//!
//! A [`Transport`] issues exactly one request per call and hands back the raw
//! status, headers and body stream. It must not follow redirects or decode
//! content-codings: the session does both. [`TransportRegistry`] maps URL
//! schemes to transports.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use reqwest::header::HeaderMap;

use super::error::TransportError;
use super::request::RequestDescriptor;

/// Body of a transport response.
pub type BodyStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// Raw response from one attempt.
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: HeaderMap,
    /// Encoded body bytes. Dropping it aborts the transfer.
    pub body: BodyStream,
}

impl fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl TransportResponse {
    /// Returns a header value as text, if present and valid.
    #[must_use]
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Issues single requests for the session.
#[async_trait]
pub trait Transport: fmt::Debug + Send + Sync {
    /// Sends `request` and returns once response headers are available.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when no response could be obtained.
    async fn send(&self, request: &RequestDescriptor) -> Result<TransportResponse, TransportError>;
}

/// Scheme → transport map.
#[derive(Clone, Default)]
pub struct TransportRegistry {
    transports: HashMap<String, Arc<dyn Transport>>,
}

impl fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut schemes: Vec<&String> = self.transports.keys().collect();
        schemes.sort();
        f.debug_struct("TransportRegistry")
            .field("schemes", &schemes)
            .finish()
    }
}

impl TransportRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry serving both `http` and `https` with one transport.
    #[must_use]
    pub fn with_http(transport: Arc<dyn Transport>) -> Self {
        let mut registry = Self::new();
        registry.register("http", Arc::clone(&transport));
        registry.register("https", transport);
        registry
    }

    /// Registers (or replaces) the transport for a scheme.
    pub fn register(&mut self, scheme: impl AsRef<str>, transport: Arc<dyn Transport>) -> &mut Self {
        self.transports
            .insert(scheme.as_ref().to_ascii_lowercase(), transport);
        self
    }

    /// Returns the transport for a scheme.
    #[must_use]
    pub fn get(&self, scheme: &str) -> Option<Arc<dyn Transport>> {
        self.transports
            .get(&scheme.to_ascii_lowercase())
            .map(Arc::clone)
    }

    /// Returns true if a transport is registered for the scheme.
    #[must_use]
    pub fn supports(&self, scheme: &str) -> bool {
        self.transports.contains_key(&scheme.to_ascii_lowercase())
    }
}
