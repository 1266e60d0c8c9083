//! Default HTTP(S) transport backed by reqwest.
//!
//! [`HttpClient`] issues exactly one request per [`Transport::send`] call:
//! redirects are returned to the session untouched and bodies are streamed
//! without any content decoding.

use std::error::Error as _;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use reqwest::redirect::Policy;
use tracing::{debug, instrument};

use super::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use super::error::{TransportError, TransportErrorKind};
use super::request::RequestDescriptor;
use super::transport::{Transport, TransportResponse};
use crate::user_agent;

/// reqwest-backed [`Transport`] for `http` and `https`.
///
/// Create once and share: the inner client pools connections.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use streamget_core::download::{HttpClient, TransportRegistry};
///
/// let transports = TransportRegistry::with_http(Arc::new(HttpClient::new()));
/// assert!(transports.supports("https"));
/// ```
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    /// Creates a client with default timeouts.
    ///
    /// Default configuration:
    /// - Connect timeout: 30 seconds
    /// - Read timeout: 5 minutes between body reads
    /// - Redirects: never followed
    /// - Content decoding: none
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the static
    /// configuration. This should never happen in practice.
    #[must_use]
    pub fn new() -> Self {
        Self::new_with_timeouts(CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS)
    }

    /// Creates a client with explicit timeout values.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the supplied
    /// timeout configuration.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new_with_timeouts(connect_timeout_secs: u64, read_timeout_secs: u64) -> Self {
        let client = build_client(connect_timeout_secs, read_timeout_secs)
            .expect("failed to build HTTP client with static configuration");
        Self { client }
    }

    /// Wraps an existing reqwest client.
    ///
    /// The client should be built with `redirect(Policy::none())`, otherwise
    /// redirect budgets are enforced by reqwest instead of the session.
    #[must_use]
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    /// Returns a reference to the underlying reqwest client.
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl Transport for HttpClient {
    #[instrument(level = "debug", skip_all, fields(method = %request.method, url = %request.url))]
    async fn send(&self, request: &RequestDescriptor) -> Result<TransportResponse, TransportError> {
        let response = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone())
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status().as_u16();
        debug!(status, "response headers received");

        let headers = response.headers().clone();
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(classify_reqwest_error))
            .boxed();

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}

fn build_client(connect_timeout_secs: u64, read_timeout_secs: u64) -> Result<Client, reqwest::Error> {
    Client::builder()
        .connect_timeout(Duration::from_secs(connect_timeout_secs))
        .read_timeout(Duration::from_secs(read_timeout_secs))
        .redirect(Policy::none())
        .user_agent(user_agent::default_user_agent())
        .build()
}

/// Maps a reqwest failure onto a [`TransportErrorKind`].
fn classify_reqwest_error(error: reqwest::Error) -> TransportError {
    let chain = error_chain_text(&error);
    let kind = if error.is_timeout() {
        TransportErrorKind::Timeout
    } else if is_name_resolution(&chain) {
        TransportErrorKind::NameResolution
    } else if chain.contains("connection reset")
        || chain.contains("connection closed")
        || chain.contains("broken pipe")
    {
        TransportErrorKind::ConnectionReset
    } else if error.is_connect() {
        TransportErrorKind::Connect
    } else if error.is_body() || error.is_decode() {
        TransportErrorKind::Body
    } else {
        TransportErrorKind::Other
    };
    TransportError::with_source(kind, chain, error)
}

/// Flattens an error and its sources into one lowercase string.
fn error_chain_text(error: &reqwest::Error) -> String {
    let mut text = error.to_string();
    let mut source = error.source();
    while let Some(inner) = source {
        text.push_str(": ");
        text.push_str(&inner.to_string());
        source = inner.source();
    }
    text.to_lowercase()
}

fn is_name_resolution(chain: &str) -> bool {
    chain.contains("dns error")
        || chain.contains("failed to lookup address")
        || chain.contains("name or service not known")
        || chain.contains("no such host")
        || chain.contains("nodename nor servname")
}
