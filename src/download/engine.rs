//! Entry point for starting downloads.
//!
//! A [`Downloader`] owns the scheme → transport map and spawns one session
//! task per [`Downloader::start`] call. The task is scheduled, never run
//! inline, so the caller always holds the stream before the first event.
//!
//! # Example
//!
//! ```no_run
//! use streamget_core::download::{Downloader, Options};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let downloader = Downloader::new();
//! let text = downloader
//!     .start("https://example.com/notes.txt", Options::default().with_max_reconnects(3))
//!     .collect_text()
//!     .await?;
//! println!("{text}");
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use super::client::HttpClient;
use super::options::Options;
use super::session::DownloadSession;
use super::stream::{DownloadStream, Shared};
use super::transport::{Transport, TransportRegistry};

/// Starts downloads over a set of transports.
#[derive(Debug, Clone)]
pub struct Downloader {
    transports: TransportRegistry,
}

impl Default for Downloader {
    fn default() -> Self {
        Self::new()
    }
}

impl Downloader {
    /// Creates a downloader serving `http` and `https` with a default [`HttpClient`].
    ///
    /// # Panics
    ///
    /// Panics if the default HTTP client cannot be built (see [`HttpClient::new`]).
    #[must_use]
    pub fn new() -> Self {
        Self::with_transports(TransportRegistry::with_http(Arc::new(HttpClient::new())))
    }

    /// Creates a downloader over an explicit transport map.
    #[must_use]
    pub fn with_transports(transports: TransportRegistry) -> Self {
        Self { transports }
    }

    /// Registers (or replaces) the transport for a scheme.
    pub fn register_transport(
        &mut self,
        scheme: impl AsRef<str>,
        transport: Arc<dyn Transport>,
    ) -> &mut Self {
        self.transports.register(scheme, transport);
        self
    }

    /// Returns the transport map.
    #[must_use]
    pub fn transports(&self) -> &TransportRegistry {
        &self.transports
    }

    /// Starts downloading `url` and returns its event stream immediately.
    ///
    /// URL and option errors are reported on the stream, never here.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn start(&self, url: &str, options: Options) -> DownloadStream {
        let (events_tx, events_rx) = mpsc::channel(options.channel_capacity());
        let (shared, mut cancel_rx) = Shared::new();
        let session = DownloadSession::new(
            url,
            &options,
            self.transports.clone(),
            events_tx,
            Arc::clone(&shared),
        );

        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = cancel_rx.wait_for(|cancelled| *cancelled) => {
                    debug!("session task cancelled");
                }
                () = session.run() => {}
            }
        });

        DownloadStream::new(events_rx, shared)
    }
}
