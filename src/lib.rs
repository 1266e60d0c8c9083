//! streamget core library
//!
//! A resilient streaming HTTP(S) download engine. Given a URL it produces a
//! single logical byte stream while handling redirects, rate-limit backoff,
//! transient-error retries, mid-transfer reconnection via byte ranges and
//! content decoding.
//!
//! # Architecture
//!
//! Everything lives in [`download`]:
//! - [`download::Downloader`] - owns transports and starts sessions
//! - [`download::DownloadStream`] - ordered events, cancellation, body helpers
//! - [`download::Options`] - per-download budgets, headers, hook and decoders
//! - [`download::Transport`] - the network seam, [`download::HttpClient`] by default
//! - [`download::DecoderRegistry`] - content-coding decoders
//!
//! # Example
//!
//! ```no_run
//! use streamget_core::download::Options;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let text = streamget_core::start("https://example.com/", Options::default())
//!     .collect_text()
//!     .await?;
//! println!("{text}");
//! # Ok(())
//! # }
//! ```

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod download;
#[cfg(test)]
pub mod test_support;
pub(crate) mod user_agent;

// Re-export commonly used types
pub use download::{
    Backoff, CancelHandle, DecoderRegistry, DownloadError, DownloadEvent, DownloadStream,
    Downloader, HttpClient, Options, Progress, RequestDescriptor, SessionState, Transport,
    TransportError, TransportErrorKind, TransportRegistry,
};

/// Starts a download with a default [`Downloader`].
///
/// Each call builds a fresh HTTP client; reuse a [`Downloader`] for many downloads.
///
/// # Panics
///
/// Panics if called outside a Tokio runtime.
#[must_use]
pub fn start(url: &str, options: Options) -> DownloadStream {
    Downloader::new().start(url, options)
}
