//! Resilient streaming download engine.
//!
//! One call to [`Downloader::start`] yields one [`DownloadStream`] carrying a
//! single continuous body, however many network attempts it took.
//!
//! # Features
//!
//! - Redirects followed by the session, with a budget and relative `Location` support
//! - Retries with linear backoff and `Retry-After` before any payload arrives
//! - Reconnects after payload arrives, resuming by byte range when the server allows
//! - Content-coding decoder chains (gzip, deflate, custom)
//! - Per-request transform hook
//! - Bounded event buffering and cancellation
//!
//! # Example
//!
//! ```no_run
//! use futures_util::StreamExt;
//! use streamget_core::download::{DecoderRegistry, DownloadEvent, Downloader, Options};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let options = Options::default()
//!     .with_max_reconnects(5)
//!     .with_accept_encoding(DecoderRegistry::standard());
//! let mut stream = Downloader::new().start("https://example.com/data.csv", options);
//! while let Some(event) = stream.next().await {
//!     match event {
//!         DownloadEvent::Data(chunk) => println!("got {} bytes", chunk.len()),
//!         DownloadEvent::Reconnect { offset, .. } => println!("reconnecting at {offset}"),
//!         DownloadEvent::Error(error) => return Err(error.into()),
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod backoff;
mod client;
pub mod constants;
mod decoder;
mod engine;
mod error;
mod options;
mod request;
mod retry;
mod session;
mod stream;
mod transport;

pub use backoff::{Backoff, parse_retry_after};
pub use client::HttpClient;
pub use decoder::{
    DecoderChain, DecoderFactory, DecoderRegistry, DecoderStage, DeflateStage, GzipStage,
    StageError,
};
pub use engine::Downloader;
pub use error::{BoxError, DownloadError, TransportError, TransportErrorKind};
pub use options::Options;
pub use request::{
    BuiltRequest, RangeBase, RequestBuilder, RequestDescriptor, ResumePoint, TransformHook,
};
pub use retry::{
    FailureType, RetryDecision, RetryPolicy, TransferState, classify_error, classify_status,
};
pub use stream::{CancelHandle, DownloadBody, DownloadEvent, DownloadStream, Progress, SessionState};
pub use transport::{BodyStream, Transport, TransportRegistry, TransportResponse};

// Note: no module-local Result alias. Use `Result<T, DownloadError>` explicitly.
