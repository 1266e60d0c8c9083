//! The consumer side of a download session.
//!
//! [`DownloadStream`] yields [`DownloadEvent`]s in order. Exactly one terminal
//! event ([`DownloadEvent::Completed`], [`DownloadEvent::Error`] or
//! [`DownloadEvent::Cancelled`]) ends every stream. Events are buffered up to
//! the configured high-water mark; beyond that the session waits for the
//! consumer.

use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll, ready};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use tokio::sync::{mpsc, watch};
use tracing::debug;

use super::error::DownloadError;

/// Something that happened during a download.
#[derive(Debug)]
pub enum DownloadEvent {
    /// An attempt is about to be sent.
    Request {
        /// Final URL after the transform hook.
        url: String,
        /// Attempt number within the session (1-indexed).
        attempt: u32,
    },
    /// Response headers arrived.
    Response {
        /// HTTP status code.
        status: u16,
        /// Declared `Content-Length`, if any.
        content_length: Option<u64>,
    },
    /// A redirect is being followed.
    Redirect {
        /// URL that answered with the redirect.
        from: String,
        /// Resolved `Location`.
        to: String,
        /// Redirect status code.
        status: u16,
        /// Wait before the next attempt.
        delay: Duration,
    },
    /// The server rate-limited us and the request will be retried.
    RateLimited {
        /// 429 or 503.
        status: u16,
        /// Retry number (1-indexed).
        retry: u32,
        /// Wait before the next attempt.
        delay: Duration,
    },
    /// A failed attempt will be retried; no payload had been received.
    Retry {
        /// Retry number (1-indexed).
        retry: u32,
        /// Wait before the next attempt.
        delay: Duration,
        /// The failure being retried.
        reason: String,
    },
    /// An interrupted transfer will be continued.
    Reconnect {
        /// Reconnect number (1-indexed).
        reconnect: u32,
        /// Wait before the next attempt.
        delay: Duration,
        /// Payload bytes received so far.
        offset: u64,
        /// The failure that interrupted the transfer.
        reason: String,
    },
    /// Decoded payload bytes.
    Data(Bytes),
    /// The download finished.
    Completed {
        /// Payload bytes received across all attempts.
        bytes_downloaded: u64,
    },
    /// The download was cancelled.
    Cancelled,
    /// The download failed.
    Error(DownloadError),
}

impl DownloadEvent {
    /// Returns true for `Completed`, `Cancelled` and `Error`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Cancelled | Self::Error(_))
    }

    /// Short name, used for logging and the CLI event log.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Request { .. } => "request",
            Self::Response { .. } => "response",
            Self::Redirect { .. } => "redirect",
            Self::RateLimited { .. } => "rate_limited",
            Self::Retry { .. } => "retry",
            Self::Reconnect { .. } => "reconnect",
            Self::Data(_) => "data",
            Self::Completed { .. } => "completed",
            Self::Cancelled => "cancelled",
            Self::Error(_) => "error",
        }
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Still running.
    Active,
    /// Every byte was delivered.
    Completed,
    /// A fatal error was surfaced.
    Failed,
    /// `cancel()` won.
    Cancelled,
}

/// Byte accounting snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    /// Payload bytes received from the network across all attempts.
    pub bytes_downloaded: u64,
    /// Decoded bytes handed to the consumer.
    pub bytes_delivered: u64,
    /// `Content-Length` of the first successful response.
    pub content_length: Option<u64>,
}

/// State shared by the session task and its consumer.
#[derive(Debug)]
pub(crate) struct Shared {
    state: Mutex<SessionState>,
    progress: Mutex<Progress>,
    cancel_tx: watch::Sender<bool>,
}

impl Shared {
    pub(crate) fn new() -> (Arc<Self>, watch::Receiver<bool>) {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let shared = Arc::new(Self {
            state: Mutex::new(SessionState::Active),
            progress: Mutex::new(Progress::default()),
            cancel_tx,
        });
        (shared, cancel_rx)
    }

    pub(crate) fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    /// Moves from `Active` to `outcome`. Returns false if already terminal.
    pub(crate) fn finish(&self, outcome: SessionState) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != SessionState::Active {
            return false;
        }
        *state = outcome;
        true
    }

    /// Cancels an active session and wakes its task.
    pub(crate) fn cancel(&self) -> bool {
        if !self.finish(SessionState::Cancelled) {
            return false;
        }
        self.cancel_tx.send_replace(true);
        debug!("cancellation requested");
        true
    }

    pub(crate) fn set_progress(&self, progress: Progress) {
        *self.progress.lock().unwrap_or_else(PoisonError::into_inner) = progress;
    }

    pub(crate) fn progress(&self) -> Progress {
        *self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cancels a download from anywhere.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    shared: Arc<Shared>,
}

impl CancelHandle {
    /// Cancels the download. Idempotent; a no-op once the download has ended.
    pub fn cancel(&self) {
        self.shared.cancel();
    }

    /// Returns true if the download was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.shared.state() == SessionState::Cancelled
    }
}

/// A running download.
///
/// Dropping the stream cancels the download.
///
/// # Example
///
/// ```no_run
/// use futures_util::StreamExt;
/// use streamget_core::download::{DownloadEvent, Options};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let mut stream = streamget_core::start("https://example.com/file.txt", Options::default());
/// while let Some(event) = stream.next().await {
///     match event {
///         DownloadEvent::Data(chunk) => println!("{} bytes", chunk.len()),
///         DownloadEvent::Error(error) => return Err(error.into()),
///         _ => {}
///     }
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct DownloadStream {
    events: mpsc::Receiver<DownloadEvent>,
    shared: Arc<Shared>,
    finished: bool,
}

impl DownloadStream {
    pub(crate) fn new(events: mpsc::Receiver<DownloadEvent>, shared: Arc<Shared>) -> Self {
        Self {
            events,
            shared,
            finished: false,
        }
    }

    /// Cancels the download.
    ///
    /// Idempotent. Buffered events are discarded and the next item is
    /// [`DownloadEvent::Cancelled`]. No effect once the download has ended.
    pub fn cancel(&self) {
        self.shared.cancel();
    }

    /// Returns a handle that can cancel this download from another task.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Current byte accounting.
    #[must_use]
    pub fn progress(&self) -> Progress {
        self.shared.progress()
    }

    /// Keeps only the payload: data chunks, then an error on failure or cancellation.
    #[must_use]
    pub fn into_body(self) -> DownloadBody {
        DownloadBody { events: self }
    }

    /// Waits for the whole body.
    ///
    /// # Errors
    ///
    /// Returns the session's error, or [`DownloadError::Cancelled`] if the
    /// download was cancelled.
    pub async fn collect_bytes(self) -> Result<Bytes, DownloadError> {
        let mut body = self.into_body();
        let mut buffer = BytesMut::new();
        while let Some(chunk) = body.next().await {
            buffer.extend_from_slice(&chunk?);
        }
        Ok(buffer.freeze())
    }

    /// Waits for the whole body and decodes it as UTF-8, replacing invalid sequences.
    ///
    /// # Errors
    ///
    /// Same as [`collect_bytes`](Self::collect_bytes).
    pub async fn collect_text(self) -> Result<String, DownloadError> {
        let bytes = self.collect_bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl Stream for DownloadStream {
    type Item = DownloadEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }

        if self.shared.state() == SessionState::Cancelled {
            self.finished = true;
            self.events.close();
            return Poll::Ready(Some(DownloadEvent::Cancelled));
        }

        match ready!(self.events.poll_recv(cx)) {
            Some(event) => {
                if event.is_terminal() {
                    self.finished = true;
                }
                Poll::Ready(Some(event))
            }
            None => {
                self.finished = true;
                if self.shared.state() == SessionState::Cancelled {
                    Poll::Ready(Some(DownloadEvent::Cancelled))
                } else {
                    Poll::Ready(None)
                }
            }
        }
    }
}

impl Drop for DownloadStream {
    fn drop(&mut self) {
        if self.shared.cancel() {
            debug!("download stream dropped before completion");
        }
    }
}

/// Payload-only view of a [`DownloadStream`].
#[derive(Debug)]
pub struct DownloadBody {
    events: DownloadStream,
}

impl DownloadBody {
    /// Cancels the underlying download.
    pub fn cancel(&self) {
        self.events.cancel();
    }
}

impl Stream for DownloadBody {
    type Item = Result<Bytes, DownloadError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match ready!(self.events.poll_next_unpin(cx)) {
                Some(DownloadEvent::Data(chunk)) => return Poll::Ready(Some(Ok(chunk))),
                Some(DownloadEvent::Error(error)) => return Poll::Ready(Some(Err(error))),
                Some(DownloadEvent::Cancelled) => {
                    return Poll::Ready(Some(Err(DownloadError::Cancelled)));
                }
                Some(_) => {}
                None => return Poll::Ready(None),
            }
        }
    }
}
