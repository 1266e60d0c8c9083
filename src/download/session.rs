//! The attempt controller.
//!
//! A [`DownloadSession`] owns everything that must survive across network
//! attempts: the current target URL, the redirect/retry/reconnect counters,
//! byte accounting and the range-resume decision. Each attempt is a single
//! call to `run_attempt`, so at most one attempt ever exists and only that
//! attempt writes to the output channel.
//!
//! Attempt outcomes:
//! - 2xx: stream the body through the decoder chain, then complete or
//!   treat a short body as a premature end
//! - 301/302/303/307/308: follow `Location` while the redirect budget lasts
//! - 429/503: retry, honouring `Retry-After`
//! - other 5xx, transport errors, premature ends: retry or reconnect
//! - anything else: fatal

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::Method;
use reqwest::header::{ACCEPT_RANGES, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_RANGE, LOCATION, RETRY_AFTER};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::backoff::parse_retry_after;
use super::constants::REDIRECT_STATUS_CODES;
use super::decoder::{DecoderChain, DecoderRegistry};
use super::error::{DownloadError, TransportError, TransportErrorKind};
use super::options::Options;
use super::request::{BuiltRequest, RangeBase, RequestBuilder, ResumePoint};
use super::retry::{FailureType, RetryDecision, RetryPolicy, TransferState, classify_error, classify_status};
use super::stream::{DownloadEvent, Progress, SessionState, Shared};
use super::transport::{TransportRegistry, TransportResponse};

/// The consumer went away; nothing left to do.
#[derive(Debug)]
struct ConsumerGone;

/// An attempt that failed in a way the retry policy may absorb.
#[derive(Debug)]
struct AttemptFailure {
    error: DownloadError,
    retry_after: Option<Duration>,
}

impl AttemptFailure {
    fn new(error: DownloadError) -> Self {
        Self {
            error,
            retry_after: None,
        }
    }
}

#[derive(Debug)]
enum AttemptOutcome {
    Completed,
    Redirect {
        location: String,
        status: u16,
        delay: Duration,
    },
    Failed(AttemptFailure),
    Fatal(DownloadError),
}

/// Decoder state kept between attempts so a ranged resume can continue it.
struct KeptDecoder {
    chain: DecoderChain,
    /// Raw bytes the chain has consumed.
    raw_offset: u64,
}

/// One logical download.
pub(crate) struct DownloadSession {
    target_url: String,
    method: Method,
    max_redirects: u32,
    decoders: Option<DecoderRegistry>,
    policy: RetryPolicy,
    transports: TransportRegistry,
    request_builder: RequestBuilder,

    redirect_count: u32,
    retry_count: u32,
    reconnect_count: u32,
    attempt_number: u32,

    bytes_downloaded: u64,
    bytes_delivered: u64,
    content_length: Option<u64>,
    /// Absolute offset of the first payload byte within the resource.
    origin: u64,
    /// Range resumes are computed from; fixed by the first 2xx response.
    range_base: RangeBase,
    supports_range_resume: bool,
    response_seen: bool,
    resume_scheme: Option<String>,
    decoder: Option<KeptDecoder>,

    events: mpsc::Sender<DownloadEvent>,
    shared: Arc<Shared>,
}

impl DownloadSession {
    pub(crate) fn new(
        url: &str,
        options: &Options,
        transports: TransportRegistry,
        events: mpsc::Sender<DownloadEvent>,
        shared: Arc<Shared>,
    ) -> Self {
        let request_builder = RequestBuilder::new(options);
        Self {
            target_url: url.to_string(),
            method: options.method.clone(),
            max_redirects: options.max_redirects,
            decoders: options.accept_encoding.clone(),
            policy: RetryPolicy::new(options.max_retries, options.max_reconnects, options.backoff),
            transports,
            range_base: request_builder.range_base(),
            request_builder,
            redirect_count: 0,
            retry_count: 0,
            reconnect_count: 0,
            attempt_number: 0,
            bytes_downloaded: 0,
            bytes_delivered: 0,
            content_length: None,
            origin: 0,
            supports_range_resume: false,
            response_seen: false,
            resume_scheme: None,
            decoder: None,
            events,
            shared,
        }
    }

    /// Drives attempts until the session reaches a terminal state.
    #[instrument(level = "debug", name = "download", skip(self), fields(url = %self.target_url))]
    pub(crate) async fn run(mut self) {
        while self.shared.is_active() {
            let outcome = match self.run_attempt().await {
                Ok(outcome) => outcome,
                Err(ConsumerGone) => {
                    debug!("consumer dropped, stopping");
                    return;
                }
            };

            let next = match outcome {
                AttemptOutcome::Completed => {
                    self.complete().await;
                    return;
                }
                AttemptOutcome::Fatal(error) => {
                    self.fail(error).await;
                    return;
                }
                AttemptOutcome::Redirect {
                    location,
                    status,
                    delay,
                } => self.follow_redirect(location, status, delay).await,
                AttemptOutcome::Failed(failure) => self.handle_failure(failure).await,
            };
            if next.is_err() {
                debug!("consumer dropped, stopping");
                return;
            }
        }
    }

    async fn run_attempt(&mut self) -> Result<AttemptOutcome, ConsumerGone> {
        self.attempt_number += 1;

        let resume = ResumePoint {
            bytes_downloaded: self.bytes_downloaded,
            supports_range_resume: self.can_resume_by_range(),
            scheme: self.resume_scheme.as_deref(),
            range: self.range_base,
        };
        let built = match self
            .request_builder
            .build(&self.target_url, resume, &self.transports)
        {
            Ok(built) => built,
            Err(error) => return Ok(AttemptOutcome::Fatal(error)),
        };

        let url = built.descriptor.url.to_string();
        debug!(attempt = self.attempt_number, url = %url, method = %built.descriptor.method, "issuing request");
        self.emit(DownloadEvent::Request {
            url: url.clone(),
            attempt: self.attempt_number,
        })
        .await?;

        let response = match built.transport.send(&built.descriptor).await {
            Ok(response) => response,
            Err(error) => {
                debug!(error = %error, "transport failed before response");
                return Ok(AttemptOutcome::Failed(AttemptFailure::new(
                    DownloadError::transport(&url, error),
                )));
            }
        };

        let status = response.status;
        let content_length = header_u64(&response, CONTENT_LENGTH.as_str());
        debug!(status, ?content_length, "response received");
        self.emit(DownloadEvent::Response {
            status,
            content_length,
        })
        .await?;

        if REDIRECT_STATUS_CODES.contains(&status) {
            return Ok(self.redirect_outcome(&response));
        }

        if !(200..300).contains(&status) {
            let error = DownloadError::status_code(&url, status);
            return Ok(match classify_status(status) {
                FailureType::Permanent => AttemptOutcome::Fatal(error),
                FailureType::RateLimited => AttemptOutcome::Failed(AttemptFailure {
                    error,
                    retry_after: response
                        .header_str(RETRY_AFTER.as_str())
                        .and_then(parse_retry_after),
                }),
                FailureType::Transient => AttemptOutcome::Failed(AttemptFailure::new(error)),
            });
        }

        self.stream_body(&url, built, response, content_length).await
    }

    fn redirect_outcome(&self, response: &TransportResponse) -> AttemptOutcome {
        let status = response.status;
        if self.redirect_count >= self.max_redirects {
            return AttemptOutcome::Fatal(DownloadError::too_many_redirects(
                &self.target_url,
                self.max_redirects,
            ));
        }

        let Some(location) = response
            .header_str(LOCATION.as_str())
            .map(str::trim)
            .filter(|location| !location.is_empty())
        else {
            return AttemptOutcome::Fatal(DownloadError::missing_redirect_location(
                &self.target_url,
                status,
            ));
        };

        let location = match Url::parse(&self.target_url).and_then(|base| base.join(location)) {
            Ok(resolved) => resolved.to_string(),
            Err(_) => location.to_string(),
        };
        let delay = response
            .header_str(RETRY_AFTER.as_str())
            .and_then(parse_retry_after)
            .unwrap_or(Duration::ZERO);

        AttemptOutcome::Redirect {
            location,
            status,
            delay,
        }
    }

    async fn stream_body(
        &mut self,
        url: &str,
        built: BuiltRequest,
        response: TransportResponse,
        content_length: Option<u64>,
    ) -> Result<AttemptOutcome, ConsumerGone> {
        let status = response.status;

        if !self.response_seen {
            self.response_seen = true;
            self.content_length = content_length;
            let accepts_ranges = response
                .header_str(ACCEPT_RANGES.as_str())
                .is_some_and(|value| value.trim().eq_ignore_ascii_case("bytes"));
            self.supports_range_resume = accepts_ranges
                && content_length.is_some_and(|length| length > 0)
                && self.policy.max_reconnects() > 0
                && self.method != Method::HEAD;
            self.resume_scheme = Some(built.descriptor.url.scheme().to_string());
            if status == 206 {
                self.origin = content_range_start(&response).unwrap_or(self.range_base.start);
                self.range_base = RangeBase {
                    start: self.origin,
                    end: self.range_base.end,
                };
            } else {
                self.origin = 0;
                self.range_base = RangeBase::default();
            }
            debug!(
                ?content_length,
                origin = self.origin,
                supports_range_resume = self.supports_range_resume,
                "transfer parameters learned"
            );
            self.publish_progress();
        }

        if self.method == Method::HEAD {
            return Ok(AttemptOutcome::Completed);
        }

        let ranged = built.resume_from.filter(|_| status == 206);
        let (body_start, mut skip, mut chain) = match ranged {
            Some(expected) => {
                if let Some(actual) = content_range_start(&response)
                    && actual != expected
                {
                    return Ok(AttemptOutcome::Fatal(DownloadError::range_mismatch(
                        url, expected, actual,
                    )));
                }
                debug!(offset = expected, "resuming by range");
                let chain = self.take_decoder_at(self.bytes_downloaded).unwrap_or_else(|| {
                    DecoderChain::build(
                        response.header_str(CONTENT_ENCODING.as_str()),
                        self.decoders.as_ref(),
                    )
                });
                (expected, 0, chain)
            }
            None => {
                let body_start = if status == 206 {
                    content_range_start(&response).unwrap_or(self.origin)
                } else {
                    0
                };
                self.decoder = None;
                let chain = DecoderChain::build(
                    response.header_str(CONTENT_ENCODING.as_str()),
                    self.decoders.as_ref(),
                );
                let skip = match self.restart_skip(&chain, body_start) {
                    Ok(skip) => skip,
                    Err(expected) => {
                        return Ok(AttemptOutcome::Fatal(DownloadError::range_mismatch(
                            url, expected, body_start,
                        )));
                    }
                };
                if skip > 0 {
                    debug!(
                        skip,
                        body_start, "server restarted the transfer, skipping delivered prefix"
                    );
                }
                (body_start, skip, chain)
            }
        };

        // Raw bytes of this body that belong to the payload.
        let limit = self
            .content_length
            .map(|length| (self.origin + length).saturating_sub(body_start));
        let mut body = response.body;
        let mut attempt_raw: u64 = 0;
        while let Some(chunk) = body.next().await {
            let mut chunk = match chunk {
                Ok(chunk) => chunk,
                Err(error) => {
                    debug!(error = %error, attempt_raw, "body interrupted");
                    let raw_offset = self.payload_offset(body_start + attempt_raw);
                    self.keep_decoder(chain, raw_offset);
                    return Ok(AttemptOutcome::Failed(AttemptFailure::new(
                        DownloadError::transport(url, error),
                    )));
                }
            };

            if let Some(limit) = limit {
                let room = usize::try_from(limit - attempt_raw).unwrap_or(usize::MAX);
                if chunk.len() > room {
                    chunk.truncate(room);
                }
            }
            attempt_raw += chunk.len() as u64;
            self.bytes_downloaded = self
                .bytes_downloaded
                .max(self.payload_offset(body_start + attempt_raw));

            let decoded = match chain.decode(chunk) {
                Ok(decoded) => decoded,
                Err(error) => {
                    return Ok(AttemptOutcome::Fatal(DownloadError::decode(
                        url,
                        error.encoding,
                        error.source,
                    )));
                }
            };
            self.deliver(decoded, &mut skip).await?;

            if limit == Some(attempt_raw) {
                break;
            }
        }
        drop(body);

        if !self.download_complete() {
            let error = TransportError::new(
                TransportErrorKind::Body,
                format!(
                    "stream ended after {} of {} bytes",
                    self.bytes_downloaded,
                    self.content_length.unwrap_or_default()
                ),
            );
            let raw_offset = self.payload_offset(body_start + attempt_raw);
            self.keep_decoder(chain, raw_offset);
            return Ok(AttemptOutcome::Failed(AttemptFailure::new(
                DownloadError::transport(url, error),
            )));
        }

        match chain.finish() {
            Ok(tail) => self.deliver(tail, &mut skip).await?,
            Err(error) => {
                return Ok(AttemptOutcome::Fatal(DownloadError::decode(
                    url,
                    error.encoding,
                    error.source,
                )));
            }
        }
        Ok(AttemptOutcome::Completed)
    }

    /// Stream end means completion unless range resume shows bytes missing.
    fn download_complete(&self) -> bool {
        !self.supports_range_resume || self.content_length == Some(self.bytes_downloaded)
    }

    /// Range resume needs a decoder positioned exactly where the next range starts.
    fn can_resume_by_range(&self) -> bool {
        self.supports_range_resume
            && self.decoder.as_ref().is_some_and(|kept| {
                kept.chain.is_passthrough() || kept.raw_offset == self.bytes_downloaded
            })
    }

    /// Payload position of an absolute resource offset.
    fn payload_offset(&self, absolute: u64) -> u64 {
        absolute.saturating_sub(self.origin)
    }

    /// Decoded bytes to drop from a restarted body starting at `body_start`.
    ///
    /// A passthrough body can be entered anywhere at or before the delivered
    /// position. A decoded body must restart where the first body started.
    /// `Err` carries the offset the body should have started at.
    fn restart_skip(&self, chain: &DecoderChain, body_start: u64) -> Result<u64, u64> {
        if chain.is_passthrough() {
            let wanted = self.origin + self.bytes_delivered;
            if body_start > wanted {
                return Err(wanted);
            }
            Ok(wanted - body_start)
        } else if body_start == self.origin {
            Ok(self.bytes_delivered)
        } else {
            Err(self.origin)
        }
    }

    fn keep_decoder(&mut self, chain: DecoderChain, raw_offset: u64) {
        self.decoder = Some(KeptDecoder { chain, raw_offset });
    }

    fn take_decoder_at(&mut self, raw_offset: u64) -> Option<DecoderChain> {
        let kept = self.decoder.take()?;
        (kept.chain.is_passthrough() || kept.raw_offset == raw_offset).then_some(kept.chain)
    }

    async fn deliver(&mut self, mut data: Bytes, skip: &mut u64) -> Result<(), ConsumerGone> {
        if *skip > 0 {
            let skipped = usize::try_from(*skip).unwrap_or(usize::MAX).min(data.len());
            data = data.slice(skipped..);
            *skip -= skipped as u64;
        }
        if data.is_empty() {
            self.publish_progress();
            return Ok(());
        }

        self.bytes_delivered += data.len() as u64;
        self.publish_progress();
        self.emit(DownloadEvent::Data(data)).await
    }

    async fn follow_redirect(
        &mut self,
        location: String,
        status: u16,
        delay: Duration,
    ) -> Result<(), ConsumerGone> {
        self.redirect_count += 1;
        debug!(
            from = %self.target_url,
            to = %location,
            status,
            redirect = self.redirect_count,
            "following redirect"
        );
        let from = std::mem::replace(&mut self.target_url, location.clone());
        self.emit(DownloadEvent::Redirect {
            from,
            to: location,
            status,
            delay,
        })
        .await?;
        sleep(delay).await;
        Ok(())
    }

    async fn handle_failure(&mut self, failure: AttemptFailure) -> Result<(), ConsumerGone> {
        let failure_type = classify_error(&failure.error);
        let transfer = TransferState {
            bytes_downloaded: self.bytes_downloaded,
            content_length: self.content_length,
            supports_range_resume: self.supports_range_resume,
        };

        match self.policy.decide(
            failure_type,
            failure.retry_after,
            self.retry_count,
            self.reconnect_count,
            transfer,
        ) {
            RetryDecision::Retry { delay, attempt } => {
                self.retry_count = attempt;
                let event = match failure.error.status() {
                    Some(status) if failure_type == FailureType::RateLimited => {
                        DownloadEvent::RateLimited {
                            status,
                            retry: attempt,
                            delay,
                        }
                    }
                    _ => DownloadEvent::Retry {
                        retry: attempt,
                        delay,
                        reason: failure.error.to_string(),
                    },
                };
                debug!(retry = attempt, delay_ms = delay.as_millis(), error = %failure.error, "retrying");
                self.emit(event).await?;
                sleep(delay).await;
            }
            RetryDecision::Reconnect { delay, reconnect } => {
                self.retry_count = 0;
                self.reconnect_count = reconnect;
                debug!(
                    reconnect,
                    offset = self.bytes_downloaded,
                    delay_ms = delay.as_millis(),
                    error = %failure.error,
                    "reconnecting"
                );
                self.emit(DownloadEvent::Reconnect {
                    reconnect,
                    delay,
                    offset: self.bytes_downloaded,
                    reason: failure.error.to_string(),
                })
                .await?;
                sleep(delay).await;
            }
            RetryDecision::DoNotRetry { reason } => {
                debug!(reason = %reason, "giving up");
                self.fail(failure.error).await;
            }
        }
        Ok(())
    }

    async fn complete(&mut self) {
        if !self.shared.finish(SessionState::Completed) {
            return;
        }
        info!(
            url = %self.target_url,
            bytes_downloaded = self.bytes_downloaded,
            bytes_delivered = self.bytes_delivered,
            attempts = self.attempt_number,
            "download completed"
        );
        let event = DownloadEvent::Completed {
            bytes_downloaded: self.bytes_downloaded,
        };
        if self.events.send(event).await.is_err() {
            debug!("consumer dropped before completion event");
        }
    }

    async fn fail(&mut self, error: DownloadError) {
        if !self.shared.finish(SessionState::Failed) {
            return;
        }
        warn!(
            url = %self.target_url,
            error = %error,
            attempts = self.attempt_number,
            bytes_downloaded = self.bytes_downloaded,
            "download failed"
        );
        if self.events.send(DownloadEvent::Error(error)).await.is_err() {
            debug!("consumer dropped before error event");
        }
    }

    async fn emit(&mut self, event: DownloadEvent) -> Result<(), ConsumerGone> {
        self.events.send(event).await.map_err(|_| ConsumerGone)
    }

    fn publish_progress(&self) {
        self.shared.set_progress(Progress {
            bytes_downloaded: self.bytes_downloaded,
            bytes_delivered: self.bytes_delivered,
            content_length: self.content_length,
        });
    }
}

async fn sleep(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

fn header_u64(response: &TransportResponse, name: &str) -> Option<u64> {
    response
        .header_str(name)
        .and_then(|value| value.trim().parse().ok())
}

/// Start offset of a `Content-Range: bytes start-end/total` header.
fn content_range_start(response: &TransportResponse) -> Option<u64> {
    let value = response.header_str(CONTENT_RANGE.as_str())?;
    let range = value.trim().strip_prefix("bytes")?.trim_start();
    let (start, _) = range.split_once('-')?;
    start.trim().parse().ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use futures_util::stream;
    use reqwest::header::{HeaderMap, HeaderValue};

    fn response_with(headers: &[(&'static str, &'static str)]) -> TransportResponse {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.insert(*name, HeaderValue::from_static(value));
        }
        TransportResponse {
            status: 206,
            headers: map,
            body: stream::empty().boxed(),
        }
    }

    #[test]
    fn test_content_range_start() {
        assert_eq!(
            content_range_start(&response_with(&[("content-range", "bytes 100-199/200")])),
            Some(100)
        );
        assert_eq!(
            content_range_start(&response_with(&[("content-range", "bytes */200")])),
            None
        );
        assert_eq!(content_range_start(&response_with(&[])), None);
    }

    fn session_at(origin: u64, delivered: u64) -> DownloadSession {
        let (events, _rx) = mpsc::channel(1);
        let (shared, _cancel) = Shared::new();
        let mut session = DownloadSession::new(
            "https://example.com/a",
            &Options::default(),
            TransportRegistry::new(),
            events,
            shared,
        );
        session.origin = origin;
        session.bytes_delivered = delivered;
        session
    }

    #[test]
    fn test_restart_skip_is_measured_from_origin() {
        let session = session_at(100, 20);
        let plain = DecoderChain::passthrough();
        assert_eq!(session.restart_skip(&plain, 0), Ok(120));
        assert_eq!(session.restart_skip(&plain, 100), Ok(20));
        assert_eq!(session.restart_skip(&plain, 110), Ok(10));
        assert_eq!(session.restart_skip(&plain, 130), Err(120));

        let gzip = DecoderChain::build(Some("gzip"), Some(&DecoderRegistry::standard()));
        assert_eq!(session.restart_skip(&gzip, 100), Ok(20));
        assert_eq!(session.restart_skip(&gzip, 0), Err(100));
    }

    #[test]
    fn test_payload_offset_is_relative_to_origin() {
        let session = session_at(100, 0);
        assert_eq!(session.payload_offset(150), 50);
        assert_eq!(session.payload_offset(40), 0);
    }

    #[test]
    fn test_header_u64() {
        let response = response_with(&[("content-length", " 42 ")]);
        assert_eq!(header_u64(&response, "content-length"), Some(42));
        assert_eq!(header_u64(&response, "x-missing"), None);
    }
}
