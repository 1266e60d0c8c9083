//! In-memory transport that replays scripted responses.
//!
//! Each `send` pops the next scripted step and records the request it was
//! given, so tests can drive the session deterministically and inspect every
//! attempt afterwards.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{StreamExt, stream};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use streamget_core::download::TransportResponse;
use streamget_core::{
    Downloader, RequestDescriptor, Transport, TransportError, TransportErrorKind,
    TransportRegistry,
};

/// How a scripted body ends after its chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyEnd {
    /// Clean end of stream.
    Clean,
    /// A connection-reset error.
    Reset,
    /// Never ends.
    Stall,
}

/// One scripted response.
#[derive(Debug, Clone)]
pub struct ScriptedResponse {
    status: u16,
    headers: Vec<(String, String)>,
    chunks: Vec<Bytes>,
    end: BodyEnd,
}

impl ScriptedResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            chunks: Vec::new(),
            end: BodyEnd::Clean,
        }
    }

    pub fn ok(body: &[u8]) -> Self {
        Self::new(200).body(body)
    }

    pub fn redirect(status: u16, location: &str) -> Self {
        Self::new(status).header("location", location)
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Whole body as a single chunk.
    pub fn body(mut self, body: &[u8]) -> Self {
        self.chunks = vec![Bytes::copy_from_slice(body)];
        self
    }

    /// Body split into chunks of `size` bytes.
    pub fn chunked(mut self, body: &[u8], size: usize) -> Self {
        self.chunks = body
            .chunks(size)
            .map(Bytes::copy_from_slice)
            .collect();
        self
    }

    pub fn ends_with(mut self, end: BodyEnd) -> Self {
        self.end = end;
        self
    }
}

#[derive(Debug, Clone)]
pub enum Step {
    Respond(ScriptedResponse),
    Fail(TransportErrorKind),
    /// Never answers.
    Hang,
}

impl From<ScriptedResponse> for Step {
    fn from(response: ScriptedResponse) -> Self {
        Self::Respond(response)
    }
}

#[derive(Debug, Default)]
pub struct ScriptedTransport {
    steps: Mutex<VecDeque<Step>>,
    requests: Mutex<Vec<RequestDescriptor>>,
}

impl ScriptedTransport {
    pub fn new<I, S>(steps: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<Step>,
    {
        Arc::new(Self {
            steps: Mutex::new(steps.into_iter().map(Into::into).collect()),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Requests received so far, in order.
    pub fn requests(&self) -> Vec<RequestDescriptor> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Value of `name` on the n-th request.
    pub fn header_of(&self, index: usize, name: &str) -> Option<String> {
        self.requests
            .lock()
            .unwrap()
            .get(index)
            .and_then(|request| request.header_str(name).map(str::to_string))
    }

    /// A downloader serving `http` and `https` from this script.
    pub fn downloader(self: &Arc<Self>) -> Downloader {
        Downloader::with_transports(TransportRegistry::with_http(
            Arc::clone(self) as Arc<dyn Transport>
        ))
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: &RequestDescriptor) -> Result<TransportResponse, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        let step = self.steps.lock().unwrap().pop_front();

        match step {
            Some(Step::Respond(scripted)) => Ok(into_response(scripted)),
            Some(Step::Fail(kind)) => Err(TransportError::new(kind, "scripted failure")),
            Some(Step::Hang) => futures_util::future::pending().await,
            None => Err(TransportError::new(
                TransportErrorKind::Other,
                "script exhausted",
            )),
        }
    }
}

fn into_response(scripted: ScriptedResponse) -> TransportResponse {
    let mut headers = HeaderMap::new();
    for (name, value) in &scripted.headers {
        headers.append(
            HeaderName::from_bytes(name.as_bytes()).unwrap(),
            HeaderValue::from_str(value).unwrap(),
        );
    }

    let chunks = stream::iter(scripted.chunks.into_iter().map(Ok));
    let body = match scripted.end {
        BodyEnd::Clean => chunks.boxed(),
        BodyEnd::Reset => chunks
            .chain(stream::once(async {
                Err(TransportError::new(
                    TransportErrorKind::ConnectionReset,
                    "connection reset by peer",
                ))
            }))
            .boxed(),
        BodyEnd::Stall => chunks.chain(stream::pending()).boxed(),
    };

    TransportResponse {
        status: scripted.status,
        headers,
        body,
    }
}
