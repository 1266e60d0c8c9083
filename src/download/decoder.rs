//! Content-coding decoder chains.
//!
//! A response's `Content-Encoding` lists codings in the order they were
//! applied, so they are undone in reverse. Each coding is looked up in a
//! [`DecoderRegistry`]; codings without a factory are passed through untouched,
//! so the consumer receives whatever the registry was able to decode.

use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::sync::Arc;

use bytes::Bytes;
use flate2::write::{GzDecoder, ZlibDecoder};
use tracing::debug;

/// One streaming decode step.
pub trait DecoderStage: Send {
    /// Feeds a chunk of encoded input, returning whatever decoded output is ready.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not valid for this coding.
    fn decode(&mut self, input: &[u8]) -> std::io::Result<Bytes>;

    /// Signals end of input, returning any remaining decoded output.
    ///
    /// # Errors
    ///
    /// Returns an error if the encoded stream was truncated or corrupt.
    fn finish(&mut self) -> std::io::Result<Bytes>;
}

/// Creates a fresh decoder stage for one response.
pub type DecoderFactory = Arc<dyn Fn() -> Box<dyn DecoderStage> + Send + Sync>;

/// Maps content-coding names to decoder factories.
#[derive(Clone, Default)]
pub struct DecoderRegistry {
    factories: HashMap<String, DecoderFactory>,
}

impl fmt::Debug for DecoderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecoderRegistry")
            .field("encodings", &self.encodings())
            .finish()
    }
}

impl DecoderRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with `gzip`, `x-gzip` and `deflate` decoders.
    #[must_use]
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register("gzip", || Box::new(GzipStage::new()));
        registry.register("x-gzip", || Box::new(GzipStage::new()));
        registry.register("deflate", || Box::new(DeflateStage::new()));
        registry
    }

    /// Registers (or replaces) the factory for an encoding name.
    ///
    /// Names are matched case-insensitively.
    pub fn register<F>(&mut self, encoding: impl AsRef<str>, factory: F) -> &mut Self
    where
        F: Fn() -> Box<dyn DecoderStage> + Send + Sync + 'static,
    {
        self.factories
            .insert(encoding.as_ref().to_ascii_lowercase(), Arc::new(factory));
        self
    }

    /// Returns the factory for an encoding name, if any.
    #[must_use]
    pub fn get(&self, encoding: &str) -> Option<&DecoderFactory> {
        self.factories.get(&encoding.to_ascii_lowercase())
    }

    /// Returns the registered encoding names, sorted.
    #[must_use]
    pub fn encodings(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns the `Accept-Encoding` value advertising every registered coding.
    #[must_use]
    pub fn accept_encoding(&self) -> Option<String> {
        let names = self.encodings();
        (!names.is_empty()).then(|| names.join(", "))
    }

    /// Returns true if no decoder is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

/// The decode pipeline built for one response.
pub struct DecoderChain {
    stages: Vec<(String, Box<dyn DecoderStage>)>,
}

impl fmt::Debug for DecoderChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecoderChain")
            .field("stages", &self.encodings())
            .finish()
    }
}

/// A stage failure, naming the coding that failed.
#[derive(Debug)]
pub struct StageError {
    /// The coding whose decoder failed.
    pub encoding: String,
    /// The decoder error.
    pub source: std::io::Error,
}

impl DecoderChain {
    /// Builds the pipeline for a `Content-Encoding` value.
    ///
    /// With no header or no registry the chain is empty and bytes pass straight
    /// through.
    #[must_use]
    pub fn build(content_encoding: Option<&str>, registry: Option<&DecoderRegistry>) -> Self {
        let (Some(header), Some(registry)) = (content_encoding, registry) else {
            return Self::passthrough();
        };

        let mut stages = Vec::new();
        for token in header.split(',').map(str::trim).rev() {
            if token.is_empty() || token.eq_ignore_ascii_case("identity") {
                continue;
            }
            match registry.get(token) {
                Some(factory) => stages.push((token.to_ascii_lowercase(), factory())),
                None => debug!(encoding = token, "no decoder registered, passing layer through"),
            }
        }
        Self { stages }
    }

    /// Creates an empty chain.
    #[must_use]
    pub fn passthrough() -> Self {
        Self { stages: Vec::new() }
    }

    /// Returns the codings this chain decodes, in decode order.
    #[must_use]
    pub fn encodings(&self) -> Vec<&str> {
        self.stages.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Returns true if bytes pass through unchanged.
    #[must_use]
    pub fn is_passthrough(&self) -> bool {
        self.stages.is_empty()
    }

    /// Pushes a chunk through every stage.
    ///
    /// # Errors
    ///
    /// Returns the first stage error, naming its coding.
    pub fn decode(&mut self, chunk: Bytes) -> Result<Bytes, StageError> {
        let mut data = chunk;
        for (encoding, stage) in &mut self.stages {
            if data.is_empty() {
                break;
            }
            data = stage.decode(&data).map_err(|source| StageError {
                encoding: encoding.clone(),
                source,
            })?;
        }
        Ok(data)
    }

    /// Flushes every stage in order, feeding each stage's tail into the next.
    ///
    /// # Errors
    ///
    /// Returns the first stage error, naming its coding.
    pub fn finish(&mut self) -> Result<Bytes, StageError> {
        let mut carried = Bytes::new();
        for (encoding, stage) in &mut self.stages {
            let wrap = |source| StageError {
                encoding: encoding.clone(),
                source,
            };
            let mut out = Vec::new();
            if !carried.is_empty() {
                out.extend_from_slice(&stage.decode(&carried).map_err(wrap)?);
            }
            out.extend_from_slice(&stage.finish().map_err(wrap)?);
            carried = Bytes::from(out);
        }
        Ok(carried)
    }
}

/// Streaming gzip decoder.
pub struct GzipStage {
    inner: GzDecoder<Vec<u8>>,
}

impl GzipStage {
    /// Creates a gzip stage.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: GzDecoder::new(Vec::new()),
        }
    }
}

impl Default for GzipStage {
    fn default() -> Self {
        Self::new()
    }
}

impl DecoderStage for GzipStage {
    fn decode(&mut self, input: &[u8]) -> std::io::Result<Bytes> {
        self.inner.write_all(input)?;
        Ok(Bytes::from(std::mem::take(self.inner.get_mut())))
    }

    fn finish(&mut self) -> std::io::Result<Bytes> {
        self.inner.try_finish()?;
        Ok(Bytes::from(std::mem::take(self.inner.get_mut())))
    }
}

/// Streaming zlib (HTTP `deflate`) decoder.
pub struct DeflateStage {
    inner: ZlibDecoder<Vec<u8>>,
}

impl DeflateStage {
    /// Creates a deflate stage.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: ZlibDecoder::new(Vec::new()),
        }
    }
}

impl Default for DeflateStage {
    fn default() -> Self {
        Self::new()
    }
}

impl DecoderStage for DeflateStage {
    fn decode(&mut self, input: &[u8]) -> std::io::Result<Bytes> {
        self.inner.write_all(input)?;
        Ok(Bytes::from(std::mem::take(self.inner.get_mut())))
    }

    fn finish(&mut self) -> std::io::Result<Bytes> {
        self.inner.try_finish()?;
        Ok(Bytes::from(std::mem::take(self.inner.get_mut())))
    }
}
