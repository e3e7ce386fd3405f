//! Response rewriter
//!
//! [`ResponseRewriter`] is a decorator placed in front of the real
//! [`ResponseSink`] for a single response. It exposes the same write/end
//! surface, swallows the original body, and on `end` delivers the rewritten
//! body to the real sink:
//!
//! ```text
//! write(chunk) ─▶ decoder ─▶ buffer            (compressed)
//! write(chunk) ─────────────▶ buffer            (identity)
//! end()        ─▶ text ─▶ callback ─▶ encoder ─▶ sink.write(..)* ─▶ sink.end()
//! ```
//!
//! A decode failure short-circuits the pipeline: the real sink receives a
//! single `end` carrying the error text, uncompressed.

use crate::codec::{CompressionCodec, Decoder};
use crate::sink::ResponseSink;
use bytes::Bytes;
use devtun_core::{Error, Result};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Body transform; `None` leaves the body unchanged
pub type RewriteCallback = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Size of each chunk forwarded from the encoder output
const ENCODER_CHUNK_SIZE: usize = 16 * 1024;

enum Stage {
    Buffering(Vec<u8>),
    Decoding(Decoder),
    Finalized,
}

/// Interceptor for one response
pub struct ResponseRewriter<S: ResponseSink> {
    sink: S,
    codec: CompressionCodec,
    callback: RewriteCallback,
    stage: Stage,
    decode_error: Option<Error>,
}

/// Interception refused; the sink is handed back untouched
pub struct Rejected<S> {
    /// The sink, never written to
    pub sink: S,
    /// Why interception was refused
    pub error: Error,
}

impl<S> Rejected<S> {
    /// Split into the untouched sink and the error
    pub fn into_parts(self) -> (S, Error) {
        (self.sink, self.error)
    }
}

impl<S> fmt::Debug for Rejected<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rejected")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl<S> From<Rejected<S>> for Error {
    fn from(rejected: Rejected<S>) -> Self {
        rejected.error
    }
}

impl<S: ResponseSink> ResponseRewriter<S> {
    /// Wrap `sink`, selecting the codec from `content_encoding`
    ///
    /// An unsupported encoding is reported before anything is wrapped, and the
    /// sink comes back inside [`Rejected`].
    pub fn intercept(
        sink: S,
        content_encoding: Option<&str>,
        callback: RewriteCallback,
    ) -> Result<Self, Rejected<S>> {
        let codec = match CompressionCodec::from_header(content_encoding) {
            Ok(codec) => codec,
            Err(error) => return Err(Rejected { sink, error }),
        };

        let stage = match codec.decoder() {
            Some(decoder) => Stage::Decoding(decoder),
            None => Stage::Buffering(Vec::new()),
        };

        Ok(Self {
            sink,
            codec,
            callback,
            stage,
            decode_error: None,
        })
    }

    /// Codec selected for this response
    pub fn codec(&self) -> CompressionCodec {
        self.codec
    }

    /// Whether end-of-response has already been delivered
    pub fn is_finalized(&self) -> bool {
        matches!(self.stage, Stage::Finalized)
    }

    /// Why the body could not be decoded, if it could not
    pub fn decode_error(&self) -> Option<&Error> {
        self.decode_error.as_ref()
    }

    /// Consume the interceptor, returning the real sink
    pub fn into_inner(self) -> S {
        self.sink
    }

    fn apply_callback(&self, decoded: &[u8]) -> String {
        let body = String::from_utf8_lossy(decoded).into_owned();
        trace!(body = %body, "Response body before rewrite");

        match (self.callback)(&body) {
            Some(rewritten) => {
                trace!(body = %rewritten, "Response body after rewrite");
                rewritten
            }
            None => body,
        }
    }

    fn fail(&mut self, error: std::io::Error) {
        let text = error.to_string();
        let error = Error::Decode(text.clone());
        warn!(
            codec = ?self.codec,
            error = %error,
            "Failed to decode response body, ending with error text"
        );
        self.stage = Stage::Finalized;
        self.decode_error = Some(error);
        self.sink.end(Some(Bytes::from(text)));
    }

    fn finish_identity(&mut self, buffer: Vec<u8>) {
        let body = self.apply_callback(&buffer);
        self.sink.write(Bytes::from(body));
        self.sink.end(None);
    }

    fn finish_compressed(&mut self, decoder: Decoder) {
        let decoded = match decoder.finish() {
            Ok(decoded) => decoded,
            Err(e) => return self.fail(e),
        };

        let body = self.apply_callback(&decoded);

        let encoded = match self.codec.encoder() {
            Some(mut encoder) => encoder
                .write(body.as_bytes())
                .and_then(|()| encoder.finish()),
            None => Ok(body.into_bytes()),
        };

        match encoded {
            Ok(encoded) => {
                debug!(
                    codec = ?self.codec,
                    decoded_size = decoded.len(),
                    encoded_size = encoded.len(),
                    "Response rewritten"
                );
                let encoded = Bytes::from(encoded);
                for chunk in encoded.chunks(ENCODER_CHUNK_SIZE) {
                    self.sink.write(encoded.slice_ref(chunk));
                }
                self.sink.end(None);
            }
            Err(e) => {
                warn!(error = %e, "Failed to re-encode response body");
                self.sink.end(Some(Bytes::from(e.to_string())));
            }
        }
    }
}

impl<S: ResponseSink> ResponseSink for ResponseRewriter<S> {
    fn write(&mut self, chunk: Bytes) -> bool {
        match &mut self.stage {
            Stage::Buffering(buffer) => {
                buffer.extend_from_slice(&chunk);
                true
            }
            Stage::Decoding(decoder) => match decoder.write(&chunk) {
                Ok(()) => true,
                Err(e) => {
                    self.fail(e);
                    false
                }
            },
            Stage::Finalized => {
                trace!(len = chunk.len(), "Write after end ignored");
                false
            }
        }
    }

    fn end(&mut self, chunk: Option<Bytes>) {
        if let Some(chunk) = chunk {
            self.write(chunk);
        }

        match std::mem::replace(&mut self.stage, Stage::Finalized) {
            Stage::Buffering(buffer) => self.finish_identity(buffer),
            Stage::Decoding(decoder) => self.finish_compressed(decoder),
            Stage::Finalized => trace!("End after end ignored"),
        }
    }
}

impl<S: ResponseSink> fmt::Debug for ResponseRewriter<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseRewriter")
            .field("codec", &self.codec)
            .field("finalized", &self.is_finalized())
            .finish_non_exhaustive()
    }
}
