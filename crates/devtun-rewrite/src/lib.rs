//! Response rewriting for devtun
//!
//! Intercepts the write/end contract of an outgoing HTTP response, decodes
//! the body when it is compressed, hands the text to a caller-supplied
//! transform, re-encodes it with the same codec and forwards the result to
//! the real sink.
//!
//! Supported content-encodings:
//! - none (absent or empty header)
//! - gzip
//! - deflate (zlib-wrapped, as HTTP defines it)
//!
//! Bodies are buffered in full; the interceptor never delivers a partially
//! rewritten body.

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod codec;
pub mod rewriter;
pub mod sink;

pub use codec::CompressionCodec;
pub use rewriter::{Rejected, ResponseRewriter, RewriteCallback};
pub use sink::{channel, ChannelSink, ResponseSink, SinkBody};
