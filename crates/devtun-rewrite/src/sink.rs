//! Response sink capability

use bytes::Bytes;
use futures::channel::mpsc;
use futures::StreamExt;
use http_body::Frame;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, StreamBody};
use std::convert::Infallible;

/// The write/end surface of an outgoing response body
///
/// Implementors must tolerate `write` returning after `end` by ignoring the
/// chunk; callers in this crate never do that.
pub trait ResponseSink: Send {
    /// Write a chunk; returns `false` when the receiving side is gone
    fn write(&mut self, chunk: Bytes) -> bool;

    /// Finish the response, optionally with a final chunk
    fn end(&mut self, chunk: Option<Bytes>);
}

impl<S: ResponseSink + ?Sized> ResponseSink for Box<S> {
    fn write(&mut self, chunk: Bytes) -> bool {
        (**self).write(chunk)
    }

    fn end(&mut self, chunk: Option<Bytes>) {
        (**self).end(chunk)
    }
}

/// Body fed by a [`ChannelSink`]
pub type SinkBody = UnsyncBoxBody<Bytes, Infallible>;

/// Sink that streams every written chunk into an HTTP body
#[derive(Debug)]
pub struct ChannelSink {
    tx: Option<mpsc::UnboundedSender<Bytes>>,
}

/// Create a connected sink/body pair
///
/// The body yields each chunk written to the sink and completes once the
/// sink is ended or dropped.
pub fn channel() -> (ChannelSink, SinkBody) {
    let (tx, rx) = mpsc::unbounded::<Bytes>();
    let stream = rx.map(|chunk| Ok::<_, Infallible>(Frame::data(chunk)));
    (ChannelSink { tx: Some(tx) }, StreamBody::new(stream).boxed_unsync())
}

impl ResponseSink for ChannelSink {
    fn write(&mut self, chunk: Bytes) -> bool {
        match &self.tx {
            Some(tx) => tx.unbounded_send(chunk).is_ok(),
            None => {
                tracing::trace!("write after end ignored");
                false
            }
        }
    }

    fn end(&mut self, chunk: Option<Bytes>) {
        if let Some(tx) = self.tx.take() {
            if let Some(chunk) = chunk {
                let _ = tx.unbounded_send(chunk);
            }
            tx.close_channel();
        }
    }
}
