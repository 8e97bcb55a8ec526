//! Request and response body types.
//!
//! Outgoing bodies are a tagged [`Body`] variant the engine serializes and
//! content-types. Incoming bodies are either a one-shot live stream straight
//! off the transport or a [`BodyBuffer`]: an owned byte buffer whose
//! accessors may be called any number of times.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, StreamExt};
use futures::Stream;
use pin_project_lite::pin_project;
use serde_json::Value;

use crate::error::{FetchError, Result};

/// A one-shot stream of body chunks.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Chunk size used when replaying a buffered body as a stream (64KB).
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// An outgoing request body.
pub enum Body {
    /// UTF-8 text, sent as `text/plain; charset=utf-8` unless overridden
    Text(String),
    /// Raw bytes, sent without a default content type
    Bytes(Bytes),
    /// A JSON value, serialized and sent as `application/json` unless overridden
    Json(Value),
    /// A caller-provided stream; cannot be replayed across redirects
    Stream(ByteStream),
}

impl Body {
    /// Wraps a byte stream as a request body
    #[must_use]
    pub fn stream(stream: ByteStream) -> Self {
        Self::Stream(stream)
    }

    /// The content type implied by the body variant, if any
    pub(crate) fn default_content_type(&self) -> Option<&'static str> {
        match self {
            Self::Text(_) => Some("text/plain; charset=utf-8"),
            Self::Json(_) => Some("application/json"),
            Self::Bytes(_) | Self::Stream(_) => None,
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.debug_tuple("Body::Text").field(&s.len()).finish(),
            Self::Bytes(b) => f.debug_tuple("Body::Bytes").field(&b.len()).finish(),
            Self::Json(v) => f.debug_tuple("Body::Json").field(v).finish(),
            Self::Stream(_) => f.write_str("Body::Stream(..)"),
        }
    }
}

impl From<&str> for Body {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Body {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<u8>> for Body {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(value))
    }
}

impl From<Bytes> for Body {
    fn from(value: Bytes) -> Self {
        Self::Bytes(value)
    }
}

impl From<Value> for Body {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

/// An owned response body with repeatable accessors.
///
/// Every accessor is independent: decoding to text, parsing as JSON, and
/// replaying as a stream all read from the same buffer and none of them
/// consume it.
#[derive(Debug, Clone)]
pub struct BodyBuffer {
    data: Bytes,
    content_type: Option<String>,
}

impl BodyBuffer {
    /// Creates a buffer over owned bytes and the response's content type
    #[must_use]
    pub fn new(data: impl Into<Bytes>, content_type: Option<String>) -> Self {
        Self { data: data.into(), content_type }
    }

    /// A zero-copy view of the body bytes
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// A cheap reference-counted handle to the body bytes
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        self.data.clone()
    }

    /// An owned copy of the body bytes
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        self.data.to_vec()
    }

    /// Body length in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` for an empty body
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The declared content type, if the response carried one
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Decodes the body as UTF-8
    pub fn text(&self) -> Result<String> {
        Ok(std::str::from_utf8(&self.data)?.to_string())
    }

    /// Parses the body as JSON
    pub fn json(&self) -> Result<Value> {
        let text = self.text()?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Produces a fresh one-shot stream replaying the buffer in chunks
    #[must_use]
    pub fn readable_stream(&self) -> ByteStream {
        let data = self.data.clone();
        let chunks: Vec<Result<Bytes>> = (0..data.len())
            .step_by(STREAM_CHUNK_SIZE)
            .map(|start| {
                let end = (start + STREAM_CHUNK_SIZE).min(data.len());
                Ok(data.slice(start..end))
            })
            .collect();
        stream::iter(chunks).boxed()
    }
}

/// Collects a stream into a contiguous buffer, propagating chunk errors.
pub(crate) async fn drain(mut stream: ByteStream) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(buf.freeze())
}

/// Produces a one-shot stream over a single chunk.
pub(crate) fn single_chunk(data: Bytes) -> ByteStream {
    if data.is_empty() {
        stream::empty().boxed()
    } else {
        stream::iter(vec![Ok(data)]).boxed()
    }
}

pin_project! {
    /// A live body bounded by the request deadline.
    ///
    /// Polls the inner transport stream until the deadline passes, at which
    /// point it yields a timeout error and terminates, aborting the stream.
    pub(crate) struct DeadlineStream {
        #[pin]
        inner: ByteStream,
        #[pin]
        sleep: tokio::time::Sleep,
        timeout: Duration,
        expired: bool,
    }
}

impl DeadlineStream {
    pub(crate) fn new(inner: ByteStream, deadline: tokio::time::Instant, timeout: Duration) -> Self {
        Self { inner, sleep: tokio::time::sleep_until(deadline), timeout, expired: false }
    }
}

impl Stream for DeadlineStream {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        if *this.expired {
            return Poll::Ready(None);
        }
        if this.sleep.poll(cx).is_ready() {
            *this.expired = true;
            return Poll::Ready(Some(Err(FetchError::Timeout(*this.timeout))));
        }
        this.inner.poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_and_json_are_repeatable() {
        let buffer = BodyBuffer::new(&br#"{"ok":true}"#[..], Some("application/json".into()));
        assert_eq!(buffer.text().unwrap(), r#"{"ok":true}"#);
        assert_eq!(buffer.json().unwrap()["ok"], Value::Bool(true));
        // a second pass over the same buffer still works
        assert_eq!(buffer.text().unwrap(), r#"{"ok":true}"#);
    }

    #[test]
    fn invalid_utf8_is_a_decode_error() {
        let buffer = BodyBuffer::new(&[0xff, 0xfe][..], None);
        assert!(matches!(buffer.text(), Err(FetchError::Decode(_))));
    }

    #[test]
    fn invalid_json_is_a_parse_error() {
        let buffer = BodyBuffer::new(&b"not json"[..], None);
        assert!(matches!(buffer.json(), Err(FetchError::Parse(_))));
    }

    #[tokio::test]
    async fn readable_stream_replays_the_buffer() {
        let payload = vec![7u8; STREAM_CHUNK_SIZE + 11];
        let buffer = BodyBuffer::new(payload.clone(), None);
        let collected = drain(buffer.readable_stream()).await.unwrap();
        assert_eq!(collected, Bytes::from(payload));
        // each call produces a fresh stream
        let again = drain(buffer.readable_stream()).await.unwrap();
        assert_eq!(again.len(), STREAM_CHUNK_SIZE + 11);
    }

    #[tokio::test]
    async fn empty_buffer_streams_cleanly() {
        let buffer = BodyBuffer::new(Vec::new(), None);
        let collected = drain(buffer.readable_stream()).await.unwrap();
        assert!(collected.is_empty());
    }
}
