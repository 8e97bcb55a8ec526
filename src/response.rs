//! The response type returned by every fetch.

use std::fmt;

use bytes::Bytes;
use futures::stream::{self, StreamExt};
use http::StatusCode;
use serde_json::Value;
use url::Url;

use crate::body::{self, BodyBuffer, ByteStream};
use crate::error::Result;
use crate::headers::Headers;
use crate::transport::HttpVersion;

/// The body carried by a [`Response`]: either fully buffered (cache hits
/// and stored misses) or a one-shot live stream off the transport.
pub(crate) enum ResponseBody {
    Buffered(BodyBuffer),
    /// `None` once the live stream has been handed out.
    Live(Option<ByteStream>),
}

/// An HTTP response.
///
/// A buffered response may be read any number of times through
/// [`bytes`](Response::bytes), [`text`](Response::text),
/// [`json`](Response::json), or [`stream`](Response::stream). A live
/// response streams once; the first buffered accessor drains it into a
/// [`BodyBuffer`], after which all accessors (including `stream`) read from
/// the buffer.
pub struct Response {
    status: u16,
    status_text: String,
    version: HttpVersion,
    headers: Headers,
    url: Url,
    redirected: bool,
    from_cache: bool,
    body: ResponseBody,
}

impl Response {
    pub(crate) fn new(
        status: u16,
        version: HttpVersion,
        headers: Headers,
        url: Url,
        from_cache: bool,
        body: ResponseBody,
    ) -> Self {
        let status_text = StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or_default()
            .to_string();
        Self { status, status_text, version, headers, url, redirected: false, from_cache, body }
    }

    pub(crate) fn set_redirected(&mut self, redirected: bool) {
        self.redirected = redirected;
    }

    /// The response status code
    #[must_use]
    pub fn status(&self) -> u16 {
        self.status
    }

    /// `true` for 2xx statuses
    #[must_use]
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The canonical reason phrase for the status, or an empty string
    #[must_use]
    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    /// The HTTP version the response arrived over
    #[must_use]
    pub fn version(&self) -> HttpVersion {
        self.version
    }

    /// The response headers
    #[must_use]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// The final URL, after any redirects
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Whether at least one redirect was followed
    #[must_use]
    pub fn redirected(&self) -> bool {
        self.redirected
    }

    /// Whether the response was served from the cache
    #[must_use]
    pub fn from_cache(&self) -> bool {
        self.from_cache
    }

    /// The buffered body, when the response is (already) buffered
    #[must_use]
    pub fn body_buffer(&self) -> Option<&BodyBuffer> {
        match &self.body {
            ResponseBody::Buffered(buffer) => Some(buffer),
            ResponseBody::Live(_) => None,
        }
    }

    /// Buffers the body if it is still live, then returns it.
    ///
    /// Never suspends when the body is already buffered.
    pub async fn buffer(&mut self) -> Result<&BodyBuffer> {
        if let ResponseBody::Live(stream) = &mut self.body {
            let stream = stream.take().unwrap_or_else(|| stream::empty().boxed());
            let bytes = body::drain(stream).await?;
            let content_type = self.headers.first("content-type").map(str::to_string);
            self.body = ResponseBody::Buffered(BodyBuffer::new(bytes, content_type));
        }
        match &self.body {
            ResponseBody::Buffered(buffer) => Ok(buffer),
            ResponseBody::Live(_) => unreachable!("body was buffered above"),
        }
    }

    /// The body bytes, buffering a live body on first access
    pub async fn bytes(&mut self) -> Result<Bytes> {
        Ok(self.buffer().await?.to_bytes())
    }

    /// The body decoded as UTF-8, buffering a live body on first access
    pub async fn text(&mut self) -> Result<String> {
        self.buffer().await?.text()
    }

    /// The body parsed as JSON, buffering a live body on first access
    pub async fn json(&mut self) -> Result<Value> {
        self.buffer().await?.json()
    }

    /// The body as a byte stream.
    ///
    /// A live body is handed out exactly once and drives the transport's
    /// flow control as it is consumed; once buffered (or taken), further
    /// calls replay the buffer (or end immediately).
    pub fn stream(&mut self) -> ByteStream {
        match &mut self.body {
            ResponseBody::Buffered(buffer) => buffer.readable_stream(),
            ResponseBody::Live(stream) => {
                stream.take().unwrap_or_else(|| stream::empty().boxed())
            }
        }
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("version", &self.version)
            .field("url", &self.url.as_str())
            .field("redirected", &self.redirected)
            .field("from_cache", &self.from_cache)
            .field("buffered", &matches!(self.body, ResponseBody::Buffered(_)))
            .finish_non_exhaustive()
    }
}
