//! The transport seam.
//!
//! This crate does not open sockets or speak TLS; it consumes a transport
//! that, given an origin and an ALPN preference, yields sessions able to
//! exchange a request head plus body stream for a response head plus body
//! stream, and that hands server-pushed streams to a [`PushSink`].
//!
//! Implementations of [`Connector`] bring the actual HTTP/1.1 and HTTP/2
//! codecs; the rest of the crate only cares about the negotiated protocol
//! and the streams.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use http::Method;
use url::Url;

use crate::body::ByteStream;
use crate::error::{FetchError, Result};
use crate::headers::Headers;

/// A URL scheme this client will dial
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// Cleartext HTTP
    Http,
    /// HTTP over TLS
    Https,
}

impl Scheme {
    /// The scheme as it appears in a URL
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }

    fn default_port(self) -> u16 {
        match self {
            Self::Http => 80,
            Self::Https => 443,
        }
    }
}

/// A scheme + host + port triple identifying one connection target
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Origin {
    scheme: Scheme,
    host: String,
    port: u16,
}

impl Origin {
    /// Creates an origin from its parts
    #[must_use]
    pub fn new(scheme: Scheme, host: impl Into<String>, port: u16) -> Self {
        Self { scheme, host: host.into(), port }
    }

    /// Derives the origin of a URL
    pub fn from_url(url: &Url) -> Result<Self> {
        let scheme = match url.scheme() {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            other => {
                return Err(FetchError::InvalidArgument(format!(
                    "unsupported url scheme `{other}`"
                )))
            }
        };
        let host = url
            .host_str()
            .ok_or_else(|| FetchError::InvalidArgument("url has no host".to_string()))?
            .to_ascii_lowercase();
        let port = url.port_or_known_default().unwrap_or_else(|| scheme.default_port());
        Ok(Self { scheme, host, port })
    }

    /// The origin's scheme
    #[must_use]
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// The origin's lowercased host
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The origin's port, with scheme defaults applied
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether the origin is reached over TLS
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.scheme == Scheme::Https
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme.as_str(), self.host, self.port)
    }
}

/// An application protocol negotiable via ALPN
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlpnProtocol {
    /// HTTP/1.1
    Http1,
    /// HTTP/2
    Http2,
}

impl fmt::Display for AlpnProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http1 => write!(f, "http/1.1"),
            Self::Http2 => write!(f, "h2"),
        }
    }
}

/// The HTTP version a response arrived over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVersion {
    /// HTTP Version 1.1
    Http11,
    /// HTTP Version 2.0
    H2,
}

impl HttpVersion {
    /// The major version number, 1 or 2
    #[must_use]
    pub fn major(self) -> u8 {
        match self {
            Self::Http11 => 1,
            Self::H2 => 2,
        }
    }
}

impl fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            HttpVersion::Http11 => write!(f, "HTTP/1.1"),
            HttpVersion::H2 => write!(f, "HTTP/2.0"),
        }
    }
}

impl From<AlpnProtocol> for HttpVersion {
    fn from(value: AlpnProtocol) -> Self {
        match value {
            AlpnProtocol::Http1 => Self::Http11,
            AlpnProtocol::Http2 => Self::H2,
        }
    }
}

/// Everything a transport needs to send a request, minus the body
#[derive(Debug, Clone)]
pub struct RequestHead {
    /// The request method
    pub method: Method,
    /// The absolute request URL
    pub url: Url,
    /// Request headers
    pub headers: Headers,
}

/// The head of a response as reported by the transport
#[derive(Debug, Clone)]
pub struct ResponseHead {
    /// The response status code
    pub status: u16,
    /// The HTTP version the response arrived over
    pub version: HttpVersion,
    /// Response headers with their on-the-wire casing
    pub headers: Headers,
}

/// Options handed to [`Connector::connect`]
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Ordered ALPN preference; transports must not negotiate anything else
    pub protocols: Vec<AlpnProtocol>,
    /// How long to wait for a pushed stream's headers before discarding it
    pub push_promise_timeout: Duration,
}

/// Receives server-pushed resources from a transport session.
///
/// Transports call [`deliver`](PushSink::deliver) once per accepted push,
/// after the pushed response head is available.
#[async_trait::async_trait]
pub trait PushSink: Send + Sync {
    /// Hands over one pushed resource: its URL, response head, and body
    async fn deliver(&self, url: Url, head: ResponseHead, body: ByteStream);
}

/// Opens transport sessions to origins.
#[async_trait::async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Establishes a session to `origin`, negotiating one of the protocols
    /// in `options.protocols` (in preference order). Pushed resources
    /// arriving on the session are handed to `pushes`.
    async fn connect(
        &self,
        origin: &Origin,
        options: ConnectOptions,
        pushes: Arc<dyn PushSink>,
    ) -> Result<Box<dyn TransportSession>>;
}

/// An established connection (HTTP/1.1) or multiplexed session (HTTP/2).
#[async_trait::async_trait]
pub trait TransportSession: Send + Sync {
    /// The protocol negotiated for this session
    fn protocol(&self) -> AlpnProtocol;

    /// Dispatches a request and resolves once the response head is
    /// available. The body stream must not be buffered by the transport.
    async fn send(
        &self,
        head: RequestHead,
        body: Option<ByteStream>,
    ) -> Result<(ResponseHead, ByteStream)>;

    /// Closes the session; in-flight streams are aborted
    async fn close(&self);

    /// Whether the session can still carry requests
    fn is_closed(&self) -> bool;
}
