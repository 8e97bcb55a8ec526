#![forbid(unsafe_code, future_incompatible)]
#![deny(
    missing_docs,
    missing_debug_implementations,
    nonstandard_style,
    unused_qualifications,
    unused_import_braces,
    unused_extern_crates,
    trivial_casts,
    trivial_numeric_casts
)]
#![cfg_attr(docsrs, feature(doc_cfg))]
//! A dual-protocol HTTP client core that negotiates HTTP/1.1 or HTTP/2 per
//! origin, pools sessions, caches responses under RFC 7234 rules with a
//! bounded byte budget, and surfaces HTTP/2 server pushes so that later
//! fetches of a pushed URL are served from cache.
//!
//! The crate deliberately stops at the transport seam: TLS, ALPN, and the
//! HTTP/1 and HTTP/2 codecs live behind the [`transport::Connector`] trait,
//! which an implementation (or the in-tree test mock) provides. Everything
//! above that — protocol selection and session reuse, cache keys, freshness
//! and revalidation, push ingestion, the streaming response model — lives
//! here.
//!
//! ## Fetching
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use h2fetch::transport::{ConnectOptions, Connector, Origin, PushSink, TransportSession};
//! use h2fetch::{ContextOptions, FetchContext, FetchOptions};
//!
//! struct MyConnector; // bring your own TLS/ALPN stack
//!
//! #[async_trait::async_trait]
//! impl Connector for MyConnector {
//!     async fn connect(
//!         &self,
//!         _origin: &Origin,
//!         _options: ConnectOptions,
//!         _pushes: Arc<dyn PushSink>,
//!     ) -> h2fetch::Result<Box<dyn TransportSession>> {
//!         unimplemented!()
//!     }
//! }
//!
//! # async fn run() -> h2fetch::Result<()> {
//! let context = FetchContext::new(ContextOptions::default(), Arc::new(MyConnector));
//! let mut response = context.fetch("https://example.com/", FetchOptions::default()).await?;
//! println!("{} over {}", response.status(), response.version());
//! println!("{}", response.text().await?);
//! # Ok(())
//! # }
//! ```
//!
//! A second fetch of a cacheable URL is answered from the in-process cache:
//! the response carries [`Response::from_cache`] and an `age` header, and
//! its buffered body can be read any number of times. Responses the cache
//! must not retain stream through instead, without buffering.
//!
//! ## Configuration
//!
//! ```
//! use h2fetch::{AlpnProtocol, ContextOptions};
//!
//! let options = ContextOptions {
//!     max_cache_size: 64 * 1024 * 1024,
//!     https_protocols: vec![AlpnProtocol::Http1], // never attempt HTTP/2
//!     ..ContextOptions::default()
//! };
//! assert!(!options.overwrite_user_agent);
//! ```
//!
//! ## Building URLs
//!
//! ```
//! use h2fetch::{create_url, QueryValue};
//!
//! let url = create_url(
//!     "https://example.com/search",
//!     Some(&[("q", "rust http".into()), ("page", 2.into())]),
//! )?;
//! assert_eq!(url, "https://example.com/search?q=rust+http&page=2");
//! # Ok::<(), h2fetch::FetchError>(())
//! ```
//!
//! ## Server push
//!
//! Observers registered with [`FetchContext::on_push`] run in registration
//! order once a pushed resource has been committed to the cache, so fetching
//! the pushed URL from inside (or after) the observer is a cache hit.

mod body;
mod cache_control;
mod context;
mod engine;
mod error;
mod fingerprint;
mod freshness;
mod headers;
mod pool;
mod push;
mod query;
mod response;
mod store;
pub mod transport;


pub use body::{Body, BodyBuffer, ByteStream};
pub use cache_control::CacheControl;
pub use context::{
    cache_stats, clear_cache, context, disconnect_all, fetch, install_default, off_push, on_push,
    ContextOptions, FetchContext,
};
pub use engine::{CacheMode, FetchOptions, RedirectMode};
pub use error::{BoxError, FetchError, Result};
pub use fingerprint::Fingerprint;
pub use freshness::{freshness_lifetime, is_storable, CacheDecision};
pub use headers::Headers;
pub use push::{PushHandle, PushRegistry};
pub use query::{create_url, QueryValue};
pub use response::Response;
pub use store::{CacheEntry, CacheStats, CacheStore};
pub use transport::{AlpnProtocol, HttpVersion, Origin};
