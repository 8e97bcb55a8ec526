//! The request engine: validation, cache consultation, dispatch through the
//! session pool, revalidation, storage, and redirect handling.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use http::Method;
use tokio::time::Instant as TokioInstant;
use url::Url;

use crate::body::{self, Body, BodyBuffer, ByteStream, DeadlineStream};
use crate::cache_control::CacheControl;
use crate::context::ContextOptions;
use crate::error::{FetchError, Result};
use crate::fingerprint::{self, Fingerprint};
use crate::freshness::{self, CacheDecision};
use crate::headers::Headers;
use crate::pool::SessionPool;
use crate::response::{Response, ResponseBody};
use crate::store::{self, CacheEntry, SharedCacheStore};
use crate::transport::{RequestHead, ResponseHead};

use futures::StreamExt;

/// How the cache participates in a request
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    /// Follow the HTTP caching rules
    #[default]
    Default,
    /// Never read from nor write to the cache
    NoStore,
}

/// What to do when a response redirects
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum RedirectMode {
    /// Follow 301/302/303/307/308 up to the redirect limit
    #[default]
    Follow,
    /// Return redirect responses to the caller untouched
    Manual,
    /// Surface a network error on any redirect
    Error,
}

/// Default cap on followed redirect hops.
pub(crate) const DEFAULT_REDIRECT_LIMIT: usize = 20;

/// Per-request options for [`fetch`](crate::FetchContext::fetch)
#[derive(Debug)]
pub struct FetchOptions {
    /// Request method; uppercased before use
    pub method: String,
    /// Request headers
    pub headers: Headers,
    /// Optional request body
    pub body: Option<Body>,
    /// Overall deadline covering connect, dispatch, redirects, and buffering
    pub timeout: Option<Duration>,
    /// Redirect behavior
    pub redirect: RedirectMode,
    /// Cache participation
    pub cache: CacheMode,
    /// Explicit `Content-Type`, overriding header and body-derived values
    pub content_type: Option<String>,
    /// Maximum redirect hops when following
    pub redirect_limit: usize,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            method: "GET".to_string(),
            headers: Headers::new(),
            body: None,
            timeout: None,
            redirect: RedirectMode::default(),
            cache: CacheMode::default(),
            content_type: None,
            redirect_limit: DEFAULT_REDIRECT_LIMIT,
        }
    }
}

/// A deadline plus the timeout it came from, for error reporting.
type Deadline = Option<(TokioInstant, Duration)>;

enum RequestBody {
    None,
    Bytes(Bytes),
    Stream(Option<ByteStream>),
}

struct PreparedRequest {
    method: Method,
    url: Url,
    headers: Headers,
    body: RequestBody,
    mode: CacheMode,
}

pub(crate) struct RequestEngine {
    pool: Arc<SessionPool>,
    cache: SharedCacheStore,
    options: Arc<ContextOptions>,
}

impl RequestEngine {
    pub(crate) fn new(
        pool: Arc<SessionPool>,
        cache: SharedCacheStore,
        options: Arc<ContextOptions>,
    ) -> Self {
        Self { pool, cache, options }
    }

    pub(crate) async fn fetch(&self, url: &str, options: FetchOptions) -> Result<Response> {
        let FetchOptions {
            method,
            headers,
            body,
            timeout,
            redirect,
            cache: mode,
            content_type,
            redirect_limit,
        } = options;

        if method.is_empty() {
            return Err(FetchError::InvalidArgument(
                "request method must be a non-empty string".to_string(),
            ));
        }
        let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .map_err(|_| FetchError::InvalidArgument(format!("invalid request method `{method}`")))?;
        let url = Url::parse(url)
            .map_err(|e| FetchError::InvalidArgument(format!("invalid url `{url}`: {e}")))?;

        let mut headers = headers;
        if self.options.overwrite_user_agent || !headers.contains("user-agent") {
            headers.insert("user-agent", self.options.user_agent.clone());
        }

        let body = match body {
            None => RequestBody::None,
            Some(body) => {
                if let Some(ct) = body.default_content_type() {
                    if !headers.contains("content-type") {
                        headers.insert("content-type", ct);
                    }
                }
                match body {
                    Body::Text(text) => RequestBody::Bytes(Bytes::from(text)),
                    Body::Bytes(bytes) => RequestBody::Bytes(bytes),
                    Body::Json(value) => RequestBody::Bytes(Bytes::from(serde_json::to_vec(&value)?)),
                    Body::Stream(stream) => RequestBody::Stream(Some(stream)),
                }
            }
        };
        if let Some(ct) = content_type {
            headers.insert("content-type", ct);
        }

        let deadline: Deadline = timeout.map(|t| (TokioInstant::now() + t, t));
        let mut request = PreparedRequest { method, url, headers, body, mode };
        let mut hops = 0usize;
        let mut redirected = false;

        loop {
            let mut response = self.fetch_once(&mut request, deadline).await?;

            if is_redirect(response.status()) {
                let location = response.headers().first("location").map(str::to_string);
                if let Some(location) = location {
                    match redirect {
                        RedirectMode::Manual => {}
                        RedirectMode::Error => {
                            return Err(FetchError::network(format!(
                                "redirect to {location} not allowed"
                            )));
                        }
                        RedirectMode::Follow => {
                            hops += 1;
                            if hops > redirect_limit {
                                return Err(FetchError::TooManyRedirects(redirect_limit));
                            }
                            let next = request.url.join(&location).map_err(|e| {
                                FetchError::network(format!("invalid redirect location: {e}"))
                            })?;
                            if response.status() == 303 {
                                // 303 rewrites the hop into a bodyless GET
                                request.method = Method::GET;
                                request.body = RequestBody::None;
                                request.headers.remove("content-type");
                                request.headers.remove("content-length");
                            } else if matches!(request.body, RequestBody::Stream(_)) {
                                return Err(FetchError::InvalidArgument(
                                    "cannot follow a redirect with a streamed request body"
                                        .to_string(),
                                ));
                            }
                            log::debug!("redirect {} -> {}", request.url, next);
                            request.url = next;
                            redirected = true;
                            continue;
                        }
                    }
                }
            }

            response.set_redirected(redirected);
            return Ok(response);
        }
    }

    /// One hop: consult the cache, dispatch if needed, store if permitted.
    async fn fetch_once(&self, request: &mut PreparedRequest, deadline: Deadline) -> Result<Response> {
        let upfront =
            freshness::decide(&request.method, request.mode, &request.headers, None);
        if upfront == CacheDecision::Bypass {
            // A bypassing request must not leave a stored entry behind for
            // its URL: unsafe methods and no-store requests both invalidate
            // the GET entry.
            let base =
                fingerprint::compute(&Method::GET, &request.url, &request.headers, None);
            {
                let mut cache = store::lock(&self.cache);
                if let Some(vary) = cache.vary_hint(&base) {
                    let variant = fingerprint::compute(
                        &Method::GET,
                        &request.url,
                        &request.headers,
                        Some(&vary),
                    );
                    cache.remove(&variant);
                }
                cache.remove(&base);
            }
            return self.network_fetch(request, deadline, false).await;
        }

        let base = fingerprint::compute(&request.method, &request.url, &request.headers, None);
        let (entry, age) = {
            let mut cache = store::lock(&self.cache);
            let key = match cache.vary_hint(&base) {
                Some(vary) => {
                    fingerprint::compute(&request.method, &request.url, &request.headers, Some(&vary))
                }
                None => base.clone(),
            };
            match cache.lookup(&key) {
                Some((entry, age)) => (Some(entry), age),
                None => (None, Duration::ZERO),
            }
        };

        let decision =
            freshness::decide(&request.method, request.mode, &request.headers, entry.as_deref());
        match (decision, entry) {
            (CacheDecision::Fresh, Some(entry)) => {
                log::trace!("cache hit for {}", request.url);
                Ok(response_from_entry(&request.url, &entry, age))
            }
            (CacheDecision::Revalidate, Some(entry)) => {
                self.revalidate(request, deadline, base, entry).await
            }
            _ => self.network_fetch(request, deadline, true).await,
        }
    }

    /// Dispatches and finishes the response, storing it when allowed.
    async fn network_fetch(
        &self,
        request: &mut PreparedRequest,
        deadline: Deadline,
        allow_store: bool,
    ) -> Result<Response> {
        let body = take_request_body(&mut request.body)?;
        let (head, stream) = self
            .dispatch(&request.method, &request.url, request.headers.clone(), body, deadline)
            .await?;
        self.finish_network(request, head, stream, deadline, allow_store).await
    }

    /// Revalidates a stale entry with a conditional request.
    async fn revalidate(
        &self,
        request: &mut PreparedRequest,
        deadline: Deadline,
        base: Fingerprint,
        entry: Arc<CacheEntry>,
    ) -> Result<Response> {
        let mut headers = request.headers.clone();
        if let Some(etag) = entry.etag() {
            headers.insert("if-none-match", etag);
        }
        if let Some(last_modified) = entry.last_modified() {
            headers.insert("if-modified-since", last_modified);
        }

        let (head, stream) = self
            .dispatch(&request.method, &request.url, headers, None, deadline)
            .await?;

        if head.status == 304 {
            // the stored body is still good; refresh the entry's metadata
            drop(stream);
            let refreshed = Arc::new(entry.refreshed(&head.headers, SystemTime::now()));
            let key = if refreshed.vary().is_empty() {
                base.clone()
            } else {
                fingerprint::compute(&request.method, &request.url, &request.headers, Some(refreshed.vary()))
            };
            let age = refreshed.age();
            store::lock(&self.cache).store(&base, key, refreshed.clone());
            log::trace!("revalidated {}", request.url);
            return Ok(response_from_entry(&request.url, &refreshed, age));
        }

        // anything else replaces the stale entry with the fresh response
        self.finish_network(request, head, stream, deadline, true).await
    }

    async fn finish_network(
        &self,
        request: &PreparedRequest,
        head: ResponseHead,
        stream: ByteStream,
        deadline: Deadline,
        allow_store: bool,
    ) -> Result<Response> {
        let cache_control = CacheControl::from_headers(&head.headers);
        let outcome = if allow_store
            && freshness::is_storable(head.status, &cache_control, &head.headers)
        {
            CacheDecision::Store
        } else {
            CacheDecision::NoStore
        };

        match outcome {
            CacheDecision::Store => {
                let bytes = with_deadline(deadline, body::drain(stream)).await?;
                let entry = Arc::new(CacheEntry::new(
                    head.status,
                    head.version,
                    head.headers,
                    bytes,
                    SystemTime::now(),
                ));
                let base =
                    fingerprint::compute(&request.method, &request.url, &request.headers, None);
                let key = if entry.vary().is_empty() {
                    base.clone()
                } else {
                    fingerprint::compute(
                        &request.method,
                        &request.url,
                        &request.headers,
                        Some(entry.vary()),
                    )
                };
                if !store::lock(&self.cache).store(&base, key, entry.clone()) {
                    log::debug!("{} does not fit the cache budget, serving unstored", request.url);
                }
                let buffer = BodyBuffer::new(
                    entry.body().clone(),
                    entry.headers().first("content-type").map(str::to_string),
                );
                Ok(Response::new(
                    entry.status(),
                    entry.version(),
                    entry.headers().clone(),
                    request.url.clone(),
                    false,
                    ResponseBody::Buffered(buffer),
                ))
            }
            _ => {
                let stream = match deadline {
                    Some((at, timeout)) => DeadlineStream::new(stream, at, timeout).boxed(),
                    None => stream,
                };
                Ok(Response::new(
                    head.status,
                    head.version,
                    head.headers,
                    request.url.clone(),
                    false,
                    ResponseBody::Live(Some(stream)),
                ))
            }
        }
    }

    async fn dispatch(
        &self,
        method: &Method,
        url: &Url,
        headers: Headers,
        body: Option<ByteStream>,
        deadline: Deadline,
    ) -> Result<(ResponseHead, ByteStream)> {
        let origin = crate::transport::Origin::from_url(url)?;
        let session = with_deadline(deadline, self.pool.acquire(&origin)).await?;
        let head = RequestHead { method: method.clone(), url: url.clone(), headers };
        with_deadline(deadline, session.send(head, body)).await
    }
}

impl std::fmt::Debug for RequestEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestEngine").finish_non_exhaustive()
    }
}

fn is_redirect(status: u16) -> bool {
    matches!(status, 301 | 302 | 303 | 307 | 308)
}

fn take_request_body(body: &mut RequestBody) -> Result<Option<ByteStream>> {
    match body {
        RequestBody::None => Ok(None),
        RequestBody::Bytes(bytes) => Ok(Some(body::single_chunk(bytes.clone()))),
        RequestBody::Stream(stream) => match stream.take() {
            Some(stream) => Ok(Some(stream)),
            None => Err(FetchError::InvalidArgument(
                "request body stream already consumed".to_string(),
            )),
        },
    }
}

fn response_from_entry(url: &Url, entry: &CacheEntry, age: Duration) -> Response {
    let mut headers = entry.headers().clone();
    headers.insert("age", age.as_secs().to_string());
    let buffer = BodyBuffer::new(
        entry.body().clone(),
        entry.headers().first("content-type").map(str::to_string),
    );
    Response::new(
        entry.status(),
        entry.version(),
        headers,
        url.clone(),
        true,
        ResponseBody::Buffered(buffer),
    )
}

async fn with_deadline<T>(
    deadline: Deadline,
    fut: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    match deadline {
        Some((at, timeout)) => match tokio::time::timeout_at(at, fut).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(timeout)),
        },
        None => fut.await,
    }
}
