//! A context binds one configuration to one session pool, one cache, and
//! one push registry, and exposes the whole client surface.

use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use url::Url;

use crate::engine::{FetchOptions, RequestEngine};
use crate::error::{FetchError, Result};
use crate::pool::SessionPool;
use crate::push::{PushHandle, PushRegistry};
use crate::response::Response;
use crate::store::{self, CacheStats, CacheStore, SharedCacheStore};
use crate::transport::{AlpnProtocol, Connector};

/// Default cache byte budget (10 MiB).
const DEFAULT_MAX_CACHE_SIZE: usize = 10 * 1024 * 1024;

/// Default time to wait for a pushed stream's headers.
const DEFAULT_PUSH_PROMISE_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for a [`FetchContext`]
#[derive(Debug, Clone)]
pub struct ContextOptions {
    /// Byte budget for the response cache
    pub max_cache_size: usize,
    /// Ordered ALPN preference for `https` origins
    pub https_protocols: Vec<AlpnProtocol>,
    /// Default `User-Agent` header value
    pub user_agent: String,
    /// Replace a caller-supplied `User-Agent` with [`user_agent`](Self::user_agent)
    pub overwrite_user_agent: bool,
    /// How long the transport may wait for a pushed stream's headers before
    /// discarding the push
    pub push_promise_timeout: Duration,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            max_cache_size: DEFAULT_MAX_CACHE_SIZE,
            https_protocols: vec![AlpnProtocol::Http2, AlpnProtocol::Http1],
            user_agent: concat!("h2fetch/", env!("CARGO_PKG_VERSION")).to_string(),
            overwrite_user_agent: false,
            push_promise_timeout: DEFAULT_PUSH_PROMISE_TIMEOUT,
        }
    }
}

struct ContextInner {
    cache: SharedCacheStore,
    registry: Arc<PushRegistry>,
    pool: Arc<SessionPool>,
    engine: RequestEngine,
}

/// A self-contained client instance.
///
/// Contexts are cheap to clone (clones share state) and independent of one
/// another: each carries its own session pool, cache, and push registry.
#[derive(Clone)]
pub struct FetchContext {
    inner: Arc<ContextInner>,
}

impl FetchContext {
    /// Creates a context from options and a transport connector
    #[must_use]
    pub fn new(options: ContextOptions, connector: Arc<dyn Connector>) -> Self {
        let cache: SharedCacheStore = Arc::new(Mutex::new(CacheStore::new(options.max_cache_size)));
        let registry = Arc::new(PushRegistry::new(cache.clone()));
        let pool = Arc::new(SessionPool::new(
            connector,
            options.https_protocols.clone(),
            options.push_promise_timeout,
            registry.clone(),
        ));
        let engine = RequestEngine::new(pool.clone(), cache.clone(), Arc::new(options));
        Self { inner: Arc::new(ContextInner { cache, registry, pool, engine }) }
    }

    /// Fetches a URL
    pub async fn fetch(&self, url: &str, options: FetchOptions) -> Result<Response> {
        self.inner.engine.fetch(url, options).await
    }

    /// Registers a push observer; returns a handle for [`off_push`](Self::off_push)
    pub fn on_push<F>(&self, observer: F) -> PushHandle
    where
        F: Fn(&Url) + Send + Sync + 'static,
    {
        self.inner.registry.on_push(observer)
    }

    /// Deregisters a push observer; unknown handles are a no-op
    pub fn off_push(&self, handle: PushHandle) {
        self.inner.registry.off_push(handle);
    }

    /// Closes every pooled session; later fetches reconnect lazily
    pub async fn disconnect_all(&self) {
        self.inner.pool.disconnect_all().await;
    }

    /// Drops every cached response
    pub fn clear_cache(&self) {
        store::lock(&self.inner.cache).clear();
    }

    /// Current cache occupancy
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        store::lock(&self.inner.cache).stats()
    }

    /// Tears the context down: disconnects every session and clears the cache
    pub async fn reset(&self) {
        self.disconnect_all().await;
        self.clear_cache();
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SessionPool {
        &self.inner.pool
    }

    #[cfg(test)]
    pub(crate) fn registry(&self) -> &PushRegistry {
        &self.inner.registry
    }
}

impl fmt::Debug for FetchContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchContext")
            .field("cache", &self.cache_stats())
            .finish_non_exhaustive()
    }
}

/// Creates an independent context; a shorthand for [`FetchContext::new`]
#[must_use]
pub fn context(options: ContextOptions, connector: Arc<dyn Connector>) -> FetchContext {
    FetchContext::new(options, connector)
}

static DEFAULT_CONTEXT: OnceLock<FetchContext> = OnceLock::new();

/// Installs the process-default context on first call and returns it.
///
/// The transport is an external collaborator, so the default context cannot
/// spring into existence on its own: something has to hand over a connector
/// once. Later calls ignore their arguments and return the already-installed
/// context.
pub fn install_default(options: ContextOptions, connector: Arc<dyn Connector>) -> FetchContext {
    DEFAULT_CONTEXT.get_or_init(|| FetchContext::new(options, connector)).clone()
}

fn default_context() -> Result<FetchContext> {
    DEFAULT_CONTEXT.get().cloned().ok_or(FetchError::NoDefaultContext)
}

/// Fetches a URL through the process-default context
pub async fn fetch(url: &str, options: FetchOptions) -> Result<Response> {
    default_context()?.fetch(url, options).await
}

/// Registers a push observer on the process-default context
pub fn on_push<F>(observer: F) -> Result<PushHandle>
where
    F: Fn(&Url) + Send + Sync + 'static,
{
    Ok(default_context()?.on_push(observer))
}

/// Deregisters a push observer on the process-default context
pub fn off_push(handle: PushHandle) -> Result<()> {
    default_context()?.off_push(handle);
    Ok(())
}

/// Closes every session of the process-default context
pub async fn disconnect_all() -> Result<()> {
    default_context()?.disconnect_all().await;
    Ok(())
}

/// Clears the process-default context's cache
pub fn clear_cache() -> Result<()> {
    default_context()?.clear_cache();
    Ok(())
}

/// Cache occupancy of the process-default context
pub fn cache_stats() -> Result<CacheStats> {
    Ok(default_context()?.cache_stats())
}
