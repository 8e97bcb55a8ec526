//! Ingestion of HTTP/2 server pushes and observer notification.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

use http::Method;
use url::Url;

use crate::body::{self, ByteStream};
use crate::cache_control::CacheControl;
use crate::fingerprint;
use crate::freshness;
use crate::headers::Headers;
use crate::store::{self, CacheEntry, SharedCacheStore};
use crate::transport::{PushSink, ResponseHead};

/// An opaque handle returned by [`on_push`](PushRegistry::on_push), used to
/// deregister the observer later
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PushHandle(u64);

type PushObserver = Arc<dyn Fn(&Url) + Send + Sync>;

/// Routes server-pushed resources into the cache and notifies observers.
///
/// Observers run in registration order, after the pushed entry is committed,
/// so a fetch of the pushed URL issued from an observer is served from
/// cache. A panicking observer is logged and does not stop later observers.
pub struct PushRegistry {
    observers: Mutex<Vec<(u64, PushObserver)>>,
    next_id: AtomicU64,
    cache: SharedCacheStore,
}

impl PushRegistry {
    pub(crate) fn new(cache: SharedCacheStore) -> Self {
        Self { observers: Mutex::new(Vec::new()), next_id: AtomicU64::new(1), cache }
    }

    /// Registers an observer invoked with each pushed URL
    pub fn on_push<F>(&self, observer: F) -> PushHandle
    where
        F: Fn(&Url) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock_observers().push((id, Arc::new(observer)));
        PushHandle(id)
    }

    /// Deregisters an observer; unknown handles are a no-op
    pub fn off_push(&self, handle: PushHandle) {
        self.lock_observers().retain(|(id, _)| *id != handle.0);
    }

    fn lock_observers(&self) -> std::sync::MutexGuard<'_, Vec<(u64, PushObserver)>> {
        self.observers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, url: &Url) {
        // snapshot outside the call so an observer may (de)register freely
        let observers: Vec<PushObserver> =
            self.lock_observers().iter().map(|(_, f)| f.clone()).collect();
        for observer in observers {
            if catch_unwind(AssertUnwindSafe(|| observer(url))).is_err() {
                log::warn!("push: observer panicked for {url}");
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn observer_count(&self) -> usize {
        self.lock_observers().len()
    }
}

#[async_trait::async_trait]
impl PushSink for PushRegistry {
    async fn deliver(&self, url: Url, head: ResponseHead, body: ByteStream) {
        let bytes = match body::drain(body).await {
            Ok(bytes) => bytes,
            Err(err) => {
                log::warn!("push: discarding {url}, body failed to drain: {err}");
                return;
            }
        };

        let cache_control = CacheControl::from_headers(&head.headers);
        if freshness::is_storable(head.status, &cache_control, &head.headers) {
            let entry =
                Arc::new(CacheEntry::new(head.status, head.version, head.headers, bytes, SystemTime::now()));
            // key the entry as if a plain GET had fetched it
            let no_headers = Headers::new();
            let base = fingerprint::compute(&Method::GET, &url, &no_headers, None);
            let key = if entry.vary().is_empty() {
                base.clone()
            } else {
                fingerprint::compute(&Method::GET, &url, &no_headers, Some(entry.vary()))
            };
            if !store::lock(&self.cache).store(&base, key, entry) {
                log::debug!("push: {url} exceeds the cache budget, dropped");
            }
        } else {
            log::debug!("push: {url} is not storable, notifying without caching");
        }

        self.notify(&url);
    }
}

impl std::fmt::Debug for PushRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushRegistry")
            .field("observers", &self.lock_observers().len())
            .finish_non_exhaustive()
    }
}
