//! The bounded response cache: immutable entries in a strict-LRU map with a
//! byte budget.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime};

use bytes::Bytes;
use lru::LruCache;

use crate::cache_control::CacheControl;
use crate::fingerprint::Fingerprint;
use crate::freshness;
use crate::headers::Headers;
use crate::transport::HttpVersion;

/// Fixed per-entry overhead charged on top of body and header bytes.
const ENTRY_OVERHEAD: usize = 256;

/// Per-header bookkeeping overhead.
const HEADER_OVERHEAD: usize = 8;

/// A snapshot of cache occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cached entries
    pub count: usize,
    /// Estimated retained bytes across all entries
    pub bytes: usize,
}

/// One cached response.
///
/// Entries are immutable once stored; a revalidation produces a fresh entry
/// via [`refreshed`](CacheEntry::refreshed) that replaces the old one
/// atomically in the store.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    status: u16,
    version: HttpVersion,
    headers: Headers,
    body: Bytes,
    stored_at: Instant,
    /// `max(0, received_at - Date header)`, fixed at store time.
    apparent_age: Duration,
    /// The origin `Date`, falling back to receipt time when absent or bad.
    date: SystemTime,
    cache_control: CacheControl,
    vary: Vec<String>,
    retained: usize,
}

impl CacheEntry {
    /// Builds an entry from a drained response received at `received_at`
    #[must_use]
    pub fn new(
        status: u16,
        version: HttpVersion,
        headers: Headers,
        body: Bytes,
        received_at: SystemTime,
    ) -> Self {
        let cache_control = CacheControl::from_headers(&headers);
        let mut vary: Vec<String> =
            headers.comma_values("vary").iter().map(|v| v.to_ascii_lowercase()).collect();
        vary.sort();
        vary.dedup();
        let date = headers
            .first("date")
            .and_then(|d| httpdate::parse_http_date(d).ok())
            .unwrap_or(received_at);
        let apparent_age = received_at.duration_since(date).unwrap_or_default();
        let retained = estimate_retained_bytes(&body, &headers);
        Self {
            status,
            version,
            headers,
            body,
            stored_at: Instant::now(),
            apparent_age,
            date,
            cache_control,
            vary,
            retained,
        }
    }

    /// The cached status code
    #[must_use]
    pub fn status(&self) -> u16 {
        self.status
    }

    /// The HTTP version the response arrived over
    #[must_use]
    pub fn version(&self) -> HttpVersion {
        self.version
    }

    /// The cached response headers
    #[must_use]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// The cached body bytes
    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// The parsed response `Cache-Control` directives
    #[must_use]
    pub fn cache_control(&self) -> &CacheControl {
        &self.cache_control
    }

    /// The case-folded, sorted `Vary` header names
    #[must_use]
    pub fn vary(&self) -> &[String] {
        &self.vary
    }

    /// The origin `Date`, falling back to receipt time
    #[must_use]
    pub fn date(&self) -> SystemTime {
        self.date
    }

    /// Estimated bytes this entry keeps resident
    #[must_use]
    pub fn retained_bytes(&self) -> usize {
        self.retained
    }

    /// Current age: monotonic residence time plus the apparent age fixed at
    /// store time
    #[must_use]
    pub fn age(&self) -> Duration {
        self.stored_at.elapsed() + self.apparent_age
    }

    /// The entity tag, if the response carried one
    #[must_use]
    pub fn etag(&self) -> Option<&str> {
        self.headers.first("etag")
    }

    /// The raw `Last-Modified` value, if present
    #[must_use]
    pub fn last_modified(&self) -> Option<&str> {
        self.headers.first("last-modified")
    }

    /// Whether the entry can be revalidated with a conditional request
    #[must_use]
    pub fn has_validator(&self) -> bool {
        self.etag().is_some() || self.last_modified().is_some()
    }

    /// Builds the replacement entry after a `304 Not Modified`.
    ///
    /// Headers present on the 304 replace their stored counterparts, except
    /// the ones describing the (reused) body; the store timestamp restarts.
    #[must_use]
    pub fn refreshed(&self, validated: &Headers, received_at: SystemTime) -> Self {
        // rfc7234 4.3.4: the stored body is reused, so headers describing it
        // must not be replaced by the 304's.
        const EXCLUDED: &[&str] =
            &["content-length", "content-encoding", "content-range", "transfer-encoding"];
        let mut merged = self.headers.clone();
        for (name, value) in validated.raw() {
            if EXCLUDED.iter().any(|e| name.eq_ignore_ascii_case(e)) {
                continue;
            }
            merged.insert(name.clone(), value.clone());
        }
        Self::new(self.status, self.version, merged, self.body.clone(), received_at)
    }
}

fn estimate_retained_bytes(body: &Bytes, headers: &Headers) -> usize {
    let header_bytes: usize =
        headers.raw().iter().map(|(k, v)| k.len() + v.len() + HEADER_OVERHEAD).sum();
    body.len() + header_bytes + ENTRY_OVERHEAD
}

/// A strict-LRU cache of response entries bounded by a byte budget.
///
/// Recency is touched by reads and writes alike; eviction walks from the
/// least recently used end until the retained total fits the budget again.
/// A single entry larger than the whole budget is refused outright.
pub struct CacheStore {
    entries: LruCache<Fingerprint, Arc<CacheEntry>>,
    /// Base key (no `Vary` dimension) to the `Vary` names of the stored
    /// variant, so later lookups can recompute the qualified key.
    vary_index: HashMap<Fingerprint, Vec<String>>,
    total_bytes: usize,
    max_bytes: usize,
}

impl CacheStore {
    /// Creates a store with a byte budget
    #[must_use]
    pub fn new(max_bytes: usize) -> Self {
        Self {
            entries: LruCache::unbounded(),
            vary_index: HashMap::new(),
            total_bytes: 0,
            max_bytes,
        }
    }

    /// Looks up an entry, touching its recency; returns the entry with its
    /// current age.
    ///
    /// A stale entry that carries no validator can never be served again
    /// (it cannot be revalidated), so it expires here instead of lingering
    /// until eviction.
    pub fn lookup(&mut self, key: &Fingerprint) -> Option<(Arc<CacheEntry>, Duration)> {
        let entry = self.entries.get(key)?.clone();
        let age = entry.age();
        if age >= freshness::freshness_lifetime(&entry) && !entry.has_validator() {
            self.remove(key);
            return None;
        }
        Some((entry, age))
    }

    /// The `Vary` names recorded for a base key, if a variant is stored
    #[must_use]
    pub fn vary_hint(&self, base: &Fingerprint) -> Option<Vec<String>> {
        self.vary_index.get(base).cloned()
    }

    /// Inserts or replaces an entry, then evicts least-recently-used entries
    /// until the byte budget holds. Returns `false` without inserting when
    /// the entry alone exceeds the budget; the caller still owns a usable
    /// copy of the response.
    pub fn store(&mut self, base: &Fingerprint, key: Fingerprint, entry: Arc<CacheEntry>) -> bool {
        if entry.retained_bytes() > self.max_bytes {
            log::debug!(
                "cache: refusing entry of {} bytes against a budget of {}",
                entry.retained_bytes(),
                self.max_bytes
            );
            return false;
        }
        if entry.vary().is_empty() {
            self.vary_index.remove(base);
        } else {
            self.vary_index.insert(base.clone(), entry.vary().to_vec());
        }
        self.total_bytes += entry.retained_bytes();
        if let Some(old) = self.entries.put(key, entry) {
            self.total_bytes -= old.retained_bytes();
        }
        while self.total_bytes > self.max_bytes {
            match self.entries.pop_lru() {
                Some((_, evicted)) => self.total_bytes -= evicted.retained_bytes(),
                None => break,
            }
        }
        true
    }

    /// Removes one entry
    pub fn remove(&mut self, key: &Fingerprint) {
        if let Some(old) = self.entries.pop(key) {
            self.total_bytes -= old.retained_bytes();
        }
        self.vary_index.remove(key);
    }

    /// Drops every entry
    pub fn clear(&mut self) {
        self.entries.clear();
        self.vary_index.clear();
        self.total_bytes = 0;
    }

    /// Current occupancy
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats { count: self.entries.len(), bytes: self.total_bytes }
    }

    /// The configured byte budget
    #[must_use]
    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }
}

impl fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStore")
            .field("count", &self.entries.len())
            .field("total_bytes", &self.total_bytes)
            .field("max_bytes", &self.max_bytes)
            .finish_non_exhaustive()
    }
}

/// The store as shared by the engine and the push registry.
pub(crate) type SharedCacheStore = Arc<Mutex<CacheStore>>;

/// Locks a store, tolerating poisoning: entries are immutable, so a panic
/// mid-write cannot leave a half-mutated entry behind.
pub(crate) fn lock(store: &Mutex<CacheStore>) -> MutexGuard<'_, CacheStore> {
    store.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_with_body(len: usize, max_age: u64) -> Arc<CacheEntry> {
        let mut headers = Headers::new();
        headers.insert("cache-control", format!("max-age={max_age}"));
        Arc::new(CacheEntry::new(
            200,
            HttpVersion::H2,
            headers,
            Bytes::from(vec![0u8; len]),
            SystemTime::now(),
        ))
    }

    fn key(name: &str) -> Fingerprint {
        let url = url::Url::parse(&format!("https://example.com/{name}")).unwrap();
        crate::fingerprint::compute(&http::Method::GET, &url, &Headers::new(), None)
    }

    #[test]
    fn evicts_least_recently_used_until_budget_holds() {
        let mut store = CacheStore::new(10_000);
        let (a, b, c) = (key("a"), key("b"), key("c"));
        assert!(store.store(&a, a.clone(), entry_with_body(4_000, 60)));
        assert!(store.store(&b, b.clone(), entry_with_body(4_000, 60)));
        // touching `a` makes `b` the eviction candidate
        assert!(store.lookup(&a).is_some());
        assert!(store.store(&c, c.clone(), entry_with_body(4_000, 60)));
        assert!(store.lookup(&b).is_none());
        assert!(store.lookup(&a).is_some());
        assert!(store.lookup(&c).is_some());
        assert!(store.stats().bytes <= 10_000);
        assert_eq!(store.stats().count, 2);
    }

    #[test]
    fn oversized_entry_is_refused() {
        let mut store = CacheStore::new(1_000);
        let k = key("big");
        assert!(!store.store(&k, k.clone(), entry_with_body(2_000, 60)));
        assert_eq!(store.stats(), CacheStats { count: 0, bytes: 0 });
    }

    #[test]
    fn replacement_is_atomic_for_byte_accounting() {
        let mut store = CacheStore::new(10_000);
        let k = key("x");
        assert!(store.store(&k, k.clone(), entry_with_body(3_000, 60)));
        let before = store.stats().bytes;
        assert!(store.store(&k, k.clone(), entry_with_body(1_000, 60)));
        assert_eq!(store.stats().count, 1);
        assert!(store.stats().bytes < before);
    }

    #[test]
    fn stale_entry_without_validator_expires_on_access() {
        let mut store = CacheStore::new(10_000);
        let k = key("stale");
        // max-age=0 is immediately stale, and there is no etag/last-modified
        assert!(store.store(&k, k.clone(), entry_with_body(100, 0)));
        assert!(store.lookup(&k).is_none());
        assert_eq!(store.stats().count, 0);
    }

    #[test]
    fn stale_entry_with_validator_survives_for_revalidation() {
        let mut store = CacheStore::new(10_000);
        let mut headers = Headers::new();
        headers.insert("cache-control", "max-age=0");
        headers.insert("etag", "\"v1\"");
        let entry = Arc::new(CacheEntry::new(
            200,
            HttpVersion::H2,
            headers,
            Bytes::from_static(b"body"),
            SystemTime::now(),
        ));
        let k = key("revalidatable");
        assert!(store.store(&k, k.clone(), entry));
        assert!(store.lookup(&k).is_some());
    }

    #[test]
    fn clear_and_remove_reset_accounting() {
        let mut store = CacheStore::new(10_000);
        let (a, b) = (key("a"), key("b"));
        store.store(&a, a.clone(), entry_with_body(1_000, 60));
        store.store(&b, b.clone(), entry_with_body(1_000, 60));
        store.remove(&a);
        assert_eq!(store.stats().count, 1);
        store.clear();
        assert_eq!(store.stats(), CacheStats { count: 0, bytes: 0 });
    }

    #[test]
    fn apparent_age_comes_from_the_date_header() {
        let mut headers = Headers::new();
        headers.insert("cache-control", "max-age=60");
        let date = SystemTime::now() - Duration::from_secs(10);
        headers.insert("date", httpdate::fmt_http_date(date));
        let entry = CacheEntry::new(
            200,
            HttpVersion::Http11,
            headers,
            Bytes::from_static(b"x"),
            SystemTime::now(),
        );
        assert!(entry.age() >= Duration::from_secs(9));
    }

    #[test]
    fn refreshed_merges_headers_but_keeps_the_body() {
        let mut headers = Headers::new();
        headers.insert("cache-control", "max-age=0");
        headers.insert("etag", "\"v1\"");
        headers.insert("content-length", "4");
        let entry = CacheEntry::new(
            200,
            HttpVersion::H2,
            headers,
            Bytes::from_static(b"body"),
            SystemTime::now(),
        );

        let mut validated = Headers::new();
        validated.insert("cache-control", "max-age=120");
        validated.insert("content-length", "999");
        let refreshed = entry.refreshed(&validated, SystemTime::now());

        assert_eq!(refreshed.body(), &Bytes::from_static(b"body"));
        assert_eq!(refreshed.cache_control().max_age(), Some(120));
        // body-describing headers are not replaced by the 304's
        assert_eq!(refreshed.headers().first("content-length"), Some("4"));
        assert_eq!(refreshed.etag(), Some("\"v1\""));
    }
}
