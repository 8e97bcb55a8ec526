//! The stateless freshness and storability rules the engine and push
//! registry consult before touching the cache.

use std::time::Duration;

use http::Method;

use crate::cache_control::CacheControl;
use crate::engine::CacheMode;
use crate::headers::Headers;
use crate::store::CacheEntry;

/// Statuses a cache may retain without explicit freshness information.
const STORABLE_STATUSES: &[u16] = &[200, 203, 204, 206, 300, 301, 404, 405, 410, 414, 501];

/// Upper bound on heuristic freshness.
const HEURISTIC_CAP: Duration = Duration::from_secs(24 * 3600);

/// Fraction of the resource's age used as heuristic freshness.
const HEURISTIC_FRACTION: f64 = 0.1;

/// What the cache should do for one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheDecision {
    /// The request opted out: skip lookup and storage entirely
    Bypass,
    /// A fresh entry exists; serve it without contacting the origin
    Fresh,
    /// A stale entry exists; serve it only if revalidation succeeds
    Revalidate,
    /// No entry; fetch and store if the response permits
    Store,
    /// Fetch, but the response forbids storage
    NoStore,
}

/// Decides how the cache participates in a request.
///
/// `entry` is the stored entry selected for this request, when one exists.
pub(crate) fn decide(
    method: &Method,
    mode: CacheMode,
    request_headers: &Headers,
    entry: Option<&CacheEntry>,
) -> CacheDecision {
    if method != Method::GET && method != Method::HEAD {
        return CacheDecision::Bypass;
    }
    if mode == CacheMode::NoStore {
        return CacheDecision::Bypass;
    }
    let request_cc = CacheControl::from_headers(request_headers);
    if request_cc.no_store() {
        return CacheDecision::Bypass;
    }
    match entry {
        None => CacheDecision::Store,
        Some(entry) => {
            if request_cc.no_cache() || entry.cache_control().no_cache() {
                return CacheDecision::Revalidate;
            }
            if entry.age() < freshness_lifetime(entry) {
                CacheDecision::Fresh
            } else {
                CacheDecision::Revalidate
            }
        }
    }
}

/// How long an entry counts as fresh: `s-maxage`, then `max-age`, then
/// `Expires` relative to the origin `Date`, then the `Last-Modified`
/// heuristic, else zero.
#[must_use]
pub fn freshness_lifetime(entry: &CacheEntry) -> Duration {
    let cc = entry.cache_control();
    if let Some(secs) = cc.s_maxage() {
        return Duration::from_secs(secs);
    }
    if let Some(secs) = cc.max_age() {
        return Duration::from_secs(secs);
    }
    if let Some(expires) = entry.headers().first("expires") {
        // An unparseable Expires means already expired, not "fall through".
        return match httpdate::parse_http_date(expires) {
            Ok(when) => when.duration_since(entry.date()).unwrap_or_default(),
            Err(_) => Duration::ZERO,
        };
    }
    if let Some(last_modified) =
        entry.headers().first("last-modified").and_then(|v| httpdate::parse_http_date(v).ok())
    {
        if let Ok(since) = entry.date().duration_since(last_modified) {
            let heuristic = since.mul_f64(HEURISTIC_FRACTION);
            return heuristic.min(HEURISTIC_CAP);
        }
    }
    Duration::ZERO
}

/// Whether a response may be stored at all.
///
/// Either the status is storable by default or the response carries explicit
/// freshness; `no-store` always wins, and `Vary: *` can never be matched by
/// a later request. `private` does not block storage: this cache is local to
/// one process, not shared.
#[must_use]
pub fn is_storable(status: u16, cache_control: &CacheControl, headers: &Headers) -> bool {
    if cache_control.no_store() {
        return false;
    }
    if headers.comma_values("vary").iter().any(|v| v == "*") {
        return false;
    }
    STORABLE_STATUSES.contains(&status)
        || cache_control.contains("max-age")
        || cache_control.contains("s-maxage")
        || headers.contains("expires")
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use bytes::Bytes;

    use super::*;
    use crate::transport::HttpVersion;

    fn entry(header_pairs: &[(&str, String)]) -> CacheEntry {
        let mut headers = Headers::new();
        for (k, v) in header_pairs {
            headers.insert(*k, v.clone());
        }
        CacheEntry::new(200, HttpVersion::H2, headers, Bytes::from_static(b"x"), SystemTime::now())
    }

    #[test]
    fn non_get_head_bypasses() {
        let d = decide(&Method::POST, CacheMode::Default, &Headers::new(), None);
        assert_eq!(d, CacheDecision::Bypass);
    }

    #[test]
    fn no_store_mode_and_header_bypass() {
        let d = decide(&Method::GET, CacheMode::NoStore, &Headers::new(), None);
        assert_eq!(d, CacheDecision::Bypass);

        let mut headers = Headers::new();
        headers.insert("cache-control", "no-store");
        let d = decide(&Method::GET, CacheMode::Default, &headers, None);
        assert_eq!(d, CacheDecision::Bypass);
    }

    #[test]
    fn missing_entry_selects_store() {
        let d = decide(&Method::GET, CacheMode::Default, &Headers::new(), None);
        assert_eq!(d, CacheDecision::Store);
    }

    #[test]
    fn fresh_entry_is_served() {
        let e = entry(&[("cache-control", "max-age=60".to_string())]);
        let d = decide(&Method::GET, CacheMode::Default, &Headers::new(), Some(&e));
        assert_eq!(d, CacheDecision::Fresh);
    }

    #[test]
    fn zero_max_age_always_revalidates() {
        let e = entry(&[("cache-control", "max-age=0".to_string()), ("etag", "\"v\"".to_string())]);
        let d = decide(&Method::GET, CacheMode::Default, &Headers::new(), Some(&e));
        assert_eq!(d, CacheDecision::Revalidate);
    }

    #[test]
    fn no_cache_on_either_side_forces_revalidation() {
        let e = entry(&[("cache-control", "max-age=60, no-cache".to_string())]);
        let d = decide(&Method::GET, CacheMode::Default, &Headers::new(), Some(&e));
        assert_eq!(d, CacheDecision::Revalidate);

        let e = entry(&[("cache-control", "max-age=60".to_string())]);
        let mut headers = Headers::new();
        headers.insert("cache-control", "no-cache");
        let d = decide(&Method::GET, CacheMode::Default, &headers, Some(&e));
        assert_eq!(d, CacheDecision::Revalidate);
    }

    #[test]
    fn s_maxage_wins_over_max_age() {
        let e = entry(&[("cache-control", "s-maxage=120, max-age=0".to_string())]);
        assert_eq!(freshness_lifetime(&e), Duration::from_secs(120));
    }

    #[test]
    fn expires_is_relative_to_date() {
        let date = SystemTime::now();
        let e = entry(&[
            ("date", httpdate::fmt_http_date(date)),
            ("expires", httpdate::fmt_http_date(date + Duration::from_secs(300))),
        ]);
        let lifetime = freshness_lifetime(&e);
        assert!(lifetime >= Duration::from_secs(299) && lifetime <= Duration::from_secs(301));
    }

    #[test]
    fn invalid_expires_means_expired() {
        let e = entry(&[("expires", "0".to_string())]);
        assert_eq!(freshness_lifetime(&e), Duration::ZERO);
    }

    #[test]
    fn heuristic_uses_a_tenth_of_the_modification_age() {
        let date = SystemTime::now();
        let e = entry(&[
            ("date", httpdate::fmt_http_date(date)),
            ("last-modified", httpdate::fmt_http_date(date - Duration::from_secs(1000))),
        ]);
        let lifetime = freshness_lifetime(&e);
        assert!(lifetime >= Duration::from_secs(99) && lifetime <= Duration::from_secs(101));
    }

    #[test]
    fn heuristic_is_capped_at_a_day() {
        let date = SystemTime::now();
        let e = entry(&[
            ("date", httpdate::fmt_http_date(date)),
            ("last-modified", httpdate::fmt_http_date(date - Duration::from_secs(400 * 24 * 3600))),
        ]);
        assert_eq!(freshness_lifetime(&e), HEURISTIC_CAP);
    }

    #[test]
    fn storable_statuses_and_explicit_freshness() {
        let empty = CacheControl::default();
        assert!(is_storable(200, &empty, &Headers::new()));
        assert!(is_storable(301, &empty, &Headers::new()));
        assert!(is_storable(404, &empty, &Headers::new()));
        assert!(!is_storable(500, &empty, &Headers::new()));
        assert!(!is_storable(302, &empty, &Headers::new()));

        // explicit freshness rescues an otherwise non-storable status
        let cc = CacheControl::parse("max-age=60");
        assert!(is_storable(500, &cc, &Headers::new()));
        let mut headers = Headers::new();
        headers.insert("expires", "Sun, 06 Nov 1994 08:49:37 GMT");
        assert!(is_storable(500, &empty, &headers));
    }

    #[test]
    fn no_store_and_vary_star_block_storage() {
        let cc = CacheControl::parse("no-store, max-age=60");
        assert!(!is_storable(200, &cc, &Headers::new()));

        let mut headers = Headers::new();
        headers.insert("vary", "*");
        assert!(!is_storable(200, &CacheControl::default(), &headers));
    }

    #[test]
    fn private_is_storable_in_a_process_local_cache() {
        let cc = CacheControl::parse("private, max-age=60");
        assert!(is_storable(200, &cc, &Headers::new()));
    }
}
