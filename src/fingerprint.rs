//! Cache keys derived from a request: method, normalized URL, and the header
//! values a stored response declared as varying.

use std::fmt;

use http::Method;
use url::Url;

use crate::headers::Headers;

/// A cache key.
///
/// The full derivation is kept as the key so equality implies request-level
/// equivalence for caching purposes; nothing is hashed down.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(Vec<u8>);

impl Fingerprint {
    /// The raw key bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({:?})", String::from_utf8_lossy(&self.0))
    }
}

/// Marker used for a nominated header the request does not carry. Header
/// values cannot contain NUL, so it never collides with a real value.
const ABSENT: char = '\0';

/// Separator between key components. Neither methods, URLs, nor header
/// values may contain a line break.
const SEP: char = '\n';

/// Computes the cache key for a request.
///
/// The URL contributes its lowercased scheme and host with any default port
/// elided, the path verbatim, and the query re-ordered lexicographically by
/// key (values keep their relative order). When `vary` lists the header
/// names a cached response nominated, each name (case-folded, sorted)
/// contributes the request's joined value for it.
#[must_use]
pub fn compute(method: &Method, url: &Url, headers: &Headers, vary: Option<&[String]>) -> Fingerprint {
    let mut key = String::new();
    key.push_str(method.as_str());
    key.push(SEP);

    // The url crate already lowercases scheme and host and drops default
    // ports during parsing.
    key.push_str(url.scheme());
    key.push_str("://");
    key.push_str(url.host_str().unwrap_or_default());
    if let Some(port) = url.port() {
        key.push(':');
        key.push_str(&port.to_string());
    }
    key.push_str(url.path());
    key.push(SEP);

    let mut pairs: Vec<(String, String)> =
        url.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())).collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));
    for (i, (k, v)) in pairs.iter().enumerate() {
        if i > 0 {
            key.push('&');
        }
        key.push_str(k);
        key.push('=');
        key.push_str(v);
    }

    if let Some(vary) = vary {
        let mut names: Vec<String> = vary.iter().map(|n| n.to_ascii_lowercase()).collect();
        names.sort();
        names.dedup();
        for name in names {
            key.push(SEP);
            key.push_str(&name);
            key.push(':');
            match headers.get(&name) {
                Some(value) => key.push_str(&value),
                None => key.push(ABSENT),
            }
        }
    }

    Fingerprint(key.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn query_order_is_canonical() {
        let a = compute(&Method::GET, &url("https://h/p?b=2&a=1"), &Headers::new(), None);
        let b = compute(&Method::GET, &url("https://h/p?a=1&b=2"), &Headers::new(), None);
        assert_eq!(a, b);
    }

    #[test]
    fn repeated_keys_keep_value_order() {
        let a = compute(&Method::GET, &url("https://h/p?x=1&x=2"), &Headers::new(), None);
        let b = compute(&Method::GET, &url("https://h/p?x=2&x=1"), &Headers::new(), None);
        assert_ne!(a, b);
    }

    #[test]
    fn default_port_is_elided() {
        let a = compute(&Method::GET, &url("https://h:443/p"), &Headers::new(), None);
        let b = compute(&Method::GET, &url("https://h/p"), &Headers::new(), None);
        assert_eq!(a, b);
        let c = compute(&Method::GET, &url("https://h:8443/p"), &Headers::new(), None);
        assert_ne!(a, c);
    }

    #[test]
    fn method_distinguishes_keys() {
        let get = compute(&Method::GET, &url("https://h/p"), &Headers::new(), None);
        let head = compute(&Method::HEAD, &url("https://h/p"), &Headers::new(), None);
        assert_ne!(get, head);
    }

    #[test]
    fn vary_values_qualify_the_key() {
        let mut html = Headers::new();
        html.insert("Accept", "text/html");
        let mut json = Headers::new();
        json.insert("Accept", "application/json");
        let vary = vec!["accept".to_string()];

        let u = url("https://h/p");
        let a = compute(&Method::GET, &u, &html, Some(&vary));
        let b = compute(&Method::GET, &u, &json, Some(&vary));
        let absent = compute(&Method::GET, &u, &Headers::new(), Some(&vary));
        assert_ne!(a, b);
        assert_ne!(a, absent);
    }

    #[test]
    fn vary_name_casing_and_order_do_not_matter() {
        let mut headers = Headers::new();
        headers.insert("Accept", "text/html");
        headers.insert("Accept-Language", "en");
        let u = url("https://h/p");
        let a = compute(
            &Method::GET,
            &u,
            &headers,
            Some(&["Accept-Language".to_string(), "ACCEPT".to_string()]),
        );
        let b = compute(
            &Method::GET,
            &u,
            &headers,
            Some(&["accept".to_string(), "accept-language".to_string()]),
        );
        assert_eq!(a, b);
    }
}
