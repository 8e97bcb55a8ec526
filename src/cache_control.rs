//! A stand-alone `Cache-Control` grammar: a comma-separated directive list
//! where each directive optionally takes a token or quoted-string value.

use std::collections::HashMap;

use crate::headers::Headers;

/// A parsed set of `Cache-Control` directives.
///
/// Directive names are case-folded. When the same directive appears twice
/// with conflicting values its freshness information is considered invalid
/// and the set gains `must-revalidate`, which errs toward staleness.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheControl {
    directives: HashMap<String, Option<String>>,
}

impl CacheControl {
    /// Parses a single header value
    #[must_use]
    pub fn parse(value: &str) -> Self {
        let mut cc = CacheControl::default();
        cc.parse_into(value);
        cc
    }

    /// Parses every `Cache-Control` value in a header map
    #[must_use]
    pub fn from_headers(headers: &Headers) -> Self {
        let mut cc = CacheControl::default();
        for value in headers.get_all("cache-control") {
            cc.parse_into(value);
        }
        cc
    }

    fn parse_into(&mut self, value: &str) {
        let mut conflicting = false;
        self.scan(value, &mut conflicting);
        if conflicting {
            self.directives.insert("must-revalidate".to_string(), None);
        }
    }

    fn scan(&mut self, value: &str, conflicting: &mut bool) {
        let bytes = value.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            // skip leading separators and whitespace
            while i < bytes.len() && (bytes[i] == b',' || bytes[i].is_ascii_whitespace()) {
                i += 1;
            }
            if i >= bytes.len() {
                break;
            }
            // directive name
            let start = i;
            while i < bytes.len() && bytes[i] != b',' && bytes[i] != b'=' {
                i += 1;
            }
            let name = value[start..i].trim().to_ascii_lowercase();
            let mut directive_value = None;
            if i < bytes.len() && bytes[i] == b'=' {
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                    i += 1;
                }
                if i < bytes.len() && bytes[i] == b'"' {
                    // quoted-string with backslash escapes
                    i += 1;
                    let mut unquoted = String::new();
                    while i < bytes.len() && bytes[i] != b'"' {
                        if bytes[i] == b'\\' && i + 1 < bytes.len() {
                            i += 1;
                        }
                        unquoted.push(bytes[i] as char);
                        i += 1;
                    }
                    i += 1; // closing quote
                    directive_value = Some(unquoted);
                } else {
                    let vstart = i;
                    while i < bytes.len() && bytes[i] != b',' {
                        i += 1;
                    }
                    directive_value = Some(value[vstart..i].trim().to_string());
                }
            }
            if name.is_empty() {
                continue;
            }
            match self.directives.get(&name) {
                Some(existing) if existing != &directive_value => *conflicting = true,
                Some(_) => {}
                None => {
                    self.directives.insert(name, directive_value);
                }
            }
        }
    }

    /// Checks whether a directive is present
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.directives.contains_key(name)
    }

    /// Returns a directive's value, if it has one
    #[must_use]
    pub fn value(&self, name: &str) -> Option<&str> {
        self.directives.get(name).and_then(|v| v.as_deref())
    }

    /// Parses a directive's value as a non-negative number of seconds
    #[must_use]
    pub fn seconds(&self, name: &str) -> Option<u64> {
        self.value(name).and_then(|v| v.parse().ok())
    }

    /// `no-store` is present
    #[must_use]
    pub fn no_store(&self) -> bool {
        self.contains("no-store")
    }

    /// `no-cache` is present
    #[must_use]
    pub fn no_cache(&self) -> bool {
        self.contains("no-cache")
    }

    /// The `max-age` value in seconds
    #[must_use]
    pub fn max_age(&self) -> Option<u64> {
        self.seconds("max-age")
    }

    /// The `s-maxage` value in seconds
    #[must_use]
    pub fn s_maxage(&self) -> Option<u64> {
        self.seconds("s-maxage")
    }

    /// Returns `true` when no directives were parsed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.directives.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flags_and_values() {
        let cc = CacheControl::parse("public, max-age=604800, must-revalidate");
        assert!(cc.contains("public"));
        assert!(cc.contains("must-revalidate"));
        assert_eq!(cc.max_age(), Some(604_800));
        assert!(!cc.no_store());
    }

    #[test]
    fn parses_quoted_strings() {
        let cc = CacheControl::parse(r#"no-cache="set-cookie, x-private", max-age=60"#);
        assert_eq!(cc.value("no-cache"), Some("set-cookie, x-private"));
        assert_eq!(cc.max_age(), Some(60));
    }

    #[test]
    fn unescapes_quoted_pairs() {
        let cc = CacheControl::parse(r#"ext="a\"b""#);
        assert_eq!(cc.value("ext"), Some(r#"a"b"#));
    }

    #[test]
    fn conflicting_duplicates_force_revalidation() {
        let cc = CacheControl::parse("max-age=60, max-age=120");
        assert_eq!(cc.max_age(), Some(60));
        assert!(cc.contains("must-revalidate"));
    }

    #[test]
    fn agreeing_duplicates_are_harmless() {
        let cc = CacheControl::parse("max-age=60, max-age=60");
        assert_eq!(cc.max_age(), Some(60));
        assert!(!cc.contains("must-revalidate"));
    }

    #[test]
    fn names_are_case_folded() {
        let cc = CacheControl::parse("No-Store, S-MAXAGE=10");
        assert!(cc.no_store());
        assert_eq!(cc.s_maxage(), Some(10));
    }
}
