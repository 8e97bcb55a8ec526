//! A header multimap that keeps on-the-wire casing and ordering while
//! answering lookups case-insensitively.

use std::fmt;
use std::slice::Iter;

/// An ordered HTTP header multimap.
///
/// Keys compare ASCII-case-insensitively on every lookup, but the map stores
/// names exactly as they arrived so the raw view can reproduce the wire form.
/// [`get`](Headers::get) joins multiple values with `", "`;
/// [`raw`](Headers::raw) preserves them as individual pairs.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// Creates an empty header map
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a header, replacing any existing values for the same name
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(&name));
        self.entries.push((name, value.into()));
    }

    /// Appends a header value, preserving existing values for the same name
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Returns all values for a header joined with `", "`
    #[must_use]
    pub fn get(&self, name: &str) -> Option<String> {
        let mut out: Option<String> = None;
        for (_, value) in self.entries.iter().filter(|(k, _)| k.eq_ignore_ascii_case(name)) {
            match &mut out {
                Some(joined) => {
                    joined.push_str(", ");
                    joined.push_str(value);
                }
                None => out = Some(value.clone()),
            }
        }
        out
    }

    /// Returns the first value for a header
    #[must_use]
    pub fn first(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns every value for a header in insertion order
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.entries
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Splits a list-valued header on commas, trimming whitespace.
    ///
    /// Values spread over repeated header lines and values packed into one
    /// line are treated the same, the way `Vary` and `Cache-Control` require.
    #[must_use]
    pub fn comma_values(&self, name: &str) -> Vec<String> {
        self.get_all(name)
            .flat_map(|v| v.split(','))
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Checks whether a header is present
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    /// Removes every value for a header
    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    }

    /// The raw name/value pairs with original casing and ordering
    #[must_use]
    pub fn raw(&self) -> &[(String, String)] {
        &self.entries
    }

    /// Iterates over the raw pairs
    pub fn iter(&self) -> Iter<'_, (String, String)> {
        self.entries.iter()
    }

    /// Number of name/value pairs
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when no headers are present
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries.iter().map(|(k, v)| (k, v))).finish()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (k, v) in iter {
            headers.append(k, v);
        }
        headers
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = &'a (String, String);
    type IntoIter = Iter<'a, (String, String)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookups_are_case_insensitive() {
        let mut headers = Headers::new();
        headers.insert("Content-Type", "text/plain");
        assert_eq!(headers.first("content-type"), Some("text/plain"));
        assert_eq!(headers.first("CONTENT-TYPE"), Some("text/plain"));
        assert!(headers.contains("conTENT-tYPE"));
    }

    #[test]
    fn get_joins_and_raw_preserves() {
        let mut headers = Headers::new();
        headers.append("Set-Thing", "a");
        headers.append("set-thing", "b");
        assert_eq!(headers.get("set-thing").as_deref(), Some("a, b"));
        // raw keeps the wire casing and individual values
        assert_eq!(headers.raw(), &[("Set-Thing".into(), "a".into()), ("set-thing".into(), "b".into())]);
    }

    #[test]
    fn insert_replaces_all_values() {
        let mut headers = Headers::new();
        headers.append("x", "1");
        headers.append("X", "2");
        headers.insert("x", "3");
        assert_eq!(headers.get("x").as_deref(), Some("3"));
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn comma_values_split_across_lines() {
        let mut headers = Headers::new();
        headers.append("Vary", "Accept, Accept-Encoding");
        headers.append("Vary", "User-Agent");
        assert_eq!(headers.comma_values("vary"), vec!["Accept", "Accept-Encoding", "User-Agent"]);
    }
}
