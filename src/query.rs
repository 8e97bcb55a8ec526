//! URL construction with application/x-www-form-urlencoded query encoding.

use url::Url;

use crate::error::{FetchError, Result};

/// A query parameter value accepted by [`create_url`]
#[derive(Debug, Clone, PartialEq)]
pub enum QueryValue {
    /// A string value
    Str(String),
    /// An integer value
    Int(i64),
    /// A floating point value; must be finite
    Float(f64),
    /// A boolean value, encoded as `true`/`false`
    Bool(bool),
    /// A list of scalars, expanded to repeated keys in declared order
    List(Vec<QueryValue>),
}

impl QueryValue {
    fn scalar_string(&self) -> Result<String> {
        match self {
            Self::Str(s) => Ok(s.clone()),
            Self::Int(i) => Ok(i.to_string()),
            Self::Float(f) if f.is_finite() => Ok(f.to_string()),
            Self::Float(f) => {
                Err(FetchError::InvalidArgument(format!("non-finite query value `{f}`")))
            }
            Self::Bool(b) => Ok(b.to_string()),
            Self::List(_) => Err(FetchError::InvalidArgument(
                "query arrays may only contain scalar values".to_string(),
            )),
        }
    }
}

impl From<&str> for QueryValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for QueryValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for QueryValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for QueryValue {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl From<f64> for QueryValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for QueryValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl<V: Into<QueryValue>> From<Vec<V>> for QueryValue {
    fn from(value: Vec<V>) -> Self {
        Self::List(value.into_iter().map(Into::into).collect())
    }
}

/// Builds a URL string from a base and optional query pairs.
///
/// Pairs append to any query the base already carries, in declared order;
/// list values expand to repeated keys. Values are percent-encoded per
/// application/x-www-form-urlencoded (space becomes `+`, non-ASCII becomes
/// UTF-8 percent escapes). With no pairs the base is parsed and
/// re-serialized, which makes the function idempotent.
pub fn create_url(base: &str, query: Option<&[(&str, QueryValue)]>) -> Result<String> {
    let mut url = Url::parse(base)
        .map_err(|e| FetchError::InvalidArgument(format!("invalid url `{base}`: {e}")))?;
    if let Some(pairs) = query {
        if !pairs.is_empty() {
            let mut editor = url.query_pairs_mut();
            for (key, value) in pairs {
                match value {
                    QueryValue::List(items) => {
                        for item in items {
                            editor.append_pair(key, &item.scalar_string()?);
                        }
                    }
                    scalar => {
                        editor.append_pair(key, &scalar.scalar_string()?);
                    }
                }
            }
        }
    }
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_scalars_and_lists_in_order() {
        let url = create_url(
            "https://h/json",
            Some(&[
                ("widget", 42.into()),
                ("dummy", true.into()),
                ("name", "André Citroën".into()),
                ("rumple", "stiltskin".into()),
                ("nephews", vec!["Huey", "Louie", "Dewey"].into()),
            ]),
        )
        .unwrap();
        assert_eq!(
            url,
            "https://h/json?widget=42&dummy=true&name=Andr%C3%A9+Citro%C3%ABn&rumple=stiltskin&nephews=Huey&nephews=Louie&nephews=Dewey"
        );
    }

    #[test]
    fn is_idempotent_without_query() {
        let once = create_url("https://EXAMPLE.com/path", None).unwrap();
        let twice = create_url(&once, None).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn no_query_section_for_empty_pairs() {
        assert_eq!(create_url("https://h/x", Some(&[])).unwrap(), "https://h/x");
    }

    #[test]
    fn appends_to_an_existing_query() {
        let url = create_url("https://h/x?a=1", Some(&[("b", 2.into())])).unwrap();
        assert_eq!(url, "https://h/x?a=1&b=2");
    }

    #[test]
    fn rejects_bad_bases_and_nested_lists() {
        assert!(matches!(create_url("not a url", None), Err(FetchError::InvalidArgument(_))));
        let nested: QueryValue = QueryValue::List(vec![QueryValue::List(vec![1.into()])]);
        assert!(matches!(
            create_url("https://h/", Some(&[("k", nested)])),
            Err(FetchError::InvalidArgument(_))
        ));
        assert!(matches!(
            create_url("https://h/", Some(&[("k", f64::NAN.into())])),
            Err(FetchError::InvalidArgument(_))
        ));
    }

    #[test]
    fn space_becomes_plus() {
        let url = create_url("https://h/", Some(&[("q", "a b".into())])).unwrap();
        assert_eq!(url, "https://h/?q=a+b");
    }
}
