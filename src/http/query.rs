//! URL-encoded `key=value` decoding for query strings and form bodies.

use crate::FieldMap;
use memchr::memchr;
use std::borrow::Cow;

/// Decoder for `application/x-www-form-urlencoded` data.
///
/// Query strings and url-encoded form bodies share one format: pairs
/// separated by `&`, key and value separated by the first `=`, both
/// percent-decoded with `+` standing for a space.
///
/// # Examples
/// ```rust
/// use relay_web::query::Query;
///
/// let params = Query::parse(b"name=John%20Doe&Age=25").unwrap();
/// assert_eq!(params.get("name"), Some("John Doe"));
/// assert_eq!(params.get("age"), Some("25"));
/// ```
/// All possible formats:
/// ```rust
/// use relay_web::query::Query;
///
/// let params: Vec<(String, String)> =
///     Query::parse_as(b"?debug&name=&=Qwe&&key=a+b").unwrap();
///
/// assert_eq!(params, [
///     ("debug".to_string(), "".to_string()),
///     ("name".to_string(), "".to_string()),
///     ("".to_string(), "Qwe".to_string()),
///     ("key".to_string(), "a b".to_string()),
/// ]);
/// ```
pub struct Query;

impl Query {
    /// Decodes `data` into a case-insensitive [`FieldMap`].
    ///
    /// Later duplicates of a key replace earlier ones.
    #[inline]
    pub fn parse(data: &[u8]) -> Result<FieldMap, Error> {
        Self::parse_as(data)
    }

    /// Decodes `data` into a new collection of any [`QueryCollector`].
    #[inline]
    pub fn parse_as<C: QueryCollector>(data: &[u8]) -> Result<C, Error> {
        let mut result = C::default();
        Self::parse_into(&mut result, data)?;
        Ok(result)
    }

    /// Decodes `data` and appends the pairs to an existing collection.
    ///
    /// A single leading `?` is skipped. Empty segments (`a=1&&b=2`) are
    /// ignored and a segment without `=` yields an empty value.
    pub fn parse_into<C: QueryCollector>(result: &mut C, data: &[u8]) -> Result<(), Error> {
        let data = match data.first() {
            Some(b'?') => &data[1..],
            _ => data,
        };

        let mut start = 0;
        while start < data.len() {
            let end = memchr(b'&', &data[start..])
                .map(|pos| start + pos)
                .unwrap_or(data.len());

            if end > start {
                let pair = &data[start..end];
                let (key, value) = match memchr(b'=', pair) {
                    Some(index) => (&pair[..index], &pair[index + 1..]),
                    None => (pair, &b""[..]),
                };

                result.add_param(decode(key)?, decode(value)?);
            }

            start = end + 1;
        }

        Ok(())
    }
}

/// Percent-decodes one key or value, treating `+` as a space.
pub(crate) fn decode(raw: &[u8]) -> Result<String, Error> {
    let raw: Cow<[u8]> = match memchr(b'+', raw) {
        Some(_) => Cow::Owned(
            raw.iter()
                .map(|&b| if b == b'+' { b' ' } else { b })
                .collect(),
        ),
        None => Cow::Borrowed(raw),
    };

    String::from_utf8(urlencoding::decode_binary(&raw).into_owned())
        .map_err(|_| Error::InvalidUtf8)
}

/// A collection that decoded pairs can be written into.
///
/// # Examples
/// ```rust
/// use relay_web::query::{Query, QueryCollector};
///
/// #[derive(Default)]
/// struct Keys(Vec<String>);
///
/// impl QueryCollector for Keys {
///     fn add_param(&mut self, key: String, _: String) {
///         self.0.push(key);
///     }
/// }
///
/// let keys: Keys = Query::parse_as(b"a=1&b=2").unwrap();
/// assert_eq!(keys.0, ["a", "b"]);
/// ```
pub trait QueryCollector: Default {
    fn add_param(&mut self, key: String, value: String);
}

// Keeps every pair in order, duplicates included
impl QueryCollector for Vec<(String, String)> {
    #[inline(always)]
    fn add_param(&mut self, key: String, value: String) {
        self.push((key, value));
    }
}

// Case-insensitive, last value wins
impl QueryCollector for FieldMap {
    #[inline(always)]
    fn add_param(&mut self, key: String, value: String) {
        self.insert(key, value);
    }
}

/// Error types that can occur while decoding url-encoded data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A key or value did not decode to valid UTF-8
    /// (e.g. `name=%FF`).
    #[error("percent-decoded data is not valid UTF-8")]
    InvalidUtf8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic() {
        let cases = ["a=1&b=2", "?a=1&b=2"];

        for line in cases {
            let params = Query::parse(line.as_bytes()).unwrap();

            assert_eq!(params.len(), 2);
            assert_eq!(params.get("a"), Some("1"));
            assert_eq!(params.get("b"), Some("2"));
        }
    }

    #[test]
    fn decoding() {
        #[rustfmt::skip]
        let cases = [
            ("name=John%20Doe", "name", "John Doe"),
            ("name=John+Doe", "name", "John Doe"),
            ("first%20name=x", "first name", "x"),
            ("email=user%40example.com", "email", "user@example.com"),
            ("path=%2Fapi%2Fv1", "path", "/api/v1"),
            ("text=%D0%BF%D1%80%D0%B8", "text", "при"),
            ("eq=a=b", "eq", "a=b"),
            ("broken=%zz", "broken", "%zz"),
        ];

        for (line, key, value) in cases {
            let params = Query::parse(line.as_bytes()).unwrap();
            assert_eq!(params.get(key), Some(value), "{line}");
        }
    }

    #[test]
    fn full() {
        let params: Vec<(String, String)> = Query::parse_as(b"flag&empty=&=val&&key=value").unwrap();

        let params: Vec<(&str, &str)> = params
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        assert_eq!(
            params,
            [("flag", ""), ("empty", ""), ("", "val"), ("key", "value")]
        );
    }

    #[test]
    fn case_insensitive_last_wins() {
        let params = Query::parse(b"Key=1&KEY=2").unwrap();

        assert_eq!(params.len(), 1);
        assert_eq!(params.get("key"), Some("2"));
    }

    #[test]
    fn empty() {
        assert!(Query::parse(b"").unwrap().is_empty());
        assert!(Query::parse(b"?").unwrap().is_empty());
        assert!(Query::parse(b"&&").unwrap().is_empty());
    }

    #[test]
    fn invalid_utf8() {
        assert_eq!(Query::parse(b"name=%FF%FE"), Err(Error::InvalidUtf8));
        assert_eq!(Query::parse(b"%C3=1"), Err(Error::InvalidUtf8));
    }
}
