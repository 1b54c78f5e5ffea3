use crate::{
    errors::ParseError,
    http::multipart::{self, MultipartEntry},
    query::Query,
    FieldMap, Method,
};
use memchr::memmem;
use std::{any::Any, collections::HashMap, fmt};

/// A parsed HTTP/1.1 request.
///
/// Created by the worker that handles the message and dropped when the
/// handling pipeline completes. Apart from [locals](Request::insert_local)
/// and [`set_body`](Request::set_body) it is read-only.
///
/// # Input data requirements
///
/// #### General designations
/// - `SP`: ASCII space (0x20)
/// - `CRLF`: Carriage return + line feed (`"\r\n"`)
///
/// ## First line
///
/// ```text
/// [METHOD] SP [PATH] SP [VERSION] CRLF
/// ```
///
/// - `[METHOD]`: one of the nine [methods](crate::Method), any case.
///   Anything else is answered with `400 Bad Request`.
/// - `[PATH]`: used verbatim up to the first `?`. The rest is decoded as
///   url-encoded [parameters](Request::param).
/// - `[VERSION]`: `HTTP/1.1` in any case. Anything else is answered with
///   `505 HTTP Version Not Supported`.
///
/// ## Headers
///
/// ```text
/// [NAME] ": " [VALUE] CRLF
/// ```
///
/// Header lines are read until the first line that does not contain `": "`.
/// Names are case-insensitive. The head (request line and headers) must be
/// valid UTF-8.
///
/// ## Body
///
/// Everything after the first `CRLF CRLF`. It is decoded according to
/// `Content-Type`, see [`Body`].
pub struct Request {
    method: Method,
    path: String,
    params: FieldMap,
    headers: FieldMap,
    raw_body: Vec<u8>,
    body: Body,
    locals: HashMap<String, Box<dyn Any + Send>>,
}

/// Decoded request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    /// `Content-Type: application/x-www-form-urlencoded`
    UrlEncoded(FieldMap),
    /// `Content-Type: multipart/form-data; boundary=...`, keyed by part name.
    Multipart(HashMap<String, MultipartEntry>),
    /// Any other non-empty body.
    Raw(Vec<u8>),
    /// The request carried no body.
    None,
}

impl Body {
    /// Form fields of an url-encoded body.
    pub fn form(&self) -> Option<&FieldMap> {
        match self {
            Body::UrlEncoded(form) => Some(form),
            _ => None,
        }
    }

    /// Parts of a multipart body.
    pub fn multipart(&self) -> Option<&HashMap<String, MultipartEntry>> {
        match self {
            Body::Multipart(parts) => Some(parts),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Body::None)
    }
}

const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";
const MULTIPART_FORM_DATA: &str = "multipart/form-data";

impl Request {
    /// Parses one complete message.
    ///
    /// # Examples
    /// ```
    /// use relay_web::{Method, Request};
    ///
    /// let req = Request::parse(b"GET /users?id=7 HTTP/1.1\r\nHost: localhost\r\n\r\n").unwrap();
    ///
    /// assert_eq!(req.method(), Method::Get);
    /// assert_eq!(req.path(), "/users");
    /// assert_eq!(req.param("ID"), Some("7"));
    /// assert_eq!(req.header("host"), Some("localhost"));
    /// assert!(req.body().is_none());
    /// ```
    pub fn parse(raw: &[u8]) -> Result<Self, ParseError> {
        let (head, body) = split_head(raw);
        let head = simdutf8::basic::from_utf8(head).map_err(|_| ParseError::InvalidEncoding)?;

        let mut lines = head.split("\r\n");
        let mut tokens = lines.next().unwrap_or_default().split(' ');

        let method = tokens
            .next()
            .and_then(Method::from_token)
            .ok_or(ParseError::InvalidMethod)?;
        let target = tokens
            .next()
            .filter(|target| !target.is_empty())
            .ok_or(ParseError::MalformedRequestLine)?;
        let version = tokens.next().ok_or(ParseError::MalformedRequestLine)?;

        if tokens.next().is_some() {
            return Err(ParseError::MalformedRequestLine);
        }
        if !version.eq_ignore_ascii_case("HTTP/1.1") {
            return Err(ParseError::UnsupportedVersion);
        }

        let (path, params) = match target.split_once('?') {
            Some((path, query)) => (path, Query::parse(query.as_bytes())?),
            None => (target, FieldMap::new()),
        };
        let headers = parse_fields(lines);

        let decoded = match (body, headers.get("Content-Type")) {
            (None, _) => Body::None,
            (Some(body), Some(ct)) if ct.eq_ignore_ascii_case(FORM_URLENCODED) => {
                Body::UrlEncoded(Query::parse(body)?)
            }
            (Some(body), Some(ct)) if contains_ignore_case(ct, MULTIPART_FORM_DATA) => {
                Body::Multipart(multipart::decode(ct, body)?)
            }
            (Some(body), _) if !body.is_empty() => Body::Raw(body.to_vec()),
            (Some(_), _) => Body::None,
        };

        Ok(Request {
            method,
            path: path.to_string(),
            params,
            headers,
            raw_body: body.map(<[u8]>::to_vec).unwrap_or_default(),
            body: decoded,
            locals: HashMap::new(),
        })
    }
}

// Public API
impl Request {
    #[inline]
    pub fn method(&self) -> Method {
        self.method
    }

    /// Request path without the query string, exactly as sent.
    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Value of a query parameter, name compared ignoring case.
    #[inline]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    #[inline]
    pub fn params(&self) -> &FieldMap {
        &self.params
    }

    /// Value of a header, name compared ignoring case.
    #[inline]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    #[inline]
    pub fn headers(&self) -> &FieldMap {
        &self.headers
    }

    /// Body bytes as received, empty if there was no body.
    #[inline]
    pub fn raw_body(&self) -> &[u8] {
        &self.raw_body
    }

    #[inline]
    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Replaces the decoded body, e.g. from a middleware that decodes JSON.
    #[inline]
    pub fn set_body(&mut self, body: Body) {
        self.body = body;
    }

    /// Stores a value for later middleware and the route handler.
    ///
    /// Returns `true` if a value under `key` was replaced.
    ///
    /// # Examples
    /// ```
    /// use relay_web::Request;
    ///
    /// let mut req = Request::parse(b"GET / HTTP/1.1\r\n\r\n").unwrap();
    /// req.insert_local("user_id", 42_u64);
    ///
    /// assert_eq!(req.local::<u64>("user_id"), Some(&42));
    /// assert_eq!(req.local::<String>("user_id"), None); // wrong type
    /// ```
    pub fn insert_local<T: Any + Send>(&mut self, key: impl Into<String>, value: T) -> bool {
        self.locals.insert(key.into(), Box::new(value)).is_some()
    }

    /// Value stored under `key`, if it has type `T`.
    pub fn local<T: Any>(&self, key: &str) -> Option<&T> {
        self.locals.get(key)?.downcast_ref()
    }

    pub fn local_mut<T: Any>(&mut self, key: &str) -> Option<&mut T> {
        self.locals.get_mut(key)?.downcast_mut()
    }

    /// Removes and returns the value under `key` if it has type `T`.
    ///
    /// A value of another type stays in place.
    pub fn remove_local<T: Any>(&mut self, key: &str) -> Option<T> {
        if !self.locals.get(key)?.is::<T>() {
            return None;
        }
        let value = self.locals.remove(key)?;
        value.downcast().ok().map(|boxed| *boxed)
    }

    /// Whether the client asked to close the connection after this exchange.
    #[inline]
    pub(crate) fn wants_close(&self) -> bool {
        self.headers.value_eq("Connection", "close")
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("params", &self.params)
            .field("headers", &self.headers)
            .field("raw_body_len", &self.raw_body.len())
            .field("body", &self.body)
            .field("locals", &self.locals.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Splits a message at the first `CRLF CRLF`.
///
/// Without a terminator the whole buffer is the head and there is no body.
pub(crate) fn split_head(raw: &[u8]) -> (&[u8], Option<&[u8]>) {
    match memmem::find(raw, b"\r\n\r\n") {
        Some(index) => (&raw[..index], Some(&raw[index + 4..])),
        None => (raw, None),
    }
}

/// Reads `Name: Value` lines until the first line without `": "`.
pub(crate) fn parse_fields<'a>(lines: impl Iterator<Item = &'a str>) -> FieldMap {
    let mut fields = FieldMap::new();
    for line in lines {
        let Some((name, value)) = line.split_once(": ") else {
            break;
        };
        fields.insert(name, value);
    }
    fields
}

/// `needle` must be lower-case.
#[inline]
fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    memmem::find(haystack.to_ascii_lowercase().as_bytes(), needle.as_bytes()).is_some()
}

#[cfg(test)]
mod request_self {
    use super::*;

    type Expected<'a> =
        Result<(Method, &'a str, Vec<(&'a str, &'a str)>, Vec<(&'a str, &'a str)>, &'a str), ParseError>;

    macro_rules! parse_request {
        ($cases:expr) => {
            for (req, result) in $cases {
                match result {
                    Ok((method, path, params, headers, raw_body)) => {
                        let parsed = Request::parse(req.as_bytes())
                            .unwrap_or_else(|e| panic!("{req:?}: {e}"));

                        assert_eq!(parsed.method(), method, "{req:?}");
                        assert_eq!(parsed.path(), path, "{req:?}");

                        assert_eq!(parsed.params().len(), params.len(), "{req:?}");
                        for (name, value) in params {
                            assert_eq!(parsed.param(name), Some(value), "{req:?}");
                        }

                        assert_eq!(parsed.headers().len(), headers.len(), "{req:?}");
                        for (name, value) in headers {
                            assert_eq!(parsed.header(name), Some(value), "{req:?}");
                        }

                        assert_eq!(parsed.raw_body(), raw_body.as_bytes(), "{req:?}");
                    }
                    Err(error) => {
                        assert_eq!(Request::parse(req.as_bytes()).err(), Some(error), "{req:?}");
                    }
                }
            }
        };
    }

    #[test]
    fn parse_valid_request() {
        #[rustfmt::skip]
        let cases: Vec<(&str, Expected)> = vec![
            (
                "GET / HTTP/1.1\r\n\r\n",
                Ok((Method::Get, "/", vec![], vec![], "")),
            ),
            (
                "get /lower HTTP/1.1\r\n\r\n",
                Ok((Method::Get, "/lower", vec![], vec![], "")),
            ),
            (
                "GET /api/users?sort=name&page=2 HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n",
                Ok((
                    Method::Get, "/api/users",
                    vec![("sort", "name"), ("PAGE", "2")],
                    vec![("host", "127.0.0.1")],
                    "",
                )),
            ),
            (
                "PUT /qwe HTTP/1.1\r\nHost: 127.0.0.1\r\nUser-Agent: curl\r\n\r\n",
                Ok((
                    Method::Put, "/qwe", vec![],
                    vec![("host", "127.0.0.1"), ("user-agent", "curl")],
                    "",
                )),
            ),
            (
                "POST /file HTTP/1.1\r\nContent-Length: 12\r\n\r\nHello world!",
                Ok((
                    Method::Post, "/file", vec![],
                    vec![("content-length", "12")],
                    "Hello world!",
                )),
            ),
            (
                "OPTIONS * HTTP/1.1\r\nConnection: close\r\n\r\n",
                Ok((Method::Options, "*", vec![], vec![("connection", "close")], "")),
            ),
            (
                "DELETE /a/B?x=%2F HTTP/1.1\r\n\r\n",
                Ok((Method::Delete, "/a/B", vec![("x", "/")], vec![], "")),
            ),
            (
                "HEAD / http/1.1\r\n\r\n",
                Ok((Method::Head, "/", vec![], vec![], "")),
            ),
            (
                "GET /no-terminator HTTP/1.1\r\nHost: a",
                Ok((Method::Get, "/no-terminator", vec![], vec![("host", "a")], "")),
            ),
            (
                "GET / HTTP/1.1\r\nX-Empty: \r\nBroken line\r\nX-After: 1\r\n\r\n",
                Ok((Method::Get, "/", vec![], vec![("x-empty", "")], "")),
            ),
            (
                "GET / HTTP/1.1\r\nX-Colon: a: b\r\n\r\n",
                Ok((Method::Get, "/", vec![], vec![("x-colon", "a: b")], "")),
            ),
            (
                "CONNECT example.com:443 HTTP/1.1\r\n\r\n",
                Ok((Method::Connect, "example.com:443", vec![], vec![], "")),
            ),
        ];

        parse_request! { cases }
    }

    #[test]
    fn parse_invalid_request() {
        #[rustfmt::skip]
        let cases: Vec<(&str, Expected)> = vec![
            ("FOO / HTTP/1.1\r\n\r\n", Err(ParseError::InvalidMethod)),
            (" GET / HTTP/1.1\r\n\r\n", Err(ParseError::InvalidMethod)),
            ("", Err(ParseError::InvalidMethod)),
            ("FOO / HTTP/1.0\r\n\r\n", Err(ParseError::InvalidMethod)),
            ("GET / HTTP/1.0\r\n\r\n", Err(ParseError::UnsupportedVersion)),
            ("GET / HTTP/2\r\n\r\n", Err(ParseError::UnsupportedVersion)),
            ("GET / HTTP/1.1 \r\n\r\n", Err(ParseError::MalformedRequestLine)),
            ("GET /\r\n\r\n", Err(ParseError::MalformedRequestLine)),
            ("GET\r\n\r\n", Err(ParseError::MalformedRequestLine)),
            ("GET  HTTP/1.1\r\n\r\n", Err(ParseError::MalformedRequestLine)),
            ("GET /?a=%FF HTTP/1.1\r\n\r\n", Err(ParseError::Query(crate::query::Error::InvalidUtf8))),
            (
                "POST / HTTP/1.1\r\nContent-Type: multipart/form-data\r\n\r\n--x--",
                Err(ParseError::Multipart(multipart::MultipartError::MissingBoundary)),
            ),
        ];

        parse_request! { cases }
    }

    #[test]
    fn invalid_utf8_head() {
        assert_eq!(
            Request::parse(b"GET /\xFF HTTP/1.1\r\n\r\n").err(),
            Some(ParseError::InvalidEncoding)
        );
        // The body may hold arbitrary bytes
        let req = Request::parse(b"POST / HTTP/1.1\r\n\r\n\xFF\x00").unwrap();
        assert_eq!(req.body(), &Body::Raw(vec![0xFF, 0x00]));
    }

    #[test]
    fn decoded_bodies() {
        let req = Request::parse(
            b"POST /form HTTP/1.1\r\nContent-Type: Application/X-WWW-Form-Urlencoded\r\n\r\nname=John%20Doe&age=30",
        )
        .unwrap();
        let form = req.body().form().unwrap();
        assert_eq!(form.get("name"), Some("John Doe"));
        assert_eq!(form.get("AGE"), Some("30"));

        let req = Request::parse(
            b"POST /upload HTTP/1.1\r\nContent-Type: multipart/form-data; boundary=b1\r\n\r\n\
              --b1\r\nContent-Disposition: form-data; name=\"f\"\r\n\r\nv\r\n--b1--\r\n",
        )
        .unwrap();
        let parts = req.body().multipart().unwrap();
        assert_eq!(parts["f"].content(), b"v");

        let req = Request::parse(b"POST / HTTP/1.1\r\nContent-Type: application/json\r\n\r\n{}").unwrap();
        assert_eq!(req.body(), &Body::Raw(b"{}".to_vec()));

        let req = Request::parse(b"POST / HTTP/1.1\r\nContent-Type: text/plain\r\n\r\n").unwrap();
        assert!(req.body().is_none());
        assert!(req.raw_body().is_empty());

        let req = Request::parse(b"GET / HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded").unwrap();
        assert!(req.body().is_none());

        let req = Request::parse(
            b"POST / HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\n\r\n",
        )
        .unwrap();
        assert_eq!(req.body(), &Body::UrlEncoded(FieldMap::new()));
    }

    #[test]
    fn multipart_content_type_match() {
        #[rustfmt::skip]
        let cases = [
            ("multipart/form-data; boundary=x", true),
            ("Multipart/Form-Data; boundary=x", true),
            ("text/plain; note=multipart/form-data", true),
            ("multipart/mixed; boundary=x", false),
            ("multipart/form", false),
            ("", false),
        ];

        for (content_type, expected) in cases {
            assert_eq!(contains_ignore_case(content_type, MULTIPART_FORM_DATA), expected, "{content_type}");
        }
    }

    #[test]
    fn large_form_body() {
        let keys = 100_000;
        let mut body = String::new();
        for i in 0..keys {
            body.push_str(&format!("k{i}=&"));
        }
        let raw = format!(
            "POST / HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        );

        let started = std::time::Instant::now();
        let req = Request::parse(raw.as_bytes()).unwrap();
        let elapsed = started.elapsed();

        let form = req.body().form().unwrap();
        assert_eq!(form.len(), keys);
        assert_eq!(form.get("K99999"), Some(""));
        assert!(elapsed < std::time::Duration::from_secs(5), "{elapsed:?}");
    }

    #[test]
    fn structured_round_trip() {
        let req = Request::parse(
            b"PATCH /items/9?color=dark%20red HTTP/1.1\r\nX-Trace: abc\r\nAccept: */*\r\n\r\nbody",
        )
        .unwrap();

        let mut rebuilt = format!("{} {}", req.method(), req.path());
        for (i, (k, v)) in req.params().iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            rebuilt.push_str(&format!("{sep}{k}={}", v.replace(' ', "%20")));
        }
        rebuilt.push_str(" HTTP/1.1\r\n");
        for (k, v) in req.headers().iter() {
            rebuilt.push_str(&format!("{k}: {v}\r\n"));
        }
        rebuilt.push_str("\r\nbody");

        let again = Request::parse(rebuilt.as_bytes()).unwrap();
        assert_eq!(again.method(), req.method());
        assert_eq!(again.path(), req.path());
        assert_eq!(again.params(), req.params());
        assert_eq!(again.headers(), req.headers());
        assert_eq!(again.raw_body(), req.raw_body());
    }

    #[test]
    fn locals() {
        let mut req = Request::parse(b"GET / HTTP/1.1\r\n\r\n").unwrap();

        assert!(!req.insert_local("user", String::from("ann")));
        assert!(req.insert_local("user", String::from("bob")));
        assert_eq!(req.local::<String>("user").map(String::as_str), Some("bob"));

        req.local_mut::<String>("user").unwrap().push('!');
        assert_eq!(req.remove_local::<u32>("user"), None);
        assert_eq!(req.remove_local::<String>("user"), Some("bob!".to_string()));
        assert_eq!(req.local::<String>("user"), None);
    }

    #[test]
    fn connection_close() {
        let req = Request::parse(b"GET / HTTP/1.1\r\nConnection: Close\r\n\r\n").unwrap();
        assert!(req.wants_close());

        let req = Request::parse(b"GET / HTTP/1.1\r\nConnection: keep-alive\r\n\r\n").unwrap();
        assert!(!req.wants_close());
    }
}
