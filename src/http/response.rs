//! HTTP response model, content helpers and the wire serializer.

use crate::{errors::Error, http::types::StatusCode, BodyWriter, FieldMap, WriteBuffer};
use serde::Serialize;
use std::{fs, path::Path, time::SystemTime};

/// HTTP response under construction.
///
/// A fresh `Response` (`200 OK`, no headers, empty content) is created for
/// every request and passed through the middleware chain and the route
/// handler in turn. Each of them may change anything; the result is
/// serialized once after the handler returns.
///
/// `Server`, `Date`, `Content-Length` and `Connection` are managed by the
/// serializer, values set for the first three are overwritten.
///
/// # Examples
/// ```
/// use relay_web::{Response, StatusCode};
///
/// let mut resp = Response::new();
/// resp.status(StatusCode::Created)
///     .header("X-Request-Id", 42)
///     .html("<h1>Created</h1>");
///
/// assert_eq!(resp.status_code(), StatusCode::Created);
/// assert_eq!(resp.headers().get("content-type"), Some("text/html"));
/// assert_eq!(resp.content(), b"<h1>Created</h1>");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    status: StatusCode,
    headers: FieldMap,
    content: Vec<u8>,
    pub(crate) keep_alive: bool,
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl Response {
    pub fn new() -> Self {
        Self {
            status: StatusCode::Ok,
            headers: FieldMap::new(),
            content: Vec::new(),
            keep_alive: true,
        }
    }

    /// Builds the generated error page sent for protocol, routing and
    /// handler failures. Error responses always close the connection.
    pub(crate) fn error(status: StatusCode, server_name: &str, json: bool) -> Self {
        let mut resp = Response::new();
        resp.status(status).close();

        if json {
            let body = serde_json::json!({
                "error": status.reason(),
                "code": status.as_u16(),
            });
            resp.binary(body.to_string(), Some("application/json"));
        } else {
            resp.html(format!(
                "<html><head><title>{status}</title></head>\
                 <body><h1>{status}</h1><hr /><h3>{server_name}</h3></body></html>"
            ));
        }
        resp
    }
}

// Accessors
impl Response {
    #[inline]
    pub fn status_code(&self) -> StatusCode {
        self.status
    }

    #[inline]
    pub fn headers(&self) -> &FieldMap {
        &self.headers
    }

    #[inline]
    pub fn headers_mut(&mut self) -> &mut FieldMap {
        &mut self.headers
    }

    #[inline]
    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// Whether the connection is closed after this response is sent.
    ///
    /// True after [`close()`](Response::close) or when the `Connection`
    /// header was set to `close` directly.
    #[inline]
    pub fn will_close(&self) -> bool {
        !self.keep_alive || self.headers.value_eq("Connection", "close")
    }
}

// Builders
impl Response {
    /// Sets the status code.
    ///
    /// # Examples
    /// ```
    /// use relay_web::{Response, StatusCode};
    ///
    /// let mut resp = Response::new();
    /// resp.status(StatusCode::NotFound)
    ///     .body(r#"{"status": "not found", "code": 404}"#);
    /// ```
    #[inline]
    pub fn status(&mut self, status: StatusCode) -> &mut Self {
        self.status = status;
        self
    }

    /// Sets a header, replacing any value stored under the same name
    /// (compared ignoring case).
    ///
    /// # Examples
    /// ```
    /// use relay_web::Response;
    ///
    /// let mut resp = Response::new();
    /// resp.header("content-type", "text/plain")   // &str, &str
    ///     .header("x-custom-id", 128)             // &str, i32
    ///     .header("x-cache-enabled", true)        // &str, bool
    ///     .body("Done");
    ///
    /// assert_eq!(resp.headers().get("X-Custom-Id"), Some("128"));
    /// ```
    pub fn header<V: WriteBuffer>(&mut self, name: impl Into<String>, value: V) -> &mut Self {
        let mut buffer = Vec::new();
        value.write_to(&mut buffer);

        let value = match String::from_utf8(buffer) {
            Ok(value) => value,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        };
        self.headers.insert(name, value);
        self
    }

    /// Replaces the content.
    ///
    /// # Examples
    /// ```
    /// use relay_web::Response;
    ///
    /// let mut resp = Response::new();
    /// resp.body(12345);
    /// assert_eq!(resp.content(), b"12345");
    ///
    /// resp.body(&b"raw bytes"[..]);
    /// assert_eq!(resp.content(), b"raw bytes");
    /// ```
    #[inline]
    pub fn body<T: WriteBuffer>(&mut self, data: T) -> &mut Self {
        self.content.clear();
        data.write_to(&mut self.content);
        self
    }

    /// Replaces the content with whatever `f` writes.
    ///
    /// # Examples
    /// ```
    /// use relay_web::Response;
    /// use std::io::Write;
    ///
    /// let mut resp = Response::new();
    /// resp.body_with(|w| {
    ///     w.write("Total: ");
    ///     let _ = write!(w, "{} items", 3);
    /// });
    /// assert_eq!(resp.content(), b"Total: 3 items");
    /// ```
    #[inline]
    pub fn body_with<F: FnOnce(&mut BodyWriter)>(&mut self, f: F) -> &mut Self {
        self.content.clear();
        f(&mut BodyWriter(&mut self.content));
        self
    }

    /// Serializes `value` as JSON and sets `Content-Type: application/json`.
    ///
    /// # Examples
    /// ```
    /// use relay_web::Response;
    /// use std::collections::BTreeMap;
    ///
    /// let mut resp = Response::new();
    /// resp.json(&BTreeMap::from([("id", 7)])).unwrap();
    /// assert_eq!(resp.content(), br#"{"id":7}"#);
    /// ```
    pub fn json<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<&mut Self, Error> {
        self.content = serde_json::to_vec(value)?;
        self.headers.insert("Content-Type", "application/json");
        Ok(self)
    }

    /// Sets an HTML body with `Content-Type: text/html`.
    #[inline]
    pub fn html(&mut self, html: impl Into<String>) -> &mut Self {
        self.content = html.into().into_bytes();
        self.headers.insert("Content-Type", "text/html");
        self
    }

    /// Sets a plain text body with `Content-Type: text/plain`.
    #[inline]
    pub fn text(&mut self, text: impl Into<String>) -> &mut Self {
        self.content = text.into().into_bytes();
        self.headers.insert("Content-Type", "text/plain");
        self
    }

    /// Sets arbitrary bytes as the body. `Content-Type` is only touched when
    /// `content_type` is given.
    pub fn binary(&mut self, data: impl Into<Vec<u8>>, content_type: Option<&str>) -> &mut Self {
        self.content = data.into();
        if let Some(content_type) = content_type {
            self.headers.insert("Content-Type", content_type);
        }
        self
    }

    /// Sends the contents of a file.
    ///
    /// The content type is detected from the leading bytes, then from the
    /// file extension, falling back to `application/octet-stream`.
    pub fn file(&mut self, path: impl AsRef<Path>) -> Result<&mut Self, Error> {
        let path = path.as_ref();
        let data = fs::read(path)?;
        let content_type = mime::detect(&data, path);

        Ok(self.binary(data, Some(content_type)))
    }

    /// Redirects the client to `target`.
    ///
    /// # Errors
    /// [`Error::InvalidRedirect`] when `status` is not a `3xx` code. The
    /// response is left unchanged in that case.
    ///
    /// # Examples
    /// ```
    /// use relay_web::{Response, StatusCode};
    ///
    /// let mut resp = Response::new();
    /// resp.redirect("/login", StatusCode::Found).unwrap();
    /// assert_eq!(resp.headers().get("location"), Some("/login"));
    ///
    /// assert!(resp.redirect("/login", StatusCode::Ok).is_err());
    /// ```
    pub fn redirect(&mut self, target: &str, status: StatusCode) -> Result<&mut Self, Error> {
        if !status.is_redirection() {
            return Err(Error::InvalidRedirect(status));
        }

        self.status = status;
        self.headers.insert("Location", target);
        Ok(self)
    }

    /// Forces the connection to close after this response.
    ///
    /// Sets `Connection: close`.
    #[inline]
    pub fn close(&mut self) -> &mut Self {
        self.keep_alive = false;
        self.headers.insert("Connection", "close");
        self
    }
}

// Serializer
impl Response {
    /// Fills in the managed headers and writes the full message to `buffer`.
    ///
    /// ```text
    /// HTTP/1.1 <code> <reason> CRLF
    /// <Name>: <Value> CRLF        (insertion order)
    /// CRLF
    /// <content>
    /// ```
    pub(crate) fn serialize_into(&mut self, buffer: &mut Vec<u8>, server_name: &str, now: SystemTime) {
        self.prepare(server_name, now);

        buffer.extend_from_slice(b"HTTP/1.1 ");
        self.status.as_u16().write_to(buffer);
        buffer.push(b' ');
        buffer.extend_from_slice(self.status.reason().as_bytes());
        buffer.extend_from_slice(b"\r\n");

        for (name, value) in self.headers.iter() {
            write_field(buffer, name.as_bytes());
            buffer.extend_from_slice(b": ");
            write_field(buffer, value.as_bytes());
            buffer.extend_from_slice(b"\r\n");
        }

        buffer.extend_from_slice(b"\r\n");
        buffer.extend_from_slice(&self.content);
    }

    fn prepare(&mut self, server_name: &str, now: SystemTime) {
        let close = self.will_close();

        self.headers.insert("Server", server_name);
        self.headers.insert("Date", httpdate::fmt_http_date(now));
        self.header("Content-Length", self.content.len());

        // `close` is never downgraded
        match close {
            true => self.close(),
            false => self.header("Connection", "keep-alive"),
        };
    }
}

/// Appends a header name or value with any CR and LF bytes dropped.
#[inline]
fn write_field(buffer: &mut Vec<u8>, field: &[u8]) {
    match memchr::memchr2(b'\r', b'\n', field) {
        None => buffer.extend_from_slice(field),
        Some(_) => buffer.extend(field.iter().filter(|&&b| b != b'\r' && b != b'\n')),
    }
}

pub mod write {
    use std::{borrow::Cow, rc::Rc, sync::Arc};

    /// Writer handed to [body_with](super::Response::body_with).
    ///
    /// Accepts any [WriteBuffer] value and implements [std::io::Write] for
    /// `write!` formatting.
    #[derive(Debug)]
    pub struct BodyWriter<'a>(pub(crate) &'a mut Vec<u8>);

    impl BodyWriter<'_> {
        /// Appends a value to the response body.
        #[inline]
        pub fn write<T: WriteBuffer>(&mut self, value: T) {
            value.write_to(self.0);
        }
    }

    impl std::io::Write for BodyWriter<'_> {
        #[inline]
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.extend_from_slice(buf);
            Ok(buf.len())
        }

        #[inline]
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Values that can be written into response headers and bodies.
    ///
    /// Implemented for strings, byte slices, booleans, chars and integers.
    /// Floating-point numbers are not covered: format them to a string with
    /// the precision you need.
    ///
    /// # Example
    /// ```
    /// use relay_web::WriteBuffer;
    ///
    /// struct Celsius(i32);
    ///
    /// impl WriteBuffer for Celsius {
    ///     fn write_to(&self, buffer: &mut Vec<u8>) {
    ///         self.0.write_to(buffer);
    ///         buffer.extend_from_slice("°C".as_bytes());
    ///     }
    /// }
    /// ```
    pub trait WriteBuffer {
        fn write_to(&self, buffer: &mut Vec<u8>);
    }

    macro_rules! impl_write_buffer {
        (str => $($t:ty),*) => {
            $(impl WriteBuffer for $t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    let value: &str = self;
                    buffer.extend_from_slice(value.as_bytes());
                }
            })*
        };
        (bytes => $($t:ty),*) => {
            $(impl WriteBuffer for $t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    let value: &[u8] = self;
                    buffer.extend_from_slice(value);
                }
            })*
        };
        (display => $($t:ty),*) => {
            $(impl WriteBuffer for $t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    use std::io::Write;
                    // Writing into a Vec cannot fail
                    let _ = write!(buffer, "{}", self);
                }
            })*
        };
    }

    impl<T: WriteBuffer + ?Sized> WriteBuffer for &T {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            T::write_to(*self, buffer);
        }
    }

    impl_write_buffer! { str => str, String, Box<str>, Cow<'_, str>, Arc<str>, Rc<str> }
    impl_write_buffer! { bytes => [u8], Vec<u8>, Box<[u8]>, Cow<'_, [u8]>, Arc<[u8]>, Rc<[u8]> }
    impl_write_buffer! {
        display => u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, bool, char
    }

    impl<const N: usize> WriteBuffer for [u8; N] {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            buffer.extend_from_slice(self);
        }
    }
}

mod mime {
    use std::path::Path;

    #[rustfmt::skip]
    const MAGIC: &[(&[u8], &str)] = &[
        (b"\x89PNG\r\n\x1a\n", "image/png"),
        (b"\xFF\xD8\xFF", "image/jpeg"),
        (b"GIF87a", "image/gif"),
        (b"GIF89a", "image/gif"),
        (b"%PDF-", "application/pdf"),
        (b"PK\x03\x04", "application/zip"),
        (b"\x1F\x8B", "application/gzip"),
        (b"\x00asm", "application/wasm"),
        (b"wOFF", "font/woff"),
        (b"wOF2", "font/woff2"),
    ];

    #[rustfmt::skip]
    const EXTENSIONS: &[(&str, &str)] = &[
        ("html", "text/html"),
        ("htm", "text/html"),
        ("css", "text/css"),
        ("js", "application/javascript"),
        ("mjs", "application/javascript"),
        ("json", "application/json"),
        ("txt", "text/plain"),
        ("csv", "text/csv"),
        ("xml", "application/xml"),
        ("svg", "image/svg+xml"),
        ("png", "image/png"),
        ("jpg", "image/jpeg"),
        ("jpeg", "image/jpeg"),
        ("gif", "image/gif"),
        ("webp", "image/webp"),
        ("ico", "image/x-icon"),
        ("pdf", "application/pdf"),
        ("zip", "application/zip"),
        ("wasm", "application/wasm"),
        ("mp4", "video/mp4"),
        ("mp3", "audio/mpeg"),
        ("woff", "font/woff"),
        ("woff2", "font/woff2"),
    ];

    pub(super) fn detect(data: &[u8], path: &Path) -> &'static str {
        if let Some((_, mime)) = MAGIC.iter().find(|(magic, _)| data.starts_with(magic)) {
            return *mime;
        }
        if data.len() >= 12 && &data[..4] == b"RIFF" && &data[8..12] == b"WEBP" {
            return "image/webp";
        }

        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| {
                EXTENSIONS
                    .iter()
                    .find(|(known, _)| known.eq_ignore_ascii_case(ext))
            })
            .map(|(_, mime)| *mime)
            .unwrap_or("application/octet-stream")
    }
}

#[cfg(test)]
mod serialize_tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    // Sun, 06 Nov 1994 08:49:37 GMT
    fn fixed_time() -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(784111777)
    }

    fn serialize(resp: &mut Response) -> String {
        let mut buffer = Vec::new();
        resp.serialize_into(&mut buffer, "relay_web/test", fixed_time());
        String::from_utf8(buffer).unwrap()
    }

    #[test]
    fn default_keep_alive() {
        let mut resp = Response::new();
        resp.header("X-First", "1").text("Hello world!");

        assert_eq!(
            serialize(&mut resp),
            "HTTP/1.1 200 OK\r\n\
             X-First: 1\r\n\
             Content-Type: text/plain\r\n\
             Server: relay_web/test\r\n\
             Date: Sun, 06 Nov 1994 08:49:37 GMT\r\n\
             Content-Length: 12\r\n\
             Connection: keep-alive\r\n\
             \r\n\
             Hello world!"
        );
    }

    #[test]
    fn close_is_kept() {
        let mut resp = Response::new();
        resp.status(StatusCode::Found).header("location", "/api/update").close().body("Sample body");

        assert_eq!(
            serialize(&mut resp),
            "HTTP/1.1 302 Found\r\n\
             location: /api/update\r\n\
             Connection: close\r\n\
             Server: relay_web/test\r\n\
             Date: Sun, 06 Nov 1994 08:49:37 GMT\r\n\
             Content-Length: 11\r\n\
             \r\n\
             Sample body"
        );
        assert!(resp.will_close());
    }

    #[test]
    fn close_set_through_header() {
        let mut resp = Response::new();
        resp.header("connection", "Close");

        let out = serialize(&mut resp);
        assert!(out.contains("Connection: close\r\n"), "{out}");
        assert!(!out.contains("keep-alive"), "{out}");
        assert!(resp.will_close());
    }

    #[test]
    fn line_breaks_in_headers_are_dropped() {
        let mut resp = Response::new();
        resp.header("X-User", "ann\r\nSet-Cookie: session=stolen")
            .header("X-Bad\nName", "1")
            .redirect("/next\r\n\r\n<script>", StatusCode::Found)
            .unwrap();

        let out = serialize(&mut resp);
        assert!(out.contains("X-User: annSet-Cookie: session=stolen\r\n"), "{out}");
        assert!(out.contains("X-BadName: 1\r\n"), "{out}");
        assert!(out.contains("Location: /next<script>\r\n"), "{out}");
        assert!(!out.contains("\nSet-Cookie"), "{out}");
        assert_eq!(out.matches("\r\n\r\n").count(), 1, "{out}");
    }

    #[test]
    fn managed_headers_are_overwritten() {
        let mut resp = Response::new();
        resp.header("server", "spoofed")
            .header("content-length", 999)
            .header("DATE", "yesterday")
            .body(&b"abc"[..]);

        let out = serialize(&mut resp);
        assert!(out.contains("Server: relay_web/test\r\n"), "{out}");
        assert!(out.contains("Content-Length: 3\r\n"), "{out}");
        assert!(out.contains("Date: Sun, 06 Nov 1994 08:49:37 GMT\r\n"), "{out}");
        assert!(!out.contains("999"), "{out}");
        assert!(out.ends_with("\r\n\r\nabc"), "{out}");
    }

    #[test]
    fn binary_content_verbatim() {
        let mut resp = Response::new();
        resp.binary(vec![0, 159, 146, 150], Some("application/octet-stream"));

        let mut buffer = Vec::new();
        resp.serialize_into(&mut buffer, "relay_web/test", fixed_time());
        assert!(buffer.ends_with(b"\r\n\r\n\x00\x9f\x92\x96"));
        assert_eq!(resp.headers().get("content-length"), Some("4"));
    }
}
