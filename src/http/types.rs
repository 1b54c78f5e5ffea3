#![allow(rustdoc::bare_urls)]

//! Core HTTP protocol types

use std::fmt;

// METHOD

/// HTTP request methods recognized by the parser.
///
/// The eight methods of [RFC 9110, Section 9](https://datatracker.ietf.org/doc/html/rfc9110#section-9)
/// plus `PATCH` ([RFC 5789](https://datatracker.ietf.org/doc/html/rfc5789)) parse successfully. `CONNECT` and `TRACE` are recognized but
/// not served: requests using them are answered with `501 Not Implemented`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Patch,
    Options,
    Connect,
    Trace,
}

impl Method {
    /// Looks up a method by its request line token, ignoring ASCII case.
    ///
    /// ```
    /// use relay_web::Method;
    ///
    /// assert_eq!(Method::from_token("GET"), Some(Method::Get));
    /// assert_eq!(Method::from_token("patch"), Some(Method::Patch));
    /// assert_eq!(Method::from_token("FOO"), None);
    /// ```
    pub fn from_token(token: &str) -> Option<Self> {
        const ALL: [Method; 9] = [
            Method::Get,
            Method::Head,
            Method::Post,
            Method::Put,
            Method::Delete,
            Method::Patch,
            Method::Options,
            Method::Connect,
            Method::Trace,
        ];

        ALL.into_iter()
            .find(|method| method.as_str().eq_ignore_ascii_case(token))
    }

    /// Canonical upper-case token.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Patch => "PATCH",
            Method::Options => "OPTIONS",
            Method::Connect => "CONNECT",
            Method::Trace => "TRACE",
        }
    }

    /// Whether the server dispatches requests with this method to routes.
    pub const fn is_supported(&self) -> bool {
        !matches!(self, Method::Connect | Method::Trace)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// STATUS_CODE

/// Class of a status code, taken from its first digit.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum StatusClass {
    Informational,
    Success,
    Redirection,
    ClientError,
    ServerError,
}

macro_rules! set_status_codes {
    ($( $name:ident = ($num:literal, $str:literal); )+) => {
        /// HTTP status codes
        ///
        /// See [RFC 9110, Section 15](https://datatracker.ietf.org/doc/html/rfc9110#section-15)
        /// for the meaning of each code.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u16)]
        pub enum StatusCode { $(
            #[doc = concat!(stringify!($num), " ", $str)]
            $name = $num,
        )+ }

        impl StatusCode {
            /// Reason phrase written after the code in the status line.
            pub const fn reason(&self) -> &'static str {
                match self { $(
                    StatusCode::$name => $str,
                )+ }
            }

            /// Looks up a known status code by number.
            pub const fn from_u16(code: u16) -> Option<Self> {
                match code {
                    $( $num => Some(StatusCode::$name), )+
                    _ => None,
                }
            }
        }
    }
}

set_status_codes! {
    Continue = (100, "Continue");
    SwitchingProtocols = (101, "Switching Protocols");

    Ok = (200, "OK");
    Created = (201, "Created");
    Accepted = (202, "Accepted");
    NonAuthoritativeInformation = (203, "Non-Authoritative Information");
    NoContent = (204, "No Content");
    ResetContent = (205, "Reset Content");
    PartialContent = (206, "Partial Content");

    MultipleChoices = (300, "Multiple Choices");
    MovedPermanently = (301, "Moved Permanently");
    Found = (302, "Found");
    SeeOther = (303, "See Other");
    NotModified = (304, "Not Modified");
    UseProxy = (305, "Use Proxy");
    TemporaryRedirect = (307, "Temporary Redirect");
    PermanentRedirect = (308, "Permanent Redirect");

    BadRequest = (400, "Bad Request");
    Unauthorized = (401, "Unauthorized");
    PaymentRequired = (402, "Payment Required");
    Forbidden = (403, "Forbidden");
    NotFound = (404, "Not Found");
    MethodNotAllowed = (405, "Method Not Allowed");
    NotAcceptable = (406, "Not Acceptable");
    ProxyAuthenticationRequired = (407, "Proxy Authentication Required");
    RequestTimeout = (408, "Request Timeout");
    Conflict = (409, "Conflict");
    Gone = (410, "Gone");
    LengthRequired = (411, "Length Required");
    PreconditionFailed = (412, "Precondition Failed");
    PayloadTooLarge = (413, "Payload Too Large");
    UriTooLong = (414, "URI Too Long");
    UnsupportedMediaType = (415, "Unsupported Media Type");
    RangeNotSatisfiable = (416, "Range Not Satisfiable");
    ExpectationFailed = (417, "Expectation Failed");
    ImaTeapot = (418, "I'm a teapot");
    UnprocessableEntity = (422, "Unprocessable Entity");
    TooManyRequests = (429, "Too Many Requests");
    RequestHeaderFieldsTooLarge = (431, "Request Header Fields Too Large");

    InternalServerError = (500, "Internal Server Error");
    NotImplemented = (501, "Not Implemented");
    BadGateway = (502, "Bad Gateway");
    ServiceUnavailable = (503, "Service Unavailable");
    GatewayTimeout = (504, "Gateway Timeout");
    HttpVersionNotSupported = (505, "HTTP Version Not Supported");
}

impl StatusCode {
    /// Numeric value of the code.
    pub const fn as_u16(&self) -> u16 {
        *self as u16
    }

    pub const fn class(&self) -> StatusClass {
        match self.as_u16() / 100 {
            1 => StatusClass::Informational,
            2 => StatusClass::Success,
            3 => StatusClass::Redirection,
            4 => StatusClass::ClientError,
            _ => StatusClass::ServerError,
        }
    }

    /// `true` for every `3xx` code.
    pub const fn is_redirection(&self) -> bool {
        matches!(self.class(), StatusClass::Redirection)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.as_u16(), self.reason())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_tokens() {
        #[rustfmt::skip]
        let cases = [
            ("GET", Some(Method::Get)),
            ("get", Some(Method::Get)),
            ("Head", Some(Method::Head)),
            ("POST", Some(Method::Post)),
            ("PUT", Some(Method::Put)),
            ("DELETE", Some(Method::Delete)),
            ("PATCH", Some(Method::Patch)),
            ("OPTIONS", Some(Method::Options)),
            ("CONNECT", Some(Method::Connect)),
            ("trace", Some(Method::Trace)),
            ("FOO", None),
            ("GETS", None),
            ("", None),
        ];

        for (token, expected) in cases {
            assert_eq!(Method::from_token(token), expected, "{token:?}");
        }
    }

    #[test]
    fn supported_methods() {
        assert!(Method::Get.is_supported());
        assert!(Method::Options.is_supported());
        assert!(!Method::Connect.is_supported());
        assert!(!Method::Trace.is_supported());
    }

    #[test]
    fn status_codes() {
        #[rustfmt::skip]
        let cases = [
            (StatusCode::Ok, 200, "OK", StatusClass::Success),
            (StatusCode::Found, 302, "Found", StatusClass::Redirection),
            (StatusCode::NotFound, 404, "Not Found", StatusClass::ClientError),
            (StatusCode::PayloadTooLarge, 413, "Payload Too Large", StatusClass::ClientError),
            (StatusCode::HttpVersionNotSupported, 505, "HTTP Version Not Supported", StatusClass::ServerError),
            (StatusCode::Continue, 100, "Continue", StatusClass::Informational),
        ];

        for (status, code, reason, class) in cases {
            assert_eq!(status.as_u16(), code);
            assert_eq!(status.reason(), reason);
            assert_eq!(status.class(), class);
            assert_eq!(StatusCode::from_u16(code), Some(status));
        }

        assert_eq!(StatusCode::from_u16(299), None);
        assert!(StatusCode::TemporaryRedirect.is_redirection());
        assert!(!StatusCode::Ok.is_redirection());
        assert_eq!(StatusCode::NotFound.to_string(), "404 Not Found");
    }
}
