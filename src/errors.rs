use crate::{
    http::{multipart::MultipartError, types::Method},
    query, StatusCode,
};
use std::io;

/// Errors returned by the public API of the crate.
///
/// Protocol failures never surface here: they are answered on the wire
/// with the matching status code.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The address passed to [`Server::bind`](crate::Server::bind) could not be parsed
    /// or resolved.
    #[error("invalid listen address `{0}`")]
    InvalidAddress(String),

    /// A route for this method and path is already registered.
    #[error("route {method} {path} is already registered")]
    DuplicateRoute { method: Method, path: String },

    /// [`Response::redirect`](crate::Response::redirect) was given a status outside `3xx`.
    #[error("redirect requires a 3xx status, got {0}")]
    InvalidRedirect(StatusCode),

    #[error("json serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A specialized `Result` for this crate's API.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type handlers and middleware may return.
///
/// Any error converts into it with `?`. Returning `Err` answers the client
/// with `500 Internal Server Error` and closes the connection.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Reasons a raw buffer could not be turned into a [`Request`](crate::Request).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("unknown request method")]
    InvalidMethod,
    #[error("malformed request line")]
    MalformedRequestLine,
    #[error("unsupported HTTP version")]
    UnsupportedVersion,
    #[error("request head is not valid UTF-8")]
    InvalidEncoding,
    #[error("invalid url-encoded data: {0}")]
    Query(#[from] query::Error),
    #[error("invalid multipart body: {0}")]
    Multipart(#[from] MultipartError),
}

impl ParseError {
    /// Status code the client receives for this failure.
    pub const fn status(&self) -> StatusCode {
        match self {
            ParseError::UnsupportedVersion => StatusCode::HttpVersionNotSupported,
            _ => StatusCode::BadRequest,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_status() {
        #[rustfmt::skip]
        let cases = [
            (ParseError::InvalidMethod, 400),
            (ParseError::MalformedRequestLine, 400),
            (ParseError::UnsupportedVersion, 505),
            (ParseError::InvalidEncoding, 400),
            (ParseError::Query(query::Error::InvalidUtf8), 400),
            (ParseError::Multipart(MultipartError::MissingBoundary), 400),
        ];

        for (error, code) in cases {
            assert_eq!(error.status().as_u16(), code, "{error}");
        }
    }

    #[test]
    fn display() {
        let err = Error::DuplicateRoute {
            method: Method::Get,
            path: "/users".to_string(),
        };
        assert_eq!(err.to_string(), "route GET /users is already registered");

        let err = Error::InvalidRedirect(StatusCode::Ok);
        assert_eq!(err.to_string(), "redirect requires a 3xx status, got 200 OK");
    }
}
