//! `multipart/form-data` body decoding.
//!
//! A body is split on the boundary taken from the `Content-Type` header:
//!
//! ```text
//! --boundary CRLF
//! Content-Disposition: form-data; name="field" CRLF
//! CRLF
//! value CRLF
//! --boundary CRLF
//! Content-Disposition: form-data; name="file"; filename="a.png" CRLF
//! Content-Type: image/png CRLF
//! CRLF
//! <bytes> CRLF
//! --boundary-- CRLF
//! ```

use crate::http::request::{parse_fields, split_head};
use memchr::memmem;
use std::collections::HashMap;

/// One part of a `multipart/form-data` body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartEntry {
    name: String,
    filename: Option<String>,
    content_disposition: String,
    content_type: Option<String>,
    content: Vec<u8>,
}

impl MultipartEntry {
    /// Value of the `name` parameter of `Content-Disposition`.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Value of the `filename` parameter, present for file fields.
    #[inline]
    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    /// Raw `Content-Disposition` header value of the part.
    #[inline]
    pub fn content_disposition(&self) -> &str {
        &self.content_disposition
    }

    #[inline]
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    #[inline]
    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// Content as text, if it is valid UTF-8.
    #[inline]
    pub fn text(&self) -> Option<&str> {
        simdutf8::basic::from_utf8(&self.content).ok()
    }
}

/// Reasons a multipart body is rejected. All of them answer `400 Bad Request`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MultipartError {
    #[error("content type has no boundary parameter")]
    MissingBoundary,
    #[error("part without Content-Disposition header")]
    MissingDisposition,
    #[error("Content-Disposition without name parameter")]
    MissingName,
    #[error("part headers are not valid UTF-8")]
    InvalidEncoding,
    #[error("body does not contain a boundary delimiter")]
    Unterminated,
}

/// Decodes a multipart body into a map from part name to entry.
///
/// A later part with an already seen name replaces the earlier one.
pub(crate) fn decode(
    content_type: &str,
    body: &[u8],
) -> Result<HashMap<String, MultipartEntry>, MultipartError> {
    let boundary = boundary(content_type).ok_or(MultipartError::MissingBoundary)?;
    let dash_boundary = format!("--{boundary}");
    let finder = memmem::Finder::new(dash_boundary.as_bytes());

    let mut entries = HashMap::new();
    let Some(first) = finder.find(body) else {
        return Err(MultipartError::Unterminated);
    };

    let mut cursor = first + dash_boundary.len();
    loop {
        match body.get(cursor..cursor + 2) {
            Some(b"--") => return Ok(entries),
            Some(b"\r\n") => cursor += 2,
            _ => return Err(MultipartError::Unterminated),
        }

        // The next delimiter must start a line of its own
        let mut search = cursor;
        let end = loop {
            let found = finder
                .find(&body[search..])
                .map(|pos| search + pos)
                .ok_or(MultipartError::Unterminated)?;

            if found >= 2 && &body[found - 2..found] == b"\r\n" {
                break found;
            }
            search = found + dash_boundary.len();
        };

        let entry = decode_part(&body[cursor..end])?;
        entries.insert(entry.name.clone(), entry);

        cursor = end + dash_boundary.len();
    }
}

fn decode_part(part: &[u8]) -> Result<MultipartEntry, MultipartError> {
    let (head, content) = split_head(part);
    let head = simdutf8::basic::from_utf8(head).map_err(|_| MultipartError::InvalidEncoding)?;
    let headers = parse_fields(head.split("\r\n"));

    let disposition = headers
        .get("Content-Disposition")
        .ok_or(MultipartError::MissingDisposition)?;
    let name = disposition_param(disposition, "name").ok_or(MultipartError::MissingName)?;

    let content = match content {
        Some(content) => content.strip_suffix(b"\r\n").unwrap_or(content),
        None => &[],
    };

    Ok(MultipartEntry {
        name: name.to_string(),
        filename: disposition_param(disposition, "filename").map(str::to_string),
        content_disposition: disposition.to_string(),
        content_type: headers.get("Content-Type").map(str::to_string),
        content: content.to_vec(),
    })
}

/// Extracts the `boundary` parameter of a `Content-Type` value.
pub(crate) fn boundary(content_type: &str) -> Option<&str> {
    header_param(content_type, "boundary").filter(|b| !b.is_empty())
}

#[inline]
fn disposition_param<'a>(disposition: &'a str, name: &str) -> Option<&'a str> {
    header_param(disposition, name)
}

// `value; key=value; key="quoted value"`
fn header_param<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    header.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case(name)
            .then(|| trim_quotes(value.trim()))
    })
}

#[inline]
fn trim_quotes(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}
