//! `multipart/mixed` parser
//!
//! Recursive descent over the batch body. Each level carries its own
//! boundary id; nested `multipart/mixed` parts (changesets) recurse with the
//! boundary they declare, without any depth limit.

use serde_json::Value;

use crate::errors::{ODataError, ODataResult};

/// Ordered header list; lookups are case-insensitive
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartHeaders(Vec<(String, String)>);

impl PartHeaders {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Media type without parameters, lowercased
    pub fn media_type(&self) -> Option<String> {
        self.get("content-type")
            .map(|ct| ct.split(';').next().unwrap_or("").trim().to_ascii_lowercase())
    }
}

impl FromIterator<(String, String)> for PartHeaders {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// An HTTP request embedded in an `application/http` part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpMessage {
    pub method: String,
    pub path: String,
    pub version: String,
    pub headers: PartHeaders,
    pub body: Option<String>,
}

/// Decoded body of one part
#[derive(Debug, Clone, PartialEq)]
pub enum PartBody {
    /// `application/http` with binary transfer encoding
    Http(HttpMessage),
    /// Nested `multipart/mixed` section (changeset)
    Multipart(Multipart),
    /// `application/json`
    Json(Value),
    /// Anything else, kept verbatim
    Raw(Option<String>),
}

/// One part of a multipart body
#[derive(Debug, Clone, PartialEq)]
pub struct BatchPart {
    /// Boundary id of the enclosing section
    pub id: String,
    pub headers: PartHeaders,
    pub body: PartBody,
}

/// A parsed multipart section
#[derive(Debug, Clone, PartialEq)]
pub struct Multipart {
    pub boundary: String,
    pub parts: Vec<BatchPart>,
    /// Text after the closing delimiter
    pub footer: Option<String>,
}

fn bad_request(msg: impl Into<String>) -> ODataError {
    ODataError::BadRequest(msg.into())
}

/// Extract `boundary=` from a Content-Type header value
pub fn boundary_from_content_type(content_type: Option<&str>) -> ODataResult<String> {
    let content_type = content_type.ok_or_else(|| bad_request("missing Content-Type"))?;

    let boundary = content_type
        .split(';')
        .map(str::trim)
        .find_map(|param| {
            let (key, value) = param.split_once('=')?;
            key.trim()
                .eq_ignore_ascii_case("boundary")
                .then(|| value.trim().trim_matches('"').to_string())
        })
        .filter(|b| !b.is_empty())
        .ok_or_else(|| bad_request("Content-Type has no boundary parameter"))?;

    Ok(boundary)
}

/// Parse a full batch body
///
/// Line endings are normalized to `\n` before parsing.
pub fn parse_batch(body: &str, boundary: &str) -> ODataResult<Multipart> {
    let normalized = body.replace("\r\n", "\n");
    parse_multipart(&normalized, boundary)
}

fn parse_multipart(body: &str, boundary: &str) -> ODataResult<Multipart> {
    let delimiter = format!("--{}", boundary);
    let terminator = format!("--{}--", boundary);

    // Delimiters only count as whole lines; lines before the first one are preamble
    let mut segments: Vec<Vec<&str>> = Vec::new();
    let mut trailer: Option<Vec<&str>> = None;
    for line in body.split('\n') {
        if let Some(rest) = trailer.as_mut() {
            rest.push(line);
            continue;
        }
        let marker = line.trim_end();
        if marker == terminator {
            trailer = Some(Vec::new());
        } else if marker == delimiter {
            segments.push(Vec::new());
        } else if let Some(segment) = segments.last_mut() {
            segment.push(line);
        }
    }

    let footer = trailer
        .map(|lines| lines.join("\n").trim().to_string())
        .filter(|footer| !footer.is_empty());

    let parts = segments
        .iter()
        .map(|lines| parse_part(&lines.join("\n"), boundary))
        .collect::<ODataResult<Vec<_>>>()?;

    if parts.is_empty() {
        return Err(bad_request(format!(
            "body cannot be split on boundary '{}'",
            boundary
        )));
    }

    Ok(Multipart {
        boundary: boundary.to_string(),
        parts,
        footer,
    })
}

fn parse_part(segment: &str, boundary: &str) -> ODataResult<BatchPart> {
    let (headers, body) = split_message(segment);
    let headers = parse_headers(headers.lines())?;

    let body = match headers.media_type().as_deref() {
        Some("application/http")
            if headers
                .get("content-transfer-encoding")
                .map(|e| e.trim().eq_ignore_ascii_case("binary"))
                .unwrap_or(false) =>
        {
            let inner = body.ok_or_else(|| bad_request("application/http part has no body"))?;
            PartBody::Http(parse_http_message(inner)?)
        }
        Some("multipart/mixed") => {
            let nested = boundary_from_content_type(headers.get("content-type"))?;
            PartBody::Multipart(parse_multipart(body.unwrap_or(""), &nested)?)
        }
        Some("application/json") => match body {
            Some(text) => PartBody::Json(
                serde_json::from_str(text)
                    .map_err(|e| bad_request(format!("invalid JSON part: {}", e)))?,
            ),
            None => PartBody::Raw(None),
        },
        _ => PartBody::Raw(body.map(str::to_string)),
    };

    Ok(BatchPart {
        id: boundary.to_string(),
        headers,
        body,
    })
}

/// Split on the first blank line; both halves trimmed, empty body is `None`
fn split_message(text: &str) -> (&str, Option<&str>) {
    let text = text.trim();
    match text.find("\n\n") {
        Some(index) => {
            let body = text[index..].trim();
            (text[..index].trim(), (!body.is_empty()).then_some(body))
        }
        None => (text, None),
    }
}

fn parse_headers<'a>(lines: impl Iterator<Item = &'a str>) -> ODataResult<PartHeaders> {
    lines
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| bad_request(format!("malformed header line '{}'", line)))?;
            let name = name.trim();
            if name.is_empty() {
                return Err(bad_request(format!("malformed header line '{}'", line)));
            }
            Ok((name.to_string(), value.trim().to_string()))
        })
        .collect()
}

fn parse_http_message(text: &str) -> ODataResult<HttpMessage> {
    let (head, body) = split_message(text);
    let mut lines = head.lines();

    let request_line = lines
        .next()
        .map(str::trim)
        .ok_or_else(|| bad_request("missing request line"))?;
    let mut words = request_line.splitn(3, ' ');
    let (method, path, version) = match (words.next(), words.next(), words.next()) {
        (Some(m), Some(p), Some(v))
            if !m.is_empty() && m.chars().all(|c| c.is_ascii_uppercase()) && !p.is_empty() =>
        {
            (m.to_string(), p.to_string(), v.trim().to_string())
        }
        _ => {
            return Err(bad_request(format!(
                "malformed request line '{}'",
                request_line
            )))
        }
    };

    Ok(HttpMessage {
        method,
        path,
        version,
        headers: parse_headers(lines)?,
        body: body.map(str::to_string),
    })
}
