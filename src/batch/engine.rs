//! Batch execution and reassembly
//!
//! Sibling parts at one nesting level run concurrently; their sections are
//! written back in source order. Each nested section gets a fresh boundary.

use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method};
use futures_util::future::{join_all, BoxFuture};
use futures_util::FutureExt;
use tracing::{debug, warn};

use crate::errors::{ODataError, ODataResult};

use super::executor::{SubRequest, SubRequestExecutor, SubResponse};
use super::parser::{BatchPart, HttpMessage, Multipart, PartBody};

const HTTP_VERSION: &str = "HTTP/1.1";

/// Hop-by-hop headers left out of reassembled sections
const HOP_BY_HOP: [&str; 3] = ["connection", "keep-alive", "transfer-encoding"];

/// `<prefix>_<10 hex digits>`
pub fn boundary_id(prefix: &str) -> String {
    let bytes: [u8; 5] = rand::random();
    let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
    format!("{}_{}", prefix, hex)
}

/// Rewrite every line ending to CRLF
pub fn to_crlf(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\n', "\r\n")
}

/// Executes a parsed batch against a [`SubRequestExecutor`]
pub struct BatchEngine<'a, E: SubRequestExecutor + ?Sized> {
    executor: &'a E,

    /// Batch request path up to and including its last `/`
    prefix: String,

    /// Copied onto every sub-request when the part carries none
    host: Option<HeaderValue>,

    /// Batch request cookie, propagated onto every sub-request
    cookie: Option<HeaderValue>,
}

impl<'a, E: SubRequestExecutor + ?Sized> BatchEngine<'a, E> {
    /// `batch_path` is the full path the batch was posted to
    pub fn new(executor: &'a E, batch_path: &str, headers: &HeaderMap) -> Self {
        let prefix = match batch_path.rfind('/') {
            Some(i) => batch_path[..=i].to_string(),
            None => "/".to_string(),
        };

        Self {
            executor,
            prefix,
            host: headers.get(header::HOST).cloned(),
            cookie: headers.get(header::COOKIE).cloned(),
        }
    }

    /// Run every part and render the response body under `response_id`
    ///
    /// Line endings are CRLF.
    pub async fn run(&self, batch: &Multipart, response_id: &str) -> String {
        to_crlf(&self.execute_section(batch, response_id).await)
    }

    fn execute_section<'s>(&'s self, section: &'s Multipart, id: &'s str) -> BoxFuture<'s, String> {
        async move {
            let rendered = join_all(section.parts.iter().map(|part| self.execute_part(part, id))).await;

            let mut body = rendered.join("\n");
            body.push_str(&format!("\n--{}--", id));
            body
        }
        .boxed()
    }

    async fn execute_part(&self, part: &BatchPart, id: &str) -> String {
        let mut lines = vec![format!("--{}", id)];

        match &part.body {
            PartBody::Multipart(nested) => {
                let changeset_id = boundary_id("changeset");
                let inner = self.execute_section(nested, &changeset_id).await;
                lines.push(format!(
                    "Content-Type: multipart/mixed; boundary={}",
                    changeset_id
                ));
                lines.push(String::new());
                lines.push(inner);
            }
            PartBody::Http(message) => {
                lines.extend(part.headers.iter().map(|(k, v)| format!("{}: {}", k, v)));
                lines.push(String::new());

                let response = match self.sub_request(message) {
                    Ok(request) => {
                        let target = request.path.clone();
                        debug!(method = %request.method, path = %target, "Batch sub-request");
                        match self.executor.execute(request).await {
                            Ok(response) => response,
                            Err(e) => {
                                warn!(path = %target, error = %e, "Batch sub-request failed");
                                error_response(&e, &target)
                            }
                        }
                    }
                    Err(e) => error_response(&e, &message.path),
                };
                lines.push(render_response(&message.version, &response));
            }
            PartBody::Json(_) | PartBody::Raw(_) => {
                lines.extend(part.headers.iter().map(|(k, v)| format!("{}: {}", k, v)));
                lines.push(String::new());

                let error = ODataError::BadRequest("Batch part is not an HTTP request".to_string());
                lines.push(render_response(HTTP_VERSION, &error_response(&error, &self.prefix)));
            }
        }

        lines.join("\n")
    }

    /// Resolve the part path against the batch prefix and build the request
    fn sub_request(&self, message: &HttpMessage) -> ODataResult<SubRequest> {
        let method = Method::from_bytes(message.method.as_bytes())
            .map_err(|_| ODataError::BadRequest(format!("invalid method '{}'", message.method)))?;

        let path = self.resolve_path(&message.path)?;

        let mut headers = HeaderMap::new();
        for (name, value) in message.headers.iter() {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| ODataError::BadRequest(format!("invalid header name '{}'", name)))?;
            if name == header::CONTENT_LENGTH {
                continue;
            }
            let value = HeaderValue::from_str(value)
                .map_err(|_| ODataError::BadRequest(format!("invalid header value for '{}'", name)))?;
            headers.append(name, value);
        }
        if let Some(cookie) = &self.cookie {
            headers.insert(header::COOKIE, cookie.clone());
        }
        if let Some(host) = &self.host {
            headers.entry(header::HOST).or_insert_with(|| host.clone());
        }

        Ok(SubRequest {
            method,
            path,
            headers,
            body: message.body.clone(),
        })
    }

    fn resolve_path(&self, path: &str) -> ODataResult<String> {
        if path.starts_with("http://") || path.starts_with("https://") {
            let uri: axum::http::Uri = path
                .parse()
                .map_err(|_| ODataError::BadRequest(format!("invalid sub-request URL '{}'", path)))?;
            return Ok(uri
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_else(|| "/".to_string()));
        }
        if path.starts_with('/') {
            return Ok(path.to_string());
        }
        Ok(format!("{}{}", self.prefix, path))
    }
}

/// Sub-response carrying the JSON error envelope
fn error_response(error: &ODataError, target: &str) -> SubResponse {
    let body = serde_json::to_vec(&error.envelope(target)).unwrap_or_default();
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));

    SubResponse {
        status: error.status_code(),
        headers,
        body: body.into(),
    }
}

fn render_response(version: &str, response: &SubResponse) -> String {
    let mut lines = vec![format!(
        "{} {} {}",
        version,
        response.status.as_u16(),
        response.status.canonical_reason().unwrap_or("")
    )];
    for (name, value) in response.headers.iter() {
        if HOP_BY_HOP.contains(&name.as_str()) {
            continue;
        }
        lines.push(format!(
            "{}: {}",
            name,
            String::from_utf8_lossy(value.as_bytes())
        ));
    }
    lines.push(String::new());
    lines.push(String::from_utf8_lossy(&response.body).into_owned());
    lines.join("\n")
}
