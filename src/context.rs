//! Request Context
//!
//! Per-request state handed to hooks and adapters. Owned by a single
//! request's handling path and never shared across requests.

use std::collections::HashMap;
use std::time::Instant;

use axum::http::{HeaderMap, Method, Uri};
use uuid::Uuid;

/// Context carried through the handling pipeline
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Request ID for tracing
    pub request_id: Uuid,

    pub method: Method,

    /// URI as seen by the handler (possibly relative to a mount point)
    pub uri: Uri,

    /// Full request path including any mount prefix
    pub path: String,

    pub headers: HeaderMap,

    /// Decoded route parameters (`collection`, `id`)
    pub params: HashMap<String, String>,

    /// Start time for duration tracking
    started_at: Instant,
}

impl RequestContext {
    /// Create a new request context
    pub fn new(method: Method, uri: Uri, path: impl Into<String>, headers: HeaderMap) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            method,
            uri,
            path: path.into(),
            headers,
            params: HashMap::new(),
            started_at: Instant::now(),
        }
    }

    /// Context for calls made outside an HTTP request (tests, tooling)
    pub fn detached() -> Self {
        Self::new(Method::GET, Uri::from_static("/"), "/", HeaderMap::new())
    }

    pub fn with_params(mut self, params: HashMap<String, String>) -> Self {
        self.params = params;
        self
    }

    /// Route parameter by name
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Header value as text
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Path and query, used as the error `target`
    pub fn target(&self) -> String {
        match self.uri.query() {
            Some(q) => format!("{}?{}", self.path, q),
            None => self.path.clone(),
        }
    }

    /// Get elapsed time in milliseconds
    pub fn elapsed_ms(&self) -> u128 {
        self.started_at.elapsed().as_millis()
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::detached()
    }
}
