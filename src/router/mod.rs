//! # Router
//!
//! Method + path-pattern routing. Routes for a method are tried in
//! registration order and the first pattern that accepts the path wins.
//! Every pattern is prefixed with the service base path when registered,
//! so a router is only valid for the prefix it was built with.

mod pattern;

use std::collections::HashMap;

use axum::http::Method;
use percent_encoding::percent_decode_str;

use crate::errors::{ODataError, ODataResult};

pub use pattern::PathPattern;

struct Route<H> {
    pattern: PathPattern,
    handler: H,
}

/// A successful route resolution
#[derive(Debug, Clone, PartialEq)]
pub struct RouteMatch<H> {
    pub handler: H,
    /// URL-decoded named captures
    pub params: HashMap<String, String>,
}

/// First-match router over handler values of type `H`
pub struct Router<H> {
    prefix: String,
    routes: HashMap<Method, Vec<Route<H>>>,
}

impl<H: Clone> Router<H> {
    /// Create a router for a base path; `/` means no prefix
    pub fn new(prefix: &str) -> Self {
        let prefix = if prefix == "/" {
            String::new()
        } else {
            prefix.trim_end_matches('/').to_string()
        };
        Self {
            prefix,
            routes: HashMap::new(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Register a handler for `method` and a pattern relative to the prefix
    pub fn register(&mut self, method: Method, pattern: &str, handler: H) -> ODataResult<()> {
        let pattern = PathPattern::compile(&format!("{}{}", self.prefix, pattern))?;
        self.routes
            .entry(method)
            .or_default()
            .push(Route { pattern, handler });
        Ok(())
    }

    pub fn get(&mut self, pattern: &str, handler: H) -> ODataResult<()> {
        self.register(Method::GET, pattern, handler)
    }

    pub fn post(&mut self, pattern: &str, handler: H) -> ODataResult<()> {
        self.register(Method::POST, pattern, handler)
    }

    pub fn patch(&mut self, pattern: &str, handler: H) -> ODataResult<()> {
        self.register(Method::PATCH, pattern, handler)
    }

    pub fn delete(&mut self, pattern: &str, handler: H) -> ODataResult<()> {
        self.register(Method::DELETE, pattern, handler)
    }

    pub fn options(&mut self, pattern: &str, handler: H) -> ODataResult<()> {
        self.register(Method::OPTIONS, pattern, handler)
    }

    /// Resolve a request path
    pub fn dispatch(&self, method: &Method, path: &str) -> ODataResult<RouteMatch<H>> {
        let routes = self.routes.get(method).ok_or(ODataError::NotFound)?;

        for route in routes {
            if let Some(captures) = route.pattern.captures(path) {
                let params = captures
                    .into_iter()
                    .map(|(key, raw)| (key.to_string(), decode(raw)))
                    .collect();
                return Ok(RouteMatch {
                    handler: route.handler.clone(),
                    params,
                });
            }
        }

        Err(ODataError::NotFound)
    }
}

fn decode(raw: &str) -> String {
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}
