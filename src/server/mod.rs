//! # OData Server
//!
//! [`ODataServer`] turns HTTP requests into adapter calls. It is built from
//! an immutable [`ServiceConfig`] and can be driven directly through
//! [`ODataServer::handle`], mounted as an axum router, or served on a TCP
//! listener.
//!
//! # Routes
//!
//! Relative to the service base path:
//!
//! - `GET /` - entity set catalog
//! - `GET /$metadata` - EDMX document
//! - `POST /$batch` - batch requests
//! - `GET /{collection}/$count` - count only
//! - `GET /{collection}('{id}')`, `GET /{collection}` - queries
//! - `POST /{collection}` - insert
//! - `PATCH /{collection}('{id}')` - update
//! - `DELETE /{collection}('{id}')` - remove
//! - `OPTIONS /*` - CORS preflight

mod endpoints;
mod facade;
mod service;

pub use facade::{DefaultErrorSink, ErrorEvent, ODataServer};
pub use service::{
    BatchTransport, ErrorFn, ServiceConfig, ServiceConfigBuilder, DEFAULT_MAX_BODY_BYTES,
};
