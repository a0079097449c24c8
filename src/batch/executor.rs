//! Sub-request transports
//!
//! A batch part is executed as an ordinary HTTP request against the same
//! server. [`SubRequestExecutor`] is the seam: the server itself dispatches
//! in-process, and [`LoopbackClient`] dials the server's own listening port.

use std::net::SocketAddr;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::{header, HeaderMap, HeaderValue, Method, Request, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tracing::debug;

use crate::errors::{ODataError, ODataResult};

/// Request synthesized from one batch part
#[derive(Debug, Clone)]
pub struct SubRequest {
    pub method: Method,

    /// Absolute path plus query
    pub path: String,

    pub headers: HeaderMap,

    pub body: Option<String>,
}

/// Fully buffered sub-response
#[derive(Debug, Clone)]
pub struct SubResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Executes one sub-request to completion
#[async_trait]
pub trait SubRequestExecutor: Send + Sync {
    async fn execute(&self, request: SubRequest) -> ODataResult<SubResponse>;
}

fn transport(e: impl std::fmt::Display) -> ODataError {
    ODataError::Internal(format!("loopback transport: {}", e))
}

/// HTTP/1.1 client bound to the server's own listening address
#[derive(Debug, Clone, Copy)]
pub struct LoopbackClient {
    addr: SocketAddr,
}

impl LoopbackClient {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

#[async_trait]
impl SubRequestExecutor for LoopbackClient {
    async fn execute(&self, request: SubRequest) -> ODataResult<SubResponse> {
        let stream = TcpStream::connect(self.addr).await.map_err(transport)?;
        let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .map_err(transport)?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!(error = %e, "Loopback connection closed with error");
            }
        });

        let uri: Uri = request
            .path
            .parse()
            .map_err(|_| ODataError::BadRequest(format!("invalid sub-request path '{}'", request.path)))?;

        let mut outbound = Request::new(Full::new(Bytes::from(request.body.unwrap_or_default())));
        *outbound.method_mut() = request.method;
        *outbound.uri_mut() = uri;
        *outbound.headers_mut() = request.headers;
        if !outbound.headers().contains_key(header::HOST) {
            if let Ok(host) = HeaderValue::from_str(&self.addr.to_string()) {
                outbound.headers_mut().insert(header::HOST, host);
            }
        }

        let response = sender.send_request(outbound).await.map_err(transport)?;
        let (parts, body) = response.into_parts();
        let body = body.collect().await.map_err(transport)?.to_bytes();

        Ok(SubResponse {
            status: parts.status,
            headers: parts.headers,
            body,
        })
    }
}
