//! # Server Facade
//!
//! Owns the configuration, resolves the service URL, builds the route
//! table for its base path and funnels every failure into one error sink.

use std::any::Any;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, OnceLock, RwLock};

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{OriginalUri, Request};
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::FutureExt;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use crate::batch::{SubRequest, SubRequestExecutor, SubResponse};
use crate::context::RequestContext;
use crate::document;
use crate::errors::{ODataError, ODataResult};
use crate::router::Router;

use super::endpoints::Endpoint;
use super::service::{normalize_service_url, service_prefix, ServiceConfig};

pub(crate) const ODATA_VERSION: &str = "4.0";
pub(crate) const EXPOSE_HEADERS: &str = "OData-MaxVersion, OData-Version, X-CSRF-Token";

/// Emitted by the default error sink
#[derive(Debug, Clone)]
pub struct ErrorEvent {
    /// Request path and query
    pub target: String,
    pub status: u16,
    pub error: ODataError,
}

/// Route table bound to one service URL
pub(crate) struct Routing {
    pub(crate) service_url: String,
    pub(crate) router: Router<Endpoint>,
}

impl Routing {
    fn build(service_url: String) -> ODataResult<Self> {
        let mut router = Router::new(&service_prefix(&service_url));

        router.get("/", Endpoint::Collections)?;
        router.get("/$metadata", Endpoint::Metadata)?;
        router.post("/$batch", Endpoint::Batch)?;
        router.get("/:collection/$count", Endpoint::Count)?;
        router.get(r"/:collection\(:id\)", Endpoint::Entity)?;
        router.get("/:collection", Endpoint::Collection)?;
        router.post("/:collection", Endpoint::Insert)?;
        router.patch(r"/:collection\(:id\)", Endpoint::Update)?;
        router.delete(r"/:collection\(:id\)", Endpoint::Remove)?;
        router.options("/*", Endpoint::Preflight)?;

        Ok(Self {
            service_url,
            router,
        })
    }
}

struct ServerInner {
    config: ServiceConfig,
    routing: RwLock<Option<Arc<Routing>>>,
    loopback: OnceLock<SocketAddr>,
    errors: broadcast::Sender<ErrorEvent>,
}

/// OData v4 request handler
///
/// Cheap to clone; clones share configuration, routing and the error channel.
#[derive(Clone)]
pub struct ODataServer {
    inner: Arc<ServerInner>,
}

/// The built-in error rendering, handed to a custom error function
#[derive(Clone, Copy)]
pub struct DefaultErrorSink<'a> {
    server: &'a ODataServer,
}

impl DefaultErrorSink<'_> {
    pub fn respond(&self, ctx: &RequestContext, error: ODataError) -> Response {
        self.server.default_error(ctx, error)
    }
}

impl ODataServer {
    pub fn new(config: ServiceConfig) -> Self {
        let (errors, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(ServerInner {
                config,
                routing: RwLock::new(None),
                loopback: OnceLock::new(),
                errors,
            }),
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.inner.config
    }

    /// Service URL once configured or derived from a request
    pub fn service_url(&self) -> Option<String> {
        self.inner
            .routing
            .read()
            .ok()
            .and_then(|r| r.as_ref().map(|r| r.service_url.clone()))
            .or_else(|| self.inner.config.service_url.clone())
    }

    /// Every error rendered by the default sink
    pub fn subscribe_errors(&self) -> broadcast::Receiver<ErrorEvent> {
        self.inner.errors.subscribe()
    }

    /// Address batch sub-requests are sent to
    pub fn loopback_addr(&self) -> Option<SocketAddr> {
        self.inner.loopback.get().copied()
    }

    /// Record the listening address for loopback batch sub-requests
    ///
    /// Wildcard binds are reached through the matching localhost address.
    /// Only the first call has an effect.
    pub fn set_loopback_addr(&self, addr: SocketAddr) {
        let addr = match addr {
            SocketAddr::V4(v4) if v4.ip().is_unspecified() => {
                SocketAddr::from((Ipv4Addr::LOCALHOST, v4.port()))
            }
            SocketAddr::V6(v6) if v6.ip().is_unspecified() => {
                SocketAddr::from((Ipv6Addr::LOCALHOST, v6.port()))
            }
            other => other,
        };
        let _ = self.inner.loopback.set(addr);
    }

    /// axum router sending every request through [`ODataServer::handle`]
    pub fn into_router(self) -> axum::Router {
        axum::Router::new()
            .fallback(move |req: Request| {
                let server = self.clone();
                async move { server.handle(req).await }
            })
            .layer(TraceLayer::new_for_http())
    }

    /// Serve on a bound listener until the process stops
    pub async fn serve(self, listener: TcpListener) -> std::io::Result<()> {
        let addr = listener.local_addr()?;
        self.set_loopback_addr(addr);

        info!(%addr, "OData server listening");
        axum::serve(listener, self.into_router()).await
    }

    /// Handle one request
    ///
    /// When mounted under an axum prefix, the mount path is taken from
    /// [`OriginalUri`] and becomes part of a derived service URL. A panic in
    /// a hook or adapter is reported through the error sink as a 500.
    pub async fn handle(&self, req: Request) -> Response {
        let (parts, body) = req.into_parts();
        let original = parts
            .extensions
            .get::<OriginalUri>()
            .map(|o| o.0.clone())
            .unwrap_or_else(|| parts.uri.clone());
        let mount = mount_path(original.path(), parts.uri.path());

        let path = original.path().to_string();
        let mut ctx = RequestContext::new(parts.method, original, path, parts.headers);

        let result = AssertUnwindSafe(self.route(&mut ctx, body, &mount))
            .catch_unwind()
            .await;
        let response = match result {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => self.report(&ctx, e),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                let e = ODataError::Internal(format!("handler panicked: {}", message));
                self.report(&ctx, e)
            }
        };

        debug!(
            request_id = %ctx.request_id,
            method = %ctx.method,
            path = %ctx.path,
            status = response.status().as_u16(),
            elapsed_ms = ctx.elapsed_ms() as u64,
            "Request handled"
        );
        response
    }

    async fn route(
        &self,
        ctx: &mut RequestContext,
        body: Body,
        mount: &str,
    ) -> ODataResult<Response> {
        let routing = self.routing(ctx, mount)?;
        let matched = routing.router.dispatch(&ctx.method, &ctx.path)?;
        ctx.params = matched.params;

        let url = routing.service_url.as_str();
        match matched.handler {
            Endpoint::Collections => Ok(self.collections(url)),
            Endpoint::Metadata => Ok(self.metadata()),
            Endpoint::Batch => self.batch(ctx, body).await,
            Endpoint::Count => self.query(ctx, url, true).await,
            Endpoint::Entity | Endpoint::Collection => self.query(ctx, url, false).await,
            Endpoint::Insert => self.insert(ctx, url, body).await,
            Endpoint::Update => self.update(ctx, body).await,
            Endpoint::Remove => self.remove(ctx).await,
            Endpoint::Preflight => Ok(self.preflight()),
        }
    }

    /// Routing for the resolved service URL
    ///
    /// A derived URL is resolved from the first request and kept, so the
    /// table is built once per server.
    fn routing(&self, ctx: &RequestContext, mount: &str) -> ODataResult<Arc<Routing>> {
        let poisoned = || ODataError::Internal("routing lock poisoned".to_string());

        if let Some(routing) = self.inner.routing.read().map_err(|_| poisoned())?.as_ref() {
            return Ok(routing.clone());
        }

        let url = match &self.inner.config.service_url {
            Some(url) => url.clone(),
            None => derive_service_url(ctx, mount)?,
        };

        let mut slot = self.inner.routing.write().map_err(|_| poisoned())?;
        if let Some(existing) = slot.as_ref() {
            return Ok(existing.clone());
        }

        info!(service_url = %url, "Building route table");
        let routing = Arc::new(Routing::build(url)?);
        *slot = Some(routing.clone());
        Ok(routing)
    }

    // ==================
    // Binary codec
    // ==================

    /// base64 -> bytes for the collection's `Edm.Binary` properties
    pub fn encode_binary_fields(&self, collection: &str, doc: &mut Value) -> ODataResult<()> {
        let def = self.inner.config.model.entity_type_of(collection)?;
        document::encode_binary_fields(def, doc);
        Ok(())
    }

    /// bytes -> base64 for the collection's `Edm.Binary` properties
    pub fn decode_binary_fields(&self, collection: &str, docs: &mut [Value]) -> ODataResult<()> {
        let def = self.inner.config.model.entity_type_of(collection)?;
        document::decode_binary_fields(def, docs);
        Ok(())
    }

    // ==================
    // Headers and errors
    // ==================

    /// OData version plus the CORS headers shared by every response
    pub(crate) fn add_cors(&self, headers: &mut HeaderMap) {
        headers.insert(
            header::ACCESS_CONTROL_EXPOSE_HEADERS,
            HeaderValue::from_static(EXPOSE_HEADERS),
        );
        headers.insert("odata-version", HeaderValue::from_static(ODATA_VERSION));
        if let Some(origin) = &self.inner.config.cors {
            headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
        }
    }

    /// Single error sink: the custom error function when configured
    pub(crate) fn report(&self, ctx: &RequestContext, error: ODataError) -> Response {
        match &self.inner.config.error_fn {
            Some(f) => f(ctx, error, DefaultErrorSink { server: self }),
            None => self.default_error(ctx, error),
        }
    }

    fn default_error(&self, ctx: &RequestContext, error: ODataError) -> Response {
        let status = error.status_code();
        let target = ctx.target();

        error!(
            request_id = %ctx.request_id,
            path = %target,
            status = status.as_u16(),
            error = %error,
            "odata-error"
        );
        let _ = self.inner.errors.send(ErrorEvent {
            target: target.clone(),
            status: status.as_u16(),
            error: error.clone(),
        });

        let mut response = (status, Json(error.envelope(&target))).into_response();
        self.add_cors(response.headers_mut());
        if matches!(error, ODataError::PayloadTooLarge(_)) {
            response
                .headers_mut()
                .insert(header::CONNECTION, HeaderValue::from_static("close"));
        }
        response
    }
}

/// In-process transport for batch parts
#[async_trait]
impl SubRequestExecutor for ODataServer {
    async fn execute(&self, request: SubRequest) -> ODataResult<SubResponse> {
        let uri = request
            .path
            .parse()
            .map_err(|_| ODataError::BadRequest(format!("invalid sub-request path '{}'", request.path)))?;

        let mut req = Request::new(Body::from(request.body.unwrap_or_default()));
        *req.method_mut() = request.method;
        *req.uri_mut() = uri;
        *req.headers_mut() = request.headers;

        let (parts, body) = self.handle(req).await.into_parts();
        let body = axum::body::to_bytes(body, usize::MAX)
            .await
            .map_err(|e| ODataError::Internal(format!("sub-response body: {}", e)))?;

        Ok(SubResponse {
            status: parts.status,
            headers: parts.headers,
            body,
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Part of the original path in front of the path the handler saw
fn mount_path(original: &str, relative: &str) -> String {
    let mount = match original.strip_suffix(relative) {
        Some(mount) => mount,
        None if relative == "/" => original,
        None => "",
    };
    mount.trim_end_matches('/').to_string()
}

/// `scheme://host` of the request plus its mount path
fn derive_service_url(ctx: &RequestContext, mount: &str) -> ODataResult<String> {
    let host = ctx
        .header(header::HOST.as_str())
        .map(str::to_string)
        .or_else(|| ctx.uri.authority().map(|a| a.to_string()))
        .ok_or_else(|| {
            ODataError::ServiceUrl(
                "no service URL configured and the request carries no Host header".to_string(),
            )
        })?;

    let scheme = ctx
        .uri
        .scheme_str()
        .map(str::to_string)
        .or_else(|| ctx.header("x-forwarded-proto").map(|p| p.trim().to_string()))
        .unwrap_or_else(|| "http".to_string());

    normalize_service_url(format!("{}://{}{}", scheme, host, mount))
}
