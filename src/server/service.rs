//! Service configuration
//!
//! Everything the server needs is assembled once through
//! [`ServiceConfig::builder`] and handed to [`ODataServer::new`]. Nothing
//! can be reconfigured after construction.
//!
//! [`ODataServer::new`]: super::ODataServer::new

use std::sync::Arc;

use axum::http::{HeaderValue, Uri};
use axum::response::Response;
use tracing::warn;

use crate::adapter::{Adapter, FnAdapter};
use crate::context::RequestContext;
use crate::errors::{ODataError, ODataResult};
use crate::hooks::Hooks;
use crate::model::{EdmxWriter, MetadataWriter, Model};

use super::facade::DefaultErrorSink;

/// Default request body cap in bytes
pub const DEFAULT_MAX_BODY_BYTES: usize = 1_000_000;

/// Custom error rendering
///
/// Receives the failing request, the error and the built-in sink, and
/// owns the response entirely.
pub type ErrorFn =
    Arc<dyn Fn(&RequestContext, ODataError, DefaultErrorSink<'_>) -> Response + Send + Sync>;

/// How `$batch` parts reach the server
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BatchTransport {
    /// HTTP over the server's own listening port. Falls back to
    /// [`BatchTransport::InProcess`] when the server is not serving over TCP.
    #[default]
    Loopback,

    /// Direct dispatch through the request handler
    InProcess,
}

/// Immutable server configuration
#[derive(Clone)]
pub struct ServiceConfig {
    pub(crate) model: Arc<Model>,
    pub(crate) adapter: Arc<dyn Adapter>,
    pub(crate) hooks: Hooks,
    pub(crate) cors: Option<HeaderValue>,
    pub(crate) service_url: Option<String>,
    pub(crate) error_fn: Option<ErrorFn>,
    pub(crate) metadata: Arc<dyn MetadataWriter>,
    pub(crate) max_body_bytes: usize,
    pub(crate) batch_transport: BatchTransport,
}

impl ServiceConfig {
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder::default()
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn service_url(&self) -> Option<&str> {
        self.service_url.as_deref()
    }

    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }

    pub fn batch_transport(&self) -> BatchTransport {
        self.batch_transport
    }
}

/// Builder for [`ServiceConfig`]
#[derive(Default)]
pub struct ServiceConfigBuilder {
    model: Option<Model>,
    adapter: Option<Arc<dyn Adapter>>,
    hooks: Hooks,
    cors: Option<String>,
    service_url: Option<String>,
    error_fn: Option<ErrorFn>,
    metadata: Option<Arc<dyn MetadataWriter>>,
    max_body_bytes: Option<usize>,
    batch_transport: BatchTransport,
}

impl ServiceConfigBuilder {
    pub fn model(mut self, model: Model) -> Self {
        self.model = Some(model);
        self
    }

    pub fn adapter(self, adapter: impl Adapter + 'static) -> Self {
        self.shared_adapter(Arc::new(adapter))
    }

    /// Use an adapter the host keeps a handle to
    pub fn shared_adapter(mut self, adapter: Arc<dyn Adapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    /// Install operations registered one by one as the adapter
    pub fn legacy_adapter(self, adapter: FnAdapter) -> Self {
        warn!("DEPRECATED: adapter assembled from bare functions; implement the Adapter trait instead");
        self.adapter(adapter)
    }

    pub fn hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Origin written to `Access-Control-Allow-Origin`
    pub fn cors(mut self, origin: impl Into<String>) -> Self {
        self.cors = Some(origin.into());
        self
    }

    /// Absolute service URL; derived from the first request when unset
    pub fn service_url(mut self, url: impl Into<String>) -> Self {
        self.service_url = Some(url.into());
        self
    }

    pub fn error_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&RequestContext, ODataError, DefaultErrorSink<'_>) -> Response + Send + Sync + 'static,
    {
        self.error_fn = Some(Arc::new(f));
        self
    }

    pub fn metadata_writer(mut self, writer: impl MetadataWriter + 'static) -> Self {
        self.metadata = Some(Arc::new(writer));
        self
    }

    pub fn max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = Some(limit);
        self
    }

    pub fn batch_transport(mut self, transport: BatchTransport) -> Self {
        self.batch_transport = transport;
        self
    }

    pub fn build(self) -> ODataResult<ServiceConfig> {
        let model = self
            .model
            .ok_or_else(|| ODataError::Internal("a model is required".to_string()))?;
        model.validate()?;

        let adapter = self
            .adapter
            .ok_or_else(|| ODataError::Internal("an adapter is required".to_string()))?;

        let cors = self
            .cors
            .map(|origin| {
                HeaderValue::from_str(&origin)
                    .map_err(|_| ODataError::Internal(format!("invalid CORS origin '{}'", origin)))
            })
            .transpose()?;

        let service_url = self.service_url.map(normalize_service_url).transpose()?;

        Ok(ServiceConfig {
            model: Arc::new(model),
            adapter,
            hooks: self.hooks,
            cors,
            service_url,
            error_fn: self.error_fn,
            metadata: self.metadata.unwrap_or_else(|| Arc::new(EdmxWriter)),
            max_body_bytes: self.max_body_bytes.unwrap_or(DEFAULT_MAX_BODY_BYTES),
            batch_transport: self.batch_transport,
        })
    }
}

/// Require scheme and host; drop any trailing `/`
pub(crate) fn normalize_service_url(url: String) -> ODataResult<String> {
    let uri: Uri = url
        .parse()
        .map_err(|e| ODataError::ServiceUrl(format!("'{}': {}", url, e)))?;
    if uri.scheme().is_none() || uri.authority().is_none() {
        return Err(ODataError::ServiceUrl(format!(
            "'{}' is not an absolute URL",
            url
        )));
    }
    Ok(url.trim_end_matches('/').to_string())
}

/// Path component of a service URL, `/` when empty
pub(crate) fn service_prefix(url: &str) -> String {
    url.parse::<Uri>()
        .map(|uri| uri.path().to_string())
        .ok()
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| "/".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MemoryAdapter;
    use crate::model::PropertyDef;

    fn model() -> Model {
        Model::new("ns")
            .entity_type("Widget", [("_id", PropertyDef::key("Edm.String"))])
            .entity_set("Widgets", "ns.Widget")
    }

    #[test]
    fn test_build_defaults() {
        let config = ServiceConfig::builder()
            .model(model())
            .adapter(MemoryAdapter::new())
            .build()
            .unwrap();

        assert_eq!(config.max_body_bytes(), DEFAULT_MAX_BODY_BYTES);
        assert_eq!(config.batch_transport(), BatchTransport::Loopback);
        assert!(config.service_url().is_none());
        assert!(config.model().has_entity_set("Widgets"));
    }

    #[test]
    fn test_missing_parts_rejected() {
        assert!(ServiceConfig::builder().model(model()).build().is_err());
        assert!(ServiceConfig::builder()
            .adapter(MemoryAdapter::new())
            .build()
            .is_err());

        let dangling = Model::new("ns").entity_set("Widgets", "ns.Missing");
        assert!(ServiceConfig::builder()
            .model(dangling)
            .adapter(MemoryAdapter::new())
            .build()
            .is_err());
    }

    #[test]
    fn test_service_url_normalized() {
        let config = ServiceConfig::builder()
            .model(model())
            .adapter(MemoryAdapter::new())
            .service_url("http://localhost:1337/odata/")
            .build()
            .unwrap();
        assert_eq!(config.service_url(), Some("http://localhost:1337/odata"));

        assert!(matches!(
            normalize_service_url("/odata".to_string()),
            Err(ODataError::ServiceUrl(_))
        ));
    }

    #[test]
    fn test_service_prefix() {
        assert_eq!(service_prefix("http://localhost:1337/odata"), "/odata");
        assert_eq!(service_prefix("http://localhost:1337"), "/");
    }
}
