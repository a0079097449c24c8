//! HTTP Server Configuration
//!
//! File-level configuration for the bundled binary: bind address, CORS
//! origin, service URL, the model and optional seed documents for the
//! in-memory adapter.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::adapter::{Adapter, MemoryAdapter};
use crate::errors::ODataResult;
use crate::model::Model;
use crate::server::{ServiceConfig, DEFAULT_MAX_BODY_BYTES};

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpServerConfig {
    /// Host to bind to (default: "0.0.0.0")
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind to (default: 1337)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Value for `Access-Control-Allow-Origin`
    #[serde(default)]
    pub cors: Option<String>,

    /// Absolute service URL; derived from the first request when absent
    #[serde(default)]
    pub service_url: Option<String>,

    /// Request body cap in bytes (default: 1_000_000)
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    pub model: Model,

    /// Initial documents per entity set
    #[serde(default)]
    pub data: BTreeMap<String, Vec<Value>>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    1337
}

fn default_max_body_bytes() -> usize {
    DEFAULT_MAX_BODY_BYTES
}

impl HttpServerConfig {
    /// Config with defaults for everything but the model
    pub fn new(model: Model) -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors: None,
            service_url: None,
            max_body_bytes: default_max_body_bytes(),
            model,
            data: BTreeMap::new(),
        }
    }

    /// Create a new config with specified port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Get the socket address string
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// In-memory adapter holding the seed documents
    pub fn seeded_adapter(&self) -> MemoryAdapter {
        self.data
            .iter()
            .fold(MemoryAdapter::new(), |adapter, (collection, docs)| {
                adapter.with_documents(collection.clone(), docs.clone())
            })
    }

    /// Service configuration over the given adapter
    pub fn service_config(&self, adapter: Arc<dyn Adapter>) -> ODataResult<ServiceConfig> {
        let mut builder = ServiceConfig::builder()
            .model(self.model.clone())
            .shared_adapter(adapter)
            .max_body_bytes(self.max_body_bytes);

        if let Some(origin) = &self.cors {
            builder = builder.cors(origin.clone());
        }
        if let Some(url) = &self.service_url {
            builder = builder.service_url(url.clone());
        }

        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minimal() -> Value {
        json!({
            "model": {
                "namespace": "ns",
                "entityTypes": {"Widget": {"_id": {"type": "Edm.String", "key": true}}},
                "entitySets": {"Widgets": {"entityType": "ns.Widget"}}
            }
        })
    }

    #[test]
    fn test_default_config() {
        let config: HttpServerConfig = serde_json::from_value(minimal()).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 1337);
        assert_eq!(config.max_body_bytes, 1_000_000);
        assert!(config.cors.is_none());
        assert!(config.model.has_entity_set("Widgets"));
    }

    #[test]
    fn test_socket_addr() {
        let config = HttpServerConfig::new(Model::new("ns")).with_port(8080);
        assert_eq!(config.socket_addr(), "0.0.0.0:8080");
    }

    #[test]
    fn test_service_config_and_seed() {
        let mut raw = minimal();
        raw["cors"] = json!("http://localhost:5173");
        raw["service_url"] = json!("http://localhost:1337/odata");
        raw["data"] = json!({"Widgets": [{"_id": "1"}]});
        let config: HttpServerConfig = serde_json::from_value(raw).unwrap();

        let adapter = config.seeded_adapter();
        assert_eq!(adapter.documents("Widgets"), vec![json!({"_id": "1"})]);

        let service = config.service_config(Arc::new(adapter)).unwrap();
        assert_eq!(service.service_url(), Some("http://localhost:1337/odata"));
    }
}
