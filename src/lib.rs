//! odata-server - OData v4 protocol engine over pluggable storage
//!
//! The server turns plain HTTP requests into CRUD operations against an
//! [`Adapter`]: it routes requests, parses query options, runs lifecycle
//! hooks, executes `$batch` requests and shapes protocol-compliant
//! responses. Storage is entirely the adapter's business.
//!
//! ```no_run
//! use odata_server::{MemoryAdapter, Model, ODataServer, PropertyDef, ServiceConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let model = Model::new("shop")
//!     .entity_type("Widget", [("_id", PropertyDef::key("Edm.String"))])
//!     .entity_set("Widgets", "shop.Widget");
//!
//! let config = ServiceConfig::builder()
//!     .model(model)
//!     .adapter(MemoryAdapter::new())
//!     .build()?;
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:1337").await?;
//! ODataServer::new(config).serve(listener).await?;
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod batch;
pub mod cli;
pub mod config;
pub mod context;
pub mod document;
pub mod errors;
pub mod hooks;
pub mod model;
pub mod query;
pub mod router;
pub mod server;

pub use adapter::{Adapter, FnAdapter, MemoryAdapter, QueryResult};
pub use config::HttpServerConfig;
pub use context::RequestContext;
pub use errors::{ODataError, ODataResult};
pub use hooks::{Hook, Hooks, UpdateCommand};
pub use model::{EdmxWriter, MetadataWriter, Model, PropertyDef};
pub use query::{FilterExpr, QueryOptions};
pub use server::{BatchTransport, ErrorEvent, ODataServer, ServiceConfig};
