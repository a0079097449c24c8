//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, HeaderMap, Method, Request, StatusCode};
use axum::response::Response;
use odata_server::{Adapter, Hooks, MemoryAdapter, Model, ODataServer, PropertyDef, ServiceConfig};
use serde_json::{json, Value};

pub const HOST: &str = "localhost";

/// `Widgets` over `shop.Widget` with one binary property
pub fn model() -> Model {
    Model::new("shop")
        .entity_type(
            "Widget",
            [
                ("_id", PropertyDef::key("Edm.String")),
                ("name", PropertyDef::new("Edm.String")),
                ("price", PropertyDef::new("Edm.Int32")),
                ("blob", PropertyDef::new("Edm.Binary")),
            ],
        )
        .entity_set("Widgets", "shop.Widget")
}

pub fn widgets() -> Vec<Value> {
    vec![
        json!({"_id": "1", "name": "bolt", "price": 5}),
        json!({"_id": "2", "name": "nut", "price": 15}),
        json!({"_id": "3", "name": "gear", "price": 25}),
    ]
}

pub fn seeded() -> Arc<MemoryAdapter> {
    Arc::new(MemoryAdapter::new().with_documents("Widgets", widgets()))
}

pub fn server(adapter: Arc<dyn Adapter>, hooks: Hooks) -> ODataServer {
    let config = ServiceConfig::builder()
        .model(model())
        .shared_adapter(adapter)
        .hooks(hooks)
        .build()
        .unwrap();
    ODataServer::new(config)
}

pub fn request(method: Method, uri: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::HOST, HOST)
        .header(header::CONTENT_TYPE, "application/json")
        .body(body.into())
        .unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    request(Method::GET, uri, Body::empty())
}

pub async fn into_parts(response: Response) -> (StatusCode, HeaderMap, String) {
    let (parts, body) = response.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    (parts.status, parts.headers, String::from_utf8(bytes.to_vec()).unwrap())
}

pub async fn send(server: &ODataServer, req: Request<Body>) -> (StatusCode, HeaderMap, String) {
    into_parts(server.handle(req).await).await
}

pub async fn send_json(server: &ODataServer, req: Request<Body>) -> (StatusCode, HeaderMap, Value) {
    let (status, headers, body) = send(server, req).await;
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&body).unwrap()
    };
    (status, headers, json)
}

pub fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
