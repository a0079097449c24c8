//! `$batch` end-to-end tests
//!
//! Tests:
//! - Malformed batches answer 400 with an empty body
//! - Sections come back in request order whatever the completion order
//! - Changesets nest under a fresh boundary
//! - One failing part never fails its siblings, even when it panics
//! - Loopback transport over the server's own TCP port

mod common;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use odata_server::batch::{LoopbackClient, SubRequest, SubRequestExecutor};
use odata_server::{
    Adapter, Hooks, MemoryAdapter, ODataResult, QueryOptions, QueryResult, RequestContext,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use common::*;

fn batch_request(boundary: &str, body: &str) -> axum::http::Request<axum::body::Body> {
    let mut req = request(Method::POST, "/$batch", body.to_string());
    req.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&format!("multipart/mixed; boundary={}", boundary)).unwrap(),
    );
    req
}

fn http_part(boundary: &str, request_line: &str, body: Option<&Value>) -> String {
    match body {
        Some(json) => format!(
            "--{}\r\nContent-Type: application/http\r\nContent-Transfer-Encoding: binary\r\n\r\n{}\r\nContent-Type: application/json\r\n\r\n{}\r\n",
            boundary, request_line, json
        ),
        None => format!(
            "--{}\r\nContent-Type: application/http\r\nContent-Transfer-Encoding: binary\r\n\r\n{}\r\n\r\n",
            boundary, request_line
        ),
    }
}

fn changeset(boundary: &str, changeset: &str, parts: &[String]) -> String {
    format!(
        "--{}\r\nContent-Type: multipart/mixed; boundary={}\r\n\r\n{}--{}--\r\n",
        boundary,
        changeset,
        parts.concat(),
        changeset
    )
}

fn close(boundary: &str) -> String {
    format!("--{}--\r\n", boundary)
}

/// Response boundary taken from the Content-Type header
fn response_boundary(headers: &HeaderMap) -> String {
    header_str(headers, "content-type")
        .and_then(|ct| ct.strip_prefix("multipart/mixed; boundary="))
        .unwrap()
        .to_string()
}

fn position(body: &str, needle: &str) -> usize {
    body.find(needle)
        .unwrap_or_else(|| panic!("'{}' not in batch response:\n{}", needle, body))
}

/// Sleeps longer for lower ids and records completion order
#[derive(Default)]
struct Staggered {
    inner: MemoryAdapter,
    finished: Mutex<Vec<String>>,
}

#[async_trait]
impl Adapter for Staggered {
    async fn query(
        &self,
        collection: &str,
        query: &QueryOptions,
        req: &RequestContext,
    ) -> ODataResult<QueryResult> {
        let id = query
            .filter
            .entity_id()
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let delay = match id.as_str() {
            "1" => 120,
            "2" => 60,
            _ => 0,
        };
        tokio::time::sleep(Duration::from_millis(delay)).await;
        self.finished.lock().unwrap().push(id);
        self.inner.query(collection, query, req).await
    }

    async fn insert(&self, collection: &str, doc: Value, req: &RequestContext) -> ODataResult<Value> {
        self.inner.insert(collection, doc, req).await
    }

    async fn update(
        &self,
        collection: &str,
        filter: &Value,
        update: &Value,
        req: &RequestContext,
    ) -> ODataResult<()> {
        self.inner.update(collection, filter, update, req).await
    }

    async fn remove(&self, collection: &str, filter: &Value, req: &RequestContext) -> ODataResult<()> {
        self.inner.remove(collection, filter, req).await
    }
}

// =============================================================================
// Framing errors
// =============================================================================

/// A missing boundary or unsplittable body is a bare 400
#[tokio::test]
async fn test_malformed_batch_is_empty_400() {
    let server = server(seeded(), Hooks::new());

    let mut req = request(Method::POST, "/$batch", "--x\r\n");
    req.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("multipart/mixed"),
    );
    let (status, headers, body) = send(&server, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.is_empty());
    assert_eq!(header_str(&headers, "connection"), Some("close"));
    assert_eq!(header_str(&headers, "odata-version"), Some("4.0"));

    let (status, _, body) = send(&server, batch_request("batch_1", "no delimiters here")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.is_empty());

    let broken = "--batch_1\r\nContent-Type: application/http\r\nContent-Transfer-Encoding: binary\r\n\r\nget lowercase HTTP/1.1\r\n\r\n--batch_1--";
    let (status, _, body) = send(&server, batch_request("batch_1", broken)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.is_empty());
}

// =============================================================================
// Ordering and nesting
// =============================================================================

/// Parts run concurrently but sections keep request order
#[tokio::test]
async fn test_sections_keep_request_order() {
    let adapter = Arc::new(Staggered {
        inner: MemoryAdapter::new().with_documents("Widgets", widgets()),
        finished: Mutex::new(Vec::new()),
    });
    let server = server(adapter.clone(), Hooks::new());

    let body = [
        http_part("batch_1", "GET Widgets('1') HTTP/1.1", None),
        http_part("batch_1", "GET Widgets('2') HTTP/1.1", None),
        http_part("batch_1", "GET Widgets('3') HTTP/1.1", None),
        close("batch_1"),
    ]
    .concat();

    let (status, headers, body) = send(&server, batch_request("batch_1", &body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(header_str(&headers, "odata-version"), Some("4.0"));
    assert_eq!(
        header_str(&headers, "access-control-expose-headers"),
        Some("Content-Type, OData-Version")
    );

    assert_eq!(*adapter.finished.lock().unwrap(), ["3", "2", "1"]);

    let first = position(&body, r#""name":"bolt""#);
    let second = position(&body, r#""name":"nut""#);
    let third = position(&body, r#""name":"gear""#);
    assert!(first < second && second < third);

    let id = response_boundary(&headers);
    assert!(id.starts_with("batchresponse_"));
    assert_eq!(body.matches(&format!("--{}\r\n", id)).count(), 3);
    assert!(body.ends_with(&format!("--{}--", id)));
    assert!(!body.replace("\r\n", "").contains('\n'));
}

/// A changeset is answered as a nested multipart under its own boundary
#[tokio::test]
async fn test_changeset_nests_under_fresh_boundary() {
    let adapter = seeded();
    let server = server(adapter.clone(), Hooks::new());

    let inner = [
        http_part(
            "changeset_a",
            "POST Widgets HTTP/1.1",
            Some(&json!({"_id": "c1", "name": "clip"})),
        ),
        http_part("changeset_a", "DELETE Widgets('2') HTTP/1.1", None),
    ];
    let body = [
        http_part("batch_1", "GET Widgets('1') HTTP/1.1", None),
        changeset("batch_1", "changeset_a", &inner),
        close("batch_1"),
    ]
    .concat();

    let (status, headers, body) = send(&server, batch_request("batch_1", &body)).await;
    assert_eq!(status, StatusCode::OK);

    let outer = response_boundary(&headers);
    let nested = body
        .split("Content-Type: multipart/mixed; boundary=")
        .nth(1)
        .and_then(|rest| rest.split("\r\n").next())
        .unwrap()
        .to_string();
    assert!(nested.starts_with("changeset_"));
    assert_ne!(nested, "changeset_a");

    assert!(position(&body, "HTTP/1.1 200 OK") < position(&body, "HTTP/1.1 201 Created"));
    assert!(position(&body, "HTTP/1.1 201 Created") < position(&body, "HTTP/1.1 204 No Content"));
    assert!(position(&body, &format!("--{}--", nested)) < position(&body, &format!("--{}--", outer)));
    assert_eq!(body.matches(&format!("--{}\r\n", nested)).count(), 2);

    let ids: Vec<Value> = adapter
        .documents("Widgets")
        .iter()
        .map(|d| d["_id"].clone())
        .collect();
    assert_eq!(ids, [json!("1"), json!("3"), json!("c1")]);
}

/// Failing parts become error sections next to successful ones
#[tokio::test]
async fn test_part_failures_are_isolated() {
    let server = server(seeded(), Hooks::new());

    let body = [
        http_part("batch_1", "GET Gadgets HTTP/1.1", None),
        "--batch_1\r\nContent-Type: application/json\r\n\r\n{\"not\":\"http\"}\r\n".to_string(),
        http_part("batch_1", "GET Widgets/$count HTTP/1.1", None),
        close("batch_1"),
    ]
    .concat();

    let (status, _, body) = send(&server, batch_request("batch_1", &body)).await;
    assert_eq!(status, StatusCode::OK);

    let not_found = position(&body, "HTTP/1.1 404 Not Found");
    let bad_request = position(&body, "HTTP/1.1 400 Bad Request");
    let counted = position(&body, "HTTP/1.1 200 OK");
    assert!(not_found < bad_request && bad_request < counted);
    assert!(body.contains("Entity set not Found: Gadgets"));
    assert!(body.contains("\r\n\r\n3\r\n"));
}

/// A part whose hook panics becomes a 500 section between healthy ones
#[tokio::test]
async fn test_panicking_part_is_isolated() {
    let hooks = Hooks::new().before_query(
        |_: &str, query: &mut QueryOptions, _: &RequestContext| -> ODataResult<()> {
            if query.filter.entity_id() == Some(&json!("2")) {
                panic!("host bug");
            }
            Ok(())
        },
    );
    let server = server(seeded(), hooks);

    let body = [
        http_part("batch_1", "GET Widgets('1') HTTP/1.1", None),
        http_part("batch_1", "GET Widgets('2') HTTP/1.1", None),
        http_part("batch_1", "GET Widgets('3') HTTP/1.1", None),
        close("batch_1"),
    ]
    .concat();

    let (status, _, body) = send(&server, batch_request("batch_1", &body)).await;
    assert_eq!(status, StatusCode::OK);

    let first = position(&body, r#""name":"bolt""#);
    let failed = position(&body, "HTTP/1.1 500 Internal Server Error");
    let third = position(&body, r#""name":"gear""#);
    assert!(first < failed && failed < third);
    assert_eq!(body.matches("HTTP/1.1 200 OK").count(), 2);
    assert!(body.contains("host bug"));
}

// =============================================================================
// Loopback transport
// =============================================================================

/// Served over TCP, parts travel back through the listening port
#[tokio::test]
async fn test_loopback_batch_over_tcp() {
    let cookies: Arc<Mutex<Vec<Option<String>>>> = Arc::new(Mutex::new(Vec::new()));
    let seen = cookies.clone();
    let hooks = Hooks::new().before_query(
        move |_: &str, _: &mut QueryOptions, req: &RequestContext| -> ODataResult<()> {
            seen.lock()
                .unwrap()
                .push(req.header("cookie").map(str::to_string));
            Ok(())
        },
    );

    let adapter = seeded();
    let odata = server(adapter.clone(), hooks);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(odata.clone().serve(listener));

    let inner = [http_part(
        "changeset_a",
        "POST Widgets HTTP/1.1",
        Some(&json!({"_id": "t1", "name": "tcp"})),
    )];
    let body = [
        http_part("batch_1", "GET Widgets('3') HTTP/1.1", None),
        changeset("batch_1", "changeset_a", &inner),
        close("batch_1"),
    ]
    .concat();

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("multipart/mixed; boundary=batch_1"),
    );
    headers.insert(header::COOKIE, HeaderValue::from_static("session=abc"));
    let response = LoopbackClient::new(addr)
        .execute(SubRequest {
            method: Method::POST,
            path: "/$batch".to_string(),
            headers,
            body: Some(body),
        })
        .await
        .unwrap();

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(odata.loopback_addr(), Some(addr));

    let text = String::from_utf8(response.body.to_vec()).unwrap();
    assert!(position(&text, r#""name":"gear""#) < position(&text, "HTTP/1.1 201 Created"));
    assert!(text.contains(&format!("http://{}/Widgets('t1')", addr)));
    assert!(adapter.documents("Widgets").iter().any(|d| d["_id"] == "t1"));
    assert_eq!(*cookies.lock().unwrap(), [Some("session=abc".to_string())]);
}

/// Wildcard binds are dialed through localhost
#[tokio::test]
async fn test_loopback_addr_for_wildcard_bind() {
    let server = server(seeded(), Hooks::new());
    assert_eq!(server.loopback_addr(), None);

    server.set_loopback_addr("0.0.0.0:8080".parse().unwrap());
    let expected: SocketAddr = "127.0.0.1:8080".parse().unwrap();
    assert_eq!(server.loopback_addr(), Some(expected));

    // First recorded address wins
    server.set_loopback_addr("127.0.0.1:9090".parse().unwrap());
    assert_eq!(server.loopback_addr(), Some(expected));
}
