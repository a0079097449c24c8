//! Route handlers
//!
//! Each handler runs the same pipeline: sanitize the payload, run the
//! pre-hook, call the adapter, shape the response. Any error returned here
//! goes to the error sink.

use axum::body::{Body, Bytes};
use axum::extract::Query;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::{json, Map, Value};
use tracing::warn;

use crate::batch::{boundary_from_content_type, boundary_id, parse_batch, BatchEngine, LoopbackClient};
use crate::context::RequestContext;
use crate::document::{annotations_first, strip_odata_type, ODATA_CONTEXT};
use crate::errors::{ODataError, ODataResult};
use crate::hooks::UpdateCommand;
use crate::model::{prune_document, prune_documents};
use crate::query::{strip_quotes, QueryOptions};

use super::facade::{ODataServer, ODATA_VERSION};
use super::service::BatchTransport;

const QUERY_CONTENT_TYPE: &str = "application/json;odata.metadata=minimal";
const INSERT_CONTENT_TYPE: &str = "application/json;odata.metadata=minimal;odata.streaming=true;IEEE754Compatible=false;charset=utf-8";
const ALLOW_METHODS: &str = "OPTIONS, GET, HEAD, POST, PATCH, PUT, DELETE";
const ALLOW_HEADERS: &str = "Content-Type, Mime-Version, OData-MaxVersion, OData-Version, X-CSRF-Token";
const BATCH_EXPOSE_HEADERS: &str = "Content-Type, OData-Version";

/// Characters kept by URI encoding of an entity id in `Location`
const URI_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b';')
    .remove(b',')
    .remove(b'/')
    .remove(b'?')
    .remove(b':')
    .remove(b'@')
    .remove(b'&')
    .remove(b'=')
    .remove(b'+')
    .remove(b'$')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b'#');

/// Route table entries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Endpoint {
    Collections,
    Metadata,
    Batch,
    Count,
    Entity,
    Collection,
    Insert,
    Update,
    Remove,
    Preflight,
}

impl ODataServer {
    /// Entity set catalog
    pub(crate) fn collections(&self, service_url: &str) -> Response {
        let value: Vec<Value> = self
            .config()
            .model()
            .entity_sets
            .keys()
            .map(|name| json!({"kind": "EntitySet", "name": name, "url": name}))
            .collect();

        let body = json!({
            ODATA_CONTEXT: format!("{}/$metadata", service_url),
            "value": value,
        });

        let mut response = (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response();
        self.add_cors(response.headers_mut());
        response
    }

    pub(crate) fn metadata(&self) -> Response {
        let document = self.config().metadata.write(self.config().model());

        let mut response = (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "application/xml"),
                (header::HeaderName::from_static("dataserviceversion"), ODATA_VERSION),
            ],
            document,
        )
            .into_response();
        self.add_cors(response.headers_mut());
        response
    }

    /// CORS preflight
    pub(crate) fn preflight(&self) -> Response {
        let mut response = StatusCode::OK.into_response();
        let headers = response.headers_mut();
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOW_METHODS),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(ALLOW_HEADERS),
        );
        self.add_cors(headers);
        response
    }

    // ==================
    // Query
    // ==================

    pub(crate) async fn query(
        &self,
        ctx: &RequestContext,
        service_url: &str,
        count_only: bool,
    ) -> ODataResult<Response> {
        let collection = self.collection_param(ctx)?;

        let Query(pairs) = Query::<Vec<(String, String)>>::try_from_uri(&ctx.uri)
            .map_err(|e| ODataError::InvalidQuery(e.body_text()))?;
        let mut options = QueryOptions::from_pairs(collection.clone(), pairs)?;
        if count_only {
            options.count = true;
        }
        if let Some(id) = ctx.param("id") {
            options = options.for_entity(id);
        }

        let hooks = &self.config().hooks;
        hooks.before_query.call(&collection, &mut options, ctx).await?;

        let result = self
            .config()
            .adapter
            .query(&collection, &options, ctx)
            .await?;
        (hooks.after_read)(collection.as_str(), ctx);

        if options.count {
            let mut response = (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "text/plain")],
                result.total().to_string(),
            )
                .into_response();
            self.add_cors(response.headers_mut());
            return Ok(response);
        }

        let total = result.total();
        let mut entities = result.value;
        prune_documents(self.config().model(), &collection, &mut entities)?;
        self.decode_binary_fields(&collection, &mut entities)?;

        let selected = options
            .select
            .as_ref()
            .filter(|fields| !fields.is_empty())
            .map(|fields| format!("({})", fields.join(",")))
            .unwrap_or_default();

        let mut out = Map::new();
        if options.is_single_entity() {
            out.insert(
                ODATA_CONTEXT.to_string(),
                json!(format!("{}/$metadata#{}{}/$entity", service_url, collection, selected)),
            );
            if let Some(first) = entities.first().and_then(Value::as_object) {
                for (key, value) in first {
                    out.insert(key.clone(), value.clone());
                }
            }
        } else {
            out.insert(
                ODATA_CONTEXT.to_string(),
                json!(format!("{}/$metadata#{}{}", service_url, collection, selected)),
            );
        }
        // Single-entity responses keep `value` for older clients
        out.insert("value".to_string(), Value::Array(entities));
        if options.inlinecount {
            out.insert("@odata.count".to_string(), json!(total));
        }

        let body = Value::Object(annotations_first(out));
        Ok(self.json_response(StatusCode::OK, QUERY_CONTENT_TYPE, &body))
    }

    // ==================
    // Writes
    // ==================

    pub(crate) async fn insert(
        &self,
        ctx: &RequestContext,
        service_url: &str,
        body: Body,
    ) -> ODataResult<Response> {
        let collection = self.collection_param(ctx)?;

        let mut doc = self.read_json(body).await?;
        strip_odata_type(&mut doc);
        self.encode_binary_fields(&collection, &mut doc)?;

        let hooks = &self.config().hooks;
        hooks.before_insert.call(&collection, &mut doc, ctx).await?;

        let mut entity = self.config().adapter.insert(&collection, doc, ctx).await?;
        prune_document(self.config().model(), &collection, &mut entity)?;
        self.decode_binary_fields(&collection, std::slice::from_mut(&mut entity))?;

        let id = match entity.get("_id") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => {
                return Err(ODataError::Internal("inserted entity has no _id".to_string()))
            }
            Some(other) => other.to_string(),
        };
        let entity_url = format!("{}/{}('{}')", service_url, collection, id);
        let location = format!(
            "{}/{}('{}')",
            service_url,
            collection,
            utf8_percent_encode(&id, URI_ENCODE)
        );

        let Value::Object(mut map) = entity else {
            return Err(ODataError::Internal("inserted entity is not an object".to_string()));
        };
        map.insert("@odata.id".to_string(), json!(entity_url));
        map.insert("@odata.editLink".to_string(), json!(entity_url));
        map.insert(
            ODATA_CONTEXT.to_string(),
            json!(format!("{}/$metadata#{}/$entity", service_url, collection)),
        );
        let body = Value::Object(annotations_first(map));

        let mut response = self.json_response(StatusCode::CREATED, INSERT_CONTENT_TYPE, &body);
        if let Ok(location) = HeaderValue::from_str(&location) {
            response.headers_mut().insert(header::LOCATION, location);
        }
        Ok(response)
    }

    pub(crate) async fn update(&self, ctx: &RequestContext, body: Body) -> ODataResult<Response> {
        let collection = self.collection_param(ctx)?;

        let mut doc = self.read_json(body).await?;
        strip_odata_type(&mut doc);
        self.encode_binary_fields(&collection, &mut doc)?;

        let mut command = UpdateCommand {
            filter: json!({ "_id": self.id_param(ctx)? }),
            update: json!({ "$set": doc }),
        };

        let hooks = &self.config().hooks;
        hooks.before_update.call(&collection, &mut command, ctx).await?;

        self.config()
            .adapter
            .update(&collection, &command.filter, &command.update, ctx)
            .await?;

        Ok(self.no_content())
    }

    pub(crate) async fn remove(&self, ctx: &RequestContext) -> ODataResult<Response> {
        let collection = self.collection_param(ctx)?;
        let mut filter = json!({ "_id": self.id_param(ctx)? });

        let hooks = &self.config().hooks;
        hooks.before_remove.call(&collection, &mut filter, ctx).await?;

        self.config().adapter.remove(&collection, &filter, ctx).await?;

        Ok(self.no_content())
    }

    // ==================
    // Batch
    // ==================

    /// `$batch`; framing errors answer 400 with an empty body
    pub(crate) async fn batch(&self, ctx: &RequestContext, body: Body) -> ODataResult<Response> {
        let boundary = match boundary_from_content_type(ctx.header("content-type")) {
            Ok(boundary) => boundary,
            Err(e) => return Ok(malformed_batch(ctx, &e)),
        };

        let bytes = self.read_body(body).await?;
        let text = match String::from_utf8(bytes.to_vec()) {
            Ok(text) => text,
            Err(_) => {
                let e = ODataError::BadRequest("batch body is not UTF-8".to_string());
                return Ok(malformed_batch(ctx, &e));
            }
        };
        let batch = match parse_batch(&text, &boundary) {
            Ok(batch) => batch,
            Err(e) => return Ok(malformed_batch(ctx, &e)),
        };

        let response_id = boundary_id("batchresponse");
        let body = match (self.config().batch_transport, self.loopback_addr()) {
            (BatchTransport::Loopback, Some(addr)) => {
                let client = LoopbackClient::new(addr);
                BatchEngine::new(&client, &ctx.path, &ctx.headers)
                    .run(&batch, &response_id)
                    .await
            }
            _ => {
                BatchEngine::new(self, &ctx.path, &ctx.headers)
                    .run(&batch, &response_id)
                    .await
            }
        };

        let content_type = format!("multipart/mixed; boundary={}", response_id);
        let mut response = (StatusCode::OK, body).into_response();
        let headers = response.headers_mut();
        headers.insert(
            header::ACCESS_CONTROL_EXPOSE_HEADERS,
            HeaderValue::from_static(BATCH_EXPOSE_HEADERS),
        );
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_str(&content_type)
                .map_err(|e| ODataError::Internal(e.to_string()))?,
        );
        headers.insert("odata-version", HeaderValue::from_static(ODATA_VERSION));
        Ok(response)
    }

    // ==================
    // Helpers
    // ==================

    /// Collection route parameter, checked against the model
    fn collection_param(&self, ctx: &RequestContext) -> ODataResult<String> {
        let collection = ctx.param("collection").ok_or(ODataError::NotFound)?;
        if !self.config().model().has_entity_set(collection) {
            return Err(ODataError::EntitySetNotFound(collection.to_string()));
        }
        Ok(collection.to_string())
    }

    /// Entity id route parameter with quotes stripped
    fn id_param(&self, ctx: &RequestContext) -> ODataResult<String> {
        ctx.param("id")
            .map(strip_quotes)
            .ok_or_else(|| ODataError::BadRequest("missing entity id".to_string()))
    }

    /// Buffer the body up to the configured cap
    async fn read_body(&self, body: Body) -> ODataResult<Bytes> {
        let limit = self.config().max_body_bytes();
        axum::body::to_bytes(body, limit).await.map_err(|e| {
            let source = e.into_inner();
            if source.is::<http_body_util::LengthLimitError>() {
                ODataError::PayloadTooLarge(limit)
            } else {
                ODataError::BadRequest(format!("failed to read request body: {}", source))
            }
        })
    }

    async fn read_json(&self, body: Body) -> ODataResult<Value> {
        let bytes = self.read_body(body).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn json_response(&self, status: StatusCode, content_type: &'static str, body: &Value) -> Response {
        let mut response = (
            status,
            [(header::CONTENT_TYPE, content_type)],
            body.to_string(),
        )
            .into_response();
        self.add_cors(response.headers_mut());
        response
    }

    fn no_content(&self) -> Response {
        let mut response = StatusCode::NO_CONTENT.into_response();
        self.add_cors(response.headers_mut());
        response
    }
}

fn malformed_batch(ctx: &RequestContext, error: &ODataError) -> Response {
    warn!(path = %ctx.path, error = %error, "Rejecting malformed batch");
    let mut response = StatusCode::BAD_REQUEST.into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
    headers.insert("odata-version", HeaderValue::from_static(ODATA_VERSION));
    response
}
