//! Closure-registered adapter
//!
//! Older hosts registered each storage operation as a bare function
//! instead of implementing [`Adapter`]. That calling convention is kept
//! as an explicit, deprecated entry point.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::Value;
use tracing::warn;

use crate::context::RequestContext;
use crate::errors::{ODataError, ODataResult};
use crate::query::QueryOptions;

use super::{Adapter, QueryResult};

pub type QueryFn = Arc<
    dyn Fn(String, QueryOptions, RequestContext) -> BoxFuture<'static, ODataResult<QueryResult>>
        + Send
        + Sync,
>;
pub type InsertFn =
    Arc<dyn Fn(String, Value, RequestContext) -> BoxFuture<'static, ODataResult<Value>> + Send + Sync>;
pub type UpdateFn = Arc<
    dyn Fn(String, Value, Value, RequestContext) -> BoxFuture<'static, ODataResult<()>> + Send + Sync,
>;
pub type RemoveFn =
    Arc<dyn Fn(String, Value, RequestContext) -> BoxFuture<'static, ODataResult<()>> + Send + Sync>;

/// Adapter assembled from individually registered operations
///
/// Operations never registered fail with [`ODataError::NotImplemented`].
#[derive(Clone, Default)]
pub struct FnAdapter {
    query: Option<QueryFn>,
    insert: Option<InsertFn>,
    update: Option<UpdateFn>,
    remove: Option<RemoveFn>,
}

fn deprecated(operation: &str) {
    warn!(
        operation,
        "DEPRECATED: registering adapter operations directly; implement the Adapter trait instead"
    );
}

impl FnAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query_fn<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(String, QueryOptions, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ODataResult<QueryResult>> + Send + 'static,
    {
        deprecated("query");
        self.query = Some(Arc::new(
            move |collection: String, query: QueryOptions, req: RequestContext| {
                f(collection, query, req).boxed()
            },
        ));
        self
    }

    pub fn insert_fn<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(String, Value, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ODataResult<Value>> + Send + 'static,
    {
        deprecated("insert");
        self.insert = Some(Arc::new(
            move |collection: String, doc: Value, req: RequestContext| f(collection, doc, req).boxed(),
        ));
        self
    }

    pub fn update_fn<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(String, Value, Value, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ODataResult<()>> + Send + 'static,
    {
        deprecated("update");
        self.update = Some(Arc::new(
            move |collection: String, filter: Value, update: Value, req: RequestContext| {
                f(collection, filter, update, req).boxed()
            },
        ));
        self
    }

    pub fn remove_fn<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(String, Value, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ODataResult<()>> + Send + 'static,
    {
        deprecated("remove");
        self.remove = Some(Arc::new(
            move |collection: String, filter: Value, req: RequestContext| {
                f(collection, filter, req).boxed()
            },
        ));
        self
    }
}

#[async_trait]
impl Adapter for FnAdapter {
    async fn query(
        &self,
        collection: &str,
        query: &QueryOptions,
        req: &RequestContext,
    ) -> ODataResult<QueryResult> {
        let f = self.query.as_ref().ok_or(ODataError::NotImplemented("query"))?;
        f(collection.to_string(), query.clone(), req.clone()).await
    }

    async fn insert(&self, collection: &str, doc: Value, req: &RequestContext) -> ODataResult<Value> {
        let f = self.insert.as_ref().ok_or(ODataError::NotImplemented("insert"))?;
        f(collection.to_string(), doc, req.clone()).await
    }

    async fn update(
        &self,
        collection: &str,
        filter: &Value,
        update: &Value,
        req: &RequestContext,
    ) -> ODataResult<()> {
        let f = self.update.as_ref().ok_or(ODataError::NotImplemented("update"))?;
        f(collection.to_string(), filter.clone(), update.clone(), req.clone()).await
    }

    async fn remove(&self, collection: &str, filter: &Value, req: &RequestContext) -> ODataResult<()> {
        let f = self.remove.as_ref().ok_or(ODataError::NotImplemented("remove"))?;
        f(collection.to_string(), filter.clone(), req.clone()).await
    }
}
