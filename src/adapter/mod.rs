//! # Storage Adapters
//!
//! The server never stores anything itself. Every read and write goes
//! through an [`Adapter`], which owns persistence and query execution.

mod fn_adapter;
mod memory;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::RequestContext;
use crate::errors::ODataResult;
use crate::query::QueryOptions;

pub use fn_adapter::{FnAdapter, InsertFn, QueryFn, RemoveFn, UpdateFn};
pub use memory::MemoryAdapter;

/// Entities returned by [`Adapter::query`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    /// Entities after filtering and paging
    pub value: Vec<Value>,

    /// Total matches before paging, when the adapter computed it
    pub count: Option<u64>,
}

impl QueryResult {
    pub fn new(value: Vec<Value>) -> Self {
        Self { value, count: None }
    }

    pub fn with_count(value: Vec<Value>, count: u64) -> Self {
        Self {
            value,
            count: Some(count),
        }
    }

    /// Reported count, falling back to the number of entities returned
    pub fn total(&self) -> u64 {
        self.count.unwrap_or(self.value.len() as u64)
    }
}

/// Storage backend contract
///
/// `filter` for update/remove is always `{"_id": <id>}`; `update` is
/// `{"$set": <partial document>}`. Errors carrying a code in `[100, 600)`
/// become that HTTP status.
#[async_trait]
pub trait Adapter: Send + Sync {
    async fn query(
        &self,
        collection: &str,
        query: &QueryOptions,
        req: &RequestContext,
    ) -> ODataResult<QueryResult>;

    /// Persist a document and return it as stored (including `_id`)
    async fn insert(&self, collection: &str, doc: Value, req: &RequestContext)
        -> ODataResult<Value>;

    async fn update(
        &self,
        collection: &str,
        filter: &Value,
        update: &Value,
        req: &RequestContext,
    ) -> ODataResult<()>;

    async fn remove(&self, collection: &str, filter: &Value, req: &RequestContext)
        -> ODataResult<()>;
}
