//! In-memory adapter
//!
//! Reference backend for tests and the bundled binary. Collections are
//! ordered document lists behind a single lock.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::context::RequestContext;
use crate::errors::{ODataError, ODataResult};
use crate::query::{compare_json_values, lookup, QueryOptions, SortDirection};

use super::{Adapter, QueryResult};

#[derive(Debug, Default)]
pub struct MemoryAdapter {
    /// Data store: collection -> documents
    data: RwLock<HashMap<String, Vec<Value>>>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a collection, replacing its contents
    pub fn with_documents(self, collection: impl Into<String>, docs: Vec<Value>) -> Self {
        if let Ok(mut data) = self.data.write() {
            data.insert(collection.into(), docs);
        }
        self
    }

    /// Snapshot of a collection
    pub fn documents(&self, collection: &str) -> Vec<Value> {
        self.data
            .read()
            .map(|data| data.get(collection).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    fn lock_poisoned() -> ODataError {
        ODataError::Internal("Lock poisoned".to_string())
    }

    /// Apply ordering
    fn apply_ordering(records: &mut [Value], query: &QueryOptions) {
        let Some(order) = query.orderby.as_ref().filter(|o| !o.is_empty()) else {
            return;
        };

        records.sort_by(|a, b| {
            for clause in order {
                let a_val = lookup(a, &clause.field).unwrap_or(&Value::Null);
                let b_val = lookup(b, &clause.field).unwrap_or(&Value::Null);

                let cmp = compare_json_values(a_val, b_val).unwrap_or(Ordering::Equal);
                let cmp = match clause.direction {
                    SortDirection::Asc => cmp,
                    SortDirection::Desc => cmp.reverse(),
                };
                if cmp != Ordering::Equal {
                    return cmp;
                }
            }
            Ordering::Equal
        });
    }

    /// Select fields from records, keeping `_id`
    fn select_fields(records: Vec<Value>, query: &QueryOptions) -> Vec<Value> {
        match &query.select {
            None => records,
            Some(fields) if fields.iter().any(|f| f == "*") => records,
            Some(fields) => records
                .into_iter()
                .map(|r| match r {
                    Value::Object(obj) => Value::Object(
                        obj.into_iter()
                            .filter(|(k, _)| k == "_id" || fields.contains(k))
                            .collect(),
                    ),
                    other => other,
                })
                .collect(),
        }
    }

    fn matches_filter(doc: &Value, filter: &Value) -> bool {
        match filter.as_object() {
            Some(conditions) => conditions
                .iter()
                .all(|(field, expected)| lookup(doc, field) == Some(expected)),
            None => false,
        }
    }
}

#[async_trait]
impl Adapter for MemoryAdapter {
    async fn query(
        &self,
        collection: &str,
        query: &QueryOptions,
        _req: &RequestContext,
    ) -> ODataResult<QueryResult> {
        let data = self.data.read().map_err(|_| Self::lock_poisoned())?;
        let records = data.get(collection).map(Vec::as_slice).unwrap_or_default();

        let mut matched: Vec<Value> = records
            .iter()
            .filter(|r| query.filter.matches(r))
            .cloned()
            .collect();
        drop(data);

        let total = matched.len() as u64;
        Self::apply_ordering(&mut matched, query);

        let paged: Vec<Value> = matched
            .into_iter()
            .skip(query.skip.unwrap_or(0))
            .take(query.top.unwrap_or(usize::MAX))
            .collect();

        Ok(QueryResult::with_count(Self::select_fields(paged, query), total))
    }

    async fn insert(
        &self,
        collection: &str,
        mut doc: Value,
        _req: &RequestContext,
    ) -> ODataResult<Value> {
        let obj = doc
            .as_object_mut()
            .ok_or_else(|| ODataError::adapter(400, "Entity must be a JSON object"))?;

        // Add ID if not present
        if !obj.contains_key("_id") {
            let mut with_id = Map::new();
            with_id.insert("_id".to_string(), Value::String(Uuid::new_v4().to_string()));
            with_id.extend(std::mem::take(obj));
            *obj = with_id;
        }

        let mut store = self.data.write().map_err(|_| Self::lock_poisoned())?;
        let records = store.entry(collection.to_string()).or_default();

        if records.iter().any(|r| r.get("_id") == doc.get("_id")) {
            return Err(ODataError::adapter(409, "Entity with this _id already exists"));
        }
        records.push(doc.clone());

        Ok(doc)
    }

    async fn update(
        &self,
        collection: &str,
        filter: &Value,
        update: &Value,
        _req: &RequestContext,
    ) -> ODataResult<()> {
        let set = update
            .get("$set")
            .and_then(Value::as_object)
            .ok_or_else(|| ODataError::adapter(400, "Update must be a $set document"))?;

        let mut store = self.data.write().map_err(|_| Self::lock_poisoned())?;
        let record = store
            .get_mut(collection)
            .and_then(|records| records.iter_mut().find(|r| Self::matches_filter(r, filter)))
            .ok_or_else(|| ODataError::adapter(404, "Entity not found"))?;

        if let Some(record_obj) = record.as_object_mut() {
            for (key, value) in set {
                record_obj.insert(key.clone(), value.clone());
            }
        }

        Ok(())
    }

    async fn remove(
        &self,
        collection: &str,
        filter: &Value,
        _req: &RequestContext,
    ) -> ODataResult<()> {
        let mut store = self.data.write().map_err(|_| Self::lock_poisoned())?;
        let records = store
            .get_mut(collection)
            .ok_or_else(|| ODataError::adapter(404, "Entity not found"))?;

        let before = records.len();
        records.retain(|r| !Self::matches_filter(r, filter));
        if records.len() == before {
            return Err(ODataError::adapter(404, "Entity not found"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{FilterExpr, FilterOperator, OrderBy};
    use serde_json::json;

    fn seeded() -> MemoryAdapter {
        MemoryAdapter::new().with_documents(
            "Widgets",
            vec![
                json!({"_id": "1", "name": "b", "price": 5}),
                json!({"_id": "2", "name": "a", "price": 15}),
                json!({"_id": "3", "name": "c", "price": 25}),
            ],
        )
    }

    #[tokio::test]
    async fn test_query_filters_orders_pages() {
        let adapter = seeded();
        let mut query = QueryOptions::new("Widgets");
        query.filter = FilterExpr::compare("price", FilterOperator::Gt, json!(1));
        query.orderby = Some(vec![OrderBy::desc("price")]);
        query.top = Some(2);
        query.select = Some(vec!["name".to_string()]);

        let result = adapter
            .query("Widgets", &query, &RequestContext::detached())
            .await
            .unwrap();

        assert_eq!(result.count, Some(3));
        assert_eq!(
            result.value,
            vec![json!({"_id": "3", "name": "c"}), json!({"_id": "2", "name": "a"})]
        );
    }

    #[tokio::test]
    async fn test_insert_assigns_id_first() {
        let adapter = MemoryAdapter::new();
        let doc = adapter
            .insert("Widgets", json!({"name": "w"}), &RequestContext::detached())
            .await
            .unwrap();

        let keys: Vec<&String> = doc.as_object().unwrap().keys().collect();
        assert_eq!(keys, ["_id", "name"]);
        assert_eq!(adapter.documents("Widgets").len(), 1);
    }

    #[tokio::test]
    async fn test_update_and_remove() {
        let adapter = seeded();
        let ctx = RequestContext::detached();

        adapter
            .update("Widgets", &json!({"_id": "1"}), &json!({"$set": {"price": 6}}), &ctx)
            .await
            .unwrap();
        assert_eq!(adapter.documents("Widgets")[0]["price"], 6);

        adapter.remove("Widgets", &json!({"_id": "1"}), &ctx).await.unwrap();
        assert_eq!(adapter.documents("Widgets").len(), 2);

        let err = adapter
            .remove("Widgets", &json!({"_id": "1"}), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.status_code().as_u16(), 404);
    }
}
