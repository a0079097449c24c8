//! Result pruning
//!
//! Drops properties the entity type does not declare before a document
//! leaves the server.

use serde_json::Value;

use crate::errors::ODataResult;

use super::types::Model;

/// Prune one document in place
pub fn prune_document(model: &Model, collection: &str, doc: &mut Value) -> ODataResult<()> {
    let def = model.entity_type_of(collection)?;
    if let Value::Object(map) = doc {
        map.retain(|key, _| key.starts_with('@') || key == "_id" || def.contains_key(key));
    }
    Ok(())
}

/// Prune every document of a result set
pub fn prune_documents(model: &Model, collection: &str, docs: &mut [Value]) -> ODataResult<()> {
    for doc in docs {
        prune_document(model, collection, doc)?;
    }
    Ok(())
}
