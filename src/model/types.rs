//! Model types
//!
//! The model is supplied once by the host and only read while serving.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::{ODataError, ODataResult};

/// EDM type name that switches on the base64 binary codec
pub const EDM_BINARY: &str = "Edm.Binary";

/// Property definition within an entity type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDef {
    /// EDM primitive type, e.g. `Edm.String`
    #[serde(rename = "type")]
    pub edm_type: String,

    /// Marks the entity key
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub key: bool,
}

impl PropertyDef {
    pub fn new(edm_type: impl Into<String>) -> Self {
        Self {
            edm_type: edm_type.into(),
            key: false,
        }
    }

    pub fn key(edm_type: impl Into<String>) -> Self {
        Self {
            edm_type: edm_type.into(),
            key: true,
        }
    }

    pub fn is_binary(&self) -> bool {
        self.edm_type == EDM_BINARY
    }
}

/// Property name -> definition
pub type EntityTypeDef = BTreeMap<String, PropertyDef>;

/// Entity set definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySetDef {
    /// Entity type name, possibly namespace-qualified
    pub entity_type: String,
}

/// Service model
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Model {
    pub namespace: String,

    #[serde(default)]
    pub entity_sets: BTreeMap<String, EntitySetDef>,

    #[serde(default)]
    pub entity_types: BTreeMap<String, EntityTypeDef>,
}

impl Model {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// Add an entity type
    pub fn entity_type<I, K>(mut self, name: impl Into<String>, properties: I) -> Self
    where
        I: IntoIterator<Item = (K, PropertyDef)>,
        K: Into<String>,
    {
        let def = properties
            .into_iter()
            .map(|(k, v)| (k.into(), v))
            .collect();
        self.entity_types.insert(name.into(), def);
        self
    }

    /// Add an entity set
    pub fn entity_set(mut self, name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        self.entity_sets.insert(
            name.into(),
            EntitySetDef {
                entity_type: entity_type.into(),
            },
        );
        self
    }

    pub fn has_entity_set(&self, collection: &str) -> bool {
        self.entity_sets.contains_key(collection)
    }

    /// Resolve the entity type behind an entity set
    ///
    /// The namespace prefix of the set's type reference is stripped before lookup.
    pub fn entity_type_of(&self, collection: &str) -> ODataResult<&EntityTypeDef> {
        let set = self
            .entity_sets
            .get(collection)
            .ok_or_else(|| ODataError::EntitySetNotFound(collection.to_string()))?;

        let prefix = format!("{}.", self.namespace);
        let type_name = set
            .entity_type
            .strip_prefix(&prefix)
            .unwrap_or(&set.entity_type);

        self.entity_types.get(type_name).ok_or_else(|| {
            ODataError::Internal(format!(
                "Entity set '{}' references unknown type '{}'",
                collection, set.entity_type
            ))
        })
    }

    /// Check every entity set resolves to a declared type
    pub fn validate(&self) -> ODataResult<()> {
        for name in self.entity_sets.keys() {
            self.entity_type_of(name)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn widgets() -> Model {
        Model::new("shop")
            .entity_type(
                "Widget",
                [
                    ("_id", PropertyDef::key("Edm.String")),
                    ("name", PropertyDef::new("Edm.String")),
                    ("image", PropertyDef::new(EDM_BINARY)),
                ],
            )
            .entity_set("Widgets", "shop.Widget")
    }

    #[test]
    fn test_namespace_is_stripped() {
        let model = widgets();
        let def = model.entity_type_of("Widgets").unwrap();
        assert!(def["image"].is_binary());
        assert!(!def["name"].is_binary());
    }

    #[test]
    fn test_unqualified_type_reference() {
        let model = Model::new("shop")
            .entity_type("Gadget", [("_id", PropertyDef::key("Edm.String"))])
            .entity_set("Gadgets", "Gadget");
        assert!(model.entity_type_of("Gadgets").is_ok());
    }

    #[test]
    fn test_unknown_set() {
        let model = widgets();
        assert!(matches!(
            model.entity_type_of("Nope"),
            Err(ODataError::EntitySetNotFound(_))
        ));
    }

    #[test]
    fn test_deserialize_host_json() {
        let model: Model = serde_json::from_value(json!({
            "namespace": "shop",
            "entityTypes": {
                "Widget": {
                    "_id": { "type": "Edm.String", "key": true },
                    "image": { "type": "Edm.Binary" }
                }
            },
            "entitySets": {
                "Widgets": { "entityType": "shop.Widget" }
            }
        }))
        .unwrap();

        assert!(model.validate().is_ok());
        assert!(model.entity_type_of("Widgets").unwrap()["_id"].key);
    }

    #[test]
    fn test_validate_dangling_type() {
        let model = Model::new("shop").entity_set("Widgets", "shop.Missing");
        assert!(model.validate().is_err());
    }
}
