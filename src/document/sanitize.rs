//! Payload sanitation and response key ordering

use serde_json::{Map, Value};

/// Client-supplied type annotation, never persisted
pub const ODATA_TYPE: &str = "@odata.type";

/// Context annotation, always the first key of a response entity
pub const ODATA_CONTEXT: &str = "@odata.context";

/// Remove every `@odata.type` key at any depth
pub fn strip_odata_type(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.shift_remove(ODATA_TYPE);
            for child in map.values_mut() {
                strip_odata_type(child);
            }
        }
        Value::Array(items) => {
            for item in items {
                strip_odata_type(item);
            }
        }
        _ => {}
    }
}

/// Reorder keys: `@odata.context`, then other `@` keys, then the rest
///
/// Relative order inside each group is preserved.
pub fn annotations_first(map: Map<String, Value>) -> Map<String, Value> {
    let mut context = None;
    let mut annotations = Vec::new();
    let mut properties = Vec::new();

    for (key, value) in map {
        if key == ODATA_CONTEXT {
            context = Some(value);
        } else if key.starts_with('@') {
            annotations.push((key, value));
        } else {
            properties.push((key, value));
        }
    }

    let mut ordered = Map::new();
    if let Some(context) = context {
        ordered.insert(ODATA_CONTEXT.to_string(), context);
    }
    ordered.extend(annotations);
    ordered.extend(properties);
    ordered
}
