//! `Edm.Binary` codec
//!
//! On the wire binary properties are base64 text. Adapters see them as
//! JSON arrays of byte values. Adapter-native wrappers are unwrapped on
//! the way out:
//! - `[1, 2, 3]` byte arrays
//! - `{"type": "Buffer", "data": [...]}`
//! - `{"_bsontype": "Binary", "buffer": [...]}`
//! - `{"0": 1, "1": 2}` index-keyed objects
//!
//! Values that fit none of these are left untouched.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::Value;
use tracing::warn;

use crate::model::EntityTypeDef;

/// Byte array as the adapter-facing JSON value
pub fn bytes_to_value(bytes: &[u8]) -> Value {
    Value::Array(bytes.iter().map(|b| Value::from(*b)).collect())
}

/// Unwrap any supported binary representation into raw bytes
pub fn value_to_bytes(value: &Value) -> Option<Vec<u8>> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|v| v.as_u64().and_then(|n| u8::try_from(n).ok()))
            .collect(),
        Value::Object(map) => {
            if let Some(inner) = map.get("buffer").or_else(|| map.get("data")) {
                return value_to_bytes(inner);
            }
            let mut indexed: Vec<(usize, u8)> = Vec::with_capacity(map.len());
            for (key, v) in map {
                let index = key.parse::<usize>().ok()?;
                let byte = v.as_u64().and_then(|n| u8::try_from(n).ok())?;
                indexed.push((index, byte));
            }
            indexed.sort_by_key(|(i, _)| *i);
            Some(indexed.into_iter().map(|(_, b)| b).collect())
        }
        _ => None,
    }
}

/// base64 text -> byte array, for declared binary properties
pub fn encode_binary_fields(def: &EntityTypeDef, doc: &mut Value) {
    let Value::Object(map) = doc else {
        return;
    };

    for (prop, value) in map.iter_mut() {
        if !def.get(prop).map(|p| p.is_binary()).unwrap_or(false) {
            continue;
        }
        let Value::String(text) = value else {
            continue;
        };
        match STANDARD.decode(text.as_bytes()) {
            Ok(bytes) => *value = bytes_to_value(&bytes),
            Err(e) => warn!(property = %prop, error = %e, "binary property is not valid base64, left as is"),
        }
    }
}

/// byte array (or adapter wrapper) -> base64 text, for declared binary properties
pub fn decode_binary_fields(def: &EntityTypeDef, docs: &mut [Value]) {
    for doc in docs {
        let Value::Object(map) = doc else {
            continue;
        };

        for (prop, value) in map.iter_mut() {
            if !def.get(prop).map(|p| p.is_binary()).unwrap_or(false) {
                continue;
            }
            if let Some(bytes) = value_to_bytes(value) {
                *value = Value::String(STANDARD.encode(bytes));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PropertyDef;
    use serde_json::json;

    fn def() -> EntityTypeDef {
        [
            ("image".to_string(), PropertyDef::new("Edm.Binary")),
            ("name".to_string(), PropertyDef::new("Edm.String")),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_round_trip_arbitrary_bytes() {
        let samples: Vec<Vec<u8>> = vec![
            vec![],
            vec![0],
            vec![0, 1, 2, 255, 254, 10, 13],
            (0..=255).collect(),
            b"plain text".to_vec(),
        ];

        for bytes in samples {
            let encoded = STANDARD.encode(&bytes);
            let mut docs = vec![json!({"image": encoded, "name": "n"})];

            encode_binary_fields(&def(), &mut docs[0]);
            assert_eq!(value_to_bytes(&docs[0]["image"]), Some(bytes.clone()));

            decode_binary_fields(&def(), &mut docs);
            assert_eq!(docs[0]["image"], json!(encoded));
            assert_eq!(docs[0]["name"], "n");
        }
    }

    #[test]
    fn test_undeclared_fields_untouched() {
        let mut doc = json!({"other": "AAEC", "name": "AAEC"});
        encode_binary_fields(&def(), &mut doc);
        assert_eq!(doc, json!({"other": "AAEC", "name": "AAEC"}));
    }

    #[test]
    fn test_adapter_wrappers_unwrapped() {
        let mut docs = vec![
            json!({"image": {"type": "Buffer", "data": [1, 2, 3]}}),
            json!({"image": {"_bsontype": "Binary", "buffer": [1, 2, 3]}}),
            json!({"image": {"1": 2, "0": 1, "2": 3}}),
            json!({"image": [1, 2, 3]}),
        ];
        decode_binary_fields(&def(), &mut docs);
        for doc in &docs {
            assert_eq!(doc["image"], "AQID");
        }
    }

    #[test]
    fn test_unrecognized_values_left_alone() {
        let mut docs = vec![json!({"image": null}), json!({"image": [300]})];
        decode_binary_fields(&def(), &mut docs);
        assert_eq!(docs[0]["image"], Value::Null);
        assert_eq!(docs[1]["image"], json!([300]));

        let mut doc = json!({"image": "not base64!"});
        encode_binary_fields(&def(), &mut doc);
        assert_eq!(doc["image"], "not base64!");
    }
}
