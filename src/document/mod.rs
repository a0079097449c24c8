//! # Document Handling
//!
//! Schema-independent transformations over JSON entity documents.

pub mod binary;
pub mod sanitize;

pub use binary::{bytes_to_value, decode_binary_fields, encode_binary_fields, value_to_bytes};
pub use sanitize::{annotations_first, strip_odata_type, ODATA_CONTEXT, ODATA_TYPE};
