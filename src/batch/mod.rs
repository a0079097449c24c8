//! # Batch Engine
//!
//! `$batch` support: parse a `multipart/mixed` body into a part tree,
//! execute every request part as a sub-request against the same server,
//! and reassemble the responses into one `multipart/mixed` body.
//!
//! A parse failure rejects the whole batch. Once parsing succeeds, a part
//! that fails to execute only affects its own section.

mod engine;
mod executor;
mod parser;

pub use engine::{boundary_id, to_crlf, BatchEngine};
pub use executor::{LoopbackClient, SubRequest, SubRequestExecutor, SubResponse};
pub use parser::{
    boundary_from_content_type, parse_batch, BatchPart, HttpMessage, Multipart, PartBody,
    PartHeaders,
};
