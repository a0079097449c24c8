//! # Service Model
//!
//! Entity sets and entity types as declared by the host, plus the helpers
//! that read them: result pruning and the `$metadata` document.

pub mod metadata;
pub mod prune;
pub mod types;

pub use metadata::{EdmxWriter, MetadataWriter};
pub use prune::{prune_document, prune_documents};
pub use types::{EntitySetDef, EntityTypeDef, Model, PropertyDef, EDM_BINARY};
