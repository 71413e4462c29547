//! Durable metadata store: the `nodeId ↔ VectorRecord` and `nodeId ↔ label`
//! mapping that backs the retrieval engine.

pub mod record;
pub mod store;

pub use record::{BatchFailure, BatchResult, PartialMetadata, RecordMetadata, StoreStats, VectorRecord};
pub use store::MetadataStore;
