//! Shared types, configuration, and error taxonomy for the code-intelligence
//! retrieval engine.

pub mod config;
pub mod context;
pub mod error;
pub mod types;

pub use config::IndexerConfig;
pub use context::Context;
pub use error::{IndexerError, Result};
pub use types::{Label, NodeId, NodeType, QueryType, Space, Vector};
