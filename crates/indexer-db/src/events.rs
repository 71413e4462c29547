//! The mutation-notification contract between the Vector Database and any
//! cache tier that wants to invalidate in response.

use indexer_core::types::NodeId;

#[derive(Debug, Clone)]
pub enum MutationKind {
    Insert,
    Update,
    Delete,
    Rebuild,
}

#[derive(Debug, Clone)]
pub struct MutationEvent {
    pub kind: MutationKind,
    pub node_id: Option<NodeId>,
    pub file_path: Option<String>,
    pub index_version: u64,
}
