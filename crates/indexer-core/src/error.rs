//! Error taxonomy shared by every indexer crate.

/// Result type alias for indexer operations.
pub type Result<T> = std::result::Result<T, IndexerError>;

/// The closed error taxonomy for the retrieval engine.
///
/// Each variant corresponds to exactly one failure class the engine can
/// surface; layers above the point of failure either handle a variant or
/// normalize it rather than letting a new kind of error leak through.
#[derive(Debug, thiserror::Error)]
pub enum IndexerError {
    /// Malformed or incompatible settings, fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An API was called before `initialize()`.
    #[error("component not initialized: {0}")]
    NotInitialized(String),

    /// A vector's length disagrees with the configured dimensionality.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// Requested `nodeId` has no mapping.
    #[error("not found: {0}")]
    NotFound(String),

    /// Insertion collided with an existing `nodeId`.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Failure at the durable layer (I/O, permission, corruption).
    #[error("storage error: {0}")]
    Storage(String),

    /// Deadline exceeded beyond the soft limit.
    #[error("query timed out after {0}ms")]
    Timeout(u64),

    /// A label resolved to no record, or a vector hash disagreed with its vector.
    #[error("integrity violation: {0}")]
    Integrity(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl IndexerError {
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn not_found(node_id: impl Into<String>) -> Self {
        Self::NotFound(node_id.into())
    }

    pub fn already_exists(node_id: impl Into<String>) -> Self {
        Self::AlreadyExists(node_id.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn not_initialized(component: impl Into<String>) -> Self {
        Self::NotInitialized(component.into())
    }

    pub fn integrity(msg: impl Into<String>) -> Self {
        Self::Integrity(msg.into())
    }

    /// Maps a variant to the CLI's process exit code.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 2,
            Self::Storage(_) | Self::NotInitialized(_) => 3,
            Self::Timeout(_) => 4,
            Self::Integrity(_) => 5,
            _ => 1,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::DimensionMismatch { .. } | Self::NotFound(_) | Self::AlreadyExists(_)
        )
    }
}
