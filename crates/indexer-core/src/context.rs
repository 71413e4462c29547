//! Explicit dependency handle passed to every component constructor.
//!
//! Core components are constructed with an explicit context rather than
//! reaching for module-level singletons; only the outer CLI binary owns a
//! process-wide instance.

use crate::config::IndexerConfig;
use std::sync::Arc;

#[derive(Clone)]
pub struct Context {
    pub config: Arc<IndexerConfig>,
}

impl Context {
    pub fn new(config: IndexerConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}
