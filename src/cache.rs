//! Contract Cache
//!
//! Path to source store consulted while resolving imports. The broker serves
//! it to clients through the `store`, `retrieve` and `delete` actions; in
//! process, [`CacheResolver`] turns it into an import resolver.

pub mod persistence;

pub use persistence::SledContractCache;

use crate::callback::{ImportResolver, ImportResult};
use crate::error::StorageError;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Stored record for one contract path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedContract {
    pub path: String,
    pub content: String,
    /// Unix milliseconds when the record was written
    pub stored_at_ms: i64,
}

impl CachedContract {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            stored_at_ms: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Contract cache interface
pub trait ContractCache: Send + Sync {
    fn store(&self, path: &str, content: &str) -> Result<(), StorageError>;
    fn retrieve(&self, path: &str) -> Result<Option<String>, StorageError>;
    fn delete(&self, path: &str) -> Result<(), StorageError>;
}

/// Process-local cache, used in tests and when persistence is disabled
#[derive(Debug, Default)]
pub struct MemoryContractCache {
    entries: RwLock<HashMap<String, CachedContract>>,
}

impl MemoryContractCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl ContractCache for MemoryContractCache {
    fn store(&self, path: &str, content: &str) -> Result<(), StorageError> {
        self.entries
            .write()
            .insert(path.to_string(), CachedContract::new(path, content));
        Ok(())
    }

    fn retrieve(&self, path: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.read().get(path).map(|c| c.content.clone()))
    }

    fn delete(&self, path: &str) -> Result<(), StorageError> {
        self.entries.write().remove(path);
        Ok(())
    }
}

/// Resolves imports from a contract cache
pub struct CacheResolver {
    cache: Arc<dyn ContractCache>,
}

impl CacheResolver {
    pub fn new(cache: Arc<dyn ContractCache>) -> Self {
        Self { cache }
    }
}

impl ImportResolver for CacheResolver {
    fn resolve(&self, path: &str) -> ImportResult {
        match self.cache.retrieve(path) {
            Ok(Some(content)) => ImportResult::Contents(content),
            Ok(None) => ImportResult::Error(format!("{} is not in the contract cache", path)),
            Err(e) => ImportResult::Error(e.to_string()),
        }
    }
}
