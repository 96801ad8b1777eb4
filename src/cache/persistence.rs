//! Persistence layer for the contract cache

use crate::cache::{CachedContract, ContractCache};
use crate::error::StorageError;
use std::path::Path;

const KEY_PREFIX: &str = "contract:";

/// Sled-based implementation of ContractCache
pub struct SledContractCache {
    db: sled::Db,
}

impl SledContractCache {
    /// Open (or create) a cache database at `path`
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path).map_err(|e| {
            StorageError::IoError(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("Failed to open sled database: {}", e),
            ))
        })?;
        Ok(Self { db })
    }

    fn key(path: &str) -> Vec<u8> {
        format!("{}{}", KEY_PREFIX, path).into_bytes()
    }

    /// Full record for a path, including its write time
    pub fn get_record(&self, path: &str) -> Result<Option<CachedContract>, StorageError> {
        match self.db.get(Self::key(path))? {
            Some(value) => {
                let record: CachedContract =
                    bincode::deserialize(&value).map_err(|e| StorageError::Corrupt {
                        path: path.to_string(),
                        message: e.to_string(),
                    })?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Every cached path, sorted
    pub fn list_paths(&self) -> Result<Vec<String>, StorageError> {
        let mut paths = Vec::new();
        for item in self.db.scan_prefix(KEY_PREFIX.as_bytes()) {
            let (key, _) = item?;
            let key = String::from_utf8_lossy(&key);
            paths.push(key.trim_start_matches(KEY_PREFIX).to_string());
        }
        Ok(paths)
    }

    /// Flush all pending writes to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}

impl ContractCache for SledContractCache {
    fn store(&self, path: &str, content: &str) -> Result<(), StorageError> {
        let record = CachedContract::new(path, content);
        let value = bincode::serialize(&record).map_err(|e| {
            StorageError::IoError(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Failed to serialize contract record: {}", e),
            ))
        })?;
        self.db.insert(Self::key(path), value)?;
        Ok(())
    }

    fn retrieve(&self, path: &str) -> Result<Option<String>, StorageError> {
        Ok(self.get_record(path)?.map(|record| record.content))
    }

    fn delete(&self, path: &str) -> Result<(), StorageError> {
        self.db.remove(Self::key(path))?;
        Ok(())
    }
}
