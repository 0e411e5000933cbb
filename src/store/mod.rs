//! Ledger Store: durable key-value blob storage
//!
//! The engine serializes its whole state into one blob under one fixed key.
//! Stores only move bytes; they know nothing about what the bytes mean.

mod file;

pub use file::FileStore;

use crate::config::{StorageBackend, StorageConfig};
use crate::error::Result;
use std::collections::HashMap;

/// Blob storage keyed by a fixed logical key. Writes always overwrite.
#[cfg_attr(test, mockall::automock)]
pub trait LedgerStore: Send {
    fn put(&mut self, key: &str, bytes: &[u8]) -> Result<()>;
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
}

/// In-memory store for tests and throwaway sessions
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    blobs: HashMap<String, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

impl LedgerStore for MemoryStore {
    fn put(&mut self, key: &str, bytes: &[u8]) -> Result<()> {
        self.blobs.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.get(key).cloned())
    }
}

/// Build the store selected in config
pub fn open(config: &StorageConfig) -> Result<Box<dyn LedgerStore>> {
    match config.backend {
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory ledger store, state will not survive a restart");
            Ok(Box::new(MemoryStore::new()))
        }
        StorageBackend::File => {
            let path = config.state_path();
            tracing::debug!("Using file ledger store at {}", path.display());
            Ok(Box::new(FileStore::single_file(path)))
        }
        StorageBackend::Directory => {
            let dir = config.state_path();
            tracing::debug!("Using directory ledger store at {}", dir.display());
            Ok(Box::new(FileStore::directory(dir)))
        }
    }
}
