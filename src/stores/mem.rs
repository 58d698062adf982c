//! In-memory store
//!
//! Backs the integration tests and doubles as the reference semantics for
//! the other backends. Deletion exists only here, for fault injection.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;

use crate::checksum::Digest;
use crate::error::{Error, Result};

use super::{LsEntry, Store};

/// A store holding every blob in a map
pub struct MemStore {
    blobs: Mutex<HashMap<Digest, Bytes>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self {
            blobs: Mutex::new(HashMap::new()),
        }
    }

    /// Digests currently held
    pub fn hashes(&self) -> Vec<Digest> {
        self.blobs.lock().keys().copied().collect()
    }

    /// Drop one blob, simulating loss
    pub fn delete(&self, hash: &Digest) -> bool {
        self.blobs.lock().remove(hash).is_some()
    }

    /// Drop every blob, simulating a dead backend
    pub fn wipe(&self) {
        self.blobs.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.lock().is_empty()
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemStore {
    async fn put(&self, hash: &Digest, data: Bytes) -> Result<()> {
        self.blobs.lock().insert(*hash, data);
        Ok(())
    }

    async fn get(&self, hash: &Digest) -> Result<Bytes> {
        self.blobs
            .lock()
            .get(hash)
            .cloned()
            .ok_or_else(|| Error::MissingData(format!("{} not in memory store", hash)))
    }

    async fn ls(&self) -> Result<Vec<LsEntry>> {
        Ok(self
            .blobs
            .lock()
            .iter()
            .map(|(hash, data)| LsEntry {
                hash: *hash,
                size: data.len() as u64,
            })
            .collect())
    }
}
