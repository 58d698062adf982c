//! Shard ownership registry
//!
//! Tracks which backends hold which digests. Seeded by the listing pass at
//! startup, incremented as writes land, and decremented when a read attempt
//! against a claimed owner fails, so a flaky backend is consulted at most
//! once per digest.

use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

use crate::checksum::Digest;

use super::{LsEntry, LsEntrySink};

/// Digest-to-owners registry
pub struct CopiesReg {
    owners: RwLock<HashMap<Digest, HashSet<String>>>,
}

impl CopiesReg {
    pub fn new() -> Self {
        Self {
            owners: RwLock::new(HashMap::new()),
        }
    }

    /// Record that a backend holds a digest
    pub fn add_owner(&self, hash: &Digest, copier_id: &str) {
        self.owners
            .write()
            .entry(*hash)
            .or_default()
            .insert(copier_id.to_string());
    }

    /// Drop one backend's claim on a digest
    pub fn remove_owner(&self, hash: &Digest, copier_id: &str) {
        let mut owners = self.owners.write();
        if let Some(set) = owners.get_mut(hash) {
            set.remove(copier_id);
            if set.is_empty() {
                owners.remove(hash);
            }
        }
    }

    /// The backends currently believed to hold a digest
    pub fn owners(&self, hash: &Digest) -> HashSet<String> {
        self.owners.read().get(hash).cloned().unwrap_or_default()
    }

    /// Number of digests with at least one owner
    pub fn len(&self) -> usize {
        self.owners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.read().is_empty()
    }
}

impl Default for CopiesReg {
    fn default() -> Self {
        Self::new()
    }
}

impl LsEntrySink for CopiesReg {
    fn add(&self, copier_id: &str, entry: &LsEntry) {
        self.add_owner(&entry.hash, copier_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_remove_owners() {
        let reg = CopiesReg::new();
        let hash = Digest::sum(b"blob");

        reg.add_owner(&hash, "a");
        reg.add_owner(&hash, "b");
        reg.add_owner(&hash, "a"); // idempotent
        assert_eq!(reg.owners(&hash).len(), 2);

        reg.remove_owner(&hash, "a");
        assert_eq!(reg.owners(&hash), ["b".to_string()].into_iter().collect());

        reg.remove_owner(&hash, "b");
        assert!(reg.owners(&hash).is_empty());
        assert!(reg.is_empty());
    }

    #[test]
    fn test_unknown_digest_has_no_owners() {
        let reg = CopiesReg::new();
        assert!(reg.owners(&Digest::sum(b"never seen")).is_empty());
        reg.remove_owner(&Digest::sum(b"never seen"), "a");
    }
}
