//! Storage backends and placement
//!
//! A [`Store`] is a flat content-addressed blob space: digests in, bytes
//! out. [`Copier`] pairs a store with the stable identifier used by the
//! ownership registry and quota manager. The placement stages sit on top:
//! [`MinCopies`] picks destinations on the write path, [`MultiReader`]
//! cascades over owners on the read path.

use async_trait::async_trait;
use bytes::Bytes;
use futures::future;
use rand::seq::SliceRandom;
use std::sync::Arc;
use tracing::debug;

use crate::checksum::Digest;
use crate::error::Result;

mod command;
mod copies;
mod dir;
mod mem;
mod mincopies;
mod multireader;
mod quota;

pub use command::CommandStore;
pub use copies::CopiesReg;
pub use dir::DirStore;
pub use mem::MemStore;
pub use mincopies::MinCopies;
pub use multireader::MultiReader;
pub use quota::QuotaMan;

// =============================================================================
// Store contract
// =============================================================================

/// One entry of a store listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LsEntry {
    pub hash: Digest,
    pub size: u64,
}

/// A flat content-addressed blob store
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Store a blob under its digest. Overwriting an existing blob with the
    /// same digest is a no-op by content addressing.
    async fn put(&self, hash: &Digest, data: Bytes) -> Result<()>;

    /// Fetch a blob by digest. Absence is [`crate::Error::MissingData`];
    /// any other error means the backend itself misbehaved.
    async fn get(&self, hash: &Digest) -> Result<Bytes>;

    /// List every blob currently held
    async fn ls(&self) -> Result<Vec<LsEntry>>;
}

/// A store bound to its registry identifier
#[derive(Clone)]
pub struct Copier {
    id: String,
    store: Arc<dyn Store>,
}

impl Copier {
    pub fn new(id: impl Into<String>, store: Arc<dyn Store>) -> Self {
        Self {
            id: id.into(),
            store,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }
}

// =============================================================================
// Listing pass
// =============================================================================

/// Consumer of store listings: the ownership registry and the quota manager
/// both rebuild their state from one listing pass.
pub trait LsEntrySink: Send + Sync {
    fn add(&self, copier_id: &str, entry: &LsEntry);
}

/// List every backend concurrently and feed each entry to every sink
pub async fn scan_backends(copiers: &[Copier], sinks: &[Arc<dyn LsEntrySink>]) -> Result<()> {
    let listings = future::join_all(copiers.iter().map(|copier| async move {
        let entries = copier.store.ls().await?;
        Ok::<_, crate::Error>((copier.id.clone(), entries))
    }))
    .await;

    for listing in listings {
        let (id, entries) = listing?;
        debug!(copier = %id, entries = entries.len(), "scanned backend");
        for entry in &entries {
            for sink in sinks {
                sink.add(&id, entry);
            }
        }
    }
    Ok(())
}

/// A randomly ordered view of the copiers, for spreading load across
/// equally-eligible backends
pub fn shuffle_copiers(copiers: &[Copier]) -> Vec<Copier> {
    let mut shuffled = copiers.to_vec();
    shuffled.shuffle(&mut rand::thread_rng());
    shuffled
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scan_feeds_every_sink() {
        let a = MemStore::new();
        a.put(&Digest::sum(b"one"), Bytes::from_static(b"one"))
            .await
            .unwrap();
        a.put(&Digest::sum(b"two"), Bytes::from_static(b"two"))
            .await
            .unwrap();
        let b = MemStore::new();
        b.put(&Digest::sum(b"one"), Bytes::from_static(b"one"))
            .await
            .unwrap();

        let copiers = vec![
            Copier::new("a", Arc::new(a)),
            Copier::new("b", Arc::new(b)),
        ];
        let reg = Arc::new(CopiesReg::new());
        let quota = Arc::new(QuotaMan::new());
        let sinks: Vec<Arc<dyn LsEntrySink>> = vec![reg.clone(), quota.clone()];

        scan_backends(&copiers, &sinks).await.unwrap();

        let owners = reg.owners(&Digest::sum(b"one"));
        assert_eq!(owners.len(), 2);
        assert_eq!(reg.owners(&Digest::sum(b"two")).len(), 1);
        assert_eq!(quota.used("a"), 6);
        assert_eq!(quota.used("b"), 3);
    }

    #[test]
    fn test_shuffle_preserves_membership() {
        let copiers: Vec<Copier> = (0..5)
            .map(|i| Copier::new(format!("c{}", i), Arc::new(MemStore::new()) as Arc<dyn Store>))
            .collect();
        let shuffled = shuffle_copiers(&copiers);
        assert_eq!(shuffled.len(), copiers.len());
        let mut ids: Vec<&str> = shuffled.iter().map(|c| c.id()).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec!["c0", "c1", "c2", "c3", "c4"]);
    }
}
