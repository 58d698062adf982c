//! Minimum-copies placement
//!
//! Write-path policy: every shard must end up on at least `min` distinct
//! backends. Backends already owning the shard (from the startup listing
//! pass or deduplication within the stream) count toward the minimum, so
//! re-uploading an identical shard is avoided. New destinations are drawn at
//! random from the non-owners that can absorb the shard within quota.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::chunk::{Chunk, Res};
use crate::error::{Error, Result};
use crate::pipeline::{single, DynProcs, Processor, ResStream};

use super::{shuffle_copiers, Copier, CopiesReg, QuotaMan};

// =============================================================================
// Placement policy
// =============================================================================

/// Selects put destinations so each shard reaches `min` distinct backends
pub struct MinCopies {
    min: usize,
    copiers: Vec<Copier>,
    reg: Arc<CopiesReg>,
    quota: Arc<QuotaMan>,
}

impl MinCopies {
    pub fn new(
        min: usize,
        copiers: Vec<Copier>,
        reg: Arc<CopiesReg>,
        quota: Arc<QuotaMan>,
    ) -> Self {
        Self {
            min,
            copiers,
            reg,
            quota,
        }
    }
}

#[async_trait]
impl DynProcs for MinCopies {
    async fn procs(&self, chunk: &Chunk) -> Result<Vec<Arc<dyn Processor>>> {
        let hash = chunk
            .hash()
            .ok_or_else(|| Error::Internal("chunk without digest at placement stage".into()))?;

        let owners = self.reg.owners(&hash);
        let missing = self.min.saturating_sub(owners.len());
        if missing == 0 {
            debug!(shard = %hash, owners = owners.len(), "already at minimum copies");
            return Ok(Vec::new());
        }

        let size = chunk.data().len() as u64;
        let mut selected: Vec<Copier> = Vec::with_capacity(missing);
        for copier in shuffle_copiers(&self.copiers) {
            if selected.len() == missing {
                break;
            }
            if owners.contains(copier.id()) {
                continue;
            }
            if self.quota.reserve(copier.id(), size) {
                selected.push(copier);
            }
        }

        if selected.len() < missing {
            // Nothing will be put; hand back the room already reserved so
            // other in-flight shards are not refused space that went unused.
            for copier in &selected {
                self.quota.release(copier.id(), size);
            }
            return Err(Error::NotEnoughDestinations {
                eligible: owners.len() + selected.len(),
                required: self.min,
            });
        }

        Ok(selected
            .into_iter()
            .map(|copier| {
                Arc::new(CopyProc {
                    copier,
                    reg: self.reg.clone(),
                }) as Arc<dyn Processor>
            })
            .collect())
    }
}

// =============================================================================
// Copy stage
// =============================================================================

/// Puts one shard to one backend and registers the new owner
struct CopyProc {
    copier: Copier,
    reg: Arc<CopiesReg>,
}

#[async_trait]
impl Processor for CopyProc {
    async fn process(&self, chunk: Chunk) -> ResStream {
        let Some(hash) = chunk.hash() else {
            let err = Error::Internal("chunk without digest at copy stage".into());
            return single(Res::err(chunk, err));
        };
        match self.copier.store().put(&hash, chunk.data().clone()).await {
            Ok(()) => {
                self.reg.add_owner(&hash, self.copier.id());
                debug!(copier = self.copier.id(), shard = %hash, "stored copy");
                single(Res::ok(chunk))
            }
            Err(e) => single(Res::err(chunk, e)),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::Digest;
    use crate::stores::MemStore;
    use bytes::Bytes;
    use futures::StreamExt;

    fn shard(data: &'static [u8]) -> Chunk {
        Chunk::new(0, Bytes::from_static(data)).with_hash(Digest::sum(data))
    }

    fn setup(n: usize) -> (Vec<Arc<MemStore>>, Vec<Copier>) {
        let stores: Vec<Arc<MemStore>> = (0..n).map(|_| Arc::new(MemStore::new())).collect();
        let copiers = stores
            .iter()
            .enumerate()
            .map(|(i, s)| Copier::new(format!("s{}", i), s.clone() as Arc<dyn crate::stores::Store>))
            .collect();
        (stores, copiers)
    }

    async fn run_all(procs: Vec<Arc<dyn Processor>>, chunk: &Chunk) {
        for proc in procs {
            let res = proc.process(chunk.clone()).await.next().await.unwrap();
            assert!(res.err.is_none());
        }
    }

    #[tokio::test]
    async fn test_places_min_copies() {
        let (stores, copiers) = setup(3);
        let reg = Arc::new(CopiesReg::new());
        let quota = Arc::new(QuotaMan::new());
        let placement = MinCopies::new(2, copiers, reg.clone(), quota);

        let chunk = shard(b"replicate me");
        let procs = placement.procs(&chunk).await.unwrap();
        assert_eq!(procs.len(), 2);
        run_all(procs, &chunk).await;

        let hash = chunk.hash().unwrap();
        assert_eq!(reg.owners(&hash).len(), 2);
        let held: usize = stores.iter().map(|s| s.len()).sum();
        assert_eq!(held, 2);
    }

    #[tokio::test]
    async fn test_existing_owners_count() {
        let (_stores, copiers) = setup(3);
        let reg = Arc::new(CopiesReg::new());
        let quota = Arc::new(QuotaMan::new());

        let chunk = shard(b"already half placed");
        reg.add_owner(&chunk.hash().unwrap(), "s0");

        let placement = MinCopies::new(2, copiers, reg.clone(), quota);
        let procs = placement.procs(&chunk).await.unwrap();
        assert_eq!(procs.len(), 1);

        // and once the minimum is met, nothing further is scheduled
        run_all(procs, &chunk).await;
        assert!(placement.procs(&chunk).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_quota_steers_placement() {
        let (stores, copiers) = setup(2);
        let reg = Arc::new(CopiesReg::new());
        let quota = Arc::new(QuotaMan::new());
        quota.set_capacity("s0", 4); // too small for the shard below

        let placement = MinCopies::new(1, copiers, reg, quota);
        let chunk = shard(b"does not fit in s0");
        let procs = placement.procs(&chunk).await.unwrap();
        assert_eq!(procs.len(), 1);
        run_all(procs, &chunk).await;

        assert!(stores[0].is_empty());
        assert_eq!(stores[1].len(), 1);
    }

    #[tokio::test]
    async fn test_shortfall_releases_reservations() {
        let (_stores, copiers) = setup(2);
        let reg = Arc::new(CopiesReg::new());
        let quota = Arc::new(QuotaMan::new());
        quota.set_capacity("s0", 1024);
        quota.set_capacity("s1", 0);

        // Two copies wanted, only s0 has room: the shard cannot be placed,
        // and the room reserved on s0 along the way must come back.
        let placement = MinCopies::new(2, copiers, reg, quota.clone());
        let err = placement
            .procs(&shard(b"one seat short"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::NotEnoughDestinations { .. }));
        assert_eq!(quota.used("s0"), 0);
        assert_eq!(quota.used("s1"), 0);
    }

    #[tokio::test]
    async fn test_shortfall_is_an_error() {
        let (_stores, copiers) = setup(2);
        let reg = Arc::new(CopiesReg::new());
        let quota = Arc::new(QuotaMan::new());
        quota.set_capacity("s0", 0);
        quota.set_capacity("s1", 0);

        let placement = MinCopies::new(2, copiers, reg, quota);
        let err = placement
            .procs(&shard(b"nowhere to go"))
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            Error::NotEnoughDestinations {
                eligible: 0,
                required: 2
            }
        ));
    }
}
